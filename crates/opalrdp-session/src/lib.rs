//! The steady state of a connected session: FastPath and X.224 frame
//! processing, per-direction session crypto, display caches, and input
//! encoding.

#[macro_use]
extern crate tracing;

#[macro_use]
mod macros;

pub mod crypto;
pub mod fast_path;
pub mod image;
pub mod x224;

mod active_stage;

use core::fmt;

pub use active_stage::{ActiveStage, ActiveStageOutput, GracefulDisconnectReason};

pub type SessionResult<T> = Result<T, SessionError>;

#[non_exhaustive]
#[derive(Debug)]
pub enum SessionErrorKind {
    Encode(opalrdp_core::EncodeError),
    Decode(opalrdp_core::DecodeError),
    Connector(opalrdp_connector::ConnectorError),
    Compression(opalrdp_bulk::BulkError),
    /// A payload needed the session cipher before the keys were set.
    CipherNotInitialized,
    Reason(String),
    General,
    Custom,
}

impl fmt::Display for SessionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            SessionErrorKind::Encode(_) => write!(f, "encode error"),
            SessionErrorKind::Decode(_) => write!(f, "decode error"),
            SessionErrorKind::Connector(_) => write!(f, "connector error"),
            SessionErrorKind::Compression(_) => write!(f, "compression error"),
            SessionErrorKind::CipherNotInitialized => write!(f, "session cipher is not initialized"),
            SessionErrorKind::Reason(description) => write!(f, "reason: {description}"),
            SessionErrorKind::General => write!(f, "general error"),
            SessionErrorKind::Custom => write!(f, "custom error"),
        }
    }
}

impl std::error::Error for SessionErrorKind {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self {
            SessionErrorKind::Encode(e) => Some(e),
            SessionErrorKind::Decode(e) => Some(e),
            SessionErrorKind::Connector(e) => Some(e),
            SessionErrorKind::Compression(e) => Some(e),
            SessionErrorKind::CipherNotInitialized => None,
            SessionErrorKind::Reason(_) => None,
            SessionErrorKind::General => None,
            SessionErrorKind::Custom => None,
        }
    }
}

pub type SessionError = opalrdp_error::Error<SessionErrorKind>;

pub trait SessionErrorExt {
    fn encode(error: opalrdp_core::EncodeError) -> Self;
    fn decode(error: opalrdp_core::DecodeError) -> Self;
    fn connector(error: opalrdp_connector::ConnectorError) -> Self;
    fn compression(error: opalrdp_bulk::BulkError) -> Self;
    fn general(context: &'static str) -> Self;
    fn reason(context: &'static str, reason: impl Into<String>) -> Self;
    fn custom<E>(context: &'static str, e: E) -> Self
    where
        E: std::error::Error + Sync + Send + 'static;
}

impl SessionErrorExt for SessionError {
    fn encode(error: opalrdp_core::EncodeError) -> Self {
        Self::new("encode error", SessionErrorKind::Encode(error))
    }

    fn decode(error: opalrdp_core::DecodeError) -> Self {
        Self::new("decode error", SessionErrorKind::Decode(error))
    }

    fn connector(error: opalrdp_connector::ConnectorError) -> Self {
        Self::new("connector error", SessionErrorKind::Connector(error))
    }

    fn compression(error: opalrdp_bulk::BulkError) -> Self {
        Self::new("compression error", SessionErrorKind::Compression(error))
    }

    fn general(context: &'static str) -> Self {
        Self::new(context, SessionErrorKind::General)
    }

    fn reason(context: &'static str, reason: impl Into<String>) -> Self {
        Self::new(context, SessionErrorKind::Reason(reason.into()))
    }

    fn custom<E>(context: &'static str, e: E) -> Self
    where
        E: std::error::Error + Sync + Send + 'static,
    {
        Self::new(context, SessionErrorKind::Custom).with_source(e)
    }
}
