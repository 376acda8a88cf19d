//! Input event PDUs.
//!
//! Keyboard and mouse travel over the compact FastPath input path once the
//! session is active; the Slow-Path input PDU of the pre-FastPath window is
//! recognized in the ShareData dispatch and carried raw.

pub mod fast_path;
mod mouse;

pub use mouse::{MousePdu, MouseXPdu, PointerFlags, PointerXFlags, WHEEL_ROTATION_MASK};
