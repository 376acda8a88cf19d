//! Legacy security layer primitives: RC4 stream cipher and the session key
//! ladder derived from the master secret and the exchanged randoms.

pub mod rc4;

use sha1::{Digest as _, Sha1};

/// RC4 session key length in bytes.
pub const SESSION_KEY_SIZE: usize = 16;

/// Direction salt for the client-to-server keystream.
const CLIENT_TO_SERVER_MAGIC: &[u8] = b"A";

/// Direction salt for the server-to-client keystream.
const SERVER_TO_CLIENT_MAGIC: &[u8] = b"BB";

/// Session keys for both directions, derived once per session.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKeys {
    pub encrypt_key: [u8; SESSION_KEY_SIZE],
    pub decrypt_key: [u8; SESSION_KEY_SIZE],
}

impl core::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        // key material is deliberately not printed
        f.debug_struct("SessionKeys").finish_non_exhaustive()
    }
}

/// Derives the per-direction RC4 keys.
///
/// Each key is `SHA-1(master ‖ magic ‖ client_random ‖ server_random)`
/// truncated to sixteen bytes, where the magic differentiates directions.
pub fn derive_session_keys(master_secret: &[u8], client_random: &[u8], server_random: &[u8]) -> SessionKeys {
    SessionKeys {
        encrypt_key: salted_digest(master_secret, CLIENT_TO_SERVER_MAGIC, client_random, server_random),
        decrypt_key: salted_digest(master_secret, SERVER_TO_CLIENT_MAGIC, client_random, server_random),
    }
}

fn salted_digest(
    master_secret: &[u8],
    magic: &[u8],
    client_random: &[u8],
    server_random: &[u8],
) -> [u8; SESSION_KEY_SIZE] {
    let mut sha1 = Sha1::new();
    sha1.update(master_secret);
    sha1.update(magic);
    sha1.update(client_random);
    sha1.update(server_random);
    let digest = sha1.finalize();

    let mut key = [0u8; SESSION_KEY_SIZE];
    key.copy_from_slice(&digest[..SESSION_KEY_SIZE]);
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directions_get_distinct_keys() {
        let master: Vec<u8> = (0x00..0x20).collect();
        let client_random: Vec<u8> = (0x20..0x40).collect();
        let server_random: Vec<u8> = (0x40..0x60).collect();

        let keys = derive_session_keys(&master, &client_random, &server_random);

        assert_ne!(keys.encrypt_key, keys.decrypt_key);
    }

    #[test]
    fn derivation_is_deterministic_in_every_input() {
        let keys_a = derive_session_keys(b"master", b"client", b"server");
        let keys_b = derive_session_keys(b"master", b"client", b"server");
        let keys_c = derive_session_keys(b"master", b"client", b"server2");

        assert_eq!(keys_a.encrypt_key, keys_b.encrypt_key);
        assert_eq!(keys_a.decrypt_key, keys_b.decrypt_key);
        assert_ne!(keys_a.encrypt_key, keys_c.encrypt_key);
    }
}
