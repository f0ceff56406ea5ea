//! Authentication plugin scrambles.
//!
//! Two plugins are supported:
//! - `mysql_native_password`: `SHA1(pw) XOR SHA1(seed + SHA1(SHA1(pw)))`
//! - `caching_sha2_password` fast path:
//!   `SHA256(pw) XOR SHA256(SHA256(SHA256(pw)) + seed)`
//!
//! The caching_sha2 full-auth path needs TLS or server RSA key exchange and
//! is not carried; a server demanding it gets an authentication error.

use sha1::Sha1;
use sha2::{Digest, Sha256};

/// Well-known authentication plugin names.
pub mod plugins {
    pub const MYSQL_NATIVE_PASSWORD: &str = "mysql_native_password";
    pub const CACHING_SHA2_PASSWORD: &str = "caching_sha2_password";
}

/// Status bytes in caching_sha2_password auth-more-data packets.
pub mod sha2_status {
    /// Fast auth succeeded; an OK packet follows.
    pub const FAST_AUTH_SUCCESS: u8 = 0x03;
    /// Server wants the full exchange (TLS or RSA).
    pub const PERFORM_FULL_AUTH: u8 = 0x04;
}

/// Marker byte announcing an auth-switch request packet.
pub const AUTH_SWITCH_MARKER: u8 = 0xFE;

/// Marker byte announcing an auth-more-data packet.
pub const AUTH_MORE_DATA_MARKER: u8 = 0x01;

/// Compute the scramble for the named plugin.
///
/// Returns `None` for a plugin this driver cannot answer. An empty password
/// always yields an empty response.
pub fn scramble_for(plugin: &str, password: &str, seed: &[u8]) -> Option<Vec<u8>> {
    match plugin {
        plugins::MYSQL_NATIVE_PASSWORD => Some(native_password_scramble(password, seed)),
        plugins::CACHING_SHA2_PASSWORD => Some(sha2_fast_scramble(password, seed)),
        _ => None,
    }
}

/// `mysql_native_password` response: 20 bytes, empty for an empty password.
pub fn native_password_scramble(password: &str, seed: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }
    let seed = clip_seed(seed);

    let stage1 = sha1_of(&[password.as_bytes()]);
    let stage2 = sha1_of(&[&stage1]);
    let stage3 = sha1_of(&[seed, &stage2]);

    xor_bytes(&stage1, &stage3)
}

/// `caching_sha2_password` fast-path response: 32 bytes, empty for an empty
/// password.
pub fn sha2_fast_scramble(password: &str, seed: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }
    let seed = clip_seed(seed);

    let hash = sha256_of(&[password.as_bytes()]);
    let hash_hash = sha256_of(&[&hash]);
    let mask = sha256_of(&[&hash_hash, seed]);

    xor_bytes(&hash, &mask)
}

// Servers send the 20-byte scramble with a trailing NUL.
fn clip_seed(seed: &[u8]) -> &[u8] {
    if seed.len() == 21 && seed.last() == Some(&0) {
        &seed[..20]
    } else {
        seed
    }
}

fn sha1_of(parts: &[&[u8]]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

fn sha256_of(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

fn xor_bytes(a: &[u8], b: &[u8]) -> Vec<u8> {
    a.iter().zip(b.iter()).map(|(x, y)| x ^ y).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_password_yields_empty_response() {
        assert!(native_password_scramble("", &[1; 20]).is_empty());
        assert!(sha2_fast_scramble("", &[1; 20]).is_empty());
    }

    #[test]
    fn native_scramble_shape() {
        let seed = [0x5Au8; 20];
        let a = native_password_scramble("secret", &seed);
        let b = native_password_scramble("secret", &seed);
        assert_eq!(a.len(), 20);
        assert_eq!(a, b);
        assert_ne!(a, native_password_scramble("other", &seed));
    }

    #[test]
    fn sha2_scramble_shape() {
        let seed = [0x11u8; 20];
        let a = sha2_fast_scramble("secret", &seed);
        assert_eq!(a.len(), 32);
        assert_ne!(a, sha2_fast_scramble("secret", &[0x22u8; 20]));
    }

    #[test]
    fn trailing_nul_on_seed_is_ignored() {
        let mut padded = vec![0x33u8; 20];
        let bare = padded.clone();
        padded.push(0);
        assert_eq!(
            native_password_scramble("pw", &padded),
            native_password_scramble("pw", &bare)
        );
        assert_eq!(
            sha2_fast_scramble("pw", &padded),
            sha2_fast_scramble("pw", &bare)
        );
    }

    #[test]
    fn unknown_plugin_is_rejected() {
        assert!(scramble_for("sha256_password", "pw", &[0; 20]).is_none());
        assert!(scramble_for(plugins::MYSQL_NATIVE_PASSWORD, "pw", &[0; 20]).is_some());
    }
}
