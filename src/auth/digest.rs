//! Salted secret digests for passwords and access-token secrets.
//!
//! Digest = hex(HMAC-SHA256(key = salt, message = secret)).  Verification
//! goes through [`Mac::verify_slice`] so the comparison is constant-time.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub fn new_salt() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

pub fn digest_secret(salt: &str, secret: &str) -> String {
    // HMAC accepts keys of any length, so new_from_slice cannot fail here.
    let mut mac = match HmacSha256::new_from_slice(salt.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(secret.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

pub fn verify_secret(salt: &str, secret: &str, expected_hex: &str) -> bool {
    let Ok(expected) = hex::decode(expected_hex) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(salt.as_bytes()) else {
        return false;
    };
    mac.update(secret.as_bytes());
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_verifies() {
        let salt = new_salt();
        let digest = digest_secret(&salt, "s3cr3t");
        assert_eq!(digest.len(), 64);
        assert!(verify_secret(&salt, "s3cr3t", &digest));
        assert!(!verify_secret(&salt, "wrong", &digest));
        assert!(!verify_secret("other-salt", "s3cr3t", &digest));
    }

    #[test]
    fn salts_differ() {
        assert_ne!(new_salt(), new_salt());
    }

    #[test]
    fn garbage_digest_never_verifies() {
        assert!(!verify_secret("salt", "s3cr3t", "not-hex"));
        assert!(!verify_secret("salt", "s3cr3t", ""));
    }
}
