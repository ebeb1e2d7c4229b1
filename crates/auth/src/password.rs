//! Password hashing.
//!
//! bcrypt is CPU-bound; handlers run these on the blocking pool.

use bcrypt::{hash, verify, DEFAULT_COST};

use crate::AuthError;

pub fn hash_password(plaintext: &str) -> Result<String, AuthError> {
    hash(plaintext, DEFAULT_COST).map_err(|e| AuthError::Internal(e.to_string()))
}

pub fn verify_password(plaintext: &str, hashed: &str) -> Result<bool, AuthError> {
    verify(plaintext, hashed).map_err(|e| AuthError::Internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_verifies() {
        let hashed = hash_password("pa55word-enough").unwrap();
        assert!(verify_password("pa55word-enough", &hashed).unwrap());
        assert!(!verify_password("wrong-password", &hashed).unwrap());
    }
}
