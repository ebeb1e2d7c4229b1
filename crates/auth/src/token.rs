//! Opaque bearer tokens, hashed at rest.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};

use versenotes_core::UserId;

/// Plaintext token length at the HTTP boundary.
pub const TOKEN_LENGTH: usize = 26;

// Base32 alphabet; 26 characters of it carry 130 bits of entropy.
const TOKEN_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

/// What a token is good for. Lifetimes differ per scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Activation,
    Authentication,
    PasswordReset,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Activation => "activation",
            Scope::Authentication => "authentication",
            Scope::PasswordReset => "password-reset",
        }
    }

    /// How long a fresh token of this scope lives.
    pub fn ttl(&self) -> Duration {
        match self {
            Scope::Activation => Duration::days(3),
            Scope::Authentication => Duration::hours(24),
            Scope::PasswordReset => Duration::minutes(45),
        }
    }
}

/// A freshly minted token.
///
/// The plaintext leaves the process exactly once, to the user; only the
/// SHA-256 hash is ever stored.
#[derive(Debug, Clone)]
pub struct Token {
    pub plaintext: String,
    pub hash: Vec<u8>,
    pub user_id: UserId,
    pub expiry: DateTime<Utc>,
    pub scope: Scope,
}

impl Token {
    pub fn new(user_id: UserId, scope: Scope, now: DateTime<Utc>) -> Self {
        let plaintext = generate_plaintext();
        Self {
            hash: hash_token(&plaintext),
            plaintext,
            user_id,
            expiry: now + scope.ttl(),
            scope,
        }
    }
}

pub fn generate_plaintext() -> String {
    let mut rng = rand::thread_rng();
    (0..TOKEN_LENGTH)
        .map(|_| {
            let idx = rng.gen_range(0..TOKEN_ALPHABET.len());
            TOKEN_ALPHABET[idx] as char
        })
        .collect()
}

pub fn hash_token(plaintext: &str) -> Vec<u8> {
    Sha256::digest(plaintext.as_bytes()).to_vec()
}

/// Cheap shape check so malformed tokens never reach the cache or the
/// database.
pub fn is_well_formed(token: &str) -> bool {
    token.len() == TOKEN_LENGTH && token.bytes().all(|b| b.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_tokens_have_the_documented_shape() {
        for _ in 0..32 {
            let plaintext = generate_plaintext();
            assert_eq!(plaintext.len(), TOKEN_LENGTH);
            assert!(plaintext.bytes().all(|b| TOKEN_ALPHABET.contains(&b)));
            assert!(is_well_formed(&plaintext));
        }
    }

    #[test]
    fn hashing_is_stable_and_plaintext_free() {
        let plaintext = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
        let first = hash_token(plaintext);
        assert_eq!(first, hash_token(plaintext));
        assert_eq!(first.len(), 32);
        assert_ne!(first.as_slice(), plaintext.as_bytes());
    }

    #[test]
    fn shape_check_rejects_wrong_lengths_and_characters() {
        assert!(!is_well_formed(""));
        assert!(!is_well_formed("SHORT"));
        assert!(!is_well_formed(&"A".repeat(27)));
        assert!(!is_well_formed("ABCDEFGHIJKLMNOPQRSTUVWXY!"));
        assert!(is_well_formed(&"A".repeat(26)));
    }

    #[test]
    fn token_expiry_follows_scope_ttl() {
        let now = Utc::now();
        let token = Token::new(UserId::new(7), Scope::PasswordReset, now);
        assert_eq!(token.expiry, now + Duration::minutes(45));
        assert_eq!(token.scope.as_str(), "password-reset");
        assert_eq!(token.hash, hash_token(&token.plaintext));
    }
}
