//! Request payload validation.

use std::collections::BTreeMap;

use axum::response::Response;

use crate::errors;

/// Collects per-field validation failures; the first failure per field wins.
#[derive(Debug, Default)]
pub struct Validator {
    errors: BTreeMap<&'static str, String>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&mut self, ok: bool, field: &'static str, message: impl Into<String>) {
        if !ok && !self.errors.contains_key(field) {
            self.errors.insert(field, message.into());
        }
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn finish(self) -> Result<(), Response> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(errors::failed_validation(self.errors))
        }
    }
}

pub fn validate_email(v: &mut Validator, email: &str) {
    v.check(!email.is_empty(), "email", "must be provided");
    v.check(
        email.contains('@') && email.len() <= 254,
        "email",
        "must be a valid email address",
    );
}

pub fn validate_password(v: &mut Validator, password: &str) {
    v.check(!password.is_empty(), "password", "must be provided");
    v.check(
        password.len() >= 8,
        "password",
        "must be at least 8 bytes long",
    );
    v.check(
        password.len() <= 72,
        "password",
        "must not be more than 72 bytes long",
    );
}

pub fn validate_username(v: &mut Validator, username: &str) {
    v.check(!username.is_empty(), "username", "must be provided");
    v.check(
        username.len() <= 500,
        "username",
        "must not be more than 500 bytes long",
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_input_passes() {
        let mut v = Validator::new();
        validate_email(&mut v, "a@example.test");
        validate_password(&mut v, "pa55word-enough");
        validate_username(&mut v, "alice");
        assert!(v.is_valid());
        assert!(v.finish().is_ok());
    }

    #[test]
    fn first_failure_per_field_wins() {
        let mut v = Validator::new();
        v.check(false, "email", "first");
        v.check(false, "email", "second");
        assert!(!v.is_valid());
    }

    #[test]
    fn email_must_look_like_an_address() {
        for bad in ["", "not-an-address", &format!("a@{}", "x".repeat(260))] {
            let mut v = Validator::new();
            validate_email(&mut v, bad);
            assert!(!v.is_valid(), "accepted email {bad:?}");
        }
    }

    #[test]
    fn password_length_is_bounded() {
        for bad in ["", "short", &"x".repeat(73)] {
            let mut v = Validator::new();
            validate_password(&mut v, bad);
            assert!(!v.is_valid(), "accepted password {bad:?}");
        }
    }
}
