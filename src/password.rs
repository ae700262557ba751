//! Two-layer password handling.
//!
//! Clients never send plaintext: the wire carries `base64(md5(plaintext))`,
//! a legacy of the original client population. At rest that wire form is
//! hashed again with Argon2. Both layers are a hard compatibility contract;
//! do not change one without a migration plan for the other.

use argon2::Argon2;
use argon2::password_hash::{
    PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng,
};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use md5::{Digest, Md5};
use rand::Rng;

/// Length of the wire form: base64 of a 16-byte MD5 digest.
const WIRE_LEN: usize = 24;

/// Charset for generated recovery passwords.
const PASSWORD_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ1234567890!$%^&*?";

/// Compute the wire form of a plaintext password.
pub fn wire_hash(plaintext: &str) -> String {
    BASE64.encode(Md5::digest(plaintext.as_bytes()))
}

/// Check that a client-supplied password has the documented wire syntax.
pub fn valid_wire_syntax(password: &str) -> bool {
    password.len() == WIRE_LEN
        && matches!(BASE64.decode(password), Ok(digest) if digest.len() == 16)
}

/// Hash a wire-form password for storage.
pub fn storage_hash(wire_password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(wire_password.as_bytes(), &salt)?
        .to_string())
}

/// Verify a wire-form password against a stored hash.
pub fn verify(stored: &str, wire_password: &str) -> bool {
    match PasswordHash::new(stored) {
        Ok(parsed) => Argon2::default()
            .verify_password(wire_password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// Generate a random recovery password.
///
/// Returns `(plaintext, wire_form)`: the plaintext is emailed to the user,
/// the wire form is what their client will send on the next login.
pub fn generate() -> (String, String) {
    let mut rng = rand::thread_rng();
    let plaintext: String = (0..10)
        .map(|_| PASSWORD_CHARSET[rng.gen_range(0..PASSWORD_CHARSET.len())] as char)
        .collect();
    let wire = wire_hash(&plaintext);
    (plaintext, wire)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_hash_is_stable() {
        // md5("pass") = 1a1dc91c907325c69271ddf0c944bc72
        assert_eq!(wire_hash("pass"), "Gh3JHJBzJcaScd3wyUS8cg==");
    }

    #[test]
    fn wire_syntax_checks() {
        assert!(valid_wire_syntax(&wire_hash("anything")));
        assert!(!valid_wire_syntax("password"));
        assert!(!valid_wire_syntax(""));
        assert!(!valid_wire_syntax("!!!!!!!!!!!!!!!!!!!!!!!!"));
    }

    #[test]
    fn storage_round_trip() {
        let wire = wire_hash("s3cret");
        let stored = storage_hash(&wire).unwrap();
        assert!(verify(&stored, &wire));
        assert!(!verify(&stored, &wire_hash("wrong")));
        assert!(!verify("not-a-hash", &wire));
    }

    #[test]
    fn generated_passwords_have_wire_syntax() {
        let (plaintext, wire) = generate();
        assert_eq!(plaintext.len(), 10);
        assert!(valid_wire_syntax(&wire));
        assert_eq!(wire, wire_hash(&plaintext));
    }
}
