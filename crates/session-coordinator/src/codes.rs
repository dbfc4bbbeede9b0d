//! Room code generation and validation.
//!
//! Codes are 6-digit numeric strings without a leading zero, short
//! enough to read over the phone. Uniqueness among non-ended rooms is
//! the registry's job; this module only generates and validates.

use rand::Rng;

/// Code length in characters.
pub const CODE_LENGTH: usize = 6;

const CODE_MIN: u32 = 100_000;
const CODE_MAX: u32 = 1_000_000;

/// Generate a candidate room code.
pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> String {
    rng.gen_range(CODE_MIN..CODE_MAX).to_string()
}

/// Validate the shape of a client-supplied code.
#[must_use]
pub fn is_valid(code: &str) -> bool {
    code.len() == CODE_LENGTH
        && code.bytes().all(|b| b.is_ascii_digit())
        && !code.starts_with('0')
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_codes_are_valid() {
        let mut rng = rand::thread_rng();
        for _ in 0..1000 {
            let code = generate(&mut rng);
            assert!(is_valid(&code), "invalid generated code: {code}");
        }
    }

    #[test]
    fn test_validation_rejects_bad_shapes() {
        assert!(!is_valid(""));
        assert!(!is_valid("12345"));
        assert!(!is_valid("1234567"));
        assert!(!is_valid("12a456"));
        assert!(!is_valid("012345"));
        assert!(is_valid("100000"));
        assert!(is_valid("999999"));
    }
}
