//! Provider webhook verifiers and parsers
//!
//! One module per inbound source. Each exposes a verify step (signature or
//! shared secret) and a parser that turns the provider payload into bounce
//! records or structured events; the HTTP layer stays source-agnostic.

pub mod azure;
pub mod forwardemail;
pub mod postmark;
pub mod sendgrid;
pub mod ses;
pub mod shopify;

/// Constant-time byte comparison for MAC checks
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
        assert!(constant_time_eq(b"", b""));
    }
}
