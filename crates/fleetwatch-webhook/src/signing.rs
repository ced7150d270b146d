//! HMAC-SHA-256 request signing, per spec.md §4.G step 6.

use ring::hmac;

/// `lowercase-hex(HMAC-SHA-256(secret, body))`, computed over the
/// exact bytes that go out on the wire — the signature covers the
/// serialized payload, not a re-derived one, so callers must sign
/// after serialization, never before.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes());
    let tag = hmac::sign(&key, body);
    hex::encode(tag.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_deterministic_for_the_same_body() {
        let a = sign("shh", b"{\"a\":1}");
        let b = sign("shh", b"{\"a\":1}");
        assert_eq!(a, b);
    }

    #[test]
    fn signature_changes_with_the_secret() {
        let a = sign("secret-one", b"body");
        let b = sign("secret-two", b"body");
        assert_ne!(a, b);
    }

    #[test]
    fn signature_is_lowercase_hex() {
        let sig = sign("secret", b"body");
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(sig.len(), 64);
    }
}
