//! Webhook signature and token verification.
//!
//! Providers authenticate deliveries in different ways:
//!
//! - GitHub signs the body with HMAC-SHA256 and sends `sha256=<hex>` in
//!   `X-Hub-Signature-256`.
//! - Gogs sends the same HMAC as bare hex in `X-Gogs-Signature`.
//! - Travis sends `hex(sha256(repo_slug + secret))` in `Authorization`.
//! - GitLab and Gitee send the shared secret itself as a token header.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Parses a GitHub signature header (e.g., "sha256=abc123...") into raw bytes.
///
/// Returns `None` for malformed headers (missing prefix, invalid hex, etc.).
///
/// # Examples
///
/// ```
/// use gitsync::webhooks::parse_signature_header;
///
/// assert!(parse_signature_header("sha256=abcd1234").is_some());
/// assert!(parse_signature_header("abcd1234").is_none());
/// assert!(parse_signature_header("sha1=abcd1234").is_none());
/// assert!(parse_signature_header("sha256=xyz").is_none());
/// ```
pub fn parse_signature_header(header: &str) -> Option<Vec<u8>> {
    let hex_sig = header.strip_prefix("sha256=")?;
    hex::decode(hex_sig).ok()
}

/// Computes the HMAC-SHA256 signature of a payload using the given secret.
pub fn compute_signature(payload: &[u8], secret: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

/// Formats a signature as a GitHub-style header value, `sha256=<hex>`.
pub fn format_signature_header(signature: &[u8]) -> String {
    format!("sha256={}", hex::encode(signature))
}

/// Verifies a GitHub `X-Hub-Signature-256` header against the payload.
///
/// Uses constant-time comparison.
///
/// # Examples
///
/// ```
/// use gitsync::webhooks::{compute_signature, format_signature_header, verify_signature};
///
/// let header = format_signature_header(&compute_signature(b"{}", b"s3cret"));
/// assert!(verify_signature(b"{}", &header, b"s3cret"));
/// assert!(!verify_signature(b"{}", &header, b"other"));
/// ```
pub fn verify_signature(payload: &[u8], signature_header: &str, secret: &[u8]) -> bool {
    match parse_signature_header(signature_header) {
        Some(expected) => verify_mac(payload, &expected, secret),
        None => false,
    }
}

/// Verifies a bare-hex HMAC-SHA256 signature, as sent by Gogs.
pub fn verify_hex_signature(payload: &[u8], hex_signature: &str, secret: &[u8]) -> bool {
    match hex::decode(hex_signature.trim()) {
        Ok(expected) => verify_mac(payload, &expected, secret),
        Err(_) => false,
    }
}

fn verify_mac(payload: &[u8], expected: &[u8], secret: &[u8]) -> bool {
    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(payload);
    mac.verify_slice(expected).is_ok()
}

/// The Travis `Authorization` value for a repository slug and secret.
///
/// # Examples
///
/// ```
/// use gitsync::webhooks::travis_signature;
///
/// let sig = travis_signature("owner/repo", "secret");
/// assert_eq!(sig.len(), 64);
/// ```
pub fn travis_signature(repo_slug: &str, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(repo_slug.as_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parse_signature_header_valid() {
        assert_eq!(
            parse_signature_header("sha256=1234abcd"),
            Some(vec![0x12, 0x34, 0xab, 0xcd])
        );
        assert_eq!(
            parse_signature_header("sha256=ABCD1234"),
            Some(vec![0xab, 0xcd, 0x12, 0x34])
        );
    }

    #[test]
    fn parse_signature_header_rejects_malformed() {
        assert_eq!(parse_signature_header(""), None);
        assert_eq!(parse_signature_header("1234abcd"), None);
        assert_eq!(parse_signature_header("sha1=1234abcd"), None);
        assert_eq!(parse_signature_header("sha256=abc"), None);
    }

    /// Example from GitHub's webhook validation docs.
    #[test]
    fn github_documentation_example() {
        let sig = compute_signature(b"Hello, World!", b"It's a Secret to Everybody");
        assert_eq!(
            format_signature_header(&sig),
            "sha256=757107ea0eb2509fc211221cce984b8a37570b6d7586c22c46f4379c8b043e17"
        );
    }

    #[test]
    fn verify_signature_rejects_modified_payload() {
        let header = format_signature_header(&compute_signature(b"original", b"secret"));
        assert!(verify_signature(b"original", &header, b"secret"));
        assert!(!verify_signature(b"modified", &header, b"secret"));
    }

    #[test]
    fn verify_signature_malformed_header_returns_false() {
        for header in ["", "sha256=", "sha256=invalid", "sha1=abc123", "not-a-header"] {
            assert!(!verify_signature(b"test", header, b"secret"), "{header}");
        }
    }

    #[test]
    fn hex_signature_accepts_bare_hex() {
        let sig = hex::encode(compute_signature(b"{\"ref\":\"x\"}", b"gogs"));
        assert!(verify_hex_signature(b"{\"ref\":\"x\"}", &sig, b"gogs"));
        assert!(!verify_hex_signature(b"{\"ref\":\"x\"}", &sig, b"nope"));
        assert!(!verify_hex_signature(b"{}", "zz", b"gogs"));
    }

    #[test]
    fn travis_signature_is_sha256_of_slug_then_secret() {
        let expected = hex::encode(Sha256::digest(b"owner/reposecret"));
        assert_eq!(travis_signature("owner/repo", "secret"), expected);
        assert_ne!(travis_signature("owner/repo", "other"), expected);
    }

    proptest! {
        #[test]
        fn sign_then_verify_succeeds(payload: Vec<u8>, secret in "[ -~]{1,32}") {
            let header = format_signature_header(&compute_signature(&payload, secret.as_bytes()));
            prop_assert!(verify_signature(&payload, &header, secret.as_bytes()));
            let bare = hex::encode(compute_signature(&payload, secret.as_bytes()));
            prop_assert!(verify_hex_signature(&payload, &bare, secret.as_bytes()));
        }

        #[test]
        fn wrong_secret_fails(
            payload: Vec<u8>,
            secret1 in "[a-z]{1,16}",
            secret2 in "[a-z]{1,16}",
        ) {
            prop_assume!(secret1 != secret2);
            let header = format_signature_header(&compute_signature(&payload, secret1.as_bytes()));
            prop_assert!(!verify_signature(&payload, &header, secret2.as_bytes()));
        }

        #[test]
        fn malformed_header_never_panics(header: String, payload: Vec<u8>) {
            let _ = verify_signature(&payload, &header, b"secret");
            let _ = verify_hex_signature(&payload, &header, b"secret");
        }
    }
}
