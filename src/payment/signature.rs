//! HMAC-SHA256 signing for gateway requests and callbacks.
//!
//! Both directions share one canonicalization rule: sort parameter names
//! lexicographically (the signature field itself is never included) and join
//! `name=value` pairs with `&`. The two modes differ only in key derivation:
//! requests we initiate are keyed with the lowercase-hex SHA-256 digest of the
//! shared secret, while inbound callbacks are keyed with the secret bytes
//! directly.

use std::collections::BTreeMap;

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignMode {
    /// Outbound requests and status queries: key = hex(SHA-256(secret)).
    TokenHash,
    /// Inbound callback verification: key = secret bytes.
    DirectSecret,
}

/// Deterministic parameter string: `a=1&b=2&...` in lexicographic name order.
/// Callers render numeric values as plain base-10 text before building the map.
pub fn canonicalize(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

pub fn sign(params: &BTreeMap<String, String>, secret: &str, mode: SignMode) -> String {
    let mut mac = keyed_mac(secret, mode);
    mac.update(canonicalize(params).as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time comparison of the received hex signature against the
/// expected one. Malformed hex is simply a failed verification.
pub fn verify(
    params: &BTreeMap<String, String>,
    secret: &str,
    received: &str,
    mode: SignMode,
) -> bool {
    let Ok(received) = hex::decode(received) else {
        return false;
    };
    let mut mac = keyed_mac(secret, mode);
    mac.update(canonicalize(params).as_bytes());
    mac.verify_slice(&received).is_ok()
}

fn keyed_mac(secret: &str, mode: SignMode) -> HmacSha256 {
    let key = match mode {
        SignMode::TokenHash => hex::encode(Sha256::digest(secret.as_bytes())).into_bytes(),
        SignMode::DirectSecret => secret.as_bytes().to_vec(),
    };
    // HMAC accepts keys of any length.
    HmacSha256::new_from_slice(&key).expect("hmac key")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn canonicalize_sorts_names() {
        let p = params(&[("order_id", "A1"), ("amount", "200"), ("description", "x")]);
        assert_eq!(canonicalize(&p), "amount=200&description=x&order_id=A1");
    }

    #[test]
    fn sign_then_verify_round_trips_in_both_modes() {
        let p = params(&[("amount", "200"), ("order_id", "20240101120000123")]);
        for mode in [SignMode::TokenHash, SignMode::DirectSecret] {
            let sig = sign(&p, "s3cret", mode);
            assert!(verify(&p, "s3cret", &sig, mode));
        }
    }

    #[test]
    fn modes_produce_distinct_signatures() {
        let p = params(&[("transaction_id", "tx-1")]);
        let a = sign(&p, "s3cret", SignMode::TokenHash);
        let b = sign(&p, "s3cret", SignMode::DirectSecret);
        assert_ne!(a, b);
    }

    #[test]
    fn flipping_any_parameter_breaks_verification() {
        let p = params(&[
            ("amount", "200"),
            ("status", "completed"),
            ("transaction_id", "tx-1"),
        ]);
        let sig = sign(&p, "s3cret", SignMode::DirectSecret);
        for key in ["amount", "status", "transaction_id"] {
            let mut tampered = p.clone();
            tampered.insert(key.to_string(), "tampered".to_string());
            assert!(!verify(&tampered, "s3cret", &sig, SignMode::DirectSecret));
        }
    }

    #[test]
    fn wrong_secret_fails() {
        let p = params(&[("amount", "200")]);
        let sig = sign(&p, "s3cret", SignMode::TokenHash);
        assert!(!verify(&p, "other", &sig, SignMode::TokenHash));
    }

    #[test]
    fn malformed_hex_is_rejected() {
        let p = params(&[("amount", "200")]);
        assert!(!verify(&p, "s3cret", "not-hex!", SignMode::DirectSecret));
        assert!(!verify(&p, "s3cret", "", SignMode::DirectSecret));
    }

    #[test]
    fn signature_is_lowercase_hex() {
        let p = params(&[("amount", "200")]);
        let sig = sign(&p, "s3cret", SignMode::TokenHash);
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
