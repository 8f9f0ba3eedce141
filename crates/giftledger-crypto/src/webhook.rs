// Payment provider webhook signatures
//
// The provider signs `"{timestamp}.{raw body}"` with HMAC-SHA256 under the
// endpoint secret and sends `t=<unix seconds>,v1=<hex digest>[,v1=...]` in the
// signature header. Several `v1` entries may be present while a secret is
// being rolled.

use anyhow::{anyhow, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Scheme name of the signatures we accept.
const SCHEME_V1: &str = "v1";

/// Parsed form of the signature header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    /// Unix timestamp the provider signed with.
    pub timestamp: i64,
    /// Hex-encoded `v1` signatures.
    pub signatures: Vec<String>,
}

/// Parses a `t=...,v1=...` signature header.
///
/// Unknown schemes are skipped. Fails if the timestamp is missing or malformed
/// or if no `v1` signature is present.
pub fn parse_signature_header(header: &str) -> Result<SignatureHeader> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let (key, value) = match part.trim().split_once('=') {
            Some(kv) => kv,
            None => continue,
        };
        match key {
            "t" => {
                let ts = value
                    .parse::<i64>()
                    .map_err(|e| anyhow!("Invalid signature timestamp '{}': {}", value, e))?;
                timestamp = Some(ts);
            }
            SCHEME_V1 => signatures.push(value.to_string()),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| anyhow!("Signature header has no timestamp"))?;
    if signatures.is_empty() {
        return Err(anyhow!("Signature header has no {} signature", SCHEME_V1));
    }

    Ok(SignatureHeader {
        timestamp,
        signatures,
    })
}

fn signed_mac(secret: &str, timestamp: i64, payload: &[u8]) -> Result<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow!("Invalid webhook secret: {}", e))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

/// Computes the hex `v1` signature for a payload.
pub fn compute_signature(secret: &str, timestamp: i64, payload: &[u8]) -> Result<String> {
    let mac = signed_mac(secret, timestamp, payload)?;
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Builds a complete signature header value for a payload.
pub fn signature_header(secret: &str, timestamp: i64, payload: &[u8]) -> Result<String> {
    let signature = compute_signature(secret, timestamp, payload)?;
    Ok(format!("t={},{}={}", timestamp, SCHEME_V1, signature))
}

/// Verifies a webhook signature header against the raw request body.
///
/// `tolerance_secs` bounds the distance between the signed timestamp and
/// `now`; a tolerance of 0 disables the freshness check. Digest comparison is
/// constant-time.
pub fn verify_webhook_signature(
    header: &str,
    payload: &[u8],
    secret: &str,
    tolerance_secs: i64,
    now: i64,
) -> Result<()> {
    let parsed = parse_signature_header(header)?;

    let skew = now.checked_sub(parsed.timestamp).map(i64::unsigned_abs);
    if tolerance_secs > 0 && skew.map_or(true, |skew| skew > tolerance_secs.unsigned_abs()) {
        return Err(anyhow!(
            "Signature timestamp {} is outside the {}s tolerance",
            parsed.timestamp,
            tolerance_secs
        ));
    }

    for candidate in &parsed.signatures {
        let Ok(expected) = hex::decode(candidate) else {
            continue;
        };
        let mac = signed_mac(secret, parsed.timestamp, payload)?;
        if mac.verify_slice(&expected).is_ok() {
            return Ok(());
        }
    }

    Err(anyhow!("No matching {} signature", SCHEME_V1))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_unit";
    const BODY: &[u8] = br#"{"id":"evt_1","type":"charge.refunded"}"#;

    #[test]
    fn test_parse_header_with_multiple_signatures() {
        let parsed = parse_signature_header("t=123,v1=aa,v0=ignored,v1=bb").unwrap();
        assert_eq!(parsed.timestamp, 123);
        assert_eq!(parsed.signatures, vec!["aa".to_string(), "bb".to_string()]);
    }

    #[test]
    fn test_parse_header_rejects_missing_parts() {
        assert!(parse_signature_header("v1=aa").is_err());
        assert!(parse_signature_header("t=123").is_err());
        assert!(parse_signature_header("t=abc,v1=aa").is_err());
        assert!(parse_signature_header("").is_err());
    }

    #[test]
    fn test_sign_then_verify() {
        let header = signature_header(SECRET, 1_000, BODY).unwrap();
        assert!(verify_webhook_signature(&header, BODY, SECRET, 300, 1_010).is_ok());
    }

    #[test]
    fn test_verify_rejects_tampered_body() {
        let header = signature_header(SECRET, 1_000, BODY).unwrap();
        let tampered = br#"{"id":"evt_1","type":"charge.dispute.created"}"#;
        assert!(verify_webhook_signature(&header, tampered, SECRET, 300, 1_000).is_err());
    }

    #[test]
    fn test_verify_rejects_wrong_secret() {
        let header = signature_header("whsec_other", 1_000, BODY).unwrap();
        assert!(verify_webhook_signature(&header, BODY, SECRET, 300, 1_000).is_err());
    }

    #[test]
    fn test_verify_rejects_stale_timestamp() {
        let header = signature_header(SECRET, 1_000, BODY).unwrap();
        assert!(verify_webhook_signature(&header, BODY, SECRET, 300, 1_301).is_err());
        // Tolerance 0 disables the freshness check.
        assert!(verify_webhook_signature(&header, BODY, SECRET, 0, 99_999).is_ok());
    }

    #[test]
    fn test_verify_rejects_extreme_timestamps() {
        for header in [
            "t=-9223372036854775808,v1=aa",
            "t=9223372036854775807,v1=aa",
        ] {
            assert!(verify_webhook_signature(header, b"{}", "whsec", 300, 1_760_000_000).is_err());
        }
        let err = verify_webhook_signature("t=-9223372036854775808,v1=aa", b"{}", "whsec", 300, i64::MAX)
            .unwrap_err();
        assert!(err.to_string().contains("outside the 300s tolerance"));
    }

    #[test]
    fn test_verify_accepts_any_matching_signature() {
        let good = compute_signature(SECRET, 1_000, BODY).unwrap();
        let header = format!("t=1000,v1=nothex,v1={}", good);
        assert!(verify_webhook_signature(&header, BODY, SECRET, 300, 1_000).is_ok());
    }
}
