// Golden vector integration test
//
// Validates gift-code hashing and webhook signing against the canonical
// vectors in fixtures/golden_vectors.json. Stored gift-card hashes and
// provider signatures both depend on these exact bytes, so any drift MUST
// fail here.

use giftledger_crypto::{
    compute_signature, lookup_hash, normalize_gift_code, parse_signature_header,
    signature_header, verify_webhook_signature,
};
use serde::Deserialize;
use std::fs;

/// Structure for parsing the golden vector file
#[derive(Deserialize)]
struct GoldenVector {
    gift_code_input: String,
    gift_code_normalized: String,
    pepper: String,
    lookup_hash: String,
    webhook_secret: String,
    webhook_timestamp: i64,
    webhook_payload: String,
    webhook_signature_v1: String,
    signature_header: String,
}

fn load_golden_vector() -> GoldenVector {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../fixtures/golden_vectors.json");
    let content = fs::read_to_string(path).expect("Failed to read golden_vectors.json");
    serde_json::from_str(&content).expect("Failed to parse golden_vectors.json")
}

#[test]
fn test_code_normalization() {
    let golden = load_golden_vector();
    assert_eq!(
        normalize_gift_code(&golden.gift_code_input),
        golden.gift_code_normalized,
        "Normalization mismatch"
    );
}

#[test]
fn test_lookup_hash() {
    let golden = load_golden_vector();

    // Raw and normalized inputs must land on the same stored key.
    assert_eq!(
        lookup_hash(&golden.gift_code_input, &golden.pepper),
        golden.lookup_hash,
        "Lookup hash mismatch for raw input"
    );
    assert_eq!(
        lookup_hash(&golden.gift_code_normalized, &golden.pepper),
        golden.lookup_hash,
        "Lookup hash mismatch for normalized input"
    );
}

#[test]
fn test_webhook_signature() {
    let golden = load_golden_vector();

    let signature = compute_signature(
        &golden.webhook_secret,
        golden.webhook_timestamp,
        golden.webhook_payload.as_bytes(),
    )
    .expect("signature");
    assert_eq!(signature, golden.webhook_signature_v1, "Signature mismatch");

    let header = signature_header(
        &golden.webhook_secret,
        golden.webhook_timestamp,
        golden.webhook_payload.as_bytes(),
    )
    .expect("header");
    assert_eq!(header, golden.signature_header, "Header mismatch");
}

#[test]
fn test_webhook_verification() {
    let golden = load_golden_vector();

    let parsed = parse_signature_header(&golden.signature_header).expect("parse header");
    assert_eq!(parsed.timestamp, golden.webhook_timestamp);

    verify_webhook_signature(
        &golden.signature_header,
        golden.webhook_payload.as_bytes(),
        &golden.webhook_secret,
        300,
        golden.webhook_timestamp + 60,
    )
    .expect("golden signature must verify");

    let mut tampered = golden.webhook_payload.clone();
    tampered.push(' ');
    assert!(verify_webhook_signature(
        &golden.signature_header,
        tampered.as_bytes(),
        &golden.webhook_secret,
        300,
        golden.webhook_timestamp,
    )
    .is_err());
}
