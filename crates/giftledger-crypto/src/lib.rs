// Giftledger Crypto - gift code and webhook signature primitives

pub mod code;
pub mod hash;
pub mod webhook;

pub use code::{generate_gift_code, generate_gift_code_with, lookup_hash, normalize_gift_code};
pub use hash::sha256_hex;
pub use webhook::{
    compute_signature, parse_signature_header, signature_header, verify_webhook_signature,
    SignatureHeader,
};
