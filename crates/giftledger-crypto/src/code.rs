// Gift code handling
//
// A gift code is shown to its holder once, at issuance. The server only ever
// stores and compares `lookup_hash(code, pepper)`.

use rand::Rng;

use crate::hash::sha256_hex;

/// Alphabet without the easily confused characters 0/O and 1/I.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Number of significant characters in a generated code.
const CODE_LEN: usize = 12;

/// Characters per dash-separated group in the printed form.
const GROUP_LEN: usize = 4;

/// Normalizes a human-entered gift code.
///
/// Upper-cases ASCII letters and drops everything that is not an ASCII
/// letter or digit, so `abcd-efgh 2345` and `ABCDEFGH2345` are the same code.
pub fn normalize_gift_code(input: &str) -> String {
    input
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Derives the stored lookup key for a gift code.
///
/// The code is normalized first, then hashed together with the server-side
/// pepper as `sha256_hex("{normalized}:{pepper}")`.
pub fn lookup_hash(code: &str, pepper: &str) -> String {
    let normalized = normalize_gift_code(code);
    sha256_hex(format!("{}:{}", normalized, pepper).as_bytes())
}

/// Generates a new printable gift code (`XXXX-XXXX-XXXX`) using the thread RNG.
pub fn generate_gift_code() -> String {
    generate_gift_code_with(&mut rand::thread_rng())
}

/// Generates a new printable gift code from the given RNG.
pub fn generate_gift_code_with<R: Rng + ?Sized>(rng: &mut R) -> String {
    let mut out = String::with_capacity(CODE_LEN + CODE_LEN / GROUP_LEN);
    for i in 0..CODE_LEN {
        if i > 0 && i % GROUP_LEN == 0 {
            out.push('-');
        }
        let idx = rng.gen_range(0..CODE_ALPHABET.len());
        out.push(CODE_ALPHABET[idx] as char);
    }
    out
}
