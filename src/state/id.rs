//! Environment identifiers
//!
//! Ids are 128 bits from the OS random source, hex encoded. The short form is a
//! fixed-length prefix used for display, branch names and workspace directory
//! names; short ids can collide, which is why prefix lookup reports ambiguity.

use rand::rngs::OsRng;
use rand::RngCore;

/// Length of a full id in hex characters
pub const ID_LENGTH: usize = 32;

/// Length of the display form
pub const SHORT_ID_LENGTH: usize = 12;

/// Generate a new 32-character lowercase hex id
pub fn generate_id() -> Result<String, rand::Error> {
    let mut bytes = [0u8; ID_LENGTH / 2];
    OsRng.try_fill_bytes(&mut bytes)?;
    Ok(bytes.iter().map(|b| format!("{b:02x}")).collect())
}

/// First `SHORT_ID_LENGTH` characters of `id`, or all of it when shorter
pub fn short_id(id: &str) -> &str {
    id.get(..SHORT_ID_LENGTH).unwrap_or(id)
}

/// Whether `s` is non-empty and made only of hex digits (either case)
pub fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_hexdigit())
}
