//! Key and name helpers shared by the storage layer and the dataflow engine.

use sha2::{Digest, Sha256};

/// Tables whose names carry this prefix are stored on disk.
pub const PERSISTENT_PREFIX: &str = "pt-";

pub fn is_persistent(table: &str) -> bool {
    table.starts_with(PERSISTENT_PREFIX)
}

/// Maps an arbitrary table name or row key to a single safe file name.
///
/// Alphanumerics, `-` and `_` are kept; every other byte becomes `%XX`,
/// so `.`/`..` and path separators can never reach the filesystem.
pub fn encode_file_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for &b in name.as_bytes() {
        if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    if out.is_empty() {
        out.push('%');
    }
    out
}

/// Inverse of [`encode_file_name`]; `None` for names it could not produce.
pub fn decode_file_name(encoded: &str) -> Option<String> {
    if encoded == "%" {
        return Some(String::new());
    }
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = encoded.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

/// Deterministic row key for generated rows.
///
/// The digest is spelled with lowercase letters so generated keys spread
/// over the same alphabet worker ids are drawn from.
pub fn hash_key(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    digest.iter().map(|b| (b'a' + b % 26) as char).collect()
}

/// Table names and row keys travel inside the space-delimited row codec
/// and inside URL paths, so a few characters are off limits.
pub fn validate_table_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("table name is empty");
    }
    if name == "." || name.contains("..") || name.contains('/') || name.contains('\\') {
        return Err("table name is not allowed");
    }
    validate_token(name)
}

pub fn validate_token(token: &str) -> Result<(), &'static str> {
    if token.contains(' ') || token.contains('\n') {
        return Err("keys and column names may not contain spaces or newlines");
    }
    Ok(())
}
