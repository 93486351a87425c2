//! BOLT-12's checksum-less bech32 variant used to encode offer strings
//! (`lno1...`), invoice_request strings (`lnr1...`), and invoice strings
//! (`lni1...`).
//!
//! This is deliberately *not* the standard `bech32` crate: BOLT-12 strips the
//! 6-character checksum entirely (the TLV payload is already integrity
//! protected by the embedded signature) and instead allows long strings to be
//! split into multiple bech32-HRP-prefixed fragments joined by `+` and
//! optional whitespace, so they fit across multiple QR codes or wrapped text
//! lines. Neither of those is expressible with the checksummed `bech32`
//! crate, so we hand-roll the (small) base32 <-> bytes conversion here,
//! using the same charset the `bech32` crate and the wider Lightning
//! ecosystem use.

use crate::error::{OffersError, OffersErrorKind};

const CHARSET: &[u8; 32] = b"qpzry9x8gf2tvdw0s3jn54khce6mua7l";

fn parse_err(msg: impl Into<String>) -> OffersError {
    OffersError::new(OffersErrorKind::ParseError, msg)
}

fn charset_rev(c: u8) -> Option<u8> {
    CHARSET.iter().position(|&x| x == c).map(|i| i as u8)
}

/// Strip `+` continuation markers (and the whitespace immediately following
/// each one) so that a bolt12 string wrapped across multiple lines/QR codes
/// decodes as if it had been written contiguously.
fn strip_continuations(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '+' {
            while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
                chars.next();
            }
            continue;
        }
        out.push(c);
    }
    out
}

/// Decode a bolt12 string with expected human-readable prefix `hrp` (e.g.
/// `"lno1"`) into its raw TLV payload bytes.
///
/// The HRP match is case-insensitive, but the remainder of the string (the
/// data part) must be either all-lowercase or all-uppercase, matching
/// bech32's usual case rule.
pub fn decode(s: &str, hrp: &str) -> Result<Vec<u8>, OffersError> {
    let stripped = strip_continuations(s);

    let has_lower = stripped.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = stripped.chars().any(|c| c.is_ascii_uppercase());
    if has_lower && has_upper {
        return Err(parse_err("mixed-case bolt12 string"));
    }

    let lower = stripped.to_ascii_lowercase();
    if !lower.is_char_boundary(hrp.len())
        || !lower[..hrp.len().min(lower.len())]
            .eq_ignore_ascii_case(&hrp.to_ascii_lowercase())
    {
        return Err(parse_err(format!("missing `{hrp}` prefix")));
    }
    let data = &lower[hrp.len()..];
    if data.is_empty() {
        return Err(parse_err("empty bolt12 payload"));
    }

    let mut bits = Vec::with_capacity(data.len() * 5);
    for c in data.chars() {
        let v = charset_rev(c as u8)
            .ok_or_else(|| parse_err(format!("invalid bech32 char `{c}`")))?;
        for i in (0..5).rev() {
            bits.push((v >> i) & 1);
        }
    }

    // Convert the 5-bit groups into 8-bit bytes. Any trailing bits that don't
    // form a full byte are padding and MUST be zero.
    let mut bytes = Vec::with_capacity(bits.len() / 8);
    let mut chunks = bits.chunks_exact(8);
    for chunk in &mut chunks {
        let mut byte = 0u8;
        for &bit in chunk {
            byte = (byte << 1) | bit;
        }
        bytes.push(byte);
    }
    if chunks.remainder().iter().any(|&b| b != 0) {
        return Err(parse_err("non-zero padding in bolt12 payload"));
    }

    Ok(bytes)
}

/// Encode raw TLV payload `bytes` with human-readable prefix `hrp` into a
/// bolt12 string. Does not insert any `+` continuation breaks -- callers who
/// need wrapped output can do that themselves on the returned string.
pub fn encode(hrp: &str, bytes: &[u8]) -> String {
    let mut bits = Vec::with_capacity(bytes.len() * 8);
    for byte in bytes {
        for i in (0..8).rev() {
            bits.push((byte >> i) & 1);
        }
    }
    // Zero-pad to a multiple of 5 bits.
    while bits.len() % 5 != 0 {
        bits.push(0);
    }

    let mut out = String::with_capacity(hrp.len() + bits.len() / 5);
    out.push_str(hrp);
    for chunk in bits.chunks_exact(5) {
        let mut v = 0u8;
        for &bit in chunk {
            v = (v << 1) | bit;
        }
        out.push(CHARSET[v as usize] as char);
    }
    out
}
