// Value parsing and encoding helpers for the row interface: long256 hex
// literals and geohash packing.

use crate::error::{Result, WalError};

const GEO_BASE32: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

fn geo_char_index(c: char) -> Option<i64> {
    let c = c.to_ascii_lowercase();
    GEO_BASE32.iter().position(|&b| b as char == c).map(|i| i as i64)
}

/// Decodes a geohash literal to `bits` bits of precision. The literal
/// must carry at least `ceil(bits / 5)` characters; surplus precision is
/// truncated.
pub fn geohash_from_str(hash: &str, bits: u8) -> Result<i64> {
    debug_assert!((1..=60).contains(&bits));
    let chars_needed = (bits as usize).div_ceil(5);
    let chars: Vec<char> = hash.chars().take(chars_needed).collect();
    if chars.len() < chars_needed {
        return Err(WalError::InvalidValue {
            what: "geohash",
            value: hash.to_string(),
        });
    }
    let mut value: i64 = 0;
    for c in chars {
        let index = geo_char_index(c).ok_or_else(|| WalError::InvalidValue {
            what: "geohash",
            value: hash.to_string(),
        })?;
        value = (value << 5) | index;
    }
    let total_bits = (chars_needed * 5) as u8;
    Ok(value >> (total_bits - bits))
}

/// Encodes a coordinate pair to `bits` bits of geohash precision,
/// interleaving longitude and latitude bisections starting with
/// longitude.
pub fn geohash_from_coords(lat: f64, lon: f64, bits: u8) -> Result<i64> {
    debug_assert!((1..=60).contains(&bits));
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return Err(WalError::InvalidValue {
            what: "coordinates",
            value: format!("({lat}, {lon})"),
        });
    }
    let (mut lat_lo, mut lat_hi) = (-90.0f64, 90.0f64);
    let (mut lon_lo, mut lon_hi) = (-180.0f64, 180.0f64);
    let mut value: i64 = 0;
    for i in 0..bits {
        let bit = if i % 2 == 0 {
            let mid = (lon_lo + lon_hi) / 2.0;
            if lon >= mid {
                lon_lo = mid;
                1
            } else {
                lon_hi = mid;
                0
            }
        } else {
            let mid = (lat_lo + lat_hi) / 2.0;
            if lat >= mid {
                lat_lo = mid;
                1
            } else {
                lat_hi = mid;
                0
            }
        };
        value = (value << 1) | bit;
    }
    Ok(value)
}

/// Parses a long256 hex literal (optionally `0x`-prefixed, up to 64
/// digits) into four little-endian 64-bit words.
pub fn parse_long256(text: &str) -> Result<[i64; 4]> {
    let invalid = || WalError::InvalidValue {
        what: "long256",
        value: text.to_string(),
    };
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    if digits.is_empty() || digits.len() > 64 {
        return Err(invalid());
    }
    let mut words = [0i64; 4];
    let bytes = digits.as_bytes();
    let mut word = 0usize;
    let mut end = bytes.len();
    while end > 0 {
        let start = end.saturating_sub(16);
        let chunk = std::str::from_utf8(&bytes[start..end]).map_err(|_| invalid())?;
        let parsed = u64::from_str_radix(chunk, 16).map_err(|_| invalid())?;
        words[word] = parsed as i64;
        word += 1;
        end = start;
    }
    Ok(words)
}
