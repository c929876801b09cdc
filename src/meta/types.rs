// Column type tags, storage widths and null sentinels.
//
// Type tags are stored signed in metadata snapshots: a negative tag marks
// a column that was dropped mid-session (tombstone). Sentinel values are
// bit-exact and must not change; they are what readers of segment files
// interpret as SQL NULL.

use serde::{Deserialize, Serialize};

/// Null sentinel for INT columns.
pub const INT_NULL: i32 = i32::MIN;
/// Null sentinel for LONG and TIMESTAMP columns.
pub const LONG_NULL: i64 = i64::MIN;
/// Null sentinel for SYMBOL keys.
pub const SYMBOL_NULL: i32 = -1;
/// Length header marking a null STRING payload.
pub const STR_NULL_LEN: i32 = -1;
/// Length header marking a null BINARY payload.
pub const BIN_NULL_LEN: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    Boolean,
    Byte,
    Short,
    Char,
    Int,
    Long,
    Float,
    Double,
    Timestamp,
    Symbol,
    String,
    Binary,
    Long128,
    Long256,
    GeoByte,
    GeoShort,
    GeoInt,
    GeoLong,
}

impl ColumnType {
    /// Stable numeric tag used in metadata snapshots and change records.
    pub fn tag(self) -> i32 {
        match self {
            ColumnType::Boolean => 1,
            ColumnType::Byte => 2,
            ColumnType::Short => 3,
            ColumnType::Char => 4,
            ColumnType::Int => 5,
            ColumnType::Long => 6,
            ColumnType::Float => 7,
            ColumnType::Double => 8,
            ColumnType::Timestamp => 9,
            ColumnType::Symbol => 10,
            ColumnType::String => 11,
            ColumnType::Binary => 12,
            ColumnType::Long128 => 13,
            ColumnType::Long256 => 14,
            ColumnType::GeoByte => 15,
            ColumnType::GeoShort => 16,
            ColumnType::GeoInt => 17,
            ColumnType::GeoLong => 18,
        }
    }

    pub fn from_tag(tag: i32) -> Option<Self> {
        Some(match tag {
            1 => ColumnType::Boolean,
            2 => ColumnType::Byte,
            3 => ColumnType::Short,
            4 => ColumnType::Char,
            5 => ColumnType::Int,
            6 => ColumnType::Long,
            7 => ColumnType::Float,
            8 => ColumnType::Double,
            9 => ColumnType::Timestamp,
            10 => ColumnType::Symbol,
            11 => ColumnType::String,
            12 => ColumnType::Binary,
            13 => ColumnType::Long128,
            14 => ColumnType::Long256,
            15 => ColumnType::GeoByte,
            16 => ColumnType::GeoShort,
            17 => ColumnType::GeoInt,
            18 => ColumnType::GeoLong,
            _ => return None,
        })
    }

    /// Fixed storage width in bytes; `None` for var-size types, which use
    /// a payload file plus an offset index.
    pub fn fixed_size(self) -> Option<usize> {
        match self {
            ColumnType::Boolean | ColumnType::Byte | ColumnType::GeoByte => Some(1),
            ColumnType::Short | ColumnType::Char | ColumnType::GeoShort => Some(2),
            ColumnType::Int | ColumnType::Float | ColumnType::Symbol | ColumnType::GeoInt => {
                Some(4)
            }
            ColumnType::Long
            | ColumnType::Double
            | ColumnType::Timestamp
            | ColumnType::GeoLong => Some(8),
            ColumnType::Long128 => Some(16),
            ColumnType::Long256 => Some(32),
            ColumnType::String | ColumnType::Binary => None,
        }
    }

    pub fn is_var_size(self) -> bool {
        self.fixed_size().is_none()
    }

    pub fn is_symbol(self) -> bool {
        self == ColumnType::Symbol
    }

    pub fn is_geo(self) -> bool {
        matches!(
            self,
            ColumnType::GeoByte | ColumnType::GeoShort | ColumnType::GeoInt | ColumnType::GeoLong
        )
    }

    /// Smallest geo storage width holding `bits` geohash bits.
    pub fn geo_for_bits(bits: u8) -> Option<Self> {
        match bits {
            1..=7 => Some(ColumnType::GeoByte),
            8..=15 => Some(ColumnType::GeoShort),
            16..=31 => Some(ColumnType::GeoInt),
            32..=60 => Some(ColumnType::GeoLong),
            _ => None,
        }
    }

    /// The bit-exact null encoding for this type. The designated
    /// timestamp is never null; var-size nulls are a `-1` length header
    /// handled by the column file pair.
    pub fn null_bytes(self) -> Vec<u8> {
        match self {
            ColumnType::Boolean | ColumnType::Byte => vec![0],
            ColumnType::Short => 0i16.to_le_bytes().to_vec(),
            ColumnType::Char => 0u16.to_le_bytes().to_vec(),
            ColumnType::Int => INT_NULL.to_le_bytes().to_vec(),
            ColumnType::Long | ColumnType::Timestamp => LONG_NULL.to_le_bytes().to_vec(),
            ColumnType::Float => f32::NAN.to_le_bytes().to_vec(),
            ColumnType::Double => f64::NAN.to_le_bytes().to_vec(),
            ColumnType::Symbol => SYMBOL_NULL.to_le_bytes().to_vec(),
            ColumnType::Long128 => {
                // little-endian pair: lo = 0, hi = LONG_NULL
                let mut out = Vec::with_capacity(16);
                out.extend_from_slice(&0i64.to_le_bytes());
                out.extend_from_slice(&LONG_NULL.to_le_bytes());
                out
            }
            ColumnType::Long256 => {
                let mut out = Vec::with_capacity(32);
                for _ in 0..4 {
                    out.extend_from_slice(&LONG_NULL.to_le_bytes());
                }
                out
            }
            ColumnType::GeoByte => vec![0xff],
            ColumnType::GeoShort => (-1i16).to_le_bytes().to_vec(),
            ColumnType::GeoInt => (-1i32).to_le_bytes().to_vec(),
            ColumnType::GeoLong => (-1i64).to_le_bytes().to_vec(),
            ColumnType::String | ColumnType::Binary => Vec::new(),
        }
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Byte => "BYTE",
            ColumnType::Short => "SHORT",
            ColumnType::Char => "CHAR",
            ColumnType::Int => "INT",
            ColumnType::Long => "LONG",
            ColumnType::Float => "FLOAT",
            ColumnType::Double => "DOUBLE",
            ColumnType::Timestamp => "TIMESTAMP",
            ColumnType::Symbol => "SYMBOL",
            ColumnType::String => "STRING",
            ColumnType::Binary => "BINARY",
            ColumnType::Long128 => "LONG128",
            ColumnType::Long256 => "LONG256",
            ColumnType::GeoByte => "GEOHASH(b)",
            ColumnType::GeoShort => "GEOHASH(s)",
            ColumnType::GeoInt => "GEOHASH(i)",
            ColumnType::GeoLong => "GEOHASH(l)",
        };
        f.write_str(name)
    }
}
