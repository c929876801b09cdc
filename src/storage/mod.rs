// Low-level file plumbing shared by segments, event logs and metadata
// snapshots: append-cursor files, advisory directory locks and the
// crc32-framed record format.

pub mod append;
pub mod lock;

pub use append::AppendFile;
pub use lock::DirLock;

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

use crate::error::{Result, WalError};

/// Encodes a value as a framed record: `[len: u32][bincode payload][crc32]`.
/// The length covers the payload only; the checksum covers the payload.
pub(crate) fn encode_framed<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let payload = bincode::serde::encode_to_vec(value, bincode::config::standard())?;
    let mut out = Vec::with_capacity(payload.len() + 8);
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&payload);
    out.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    Ok(out)
}

/// Decodes one framed record at `at`, returning the value and the offset
/// of the byte that follows the record.
pub(crate) fn decode_framed<T: DeserializeOwned>(
    bytes: &[u8],
    at: usize,
    path: &Path,
) -> Result<(T, usize)> {
    let corrupted = |detail: &str| WalError::Corrupted {
        path: path.to_path_buf(),
        detail: detail.to_string(),
    };

    if at + 4 > bytes.len() {
        return Err(corrupted("truncated length header"));
    }
    let len = u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap()) as usize;
    let payload_start = at + 4;
    let crc_start = payload_start + len;
    if crc_start + 4 > bytes.len() {
        return Err(corrupted("truncated payload"));
    }
    let payload = &bytes[payload_start..crc_start];
    let stored = u32::from_le_bytes(bytes[crc_start..crc_start + 4].try_into().unwrap());
    if crc32fast::hash(payload) != stored {
        return Err(corrupted("checksum mismatch"));
    }
    let (value, consumed) =
        bincode::serde::decode_from_slice(payload, bincode::config::standard())?;
    if consumed != len {
        return Err(corrupted("payload length mismatch"));
    }
    Ok((value, crc_start + 4))
}
