// Per-column symbol interning.
//
// A symbol column resolves strings to integer keys. Keys below the
// watermark come from the base table's dictionary, inherited by hard-
// linking its files into the wal root; keys at or above the watermark are
// coined by this writer and tracked in a local map that is cleared on
// every commit.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::Result;
use crate::wal::base::{dict_file_name, BaseTxnSnapshot};

const DICT_SUFFIXES: [char; 4] = ['o', 'c', 'k', 'v'];

/// Read-only dictionary view over hard-linked `.o`/`.c` files.
pub struct SymbolDictionary {
    by_value: HashMap<String, i32>,
    count: u32,
}

impl SymbolDictionary {
    pub fn open(offsets_path: &Path, chars_path: &Path) -> std::io::Result<Self> {
        let offsets = std::fs::read(offsets_path)?;
        if offsets.len() < 8 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "dictionary offset file too short",
            ));
        }
        let count = u64::from_le_bytes(offsets[0..8].try_into().unwrap()) as u32;

        let chars = std::fs::read(chars_path)?;
        let mut by_value = HashMap::with_capacity(count as usize);
        let mut at = 0usize;
        for key in 0..count {
            if at + 4 > chars.len() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "dictionary payload file truncated",
                ));
            }
            let len = u32::from_le_bytes(chars[at..at + 4].try_into().unwrap()) as usize;
            at += 4;
            if at + len > chars.len() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "dictionary payload file truncated",
                ));
            }
            let value = String::from_utf8_lossy(&chars[at..at + len]).into_owned();
            at += len;
            by_value.insert(value, key as i32);
        }
        Ok(Self { by_value, count })
    }

    pub fn key_of(&self, value: &str) -> Option<i32> {
        self.by_value.get(value).copied()
    }

    pub fn symbol_count(&self) -> u32 {
        self.count
    }
}

/// Writer-side symbol state for one column.
pub struct SymbolMap {
    initial_count: u32,
    local: HashMap<String, i32>,
    dictionary: Option<SymbolDictionary>,
    /// Unqualified link names under the wal root, removed when the
    /// column is dropped.
    link_names: Vec<String>,
}

impl SymbolMap {
    /// Inherits the base table's dictionary by hard-linking its files
    /// into the wal root. Any linking or read failure degrades to an
    /// empty dictionary after cleaning up partial links.
    pub fn open(
        wal_root: &Path,
        table_dir: &Path,
        column_name: &str,
        column_index: u32,
        snapshot: Option<&BaseTxnSnapshot>,
    ) -> Result<Self> {
        let Some(entry) = snapshot.and_then(|s| s.symbol_entry(column_index)) else {
            return Ok(Self::empty());
        };

        let mut linked: Vec<PathBuf> = Vec::new();
        let mut link_names = Vec::new();
        for suffix in DICT_SUFFIXES {
            let src = table_dir.join(dict_file_name(column_name, suffix, entry.name_txn));
            if !src.exists() {
                // offsets and payload are mandatory; the bitmap index
                // pair is query-side only
                if suffix == 'o' || suffix == 'c' {
                    remove_links(&linked);
                    return Ok(Self::empty());
                }
                continue;
            }
            let unqualified = dict_file_name(column_name, suffix, -1);
            let dst = wal_root.join(&unqualified);
            match std::fs::hard_link(&src, &dst) {
                Ok(()) => linked.push(dst),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(_) => {
                    remove_links(&linked);
                    return Ok(Self::empty());
                }
            }
            link_names.push(unqualified);
        }

        let offsets = wal_root.join(dict_file_name(column_name, 'o', -1));
        let chars = wal_root.join(dict_file_name(column_name, 'c', -1));
        match SymbolDictionary::open(&offsets, &chars) {
            Ok(dictionary) => {
                debug!(
                    column = column_name,
                    symbols = entry.symbol_count,
                    "inherited base symbol dictionary"
                );
                Ok(Self {
                    initial_count: entry.symbol_count,
                    local: HashMap::new(),
                    dictionary: Some(dictionary),
                    link_names,
                })
            }
            Err(_) => {
                remove_links(&linked);
                Ok(Self::empty())
            }
        }
    }

    fn empty() -> Self {
        Self {
            initial_count: 0,
            local: HashMap::new(),
            dictionary: None,
            link_names: Vec::new(),
        }
    }

    /// Count watermark: keys below it belong to the base dictionary,
    /// keys from it upward were coined by this writer.
    pub fn initial_count(&self) -> u32 {
        self.initial_count
    }

    pub fn local_len(&self) -> usize {
        self.local.len()
    }

    /// Resolves a value to its key, minting a new contiguous key above
    /// the watermark on first sight.
    pub fn resolve(&mut self, value: &str) -> i32 {
        if let Some(dictionary) = &self.dictionary {
            if let Some(key) = dictionary.key_of(value) {
                // ignore dictionary entries past the snapshot count
                if (key as u32) < self.initial_count {
                    return key;
                }
            }
        }
        if let Some(key) = self.local.get(value) {
            return *key;
        }
        let key = self.initial_count as i32 + self.local.len() as i32;
        self.local.insert(value.to_string(), key);
        key
    }

    /// Commit-time reset: drop locally coined keys and re-read the
    /// watermark from the inherited dictionary.
    pub fn reset_for_next_txn(&mut self) {
        self.local.clear();
        if let Some(dictionary) = &self.dictionary {
            self.initial_count = dictionary.symbol_count();
        }
    }

    /// Deletes the hard-linked dictionary files; used when the column is
    /// dropped.
    pub fn remove_links(self, wal_root: &Path) -> Result<()> {
        for name in &self.link_names {
            match std::fs::remove_file(wal_root.join(name)) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

fn remove_links(paths: &[PathBuf]) {
    for path in paths {
        let _ = std::fs::remove_file(path);
    }
}
