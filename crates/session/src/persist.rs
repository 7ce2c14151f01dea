// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable storage for the remember-me refresh token.
//!
//! Exactly one string entry is ever persisted client-side. The slot is
//! written only by login (with remember-me) and refresh, and cleared only
//! by logout — never read opportunistically elsewhere.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Durable slot for the single remember-me refresh token.
pub trait TokenStore: Send + Sync {
    fn load(&self) -> anyhow::Result<Option<String>>;
    fn save(&self, refresh_token: &str) -> anyhow::Result<()>;
    fn clear(&self) -> anyhow::Result<()>;
}

/// On-disk layout of the token file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedToken {
    refresh_token: String,
}

/// File-backed store with atomic writes (write tmp + rename).
///
/// Uses a unique temp filename (PID + counter) to avoid corruption when
/// concurrent saves race on the same `.tmp` file — a shorter write can
/// leave trailing bytes from a longer previous write.
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> anyhow::Result<Option<String>> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let persisted: PersistedToken = serde_json::from_str(&contents)?;
        Ok(Some(persisted.refresh_token))
    }

    fn save(&self, refresh_token: &str) -> anyhow::Result<()> {
        use std::sync::atomic::{AtomicU32, Ordering};
        static COUNTER: AtomicU32 = AtomicU32::new(0);

        if let Some(dir) = self.path.parent() {
            if !dir.exists() {
                std::fs::create_dir_all(dir)?;
            }
        }

        let json = serde_json::to_string_pretty(&PersistedToken {
            refresh_token: refresh_token.to_owned(),
        })?;
        let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
        let tmp_name = format!(
            "{}.{}.{}.tmp",
            self.path.file_name().unwrap_or_default().to_string_lossy(),
            std::process::id(),
            seq,
        );
        let tmp_path = self.path.with_file_name(tmp_name);
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    fn clear(&self) -> anyhow::Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory store — for tests and for callers that never persist.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    slot: std::sync::RwLock<Option<String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(refresh_token: &str) -> Self {
        Self { slot: std::sync::RwLock::new(Some(refresh_token.to_owned())) }
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> anyhow::Result<Option<String>> {
        match self.slot.read() {
            Ok(guard) => Ok(guard.clone()),
            Err(_) => anyhow::bail!("token slot poisoned"),
        }
    }

    fn save(&self, refresh_token: &str) -> anyhow::Result<()> {
        match self.slot.write() {
            Ok(mut guard) => {
                *guard = Some(refresh_token.to_owned());
                Ok(())
            }
            Err(_) => anyhow::bail!("token slot poisoned"),
        }
    }

    fn clear(&self) -> anyhow::Result<()> {
        match self.slot.write() {
            Ok(mut guard) => {
                *guard = None;
                Ok(())
            }
            Err(_) => anyhow::bail!("token slot poisoned"),
        }
    }
}

#[cfg(test)]
#[path = "persist_tests.rs"]
mod tests;
