// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Write-ahead journal of committed units.
//!
//! Each unit is appended as one JSON line before it is applied in memory.
//! Replaying the file in order rebuilds every account exactly, because a
//! unit carries the full post-image of everything it wrote.
//!
//! Lock order: an account lock is always taken before the journal locks,
//! and the sync lock before the write lock.

use crate::base::{Money, UserId};
use crate::error::LedgerError;
use crate::idempotency::IdempotencyRecord;
use crate::order::Order;
use crate::transaction::WalletTransaction;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// The write set of one atomic unit for a single user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommittedUnit {
    pub user_id: UserId,
    pub balance: Money,
    pub next_sequence: u64,
    /// New or updated entries, post-image.
    pub entries: Vec<WalletTransaction>,
    /// New or updated orders, post-image.
    pub orders: Vec<Order>,
    pub idempotency: Vec<IdempotencyRecord>,
    pub committed_at: DateTime<Utc>,
}

impl CommittedUnit {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.orders.is_empty() && self.idempotency.is_empty()
    }
}

/// Durable sink for committed units.
pub trait Journal: Send + Sync {
    /// Persists a unit. An error aborts the unit; nothing is applied.
    fn append(&self, unit: &CommittedUnit) -> Result<(), LedgerError>;
}

/// Journal that keeps nothing. State lives only in memory.
#[derive(Debug, Default, Clone, Copy)]
pub struct MemoryJournal;

impl Journal for MemoryJournal {
    fn append(&self, _unit: &CommittedUnit) -> Result<(), LedgerError> {
        Ok(())
    }
}

struct JournalFile {
    file: File,
    /// Length of the file up to the last complete line.
    len: u64,
    /// Set when an fsync failed; every later append is refused.
    poisoned: bool,
}

/// Append-only JSON-lines journal on the local filesystem.
///
/// With `sync`, appends are group-committed: lines are written under the
/// write lock, and a single `fsync` under the sync lock covers every line
/// written before it started. Other users' writes never wait for a flush
/// they do not need.
pub struct FileJournal {
    path: PathBuf,
    inner: Mutex<JournalFile>,
    /// Handle used for `fsync`, present when syncing is on.
    sync_file: Option<File>,
    /// Bytes known to be on stable storage.
    synced: Mutex<u64>,
}

impl FileJournal {
    /// Opens (or creates) the journal. With `sync` an append returns only
    /// once its line is on stable storage.
    pub fn open(path: impl AsRef<Path>, sync: bool) -> Result<Self, LedgerError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)
            .map_err(|e| storage(&path, e))?;
        let len = file.metadata().map_err(|e| storage(&path, e))?.len();
        let sync_file = if sync {
            Some(file.try_clone().map_err(|e| storage(&path, e))?)
        } else {
            None
        };
        Ok(Self {
            path,
            inner: Mutex::new(JournalFile {
                file,
                len,
                poisoned: false,
            }),
            sync_file,
            synced: Mutex::new(len),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads every complete unit in append order.
    ///
    /// A torn final line (crash mid-append) is dropped and truncated away;
    /// a corrupt line anywhere else is a storage error.
    pub fn load(&self) -> Result<Vec<CommittedUnit>, LedgerError> {
        let reader = BufReader::new(File::open(&self.path).map_err(|e| storage(&self.path, e))?);
        let mut units = Vec::new();
        let mut good_len = 0u64;
        let mut torn = false;

        for line in reader.lines() {
            let line = line.map_err(|e| storage(&self.path, e))?;
            if torn {
                return Err(LedgerError::Storage(format!(
                    "corrupt journal entry in {}",
                    self.path.display()
                )));
            }
            if line.trim().is_empty() {
                good_len += line.len() as u64 + 1;
                continue;
            }
            match serde_json::from_str::<CommittedUnit>(&line) {
                Ok(unit) => {
                    good_len += line.len() as u64 + 1;
                    units.push(unit);
                }
                Err(e) => {
                    tracing::warn!(path = %self.path.display(), error = %e, "dropping torn journal tail");
                    torn = true;
                }
            }
        }

        let mut synced = self.synced.lock();
        let mut inner = self.inner.lock();
        if good_len > inner.len {
            // Last unit is complete but its newline never made it to disk.
            inner
                .file
                .write_all(b"\n")
                .map_err(|e| storage(&self.path, e))?;
            inner.len = good_len;
        } else if torn || good_len < inner.len {
            inner
                .file
                .set_len(good_len)
                .map_err(|e| storage(&self.path, e))?;
            inner.len = good_len;
        }
        *synced = (*synced).min(inner.len);
        Ok(units)
    }
}

impl Journal for FileJournal {
    fn append(&self, unit: &CommittedUnit) -> Result<(), LedgerError> {
        let mut line =
            serde_json::to_vec(unit).map_err(|e| LedgerError::Storage(e.to_string()))?;
        line.push(b'\n');

        let end = {
            let mut inner = self.inner.lock();
            if inner.poisoned {
                return Err(LedgerError::Storage(format!(
                    "{}: journal disabled after a failed sync",
                    self.path.display()
                )));
            }
            if let Err(e) = inner.file.write_all(&line) {
                // Cut off any partial line so the next append starts clean.
                let len = inner.len;
                if let Err(truncate) = inner.file.set_len(len) {
                    tracing::error!(error = %truncate, "failed to truncate journal after write error");
                }
                return Err(storage(&self.path, e));
            }
            inner.len += line.len() as u64;
            inner.len
        };

        match &self.sync_file {
            Some(file) => self.sync_through(file, end),
            None => Ok(()),
        }
    }
}

impl FileJournal {
    /// Returns once everything up to `end` is on stable storage.
    fn sync_through(&self, file: &File, end: u64) -> Result<(), LedgerError> {
        let mut synced = self.synced.lock();
        if *synced >= end {
            return Ok(());
        }
        let target = self.inner.lock().len;
        match file.sync_data() {
            Ok(()) => {
                *synced = target;
                Ok(())
            }
            Err(e) => {
                // Lines past `synced` may or may not be durable, and later
                // lines may already follow them, so nothing can be cut off.
                self.inner.lock().poisoned = true;
                tracing::error!(path = %self.path.display(), error = %e, "journal fsync failed, refusing further appends");
                Err(storage(&self.path, e))
            }
        }
    }
}

fn storage(path: &Path, error: std::io::Error) -> LedgerError {
    LedgerError::Storage(format!("{}: {error}", path.display()))
}
