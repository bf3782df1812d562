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

//! At-most-once execution keyed by a caller-supplied idempotency key.
//!
//! The record is written in the same atomic unit as the effects of the
//! operation it guards, so a key is a unique constraint per user: the first
//! unit to commit wins and every later caller reads its outcome.

use crate::account::UnitOfWork;
use crate::base::{OrderId, TransactionId};
use crate::error::LedgerError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Longest accepted key, in characters.
pub const MAX_KEY_LEN: usize = 128;

/// Operation a key was first used for. A key may not be reused across scopes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyScope {
    Checkout,
    GatewayTopup,
    ManualTopup,
}

/// Result recorded for a key.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyOutcome {
    Order(OrderId),
    Transaction(TransactionId),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdempotencyRecord {
    pub key: String,
    pub scope: IdempotencyScope,
    /// SHA-256 of the canonical request, hex encoded.
    pub fingerprint: String,
    pub outcome: IdempotencyOutcome,
    pub created_at: DateTime<Utc>,
}

/// Outcome of [`IdempotencyKey::execute_once`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Once<T> {
    /// The operation ran in this unit.
    Executed(T),
    /// An earlier unit already ran it.
    Replayed(IdempotencyOutcome),
}

/// A validated key bound to the request it guards.
#[derive(Debug, Clone)]
pub struct IdempotencyKey {
    key: String,
    scope: IdempotencyScope,
    fingerprint: String,
}

impl IdempotencyKey {
    pub fn new<R: Serialize>(
        key: &str,
        scope: IdempotencyScope,
        request: &R,
    ) -> Result<Self, LedgerError> {
        validate_key(key)?;
        Ok(Self {
            key: key.to_string(),
            scope,
            fingerprint: fingerprint(request)?,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.key
    }

    /// Checks a previously stored record against this key.
    ///
    /// Returns the recorded outcome when scope and fingerprint match.
    pub fn check(&self, existing: &IdempotencyRecord) -> Result<IdempotencyOutcome, LedgerError> {
        if existing.scope != self.scope {
            return Err(LedgerError::Validation(
                "idempotency key already used for a different operation".into(),
            ));
        }
        if existing.fingerprint != self.fingerprint {
            return Err(LedgerError::Validation(
                "idempotency key already used with a different request".into(),
            ));
        }
        Ok(existing.outcome)
    }

    /// Runs `operation` unless this key already has a record in the user's
    /// ledger, then records the outcome in the same unit.
    pub fn execute_once<'a, T, F>(
        &self,
        unit: &mut UnitOfWork<'a>,
        operation: F,
    ) -> Result<Once<T>, LedgerError>
    where
        F: FnOnce(&mut UnitOfWork<'a>) -> Result<(T, IdempotencyOutcome), LedgerError>,
    {
        if let Some(existing) = unit.idempotency_record(&self.key) {
            return self.check(existing).map(Once::Replayed);
        }

        let (value, outcome) = operation(unit)?;
        let record = IdempotencyRecord {
            key: self.key.clone(),
            scope: self.scope,
            fingerprint: self.fingerprint.clone(),
            outcome,
            created_at: unit.now(),
        };
        unit.record_idempotency(record);
        Ok(Once::Executed(value))
    }
}

pub fn validate_key(key: &str) -> Result<(), LedgerError> {
    if key.is_empty() || key.chars().count() > MAX_KEY_LEN {
        return Err(LedgerError::Validation(format!(
            "idempotency key must be 1 to {MAX_KEY_LEN} characters"
        )));
    }
    if key.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return Err(LedgerError::Validation(
            "idempotency key must be printable without whitespace".into(),
        ));
    }
    Ok(())
}

/// SHA-256 over the JSON encoding of a request.
pub fn fingerprint<R: Serialize>(request: &R) -> Result<String, LedgerError> {
    let bytes = serde_json::to_vec(request)
        .map_err(|e| LedgerError::Validation(format!("unserializable request: {e}")))?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}
