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

//! Error types for ledger, checkout and settlement operations.

use thiserror::Error;

/// Ledger and payment errors.
///
/// Precondition failures are detected before an atomic unit begins, so any
/// error returned here means nothing was applied.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Malformed or out-of-range input
    #[error("invalid request: {0}")]
    Validation(String),

    /// A cart item is inactive or missing from the catalog
    #[error("product unavailable: {0}")]
    ProductUnavailable(String),

    /// Referenced order does not exist or belongs to another user
    #[error("order not found")]
    OrderNotFound,

    /// Referenced wallet transaction does not exist or belongs to another user
    #[error("transaction not found")]
    TransactionNotFound,

    /// Applying the entry would make the balance negative
    #[error("insufficient wallet balance")]
    InsufficientFunds,

    /// The order was paid before the operation could run
    #[error("order is already paid")]
    AlreadyPaid,

    /// User already has the maximum number of open manual top-ups
    #[error("too many pending top-up requests")]
    TooManyPending,

    /// The record is not in a state that permits the operation
    #[error("invalid state for operation: {0}")]
    InvalidState(String),

    /// Missing credentials or bad webhook signature
    #[error("unauthorized")]
    Unauthorized,

    /// Authenticated but not permitted
    #[error("forbidden")]
    Forbidden,

    /// Upstream payment processor failure or timeout
    #[error("payment gateway error: {0}")]
    Gateway(String),

    /// Journal or persistence failure; the unit was rolled back
    #[error("storage error: {0}")]
    Storage(String),
}

impl LedgerError {
    pub(crate) fn invalid_state(state: impl std::fmt::Debug) -> Self {
        LedgerError::InvalidState(format!("{state:?}").to_uppercase())
    }

    /// Whether a caller (typically a gateway delivering a webhook) should retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Storage(_) | LedgerError::Gateway(_))
    }
}
