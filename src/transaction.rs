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

//! Wallet ledger entries.
//!
//! Entries follow a state machine that depends on their kind:
//! - HOLD: [`Authorized`] → [`Success`] (capture, retyped PURCHASE) or [`Released`]
//! - manual TOPUP: [`Pending`] → [`UnderReview`] → [`Success`] or [`Rejected`],
//!   and [`Success`] → [`Deleted`] (revert)
//! - gateway TOPUP: [`Pending`] → [`Success`] or [`Failed`]
//!
//! [`Authorized`]: TransactionStatus::Authorized
//! [`Success`]: TransactionStatus::Success
//! [`Released`]: TransactionStatus::Released
//! [`Pending`]: TransactionStatus::Pending
//! [`UnderReview`]: TransactionStatus::UnderReview
//! [`Rejected`]: TransactionStatus::Rejected
//! [`Deleted`]: TransactionStatus::Deleted
//! [`Failed`]: TransactionStatus::Failed

use crate::base::{Money, OrderId, TransactionId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    Topup,
    Purchase,
    Refund,
    Adjustment,
    Deletion,
    Hold,
    Release,
}

impl TransactionKind {
    /// DELETION entries are clamped at a zero balance instead of being rejected.
    pub fn requires_non_negative(self) -> bool {
        !matches!(self, TransactionKind::Deletion)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    UnderReview,
    Authorized,
    Success,
    Rejected,
    Failed,
    Released,
    Deleted,
}

impl TransactionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(
            self,
            TransactionStatus::Pending
                | TransactionStatus::UnderReview
                | TransactionStatus::Authorized
        )
    }
}

/// One ledger entry against a user's balance.
///
/// `amount` is never rewritten once the entry is effective; an admin
/// correction is recorded in `adjusted_amount` and balanced by a separate
/// ADJUSTMENT entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WalletTransaction {
    pub id: TransactionId,
    pub user_id: UserId,
    pub kind: TransactionKind,
    pub status: TransactionStatus,
    /// Signed amount, negative for debits.
    pub amount: Money,
    /// Corrected display amount after an admin adjustment.
    pub adjusted_amount: Option<Money>,
    /// Balance right after this entry took effect.
    pub balance_after: Option<Money>,
    /// Per-user posting sequence, assigned together with `balance_after`.
    pub sequence: Option<u64>,
    pub idempotency_key: Option<String>,
    pub gateway: Option<String>,
    pub gateway_ref: Option<String>,
    pub order_id: Option<OrderId>,
    /// The entry this one compensates (RELEASE, ADJUSTMENT, DELETION).
    pub related_transaction: Option<TransactionId>,
    pub receipt_ref: Option<String>,
    pub admin_note: Option<String>,
    pub gateway_payload: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WalletTransaction {
    /// Whether this entry has moved the balance.
    pub fn is_effective(&self) -> bool {
        self.balance_after.is_some()
    }

    pub fn display_amount(&self) -> Money {
        self.adjusted_amount.unwrap_or(self.amount)
    }

    /// Receipt-based top-up awaiting or past staff review.
    pub fn is_manual_topup(&self) -> bool {
        self.kind == TransactionKind::Topup && self.gateway.is_none()
    }
}

/// Everything about a new entry except its amount and balance effect.
#[derive(Debug, Clone)]
pub struct EntryDraft {
    pub kind: TransactionKind,
    pub status: TransactionStatus,
    pub order_id: Option<OrderId>,
    pub gateway: Option<String>,
    pub gateway_ref: Option<String>,
    pub idempotency_key: Option<String>,
    pub related_transaction: Option<TransactionId>,
    pub receipt_ref: Option<String>,
    pub admin_note: Option<String>,
}

impl EntryDraft {
    pub fn new(kind: TransactionKind, status: TransactionStatus) -> Self {
        Self {
            kind,
            status,
            order_id: None,
            gateway: None,
            gateway_ref: None,
            idempotency_key: None,
            related_transaction: None,
            receipt_ref: None,
            admin_note: None,
        }
    }

    pub fn order(mut self, order_id: OrderId) -> Self {
        self.order_id = Some(order_id);
        self
    }

    pub fn gateway(mut self, gateway: impl Into<String>) -> Self {
        self.gateway = Some(gateway.into());
        self
    }

    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn related(mut self, transaction_id: TransactionId) -> Self {
        self.related_transaction = Some(transaction_id);
        self
    }

    pub fn note(mut self, note: Option<String>) -> Self {
        self.admin_note = note;
        self
    }

    pub(crate) fn into_transaction(
        self,
        user_id: UserId,
        amount: Money,
        now: DateTime<Utc>,
    ) -> WalletTransaction {
        WalletTransaction {
            id: TransactionId::new(),
            user_id,
            kind: self.kind,
            status: self.status,
            amount,
            adjusted_amount: None,
            balance_after: None,
            sequence: None,
            idempotency_key: self.idempotency_key,
            gateway: self.gateway,
            gateway_ref: self.gateway_ref,
            order_id: self.order_id,
            related_transaction: self.related_transaction,
            receipt_ref: self.receipt_ref,
            admin_note: self.admin_note,
            gateway_payload: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(!TransactionStatus::Pending.is_terminal());
        assert!(!TransactionStatus::UnderReview.is_terminal());
        assert!(!TransactionStatus::Authorized.is_terminal());
        assert!(TransactionStatus::Success.is_terminal());
        assert!(TransactionStatus::Released.is_terminal());
        assert!(TransactionStatus::Deleted.is_terminal());
    }

    #[test]
    fn kinds_serialize_in_upper_case() {
        let json = serde_json::to_string(&TransactionKind::Topup).unwrap();
        assert_eq!(json, "\"TOPUP\"");
        let json = serde_json::to_string(&TransactionStatus::UnderReview).unwrap();
        assert_eq!(json, "\"UNDER_REVIEW\"");
    }

    #[test]
    fn draft_builds_pending_entry() {
        let order = OrderId::new();
        let tx = EntryDraft::new(TransactionKind::Hold, TransactionStatus::Authorized)
            .order(order)
            .into_transaction(UserId::new(), Money(-3_000), Utc::now());

        assert_eq!(tx.order_id, Some(order));
        assert_eq!(tx.display_amount(), Money(-3_000));
        assert!(!tx.is_effective());
        assert!(!tx.is_manual_topup());
    }
}
