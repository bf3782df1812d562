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

//! Receipt-based manual top-ups and their staff review.
//!
//! ```text
//!  PENDING ──attach_receipt──► UNDER_REVIEW ──approve──► SUCCESS ──adjust──► SUCCESS (+ ADJUSTMENT)
//!     │                             │                       │
//!     └──────────reject─────────────┴──► REJECTED           └──revert──► DELETED (+ DELETION)
//! ```
//!
//! Only `approve` credits the wallet. An adjustment never rewrites the
//! original amount; the difference is posted as its own entry and the
//! corrected figure is kept in `adjusted_amount` for display.

use crate::account::UnitOfWork;
use crate::base::{Money, Page, PageRequest, TransactionId, UserId};
use crate::error::LedgerError;
use crate::idempotency::{IdempotencyKey, IdempotencyOutcome, IdempotencyScope, Once};
use crate::mailer::{Email, Mailer};
use crate::store::LedgerStore;
use crate::transaction::{EntryDraft, TransactionKind, TransactionStatus, WalletTransaction};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualTopupRequest {
    pub amount: Money,
    pub idempotency_key: String,
}

/// A manual top-up as returned to its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ticket {
    #[serde(flatten)]
    pub transaction: WalletTransaction,
    pub replayed: bool,
}

pub struct AdminReview {
    store: Arc<LedgerStore>,
    mailer: Arc<dyn Mailer>,
    max_open: usize,
}

impl AdminReview {
    /// Open tickets a user may hold at once.
    pub const DEFAULT_MAX_OPEN: usize = 3;

    pub fn new(store: Arc<LedgerStore>, mailer: Arc<dyn Mailer>, max_open: usize) -> Self {
        Self {
            store,
            mailer,
            max_open,
        }
    }

    /// Opens a PENDING ticket, or returns the one opened with this key.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::Validation`] if the amount is not positive or the key
    ///   was used for another request.
    /// - [`LedgerError::TooManyPending`] if the user already has the maximum
    ///   number of open tickets.
    pub fn initialize(
        &self,
        user_id: UserId,
        request: ManualTopupRequest,
    ) -> Result<Ticket, LedgerError> {
        let key = IdempotencyKey::new(
            &request.idempotency_key,
            IdempotencyScope::ManualTopup,
            &request.amount,
        )?;
        if let Some(existing) = self.store.idempotency_record(user_id, key.as_str()) {
            return self.replay(user_id, key.check(&existing)?);
        }
        if !request.amount.is_positive() {
            return Err(LedgerError::Validation(
                "top-up amount must be positive".into(),
            ));
        }

        let max_open = self.max_open;
        let outcome = self.store.atomic(user_id, |unit| {
            key.execute_once(unit, |unit| {
                let open = unit
                    .entries()
                    .filter(|e| e.is_manual_topup() && !e.status.is_terminal())
                    .count();
                if open >= max_open {
                    return Err(LedgerError::TooManyPending);
                }
                let entry = unit.add_pending(
                    request.amount,
                    EntryDraft::new(TransactionKind::Topup, TransactionStatus::Pending)
                        .idempotency_key(key.as_str()),
                );
                let id = entry.id;
                Ok((entry, IdempotencyOutcome::Transaction(id)))
            })
        })?;

        match outcome {
            Once::Executed(transaction) => {
                info!(%user_id, ticket = %transaction.id, amount = transaction.amount.minor(), "manual top-up opened");
                Ok(Ticket {
                    transaction,
                    replayed: false,
                })
            }
            Once::Replayed(outcome) => self.replay(user_id, outcome),
        }
    }

    fn replay(&self, user_id: UserId, outcome: IdempotencyOutcome) -> Result<Ticket, LedgerError> {
        let IdempotencyOutcome::Transaction(id) = outcome else {
            return Err(LedgerError::Validation(
                "idempotency key already used for a different operation".into(),
            ));
        };
        let transaction = self
            .store
            .user_transaction(user_id, id)
            .ok_or(LedgerError::TransactionNotFound)?;
        Ok(Ticket {
            transaction,
            replayed: true,
        })
    }

    /// Records the receipt and moves the ticket to UNDER_REVIEW.
    pub fn attach_receipt(
        &self,
        user_id: UserId,
        ticket_id: TransactionId,
        receipt_ref: &str,
    ) -> Result<WalletTransaction, LedgerError> {
        let receipt_ref = receipt_ref.trim();
        if receipt_ref.is_empty() {
            return Err(LedgerError::Validation("receipt reference is required".into()));
        }
        if self.store.owner_of_transaction(ticket_id) != Some(user_id) {
            return Err(LedgerError::TransactionNotFound);
        }

        let ticket = self.store.atomic(user_id, |unit| {
            let ticket = manual_ticket(unit, ticket_id)?;
            match ticket.status {
                TransactionStatus::Pending | TransactionStatus::UnderReview => {}
                other => return Err(LedgerError::invalid_state(other)),
            }
            let entry = unit
                .entry_mut(ticket_id)
                .ok_or(LedgerError::TransactionNotFound)?;
            entry.receipt_ref = Some(receipt_ref.to_string());
            entry.status = TransactionStatus::UnderReview;
            Ok(entry.clone())
        })?;
        info!(%user_id, ticket = %ticket_id, "receipt attached");
        Ok(ticket)
    }

    /// Credits the ticket amount. Approving a SUCCESS ticket again returns
    /// it without another credit.
    pub async fn approve(
        &self,
        ticket_id: TransactionId,
        note: Option<String>,
    ) -> Result<WalletTransaction, LedgerError> {
        let user_id = self.owner(ticket_id)?;
        let (ticket, applied) = self.store.atomic(user_id, |unit| {
            let ticket = manual_ticket(unit, ticket_id)?;
            if ticket.status == TransactionStatus::Success {
                return Ok((ticket, false));
            }
            if ticket.status != TransactionStatus::UnderReview || ticket.receipt_ref.is_none() {
                return Err(LedgerError::invalid_state(ticket.status));
            }
            unit.settle_entry(ticket_id, TransactionStatus::Success)?;
            let entry = unit
                .entry_mut(ticket_id)
                .ok_or(LedgerError::TransactionNotFound)?;
            if note.is_some() {
                entry.admin_note = note;
            }
            Ok((entry.clone(), true))
        })?;

        if applied {
            info!(%user_id, ticket = %ticket_id, amount = ticket.amount.minor(), "manual top-up approved");
            self.notify(
                user_id,
                "Wallet top-up approved",
                format!("Your top-up of Rs. {} was added to your wallet.", ticket.amount),
            )
            .await;
        }
        Ok(ticket)
    }

    pub async fn reject(
        &self,
        ticket_id: TransactionId,
        note: Option<String>,
    ) -> Result<WalletTransaction, LedgerError> {
        let user_id = self.owner(ticket_id)?;
        let ticket = self.store.atomic(user_id, |unit| {
            let ticket = manual_ticket(unit, ticket_id)?;
            match ticket.status {
                TransactionStatus::Pending | TransactionStatus::UnderReview => {}
                other => return Err(LedgerError::invalid_state(other)),
            }
            let entry = unit
                .entry_mut(ticket_id)
                .ok_or(LedgerError::TransactionNotFound)?;
            entry.status = TransactionStatus::Rejected;
            entry.admin_note = note;
            Ok(entry.clone())
        })?;

        info!(%user_id, ticket = %ticket_id, "manual top-up rejected");
        let reason = ticket
            .admin_note
            .as_deref()
            .map(|n| format!(" Reason: {n}"))
            .unwrap_or_default();
        self.notify(
            user_id,
            "Wallet top-up rejected",
            format!("Your top-up of Rs. {} was not approved.{reason}", ticket.amount),
        )
        .await;
        Ok(ticket)
    }

    /// Corrects a SUCCESS ticket to `new_amount` by posting the difference
    /// as an ADJUSTMENT entry.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidState`] unless the ticket is SUCCESS.
    /// - [`LedgerError::InsufficientFunds`] if the wallet cannot absorb a
    ///   downward correction.
    pub fn adjust(
        &self,
        ticket_id: TransactionId,
        new_amount: Money,
        note: Option<String>,
    ) -> Result<WalletTransaction, LedgerError> {
        if !new_amount.is_positive() {
            return Err(LedgerError::Validation(
                "adjusted amount must be positive".into(),
            ));
        }
        let user_id = self.owner(ticket_id)?;
        let ticket = self.store.atomic(user_id, |unit| {
            let ticket = manual_ticket(unit, ticket_id)?;
            if ticket.status != TransactionStatus::Success {
                return Err(LedgerError::invalid_state(ticket.status));
            }
            let delta = new_amount - ticket.display_amount();
            if delta == Money::ZERO {
                return Ok(ticket);
            }

            unit.apply_entry(
                delta,
                EntryDraft::new(TransactionKind::Adjustment, TransactionStatus::Success)
                    .related(ticket_id)
                    .note(note.clone()),
            )?;
            let entry = unit
                .entry_mut(ticket_id)
                .ok_or(LedgerError::TransactionNotFound)?;
            entry.adjusted_amount = Some(new_amount);
            if note.is_some() {
                entry.admin_note = note;
            }
            Ok(entry.clone())
        })?;
        info!(%user_id, ticket = %ticket_id, amount = new_amount.minor(), "manual top-up adjusted");
        Ok(ticket)
    }

    /// Reverses a SUCCESS ticket with a DELETION entry. The debit is capped
    /// at the current balance.
    pub fn revert(
        &self,
        ticket_id: TransactionId,
        note: Option<String>,
    ) -> Result<WalletTransaction, LedgerError> {
        let user_id = self.owner(ticket_id)?;
        let ticket = self.store.atomic(user_id, |unit| {
            let ticket = manual_ticket(unit, ticket_id)?;
            if ticket.status != TransactionStatus::Success {
                return Err(LedgerError::invalid_state(ticket.status));
            }

            let deletion = unit.apply_entry(
                -ticket.display_amount(),
                EntryDraft::new(TransactionKind::Deletion, TransactionStatus::Success)
                    .related(ticket_id)
                    .note(note.clone()),
            )?;
            if deletion.amount != -ticket.display_amount() {
                warn!(
                    %user_id,
                    ticket = %ticket_id,
                    requested = ticket.display_amount().minor(),
                    debited = -deletion.amount.minor(),
                    "revert capped at wallet balance"
                );
            }
            let entry = unit
                .entry_mut(ticket_id)
                .ok_or(LedgerError::TransactionNotFound)?;
            entry.status = TransactionStatus::Deleted;
            if note.is_some() {
                entry.admin_note = note;
            }
            Ok(entry.clone())
        })?;
        info!(%user_id, ticket = %ticket_id, "manual top-up reverted");
        Ok(ticket)
    }

    /// Manual tickets across all users, newest first.
    pub fn list(
        &self,
        status: Option<TransactionStatus>,
        page: PageRequest,
    ) -> Page<WalletTransaction> {
        let mut tickets: Vec<WalletTransaction> = self
            .store
            .all_transactions()
            .into_iter()
            .filter(|e| e.is_manual_topup())
            .filter(|e| status.is_none_or(|s| e.status == s))
            .collect();
        tickets.reverse();
        Page::slice(tickets, page)
    }

    fn owner(&self, ticket_id: TransactionId) -> Result<UserId, LedgerError> {
        self.store
            .owner_of_transaction(ticket_id)
            .ok_or(LedgerError::TransactionNotFound)
    }

    async fn notify(&self, to: UserId, subject: &str, body: String) {
        let email = Email {
            to,
            subject: subject.to_string(),
            body,
        };
        if let Err(e) = self.mailer.send(email).await {
            warn!(user_id = %to, error = %e, "review email not sent");
        }
    }
}

fn manual_ticket(
    unit: &UnitOfWork<'_>,
    id: TransactionId,
) -> Result<WalletTransaction, LedgerError> {
    unit.entry(id)
        .filter(|e| e.is_manual_topup())
        .cloned()
        .ok_or(LedgerError::TransactionNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailer::MemoryMailer;

    fn setup() -> (Arc<LedgerStore>, Arc<MemoryMailer>, AdminReview) {
        let store = Arc::new(LedgerStore::in_memory());
        let mailer = Arc::new(MemoryMailer::new());
        let review = AdminReview::new(store.clone(), mailer.clone(), AdminReview::DEFAULT_MAX_OPEN);
        (store, mailer, review)
    }

    fn request(amount: i64, key: &str) -> ManualTopupRequest {
        ManualTopupRequest {
            amount: Money(amount),
            idempotency_key: key.into(),
        }
    }

    #[test]
    fn fourth_open_ticket_is_rejected() {
        let (_, _, review) = setup();
        let user = UserId::new();
        for i in 0..3 {
            review.initialize(user, request(1_000, &format!("k{i}"))).unwrap();
        }
        assert_eq!(
            review.initialize(user, request(1_000, "k3")),
            Err(LedgerError::TooManyPending)
        );
    }

    #[test]
    fn same_key_replays_ticket() {
        let (_, _, review) = setup();
        let user = UserId::new();
        let first = review.initialize(user, request(1_000, "k")).unwrap();
        let second = review.initialize(user, request(1_000, "k")).unwrap();
        assert!(second.replayed);
        assert_eq!(first.transaction.id, second.transaction.id);
        assert!(matches!(
            review.initialize(user, request(2_000, "k")),
            Err(LedgerError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn approve_requires_receipt_and_is_idempotent() {
        let (store, mailer, review) = setup();
        let user = UserId::new();
        let ticket = review.initialize(user, request(5_000, "k")).unwrap().transaction;

        assert!(matches!(
            review.approve(ticket.id, None).await,
            Err(LedgerError::InvalidState(_))
        ));
        review.attach_receipt(user, ticket.id, "receipts/abc.jpg").unwrap();
        review.approve(ticket.id, Some("ok".into())).await.unwrap();
        let again = review.approve(ticket.id, None).await.unwrap();

        assert_eq!(again.status, TransactionStatus::Success);
        assert_eq!(again.admin_note.as_deref(), Some("ok"));
        assert_eq!(store.balance(user), Money(5_000));
        assert_eq!(mailer.sent().len(), 1);
    }

    #[tokio::test]
    async fn reject_leaves_balance() {
        let (store, mailer, review) = setup();
        let user = UserId::new();
        let ticket = review.initialize(user, request(5_000, "k")).unwrap().transaction;
        let rejected = review.reject(ticket.id, Some("blurry".into())).await.unwrap();

        assert_eq!(rejected.status, TransactionStatus::Rejected);
        assert_eq!(store.balance(user), Money::ZERO);
        assert!(mailer.sent()[0].body.contains("blurry"));
        assert!(matches!(
            review.attach_receipt(user, ticket.id, "r"),
            Err(LedgerError::InvalidState(_))
        ));
    }

    #[test]
    fn receipt_for_foreign_ticket_is_not_found() {
        let (_, _, review) = setup();
        let ticket = review
            .initialize(UserId::new(), request(1_000, "k"))
            .unwrap()
            .transaction;
        assert_eq!(
            review.attach_receipt(UserId::new(), ticket.id, "r"),
            Err(LedgerError::TransactionNotFound)
        );
    }

    #[test]
    fn list_filters_by_status() {
        let (_, _, review) = setup();
        let user = UserId::new();
        let a = review.initialize(user, request(1_000, "a")).unwrap().transaction;
        review.initialize(user, request(2_000, "b")).unwrap();
        review.attach_receipt(user, a.id, "r").unwrap();

        let under_review = review.list(Some(TransactionStatus::UnderReview), PageRequest::default());
        assert_eq!(under_review.total, 1);
        assert_eq!(under_review.items[0].id, a.id);
        assert_eq!(review.list(None, PageRequest::default()).total, 2);
    }
}
