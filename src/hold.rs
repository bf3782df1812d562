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

//! Wallet holds: provisional debits against an order.
//!
//! ```text
//!  none ──place_hold──► HOLD (Authorized) ──capture──► PURCHASE (Success)
//!                              │
//!                              └──release──► HOLD (Released) + RELEASE credit
//! ```
//!
//! The debit happens when the hold is placed, so the funds cannot be spent
//! twice. Capture and release on a hold that is already terminal return it
//! unchanged. An order carries at most one hold.

use crate::account::UnitOfWork;
use crate::base::{Money, OrderId, TransactionId, UserId};
use crate::error::LedgerError;
use crate::store::LedgerStore;
use crate::transaction::{EntryDraft, TransactionKind, TransactionStatus, WalletTransaction};

/// Debits `amount` and records it as the hold of `order_id`.
///
/// # Errors
///
/// - [`LedgerError::Validation`] if `amount` is not positive.
/// - [`LedgerError::OrderNotFound`] if the order is not part of this account.
/// - [`LedgerError::InvalidState`] if the order already has a hold.
/// - [`LedgerError::InsufficientFunds`] if the balance is below `amount`.
pub fn place_hold(
    unit: &mut UnitOfWork<'_>,
    amount: Money,
    order_id: OrderId,
) -> Result<WalletTransaction, LedgerError> {
    if !amount.is_positive() {
        return Err(LedgerError::Validation("hold amount must be positive".into()));
    }
    let order = unit.order(order_id).ok_or(LedgerError::OrderNotFound)?;
    if order.hold_transaction.is_some() {
        return Err(LedgerError::InvalidState("order already has a hold".into()));
    }

    let hold = unit.apply_entry(
        -amount,
        EntryDraft::new(TransactionKind::Hold, TransactionStatus::Authorized).order(order_id),
    )?;
    let order = unit.order_mut(order_id).ok_or(LedgerError::OrderNotFound)?;
    order.hold_transaction = Some(hold.id);
    Ok(hold)
}

/// Turns an authorized hold into a final purchase. No balance change.
pub fn capture(
    unit: &mut UnitOfWork<'_>,
    hold_id: TransactionId,
) -> Result<WalletTransaction, LedgerError> {
    let hold = authorized_hold(unit, hold_id)?;
    if hold.status.is_terminal() {
        return Ok(hold);
    }

    let entry = unit
        .entry_mut(hold_id)
        .ok_or(LedgerError::TransactionNotFound)?;
    entry.kind = TransactionKind::Purchase;
    entry.status = TransactionStatus::Success;
    Ok(entry.clone())
}

/// Credits an authorized hold back and marks it released.
pub fn release(
    unit: &mut UnitOfWork<'_>,
    hold_id: TransactionId,
) -> Result<WalletTransaction, LedgerError> {
    let hold = authorized_hold(unit, hold_id)?;
    if hold.status.is_terminal() {
        return Ok(hold);
    }

    let mut draft = EntryDraft::new(TransactionKind::Release, TransactionStatus::Success)
        .related(hold_id);
    draft.order_id = hold.order_id;
    unit.apply_entry(-hold.amount, draft)?;

    let entry = unit
        .entry_mut(hold_id)
        .ok_or(LedgerError::TransactionNotFound)?;
    entry.status = TransactionStatus::Released;
    Ok(entry.clone())
}

/// Loads `hold_id` and checks it is the hold of its order.
fn authorized_hold(
    unit: &UnitOfWork<'_>,
    hold_id: TransactionId,
) -> Result<WalletTransaction, LedgerError> {
    let entry = unit
        .entry(hold_id)
        .ok_or(LedgerError::TransactionNotFound)?;
    let is_order_hold = entry
        .order_id
        .and_then(|order_id| unit.order(order_id))
        .and_then(|order| order.hold_transaction)
        == Some(hold_id);
    if !is_order_hold {
        return Err(LedgerError::InvalidState("entry is not a hold".into()));
    }
    Ok(entry.clone())
}

impl LedgerStore {
    /// Places a hold in its own unit.
    pub fn place_hold(
        &self,
        user_id: UserId,
        amount: Money,
        order_id: OrderId,
    ) -> Result<WalletTransaction, LedgerError> {
        self.atomic(user_id, |unit| place_hold(unit, amount, order_id))
    }

    pub fn capture(
        &self,
        user_id: UserId,
        hold_id: TransactionId,
    ) -> Result<WalletTransaction, LedgerError> {
        self.atomic(user_id, |unit| capture(unit, hold_id))
    }

    pub fn release(
        &self,
        user_id: UserId,
        hold_id: TransactionId,
    ) -> Result<WalletTransaction, LedgerError> {
        self.atomic(user_id, |unit| release(unit, hold_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::Order;

    fn funded_order(store: &LedgerStore, user: UserId, balance: i64) -> OrderId {
        store
            .atomic(user, |unit| {
                unit.apply_entry(
                    Money(balance),
                    EntryDraft::new(TransactionKind::Topup, TransactionStatus::Success)
                        .gateway("test"),
                )?;
                let order = Order::new(
                    user,
                    Vec::new(),
                    Money(balance),
                    Money(balance),
                    None,
                    unit.now(),
                );
                let id = order.id;
                unit.insert_order(order);
                Ok(id)
            })
            .unwrap()
    }

    #[test]
    fn hold_debits_immediately() {
        let store = LedgerStore::in_memory();
        let user = UserId::new();
        let order = funded_order(&store, user, 3_000);

        let hold = store.place_hold(user, Money(3_000), order).unwrap();
        assert_eq!(hold.status, TransactionStatus::Authorized);
        assert_eq!(hold.amount, Money(-3_000));
        assert_eq!(store.balance(user), Money::ZERO);
        assert_eq!(store.order(order).unwrap().hold_transaction, Some(hold.id));
    }

    #[test]
    fn second_hold_on_same_order_is_rejected() {
        let store = LedgerStore::in_memory();
        let user = UserId::new();
        let order = funded_order(&store, user, 5_000);

        store.place_hold(user, Money(1_000), order).unwrap();
        let second = store.place_hold(user, Money(1_000), order);
        assert!(matches!(second, Err(LedgerError::InvalidState(_))));
        assert_eq!(store.balance(user), Money(4_000));
    }

    #[test]
    fn release_is_idempotent() {
        let store = LedgerStore::in_memory();
        let user = UserId::new();
        let order = funded_order(&store, user, 3_000);
        let hold = store.place_hold(user, Money(3_000), order).unwrap();

        let released = store.release(user, hold.id).unwrap();
        assert_eq!(released.status, TransactionStatus::Released);
        assert_eq!(store.balance(user), Money(3_000));

        let again = store.release(user, hold.id).unwrap();
        assert_eq!(again.status, TransactionStatus::Released);
        assert_eq!(store.balance(user), Money(3_000));
    }

    #[test]
    fn release_after_capture_is_noop() {
        let store = LedgerStore::in_memory();
        let user = UserId::new();
        let order = funded_order(&store, user, 3_000);
        let hold = store.place_hold(user, Money(3_000), order).unwrap();

        let captured = store.capture(user, hold.id).unwrap();
        assert_eq!(captured.kind, TransactionKind::Purchase);
        assert_eq!(captured.status, TransactionStatus::Success);

        let after = store.release(user, hold.id).unwrap();
        assert_eq!(after.status, TransactionStatus::Success);
        assert_eq!(store.balance(user), Money::ZERO);
        assert_eq!(store.reconstruct_balance(user), Ok(Money::ZERO));
    }

    #[test]
    fn capture_rejects_non_hold_entries() {
        let store = LedgerStore::in_memory();
        let user = UserId::new();
        let topup = store
            .apply_entry(
                user,
                Money(100),
                EntryDraft::new(TransactionKind::Topup, TransactionStatus::Success),
            )
            .unwrap();
        assert!(matches!(
            store.capture(user, topup.id),
            Err(LedgerError::InvalidState(_))
        ));
    }
}
