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

//! Per-user wallet account and its atomic unit of work.
//!
//! Every balance or entry mutation for a user happens inside
//! [`Account::atomic`]: the account lock is taken, writes are staged in a
//! [`UnitOfWork`], the resulting write set is appended to the journal, and
//! only then applied. An error at any step leaves the account untouched.
//!
//! ```text
//!  lock ──► stage (UnitOfWork) ──► journal.append ──► apply ──► unlock
//!              │                         │
//!              └── Err: discard ◄────────┘
//! ```

use crate::base::{Money, OrderId, TransactionId, UserId};
use crate::error::LedgerError;
use crate::idempotency::IdempotencyRecord;
use crate::journal::{CommittedUnit, Journal};
use crate::order::Order;
use crate::transaction::{EntryDraft, TransactionStatus, WalletTransaction};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Debug)]
pub(crate) struct AccountData {
    user_id: UserId,
    balance: Money,
    next_sequence: u64,
    /// Entries in creation order.
    entries: Vec<WalletTransaction>,
    entry_index: HashMap<TransactionId, usize>,
    orders: HashMap<OrderId, Order>,
    idempotency: HashMap<String, IdempotencyRecord>,
}

impl AccountData {
    fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            balance: Money::ZERO,
            next_sequence: 0,
            entries: Vec::new(),
            entry_index: HashMap::new(),
            orders: HashMap::new(),
            idempotency: HashMap::new(),
        }
    }

    fn assert_invariants(&self) {
        debug_assert!(
            !self.balance.is_negative(),
            "Invariant violated: wallet balance went negative: {}",
            self.balance
        );
        debug_assert!(
            self.entries.len() == self.entry_index.len(),
            "Invariant violated: entry index out of sync"
        );
    }

    fn entry(&self, id: TransactionId) -> Option<&WalletTransaction> {
        self.entry_index.get(&id).map(|&i| &self.entries[i])
    }

    /// Applies a committed write set. Entries and orders are upserted by id.
    fn apply(&mut self, unit: &CommittedUnit) {
        self.balance = unit.balance;
        self.next_sequence = unit.next_sequence;
        for entry in &unit.entries {
            match self.entry_index.get(&entry.id) {
                Some(&i) => self.entries[i] = entry.clone(),
                None => {
                    self.entry_index.insert(entry.id, self.entries.len());
                    self.entries.push(entry.clone());
                }
            }
        }
        for order in &unit.orders {
            self.orders.insert(order.id, order.clone());
        }
        for record in &unit.idempotency {
            self.idempotency.insert(record.key.clone(), record.clone());
        }
        self.assert_invariants();
    }
}

/// Staged writes against one account.
///
/// Reads through the unit see staged values first, then committed ones.
pub struct UnitOfWork<'a> {
    data: &'a AccountData,
    now: DateTime<Utc>,
    balance: Money,
    next_sequence: u64,
    entries: Vec<WalletTransaction>,
    entry_index: HashMap<TransactionId, usize>,
    orders: HashMap<OrderId, Order>,
    idempotency: Vec<IdempotencyRecord>,
}

impl<'a> UnitOfWork<'a> {
    fn begin(data: &'a AccountData) -> Self {
        Self {
            data,
            now: Utc::now(),
            balance: data.balance,
            next_sequence: data.next_sequence,
            entries: Vec::new(),
            entry_index: HashMap::new(),
            orders: HashMap::new(),
            idempotency: Vec::new(),
        }
    }

    pub fn user_id(&self) -> UserId {
        self.data.user_id
    }

    /// Timestamp shared by every write in this unit.
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn balance(&self) -> Money {
        self.balance
    }

    pub fn entry(&self, id: TransactionId) -> Option<&WalletTransaction> {
        match self.entry_index.get(&id) {
            Some(&i) => Some(&self.entries[i]),
            None => self.data.entry(id),
        }
    }

    /// Stages a copy of a committed entry for update.
    pub fn entry_mut(&mut self, id: TransactionId) -> Option<&mut WalletTransaction> {
        if !self.entry_index.contains_key(&id) {
            let committed = self.data.entry(id)?.clone();
            self.stage_entry(committed);
        }
        let now = self.now;
        self.entry_index.get(&id).map(|&i| {
            let entry = &mut self.entries[i];
            entry.updated_at = now;
            entry
        })
    }

    /// All entries as this unit sees them, committed ones first in creation order.
    pub fn entries(&self) -> impl Iterator<Item = &WalletTransaction> + '_ {
        let committed = self
            .data
            .entries
            .iter()
            .map(move |e| self.entry(e.id).unwrap_or(e));
        let fresh = self
            .entries
            .iter()
            .filter(move |e| !self.data.entry_index.contains_key(&e.id));
        committed.chain(fresh)
    }

    pub fn order(&self, id: OrderId) -> Option<&Order> {
        self.orders.get(&id).or_else(|| self.data.orders.get(&id))
    }

    pub fn order_mut(&mut self, id: OrderId) -> Option<&mut Order> {
        if !self.orders.contains_key(&id) {
            let committed = self.data.orders.get(&id)?.clone();
            self.orders.insert(id, committed);
        }
        let now = self.now;
        self.orders.get_mut(&id).map(|order| {
            order.updated_at = now;
            order
        })
    }

    pub fn insert_order(&mut self, order: Order) {
        self.orders.insert(order.id, order);
    }

    pub fn idempotency_record(&self, key: &str) -> Option<&IdempotencyRecord> {
        self.idempotency
            .iter()
            .find(|r| r.key == key)
            .or_else(|| self.data.idempotency.get(key))
    }

    pub(crate) fn record_idempotency(&mut self, record: IdempotencyRecord) {
        self.idempotency.push(record);
    }

    /// Posts a new effective entry of `delta` against the balance.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InsufficientFunds`] if the balance would go negative.
    ///   DELETION entries are clamped to the available balance instead.
    /// - [`LedgerError::Validation`] on arithmetic overflow.
    pub fn apply_entry(
        &mut self,
        delta: Money,
        draft: EntryDraft,
    ) -> Result<WalletTransaction, LedgerError> {
        let mut delta = delta;
        let mut new_balance = self.checked_balance(delta)?;
        if new_balance.is_negative() {
            if draft.kind.requires_non_negative() {
                return Err(LedgerError::InsufficientFunds);
            }
            delta = -self.balance;
            new_balance = Money::ZERO;
        }

        let mut tx = draft.into_transaction(self.user_id(), delta, self.now);
        tx.balance_after = Some(new_balance);
        tx.sequence = Some(self.take_sequence());
        self.balance = new_balance;
        self.stage_entry(tx.clone());
        Ok(tx)
    }

    /// Records an entry that has no balance effect yet.
    pub fn add_pending(&mut self, amount: Money, draft: EntryDraft) -> WalletTransaction {
        let tx = draft.into_transaction(self.user_id(), amount, self.now);
        self.stage_entry(tx.clone());
        tx
    }

    /// Makes a non-effective entry effective with its recorded amount.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::TransactionNotFound`] if no such entry exists.
    /// - [`LedgerError::InvalidState`] if the entry already moved the balance.
    /// - [`LedgerError::InsufficientFunds`] if the balance would go negative.
    pub fn settle_entry(
        &mut self,
        id: TransactionId,
        status: TransactionStatus,
    ) -> Result<WalletTransaction, LedgerError> {
        let entry = self.entry(id).ok_or(LedgerError::TransactionNotFound)?;
        if entry.is_effective() {
            return Err(LedgerError::invalid_state(entry.status));
        }
        let (amount, kind) = (entry.amount, entry.kind);
        let new_balance = self.checked_balance(amount)?;
        if new_balance.is_negative() && kind.requires_non_negative() {
            return Err(LedgerError::InsufficientFunds);
        }

        let sequence = self.take_sequence();
        self.balance = new_balance;
        let entry = self
            .entry_mut(id)
            .ok_or(LedgerError::TransactionNotFound)?;
        entry.status = status;
        entry.balance_after = Some(new_balance);
        entry.sequence = Some(sequence);
        Ok(entry.clone())
    }

    fn checked_balance(&self, delta: Money) -> Result<Money, LedgerError> {
        self.balance
            .checked_add(delta)
            .ok_or_else(|| LedgerError::Validation("amount out of range".into()))
    }

    fn take_sequence(&mut self) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        sequence
    }

    fn stage_entry(&mut self, entry: WalletTransaction) {
        match self.entry_index.get(&entry.id) {
            Some(&i) => self.entries[i] = entry,
            None => {
                self.entry_index.insert(entry.id, self.entries.len());
                self.entries.push(entry);
            }
        }
    }

    fn finish(self) -> CommittedUnit {
        let mut orders: Vec<Order> = self.orders.into_values().collect();
        orders.sort_by_key(|o| o.id);
        CommittedUnit {
            user_id: self.data.user_id,
            balance: self.balance,
            next_sequence: self.next_sequence,
            entries: self.entries,
            orders,
            idempotency: self.idempotency,
            committed_at: self.now,
        }
    }
}

/// A user's wallet: balance, ledger entries, orders and idempotency records
/// behind one lock.
#[derive(Debug)]
pub struct Account {
    inner: Mutex<AccountData>,
}

impl Account {
    pub fn new(user_id: UserId) -> Self {
        Self {
            inner: Mutex::new(AccountData::new(user_id)),
        }
    }

    pub fn user_id(&self) -> UserId {
        self.inner.lock().user_id
    }

    pub fn balance(&self) -> Money {
        self.inner.lock().balance
    }

    /// Runs `operation` as one atomic unit.
    ///
    /// The lock is held for the whole unit; `operation` must not block on
    /// I/O other than the journal append that follows it.
    pub fn atomic<T, F>(
        &self,
        journal: &dyn Journal,
        operation: F,
    ) -> Result<(T, CommittedUnit), LedgerError>
    where
        F: FnOnce(&mut UnitOfWork<'_>) -> Result<T, LedgerError>,
    {
        self.atomic_then(journal, operation, |_| {})
    }

    /// Like [`Account::atomic`], calling `on_commit` with a non-empty unit
    /// after it is applied and before the lock is released.
    pub fn atomic_then<T, F, C>(
        &self,
        journal: &dyn Journal,
        operation: F,
        on_commit: C,
    ) -> Result<(T, CommittedUnit), LedgerError>
    where
        F: FnOnce(&mut UnitOfWork<'_>) -> Result<T, LedgerError>,
        C: FnOnce(&CommittedUnit),
    {
        let mut data = self.inner.lock();
        let mut unit = UnitOfWork::begin(&data);
        let value = operation(&mut unit)?;
        let committed = unit.finish();
        if !committed.is_empty() {
            journal.append(&committed)?;
            data.apply(&committed);
            on_commit(&committed);
        }
        Ok((value, committed))
    }

    /// Applies a unit read back from the journal.
    pub(crate) fn restore(&self, unit: &CommittedUnit) {
        self.inner.lock().apply(unit);
    }

    pub fn entries(&self) -> Vec<WalletTransaction> {
        self.inner.lock().entries.clone()
    }

    pub fn entry(&self, id: TransactionId) -> Option<WalletTransaction> {
        self.inner.lock().entry(id).cloned()
    }

    pub fn order(&self, id: OrderId) -> Option<Order> {
        self.inner.lock().orders.get(&id).cloned()
    }

    pub fn orders(&self) -> Vec<Order> {
        let mut orders: Vec<Order> = self.inner.lock().orders.values().cloned().collect();
        orders.sort_by_key(|o| o.created_at);
        orders
    }

    pub fn idempotency_record(&self, key: &str) -> Option<IdempotencyRecord> {
        self.inner.lock().idempotency.get(key).cloned()
    }

    /// Replays effective entries in sequence order and checks every
    /// recorded balance snapshot along the way.
    pub fn reconstruct_balance(&self) -> Result<Money, LedgerError> {
        let data = self.inner.lock();
        let mut effective: Vec<&WalletTransaction> =
            data.entries.iter().filter(|e| e.is_effective()).collect();
        effective.sort_by_key(|e| e.sequence);

        let mut balance = Money::ZERO;
        for entry in effective {
            balance += entry.amount;
            if entry.balance_after != Some(balance) {
                return Err(LedgerError::Storage(format!(
                    "ledger replay diverges at entry {} (sequence {:?})",
                    entry.id, entry.sequence
                )));
            }
        }
        if balance != data.balance {
            return Err(LedgerError::Storage(format!(
                "cached balance {} differs from ledger {}",
                data.balance, balance
            )));
        }
        Ok(balance)
    }
}
