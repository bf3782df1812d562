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

//! Ledger store: the wallet accounts of every user.
//!
//! The store is the only way to mutate a balance. It hands out per-user
//! atomic units (see [`Account::atomic`]) and keeps global lookup indexes
//! that are written only after a unit commits.
//!
//! # Thread Safety
//!
//! Accounts live in a [`DashMap`] as `Arc`s that are cloned out before the
//! account lock is taken, so a unit never holds a map shard lock. Units for
//! different users run in parallel; units for one user are serialized and
//! their commit order is the user's posting `sequence`.

use crate::account::{Account, UnitOfWork};
use crate::base::{Money, OrderId, Page, PageRequest, TransactionId, UserId};
use crate::error::LedgerError;
use crate::idempotency::IdempotencyRecord;
use crate::journal::{CommittedUnit, FileJournal, Journal, MemoryJournal};
use crate::notifier::{BalanceChanged, BalanceNotifier, InProcessBus};
use crate::order::{Order, PaymentReference};
use crate::transaction::{EntryDraft, TransactionKind, TransactionStatus, WalletTransaction};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Durable wallet ledger shared by every request handler.
pub struct LedgerStore {
    accounts: DashMap<UserId, Arc<Account>>,
    /// Owner of each transaction, for lookups by id alone.
    transactions: DashMap<TransactionId, UserId>,
    orders: DashMap<OrderId, UserId>,
    /// `(gateway, gateway_ref)` to the record that gateway is settling.
    gateway_refs: DashMap<(String, String), PaymentReference>,
    journal: Arc<dyn Journal>,
    notifier: Arc<dyn BalanceNotifier>,
}

impl LedgerStore {
    pub fn new(journal: Arc<dyn Journal>, notifier: Arc<dyn BalanceNotifier>) -> Self {
        Self {
            accounts: DashMap::new(),
            transactions: DashMap::new(),
            orders: DashMap::new(),
            gateway_refs: DashMap::new(),
            journal,
            notifier,
        }
    }

    /// A store that keeps nothing across restarts.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryJournal), Arc::new(InProcessBus::default()))
    }

    /// Opens a store backed by `journal`, replaying everything it holds.
    pub fn open(
        journal: FileJournal,
        notifier: Arc<dyn BalanceNotifier>,
    ) -> Result<Self, LedgerError> {
        let units = journal.load()?;
        let path = journal.path().display().to_string();
        let store = Self::new(Arc::new(journal), notifier);
        let count = units.len();
        for unit in &units {
            store.account(unit.user_id).restore(unit);
            store.index(unit);
        }
        info!(%path, units = count, users = store.accounts.len(), "ledger journal replayed");
        Ok(store)
    }

    pub fn notifier(&self) -> &Arc<dyn BalanceNotifier> {
        &self.notifier
    }

    fn account(&self, user_id: UserId) -> Arc<Account> {
        self.accounts
            .entry(user_id)
            .or_insert_with(|| Arc::new(Account::new(user_id)))
            .clone()
    }

    fn existing(&self, user_id: UserId) -> Option<Arc<Account>> {
        self.accounts.get(&user_id).map(|a| Arc::clone(a.value()))
    }

    /// Runs `operation` as one atomic unit on `user_id`'s wallet.
    ///
    /// The lookup indexes are updated before the user's lock is released,
    /// so anyone who can see the unit can also find it by id. If the unit
    /// wrote any ledger entry, a [`BalanceChanged`] event is then published.
    pub fn atomic<T, F>(&self, user_id: UserId, operation: F) -> Result<T, LedgerError>
    where
        F: FnOnce(&mut UnitOfWork<'_>) -> Result<T, LedgerError>,
    {
        let account = self.account(user_id);
        let (value, unit) = account
            .atomic_then(self.journal.as_ref(), operation, |unit| self.index(unit))
            .inspect_err(|e| {
                if let LedgerError::Storage(reason) = e {
                    error!(%user_id, %reason, "atomic unit rolled back on storage failure");
                }
            })?;

        if !unit.is_empty() {
            debug!(
                %user_id,
                entries = unit.entries.len(),
                orders = unit.orders.len(),
                balance = unit.balance.minor(),
                "unit committed"
            );
        }
        if let Some(last) = unit.entries.last() {
            self.notifier.publish(BalanceChanged {
                user_id,
                balance: unit.balance,
                transaction_id: Some(last.id),
                at: unit.committed_at,
            });
        }
        Ok(value)
    }

    fn index(&self, unit: &CommittedUnit) {
        for entry in &unit.entries {
            self.transactions.insert(entry.id, unit.user_id);
            if entry.kind != TransactionKind::Topup {
                continue;
            }
            if let (Some(gateway), Some(gateway_ref)) = (&entry.gateway, &entry.gateway_ref) {
                self.gateway_refs.insert(
                    (gateway.clone(), gateway_ref.clone()),
                    PaymentReference::Topup(entry.id),
                );
            }
        }
        for order in &unit.orders {
            self.orders.insert(order.id, unit.user_id);
            if let (Some(gateway), Some(gateway_ref)) = (&order.gateway, &order.gateway_ref) {
                self.gateway_refs.insert(
                    (gateway.clone(), gateway_ref.clone()),
                    PaymentReference::Order(order.id),
                );
            }
        }
    }

    /// Posts one effective entry in its own unit.
    pub fn apply_entry(
        &self,
        user_id: UserId,
        delta: Money,
        draft: EntryDraft,
    ) -> Result<WalletTransaction, LedgerError> {
        self.atomic(user_id, |unit| unit.apply_entry(delta, draft))
    }

    /// Makes a pending entry effective in its own unit.
    pub fn settle_entry(
        &self,
        user_id: UserId,
        id: TransactionId,
        status: TransactionStatus,
    ) -> Result<WalletTransaction, LedgerError> {
        self.atomic(user_id, |unit| unit.settle_entry(id, status))
    }

    pub fn balance(&self, user_id: UserId) -> Money {
        self.existing(user_id)
            .map(|a| a.balance())
            .unwrap_or(Money::ZERO)
    }

    /// Newest first.
    pub fn list_entries(&self, user_id: UserId, page: PageRequest) -> Page<WalletTransaction> {
        let mut entries = self.entries(user_id);
        entries.reverse();
        Page::slice(entries, page)
    }

    /// Entries in creation order.
    pub fn entries(&self, user_id: UserId) -> Vec<WalletTransaction> {
        self.existing(user_id)
            .map(|a| a.entries())
            .unwrap_or_default()
    }

    pub fn transaction(&self, id: TransactionId) -> Option<WalletTransaction> {
        let owner = self.owner_of_transaction(id)?;
        self.existing(owner)?.entry(id)
    }

    /// `id` if it belongs to `user_id`, read from that user's wallet.
    pub fn user_transaction(
        &self,
        user_id: UserId,
        id: TransactionId,
    ) -> Option<WalletTransaction> {
        self.existing(user_id)?.entry(id)
    }

    pub fn owner_of_transaction(&self, id: TransactionId) -> Option<UserId> {
        self.transactions.get(&id).map(|u| *u)
    }

    pub fn order(&self, id: OrderId) -> Option<Order> {
        let owner = self.owner_of_order(id)?;
        self.existing(owner)?.order(id)
    }

    /// `id` if it belongs to `user_id`, read from that user's wallet.
    pub fn user_order(&self, user_id: UserId, id: OrderId) -> Option<Order> {
        self.existing(user_id)?.order(id)
    }

    pub fn owner_of_order(&self, id: OrderId) -> Option<UserId> {
        self.orders.get(&id).map(|u| *u)
    }

    pub fn orders_for(&self, user_id: UserId) -> Vec<Order> {
        self.existing(user_id)
            .map(|a| a.orders())
            .unwrap_or_default()
    }

    pub fn idempotency_record(&self, user_id: UserId, key: &str) -> Option<IdempotencyRecord> {
        self.existing(user_id)?.idempotency_record(key)
    }

    pub fn resolve_gateway_ref(&self, gateway: &str, gateway_ref: &str) -> Option<PaymentReference> {
        self.gateway_refs
            .get(&(gateway.to_string(), gateway_ref.to_string()))
            .map(|r| *r)
    }

    /// Replays `user_id`'s effective entries and checks them against the
    /// cached balance.
    pub fn reconstruct_balance(&self, user_id: UserId) -> Result<Money, LedgerError> {
        match self.existing(user_id) {
            Some(account) => account.reconstruct_balance(),
            None => Ok(Money::ZERO),
        }
    }

    pub fn users(&self) -> Vec<UserId> {
        self.accounts.iter().map(|a| *a.key()).collect()
    }

    /// Every entry of every user, oldest first.
    pub fn all_transactions(&self) -> Vec<WalletTransaction> {
        let accounts: Vec<Arc<Account>> =
            self.accounts.iter().map(|a| Arc::clone(a.value())).collect();
        let mut all: Vec<WalletTransaction> =
            accounts.iter().flat_map(|a| a.entries()).collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        all
    }
}

impl Default for LedgerStore {
    fn default() -> Self {
        Self::in_memory()
    }
}
