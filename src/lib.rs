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

//! # Wallet Ledger
//!
//! Payment and wallet ledger for a storefront: checkout intents split
//! between wallet funds and an external gateway, wallet holds, gateway
//! webhooks, and staff review of receipt-based top-ups.
//!
//! ## Core Components
//!
//! - [`LedgerStore`]: per-user atomic units over balances, entries and orders
//! - [`hold`]: provisional debits against an order (place, capture, release)
//! - [`CheckoutOrchestrator`]: quote, create intent, cancel
//! - [`GatewayRegistry`]: eSewa and Khalti adapters behind one interface
//! - [`WebhookReconciler`]: signed webhook and verify settlement
//! - [`AdminReview`]: manual top-up approval, adjustment and reversal
//! - [`InProcessBus`]: balance change fan-out for the SSE stream
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use wallet_ledger_rs::catalog::InMemoryCatalog;
//! use wallet_ledger_rs::checkout::{CartItem, CheckoutOrchestrator, IntentRequest};
//! use wallet_ledger_rs::order::PaymentStatus;
//! use wallet_ledger_rs::transaction::{EntryDraft, TransactionKind, TransactionStatus};
//! use wallet_ledger_rs::{GatewayRegistry, LedgerStore, Money, UserId};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let store = Arc::new(LedgerStore::in_memory());
//! let catalog = Arc::new(InMemoryCatalog::new());
//! let tea = catalog.add("Tea", Money(10_000));
//! let checkout =
//!     CheckoutOrchestrator::new(store.clone(), catalog, Arc::new(GatewayRegistry::default()));
//!
//! // Fund the wallet
//! let user = UserId::new();
//! store
//!     .apply_entry(
//!         user,
//!         Money(10_000),
//!         EntryDraft::new(TransactionKind::Topup, TransactionStatus::Success).gateway("esewa"),
//!     )
//!     .unwrap();
//!
//! // Pay for the whole cart from the wallet
//! let intent = checkout
//!     .create_intent(
//!         user,
//!         IntentRequest {
//!             items: vec![CartItem::new(tea, 1)],
//!             wallet_amount: Money(10_000),
//!             gateway: None,
//!             idempotency_key: "checkout-1".into(),
//!         },
//!     )
//!     .await
//!     .unwrap();
//!
//! assert_eq!(intent.status, PaymentStatus::Paid);
//! assert_eq!(store.balance(user), Money::ZERO);
//! # }
//! ```
//!
//! ## Thread Safety
//!
//! Every user's wallet sits behind its own lock, so requests for different
//! users run in parallel. Gateway calls never happen while a lock is held.

pub mod account;
pub mod auth;
mod base;
pub mod catalog;
pub mod checkout;
pub mod config;
pub mod error;
pub mod export;
pub mod gateway;
pub mod hold;
pub mod http;
pub mod idempotency;
pub mod journal;
pub mod mailer;
pub mod notifier;
pub mod order;
pub mod reconciler;
pub mod review;
pub mod signature;
pub mod store;
pub mod transaction;

pub use account::{Account, UnitOfWork};
pub use base::{Money, OrderId, Page, PageRequest, ProductId, TransactionId, UserId};
pub use checkout::CheckoutOrchestrator;
pub use error::LedgerError;
pub use gateway::GatewayRegistry;
pub use journal::{FileJournal, Journal, MemoryJournal};
pub use notifier::{BalanceChanged, BalanceNotifier, InProcessBus};
pub use reconciler::WebhookReconciler;
pub use review::AdminReview;
pub use store::LedgerStore;
