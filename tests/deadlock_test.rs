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

//! Deadlock detection tests using parking_lot's built-in deadlock detector.
//!
//! The ledger takes an account lock and, inside it, the journal lock. These
//! tests drive the real store from many threads while the detector watches
//! the lock graph for cycles.

mod common;

use common::{GATEWAY, Harness, intent, signed_webhook};
use parking_lot::deadlock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use wallet_ledger_rs::export::export_csv;
use wallet_ledger_rs::gateway::PaymentOutcome;
use wallet_ledger_rs::order::{PaymentReference, PaymentStatus};
use wallet_ledger_rs::transaction::{EntryDraft, TransactionKind, TransactionStatus};
use wallet_ledger_rs::{FileJournal, InProcessBus, LedgerStore, Money, PageRequest, UserId};

/// Starts a background thread that checks for deadlocks.
/// Returns a handle to stop the detector.
fn start_deadlock_detector() -> Arc<AtomicBool> {
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();

    thread::spawn(move || {
        while running_clone.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(100));
            let deadlocks = deadlock::check_deadlock();
            if !deadlocks.is_empty() {
                eprintln!("\n=== DEADLOCK DETECTED ===");
                for (i, threads) in deadlocks.iter().enumerate() {
                    eprintln!("\nDeadlock #{}", i + 1);
                    for t in threads {
                        eprintln!("Thread ID: {:?}", t.thread_id());
                        eprintln!("Backtrace:\n{:#?}", t.backtrace());
                    }
                }
                panic!("Deadlock detected! See output above for details.");
            }
        }
    });

    running
}

/// Stops the deadlock detector.
fn stop_deadlock_detector(running: Arc<AtomicBool>) {
    running.store(false, Ordering::SeqCst);
    thread::sleep(Duration::from_millis(150));
}

fn credit(store: &LedgerStore, user: UserId, amount: i64) {
    store
        .apply_entry(
            user,
            Money(amount),
            EntryDraft::new(TransactionKind::Topup, TransactionStatus::Success).gateway("esewa"),
        )
        .unwrap();
}

fn debit(store: &LedgerStore, user: UserId, amount: i64) -> bool {
    store
        .apply_entry(
            user,
            Money(-amount),
            EntryDraft::new(TransactionKind::Purchase, TransactionStatus::Success),
        )
        .is_ok()
}

// === Tests ===

/// Many threads writing and reading one wallet through a file journal.
#[test]
fn no_deadlock_high_contention_single_user() {
    let detector = start_deadlock_detector();
    let dir = tempfile::tempdir().unwrap();
    let journal = FileJournal::open(dir.path().join("ledger.jsonl"), false).unwrap();
    let store = Arc::new(LedgerStore::open(journal, Arc::new(InProcessBus::default())).unwrap());
    let user = UserId::new();

    const NUM_THREADS: usize = 32;
    const OPS_PER_THREAD: usize = 100;

    let handles: Vec<_> = (0..NUM_THREADS)
        .map(|_| {
            let store = store.clone();
            thread::spawn(move || {
                for i in 0..OPS_PER_THREAD {
                    match i % 3 {
                        0 => credit(&store, user, 1_000),
                        1 => {
                            debit(&store, user, 700);
                        }
                        _ => {
                            let _ = store.balance(user);
                            let _ = store.list_entries(user, PageRequest::default());
                            let _ = store.reconstruct_balance(user);
                        }
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    stop_deadlock_detector(detector);

    assert!(!store.balance(user).is_negative());
    assert_eq!(store.reconstruct_balance(user), Ok(store.balance(user)));
}

/// Writers on many wallets while readers walk all of them.
#[test]
fn no_deadlock_cross_user_reads() {
    let detector = start_deadlock_detector();
    let store = Arc::new(LedgerStore::in_memory());
    let users: Arc<Vec<UserId>> = Arc::new((0..10).map(|_| UserId::new()).collect());

    let mut handles = Vec::new();
    for t in 0..20 {
        let store = store.clone();
        let users = users.clone();
        handles.push(thread::spawn(move || {
            for i in 0..50 {
                let user = users[(t + i) % users.len()];
                if t % 4 == 0 {
                    let _ = store.all_transactions();
                    let mut out = Vec::new();
                    export_csv(&store, &mut out).unwrap();
                } else {
                    credit(&store, user, 100);
                    debit(&store, user, 50);
                }
            }
        }));
    }

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    stop_deadlock_detector(detector);

    for user in users.iter() {
        assert_eq!(store.reconstruct_balance(*user), Ok(store.balance(*user)));
    }
}

/// Webhook deliveries, cancellations and reads racing on the same orders.
#[test]
fn no_deadlock_settlement_against_cancel() {
    let detector = start_deadlock_detector();
    let h = Arc::new(Harness::new());
    let user = h.funded_user(100_000);
    let product = h.product(10_000);

    let runtime = tokio::runtime::Runtime::new().unwrap();
    let orders: Vec<_> = (0..20)
        .map(|i| {
            runtime
                .block_on(h.checkout.create_intent(user, intent(product, 3_000, &format!("o{i}"))))
                .unwrap()
                .order_id
        })
        .collect();
    let orders = Arc::new(orders);
    assert_eq!(h.store.balance(user), Money(40_000));

    let mut handles = Vec::new();
    for t in 0..12 {
        let h = h.clone();
        let orders = orders.clone();
        handles.push(thread::spawn(move || {
            for (i, order_id) in orders.iter().enumerate() {
                match (t + i) % 3 {
                    0 => {
                        let (body, signature) = signed_webhook(
                            PaymentReference::Order(*order_id),
                            PaymentOutcome::Success,
                            Some(7_000),
                        );
                        let _ = h.reconciler.handle(GATEWAY, &body, Some(&signature));
                    }
                    1 => {
                        let _ = h.checkout.cancel(user, *order_id);
                    }
                    _ => {
                        let _ = h.store.order(*order_id);
                        let _ = h.store.orders_for(user);
                    }
                }
            }
        }));
    }

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    stop_deadlock_detector(detector);

    // Every order ended PAID or CANCELLED, never both.
    let orders = h.store.orders_for(user);
    let cancelled = orders
        .iter()
        .filter(|o| o.payment_status == PaymentStatus::Cancelled)
        .count() as i64;
    assert_eq!(h.store.balance(user), Money(40_000 + cancelled * 3_000));
    assert_eq!(h.store.reconstruct_balance(user), Ok(h.store.balance(user)));
}
