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

//! CSV export of every wallet transaction for manual reconciliation.

use crate::base::{OrderId, TransactionId, UserId};
use crate::store::LedgerStore;
use crate::transaction::{TransactionKind, TransactionStatus, WalletTransaction};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::io::Write;

/// One CSV row. Amounts are minor units except `display`, which is the
/// corrected amount in major units.
#[derive(Debug, Serialize)]
struct ExportRow<'a> {
    user: UserId,
    id: TransactionId,
    kind: TransactionKind,
    status: TransactionStatus,
    amount: i64,
    display: Decimal,
    balance_after: Option<i64>,
    sequence: Option<u64>,
    order: Option<OrderId>,
    related: Option<TransactionId>,
    gateway: Option<&'a str>,
    gateway_ref: Option<&'a str>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'a> From<&'a WalletTransaction> for ExportRow<'a> {
    fn from(tx: &'a WalletTransaction) -> Self {
        Self {
            user: tx.user_id,
            id: tx.id,
            kind: tx.kind,
            status: tx.status,
            amount: tx.amount.minor(),
            display: tx.display_amount().to_major(),
            balance_after: tx.balance_after.map(|b| b.minor()),
            sequence: tx.sequence,
            order: tx.order_id,
            related: tx.related_transaction,
            gateway: tx.gateway.as_deref(),
            gateway_ref: tx.gateway_ref.as_deref(),
            created_at: tx.created_at,
            updated_at: tx.updated_at,
        }
    }
}

/// Writes all transactions, oldest first, and returns the row count.
///
/// # Example
///
/// ```csv
/// user,id,kind,status,amount,display,balance_after,sequence,order,related,gateway,gateway_ref,created_at,updated_at
/// 0190…,0190…,TOPUP,SUCCESS,5000,50.00,5000,0,,,,,2025-01-04T10:00:00Z,2025-01-04T10:05:00Z
/// ```
///
/// # Errors
///
/// Returns a CSV error if writing fails.
pub fn export_csv<W: Write>(store: &LedgerStore, writer: W) -> Result<usize, csv::Error> {
    let mut wtr = csv::Writer::from_writer(writer);
    let transactions = store.all_transactions();
    for tx in &transactions {
        wtr.serialize(ExportRow::from(tx))?;
    }
    wtr.flush()?;
    Ok(transactions.len())
}
