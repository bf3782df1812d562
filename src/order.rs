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

//! Orders and the references gateways carry back to us.

use crate::base::{Money, OrderId, ProductId, TransactionId, UserId};
use crate::gateway::Redirect;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Wallet,
    Gateway,
    Split,
}

impl PaymentMethod {
    pub fn from_split(wallet_amount: Money, total: Money) -> Self {
        if wallet_amount == total {
            PaymentMethod::Wallet
        } else if wallet_amount.is_positive() {
            PaymentMethod::Split
        } else {
            PaymentMethod::Gateway
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Cancelled,
    Refunded,
}

impl PaymentStatus {
    pub fn is_terminal(self) -> bool {
        self != PaymentStatus::Pending
    }
}

/// A priced cart line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LineItem {
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Money,
}

impl LineItem {
    pub fn line_total(&self) -> Option<Money> {
        self.unit_price.checked_mul(self.quantity)
    }
}

/// One checkout attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Order {
    pub id: OrderId,
    pub order_number: String,
    pub user_id: UserId,
    pub idempotency_key: Option<String>,
    pub total: Money,
    pub wallet_used: Money,
    pub gateway_used: Money,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub gateway: Option<String>,
    pub gateway_ref: Option<String>,
    pub hold_transaction: Option<TransactionId>,
    pub items: Vec<LineItem>,
    /// Redirect issued by the gateway, kept so replays can return it.
    pub redirect: Option<Redirect>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub(crate) fn new(
        user_id: UserId,
        items: Vec<LineItem>,
        total: Money,
        wallet_amount: Money,
        gateway: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let id = OrderId::new();
        Self {
            id,
            order_number: order_number(id, now),
            user_id,
            idempotency_key: None,
            total,
            wallet_used: wallet_amount,
            gateway_used: Money::ZERO,
            payment_method: PaymentMethod::from_split(wallet_amount, total),
            payment_status: PaymentStatus::Pending,
            gateway,
            gateway_ref: None,
            hold_transaction: None,
            items,
            redirect: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Moves the order out of PENDING and fixes its split, so that
    /// `wallet_used + gateway_used == total` from then on. Whether money
    /// actually moved is told by the status and the hold entry, which is
    /// captured on PAID and RELEASED otherwise.
    pub(crate) fn close(&mut self, status: PaymentStatus) {
        self.payment_status = status;
        self.gateway_used = self.gateway_amount();
    }

    /// The part of the total the gateway is expected to collect.
    pub fn gateway_amount(&self) -> Money {
        self.total - self.wallet_used
    }

    pub fn reference(&self) -> PaymentReference {
        PaymentReference::Order(self.id)
    }
}

fn order_number(id: OrderId, now: DateTime<Utc>) -> String {
    let simple = id.0.simple().to_string();
    let suffix = &simple[simple.len() - 6..];
    format!("ORD-{}-{}", now.format("%Y%m%d"), suffix.to_uppercase())
}

/// What a gateway payment settles: an order or a gateway top-up.
///
/// Rendered as `order-<uuid>` / `topup-<uuid>`, which fits the alphanumeric
/// and hyphen charset gateways accept for merchant transaction ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum PaymentReference {
    Order(OrderId),
    Topup(TransactionId),
}

impl fmt::Display for PaymentReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentReference::Order(id) => write!(f, "order-{id}"),
            PaymentReference::Topup(id) => write!(f, "topup-{id}"),
        }
    }
}

impl FromStr for PaymentReference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (prefix, id) = s
            .split_once('-')
            .ok_or_else(|| format!("malformed payment reference: {s}"))?;
        let parsed = match prefix {
            "order" => id.parse().map(PaymentReference::Order),
            "topup" => id.parse().map(PaymentReference::Topup),
            _ => return Err(format!("unknown payment reference kind: {prefix}")),
        };
        parsed.map_err(|e| format!("malformed payment reference {s}: {e}"))
    }
}

impl From<PaymentReference> for String {
    fn from(reference: PaymentReference) -> Self {
        reference.to_string()
    }
}

impl TryFrom<String> for PaymentReference {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
