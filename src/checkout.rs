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

//! Checkout orchestration.
//!
//! Prices a cart, splits it between wallet and gateway funds, and drives the
//! hold engine and the gateway adapter.
//!
//! # Intent Flow
//!
//! 1. Validate the cart, the split and the gateway bounds. No unit yet.
//! 2. In one unit under the idempotency key: create the PENDING order, hold
//!    the wallet part, and capture it at once when the wallet covers the
//!    whole total (the only synchronous PAID path).
//! 3. Outside the unit, ask the gateway for the remainder and store its
//!    redirect on the order. A definitive gateway failure releases the hold
//!    and marks the order FAILED; a timeout leaves it PENDING.
//!
//! Gateway top-ups follow the same shape with a PENDING TOPUP entry in place
//! of the order.

use crate::base::{Money, OrderId, ProductId, TransactionId, UserId};
use crate::catalog::Catalog;
use crate::error::LedgerError;
use crate::gateway::{GatewayRegistry, InitiateRequest, Redirect};
use crate::hold;
use crate::idempotency::{IdempotencyKey, IdempotencyOutcome, IdempotencyScope, Once};
use crate::order::{LineItem, Order, PaymentReference, PaymentStatus};
use crate::store::LedgerStore;
use crate::transaction::{EntryDraft, TransactionKind, TransactionStatus, WalletTransaction};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

/// A cart line as submitted by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub product_id: ProductId,
    #[serde(default = "CartItem::one")]
    pub quantity: u32,
}

impl CartItem {
    pub fn new(product_id: ProductId, quantity: u32) -> Self {
        Self {
            product_id,
            quantity,
        }
    }

    fn one() -> u32 {
        1
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Quote {
    pub items: Vec<LineItem>,
    pub total: Money,
    pub wallet_balance: Money,
    pub can_pay_wallet_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentRequest {
    pub items: Vec<CartItem>,
    #[serde(default)]
    pub wallet_amount: Money,
    pub gateway: Option<String>,
    pub idempotency_key: String,
}

/// The parts of an intent request a replay must match.
#[derive(Serialize)]
struct IntentFingerprint<'a> {
    items: Vec<(ProductId, u32)>,
    wallet_amount: Money,
    gateway: Option<&'a str>,
}

impl<'a> From<&'a IntentRequest> for IntentFingerprint<'a> {
    fn from(request: &'a IntentRequest) -> Self {
        Self {
            items: request
                .items
                .iter()
                .map(|i| (i.product_id, i.quantity.max(1)))
                .collect(),
            wallet_amount: request.wallet_amount,
            gateway: request.gateway.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutIntent {
    pub order_id: OrderId,
    pub order_number: String,
    pub status: PaymentStatus,
    pub paid: bool,
    pub total: Money,
    pub wallet_used: Money,
    pub redirect: Option<Redirect>,
    /// The key was seen before and this is the original result.
    pub replayed: bool,
}

impl CheckoutIntent {
    fn from_order(order: &Order, replayed: bool) -> Self {
        Self {
            order_id: order.id,
            order_number: order.order_number.clone(),
            status: order.payment_status,
            paid: order.payment_status == PaymentStatus::Paid,
            total: order.total,
            wallet_used: order.wallet_used,
            redirect: order.redirect.clone(),
            replayed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopupRequest {
    pub amount: Money,
    #[serde(default)]
    pub purpose: Option<String>,
    pub idempotency_key: String,
}

#[derive(Serialize)]
struct TopupFingerprint<'a> {
    gateway: &'a str,
    amount: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopupIntent {
    pub transaction_id: TransactionId,
    pub status: TransactionStatus,
    pub amount: Money,
    pub redirect: Option<Redirect>,
    pub replayed: bool,
}

impl TopupIntent {
    /// The redirect is kept in the entry's gateway payload until the
    /// gateway reports back.
    fn from_entry(entry: &WalletTransaction, replayed: bool) -> Self {
        let redirect = entry
            .gateway_payload
            .as_ref()
            .and_then(|p| p.get("redirect"))
            .and_then(|r| serde_json::from_value(r.clone()).ok());
        Self {
            transaction_id: entry.id,
            status: entry.status,
            amount: entry.amount,
            redirect,
            replayed,
        }
    }
}

pub struct CheckoutOrchestrator {
    store: Arc<LedgerStore>,
    catalog: Arc<dyn Catalog>,
    gateways: Arc<GatewayRegistry>,
}

impl CheckoutOrchestrator {
    pub fn new(
        store: Arc<LedgerStore>,
        catalog: Arc<dyn Catalog>,
        gateways: Arc<GatewayRegistry>,
    ) -> Self {
        Self {
            store,
            catalog,
            gateways,
        }
    }

    /// Prices every line at its current price. Quantities below one count
    /// as one.
    async fn price(&self, items: &[CartItem]) -> Result<(Vec<LineItem>, Money), LedgerError> {
        if items.is_empty() {
            return Err(LedgerError::Validation("cart is empty".into()));
        }

        let mut lines = Vec::with_capacity(items.len());
        let mut total = Money::ZERO;
        for item in items {
            let product = self
                .catalog
                .product(item.product_id)
                .await?
                .filter(|p| p.active)
                .ok_or_else(|| LedgerError::ProductUnavailable(item.product_id.to_string()))?;
            let line = LineItem {
                product_id: product.id,
                quantity: item.quantity.max(1),
                unit_price: product.current_price(),
            };
            total = line
                .line_total()
                .and_then(|t| total.checked_add(t))
                .ok_or_else(|| LedgerError::Validation("order total out of range".into()))?;
            lines.push(line);
        }

        if !total.is_positive() {
            return Err(LedgerError::Validation("order total must be positive".into()));
        }
        Ok((lines, total))
    }

    pub async fn quote(&self, user_id: UserId, items: &[CartItem]) -> Result<Quote, LedgerError> {
        let (items, total) = self.price(items).await?;
        let wallet_balance = self.store.balance(user_id);
        Ok(Quote {
            items,
            total,
            wallet_balance,
            can_pay_wallet_only: wallet_balance >= total,
        })
    }

    /// Creates (or replays) a checkout intent.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::Validation`] for an empty cart, a wallet amount
    ///   outside `0..=total`, a missing or unknown gateway, a remainder
    ///   outside the gateway bounds, or a reused key with another payload.
    /// - [`LedgerError::ProductUnavailable`] if a line is inactive or missing.
    /// - [`LedgerError::InsufficientFunds`] if the wallet amount exceeds the balance.
    /// - [`LedgerError::Gateway`] if the gateway could not start the payment.
    pub async fn create_intent(
        &self,
        user_id: UserId,
        request: IntentRequest,
    ) -> Result<CheckoutIntent, LedgerError> {
        let key = IdempotencyKey::new(
            &request.idempotency_key,
            IdempotencyScope::Checkout,
            &IntentFingerprint::from(&request),
        )?;
        if let Some(existing) = self.store.idempotency_record(user_id, key.as_str()) {
            return self.replay(user_id, key.check(&existing)?);
        }

        let wallet_amount = request.wallet_amount;
        if wallet_amount.is_negative() {
            return Err(LedgerError::Validation(
                "wallet amount cannot be negative".into(),
            ));
        }
        let (lines, total) = self.price(&request.items).await?;
        if wallet_amount > total {
            return Err(LedgerError::Validation(
                "wallet amount exceeds order total".into(),
            ));
        }
        let remainder = total - wallet_amount;
        let gateway = if remainder.is_positive() {
            let name = request.gateway.as_deref().ok_or_else(|| {
                LedgerError::Validation("a payment gateway is required for the remainder".into())
            })?;
            self.gateways.check(name, remainder)?;
            Some(name.to_string())
        } else {
            None
        };

        let outcome = self.store.atomic(user_id, |unit| {
            key.execute_once(unit, |unit| {
                if wallet_amount > unit.balance() {
                    return Err(LedgerError::InsufficientFunds);
                }
                let mut order =
                    Order::new(user_id, lines, total, wallet_amount, gateway, unit.now());
                order.idempotency_key = Some(key.as_str().to_string());
                let order_id = order.id;
                unit.insert_order(order);

                if wallet_amount.is_positive() {
                    let hold = hold::place_hold(unit, wallet_amount, order_id)?;
                    if wallet_amount == total {
                        hold::capture(unit, hold.id)?;
                        let order = unit
                            .order_mut(order_id)
                            .ok_or(LedgerError::OrderNotFound)?;
                        order.close(PaymentStatus::Paid);
                    }
                }
                let order = unit
                    .order(order_id)
                    .cloned()
                    .ok_or(LedgerError::OrderNotFound)?;
                Ok((order, IdempotencyOutcome::Order(order_id)))
            })
        })?;

        let order = match outcome {
            Once::Executed(order) => order,
            Once::Replayed(outcome) => return self.replay(user_id, outcome),
        };
        info!(
            %user_id,
            order_id = %order.id,
            total = order.total.minor(),
            wallet = order.wallet_used.minor(),
            method = ?order.payment_method,
            status = ?order.payment_status,
            "checkout intent created"
        );

        match order.gateway.clone() {
            Some(gateway) if order.payment_status == PaymentStatus::Pending => {
                self.start_gateway_payment(user_id, order, &gateway).await
            }
            _ => Ok(CheckoutIntent::from_order(&order, false)),
        }
    }

    async fn start_gateway_payment(
        &self,
        user_id: UserId,
        order: Order,
        gateway: &str,
    ) -> Result<CheckoutIntent, LedgerError> {
        let request = InitiateRequest {
            reference: order.reference(),
            amount: order.gateway_amount(),
            purpose: format!("Order {}", order.order_number),
        };
        match self.gateways.initiate(gateway, &request).await {
            Ok(initiation) => {
                let order = self.store.atomic(user_id, |unit| {
                    let order = unit
                        .order_mut(order.id)
                        .ok_or(LedgerError::OrderNotFound)?;
                    if order.payment_status == PaymentStatus::Pending {
                        order.gateway_ref = Some(initiation.gateway_ref);
                        order.redirect = Some(initiation.redirect);
                    }
                    Ok(order.clone())
                })?;
                Ok(CheckoutIntent::from_order(&order, false))
            }
            Err(failure) => {
                if failure.is_definitive() {
                    self.fail(user_id, order.id)?;
                } else {
                    warn!(%user_id, order_id = %order.id, "order left pending after ambiguous gateway failure");
                }
                Err(failure.into())
            }
        }
    }

    /// Releases the hold and marks a still-pending order FAILED.
    fn fail(&self, user_id: UserId, order_id: OrderId) -> Result<Order, LedgerError> {
        let order = self.store.atomic(user_id, |unit| {
            let order = unit.order(order_id).ok_or(LedgerError::OrderNotFound)?;
            if order.payment_status != PaymentStatus::Pending {
                return Ok(order.clone());
            }
            if let Some(hold_id) = order.hold_transaction {
                hold::release(unit, hold_id)?;
            }
            let order = unit
                .order_mut(order_id)
                .ok_or(LedgerError::OrderNotFound)?;
            order.close(PaymentStatus::Failed);
            Ok(order.clone())
        })?;
        info!(%user_id, %order_id, status = ?order.payment_status, "order failed at gateway");
        Ok(order)
    }

    fn replay(
        &self,
        user_id: UserId,
        outcome: IdempotencyOutcome,
    ) -> Result<CheckoutIntent, LedgerError> {
        let IdempotencyOutcome::Order(order_id) = outcome else {
            return Err(LedgerError::Validation(
                "idempotency key already used for a different operation".into(),
            ));
        };
        let order = self.order(user_id, order_id)?;
        Ok(CheckoutIntent::from_order(&order, true))
    }

    /// Cancels a pending order and releases its hold.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::OrderNotFound`] if the user has no such order.
    /// - [`LedgerError::AlreadyPaid`] if the order was captured first.
    /// - [`LedgerError::InvalidState`] if it already failed or was cancelled.
    pub fn cancel(&self, user_id: UserId, order_id: OrderId) -> Result<Order, LedgerError> {
        if self.store.user_order(user_id, order_id).is_none() {
            return Err(LedgerError::OrderNotFound);
        }
        let order = self.store.atomic(user_id, |unit| {
            let order = unit.order(order_id).ok_or(LedgerError::OrderNotFound)?;
            match order.payment_status {
                PaymentStatus::Pending => {}
                PaymentStatus::Paid => return Err(LedgerError::AlreadyPaid),
                other => return Err(LedgerError::invalid_state(other)),
            }
            if let Some(hold_id) = order.hold_transaction {
                hold::release(unit, hold_id)?;
            }
            let order = unit
                .order_mut(order_id)
                .ok_or(LedgerError::OrderNotFound)?;
            order.close(PaymentStatus::Cancelled);
            Ok(order.clone())
        })?;
        info!(%user_id, %order_id, "order cancelled");
        Ok(order)
    }

    /// The user's own order.
    pub fn order(&self, user_id: UserId, order_id: OrderId) -> Result<Order, LedgerError> {
        self.store
            .user_order(user_id, order_id)
            .ok_or(LedgerError::OrderNotFound)
    }

    /// Starts a wallet top-up through `gateway`.
    ///
    /// A PENDING TOPUP entry is written under the idempotency key before the
    /// gateway is called; it becomes effective only when the gateway confirms.
    pub async fn initiate_topup(
        &self,
        user_id: UserId,
        gateway: &str,
        request: TopupRequest,
    ) -> Result<TopupIntent, LedgerError> {
        let key = IdempotencyKey::new(
            &request.idempotency_key,
            IdempotencyScope::GatewayTopup,
            &TopupFingerprint {
                gateway,
                amount: request.amount,
            },
        )?;
        if let Some(existing) = self.store.idempotency_record(user_id, key.as_str()) {
            return self.replay_topup(user_id, key.check(&existing)?);
        }
        if !request.amount.is_positive() {
            return Err(LedgerError::Validation(
                "top-up amount must be positive".into(),
            ));
        }
        self.gateways.check(gateway, request.amount)?;

        let outcome = self.store.atomic(user_id, |unit| {
            key.execute_once(unit, |unit| {
                let entry = unit.add_pending(
                    request.amount,
                    EntryDraft::new(TransactionKind::Topup, TransactionStatus::Pending)
                        .gateway(gateway)
                        .idempotency_key(key.as_str()),
                );
                let id = entry.id;
                Ok((entry, IdempotencyOutcome::Transaction(id)))
            })
        })?;
        let entry = match outcome {
            Once::Executed(entry) => entry,
            Once::Replayed(outcome) => return self.replay_topup(user_id, outcome),
        };
        info!(%user_id, transaction_id = %entry.id, gateway, amount = entry.amount.minor(), "gateway top-up created");

        let initiate = InitiateRequest {
            reference: PaymentReference::Topup(entry.id),
            amount: entry.amount,
            purpose: request
                .purpose
                .clone()
                .unwrap_or_else(|| "Wallet top-up".to_string()),
        };
        match self.gateways.initiate(gateway, &initiate).await {
            Ok(initiation) => {
                let entry = self.store.atomic(user_id, |unit| {
                    let entry = unit
                        .entry_mut(entry.id)
                        .ok_or(LedgerError::TransactionNotFound)?;
                    if entry.status == TransactionStatus::Pending {
                        entry.gateway_ref = Some(initiation.gateway_ref);
                        entry.gateway_payload = Some(json!({ "redirect": initiation.redirect }));
                    }
                    Ok(entry.clone())
                })?;
                Ok(TopupIntent::from_entry(&entry, false))
            }
            Err(failure) => {
                if failure.is_definitive() {
                    self.store.atomic(user_id, |unit| {
                        let entry = unit
                            .entry_mut(entry.id)
                            .ok_or(LedgerError::TransactionNotFound)?;
                        if entry.status == TransactionStatus::Pending {
                            entry.status = TransactionStatus::Failed;
                        }
                        Ok(())
                    })?;
                }
                Err(failure.into())
            }
        }
    }

    fn replay_topup(
        &self,
        user_id: UserId,
        outcome: IdempotencyOutcome,
    ) -> Result<TopupIntent, LedgerError> {
        let IdempotencyOutcome::Transaction(id) = outcome else {
            return Err(LedgerError::Validation(
                "idempotency key already used for a different operation".into(),
            ));
        };
        let entry = self
            .store
            .user_transaction(user_id, id)
            .ok_or(LedgerError::TransactionNotFound)?;
        Ok(TopupIntent::from_entry(&entry, true))
    }
}
