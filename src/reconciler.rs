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

//! Applies gateway verdicts to orders and gateway top-ups.
//!
//! Verdicts arrive two ways: a signed webhook ([`WebhookReconciler::handle`])
//! or a browser return that we verify with the gateway
//! ([`WebhookReconciler::verify`]). Both end in [`WebhookReconciler::settle`],
//! which resolves the record and settles it in one atomic unit of its owner.
//! A record that is already terminal is reported as
//! [`Settlement::AlreadySettled`] and left alone, so deliveries can be
//! replayed freely.

use crate::base::{Money, OrderId, TransactionId};
use crate::error::LedgerError;
use crate::gateway::{GatewayRegistry, PaymentOutcome, Verification};
use crate::hold;
use crate::order::{Order, PaymentReference, PaymentStatus};
use crate::signature::verify_hex;
use crate::store::LedgerStore;
use crate::transaction::{TransactionKind, TransactionStatus, WalletTransaction};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Header carrying the hex HMAC-SHA256 of the raw webhook body.
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

/// Webhook body every gateway relay posts to us.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookEnvelope {
    #[serde(default)]
    pub reference: Option<PaymentReference>,
    #[serde(default)]
    pub gateway_ref: Option<String>,
    pub status: PaymentOutcome,
    #[serde(default)]
    pub amount: Option<Money>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum SettledRecord {
    Order(Order),
    Topup(WalletTransaction),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", content = "detail", rename_all = "snake_case")]
pub enum Settlement {
    /// This delivery moved the record to a terminal state.
    Applied(SettledRecord),
    /// The record was terminal already; nothing changed.
    AlreadySettled(SettledRecord),
    /// The gateway has no final answer yet.
    Pending(SettledRecord),
}

impl Settlement {
    pub fn record(&self) -> &SettledRecord {
        match self {
            Settlement::Applied(r) | Settlement::AlreadySettled(r) | Settlement::Pending(r) => r,
        }
    }
}

pub struct WebhookReconciler {
    store: Arc<LedgerStore>,
    gateways: Arc<GatewayRegistry>,
}

impl WebhookReconciler {
    pub fn new(store: Arc<LedgerStore>, gateways: Arc<GatewayRegistry>) -> Self {
        Self { store, gateways }
    }

    /// Authenticates and applies one webhook delivery.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::Unauthorized`] if the signature is missing or wrong.
    ///   Nothing is read from the body in that case.
    /// - [`LedgerError::Validation`] for an unknown gateway, a malformed body
    ///   or an amount that disagrees with the record.
    /// - [`LedgerError::OrderNotFound`] / [`LedgerError::TransactionNotFound`]
    ///   if the reference resolves to nothing.
    pub fn handle(
        &self,
        gateway: &str,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<Settlement, LedgerError> {
        let adapter = self.gateways.get(gateway)?;
        let authentic = signature
            .map(|s| verify_hex(adapter.webhook_secret(), body, s))
            .unwrap_or(false);
        if !authentic {
            warn!(
                gateway,
                signed = signature.is_some(),
                "webhook rejected: bad signature"
            );
            return Err(LedgerError::Unauthorized);
        }

        let payload: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| LedgerError::Validation(format!("webhook body is not JSON: {e}")))?;
        let envelope: WebhookEnvelope = serde_json::from_value(payload.clone())
            .map_err(|e| LedgerError::Validation(format!("malformed webhook: {e}")))?;

        self.settle(
            gateway,
            Verification {
                reference: envelope.reference,
                gateway_ref: envelope.gateway_ref,
                amount: envelope.amount,
                outcome: envelope.status,
                payload,
            },
        )
    }

    /// Asks the gateway about a payment the client returned from, then
    /// settles it like a webhook.
    pub async fn verify(
        &self,
        gateway: &str,
        payload: &serde_json::Value,
    ) -> Result<Settlement, LedgerError> {
        let verification = self.gateways.verify(gateway, payload).await?;
        self.settle(gateway, verification)
    }

    /// Applies a verdict to the record it refers to.
    pub fn settle(
        &self,
        gateway: &str,
        verification: Verification,
    ) -> Result<Settlement, LedgerError> {
        let reference = verification
            .reference
            .or_else(|| {
                verification
                    .gateway_ref
                    .as_deref()
                    .and_then(|r| self.store.resolve_gateway_ref(gateway, r))
            })
            .ok_or(LedgerError::TransactionNotFound)?;

        let settlement = match reference {
            PaymentReference::Order(id) => self.settle_order(gateway, id, &verification),
            PaymentReference::Topup(id) => self.settle_topup(gateway, id, &verification),
        }
        .inspect_err(|e| warn!(gateway, %reference, error = %e, "settlement rejected"))?;

        match &settlement {
            Settlement::Applied(_) => info!(
                gateway,
                %reference,
                outcome = ?verification.outcome,
                "payment settled"
            ),
            Settlement::AlreadySettled(_) => {
                info!(gateway, %reference, "duplicate delivery for settled payment")
            }
            Settlement::Pending(_) => info!(gateway, %reference, "payment still pending"),
        }
        Ok(settlement)
    }

    fn settle_order(
        &self,
        gateway: &str,
        order_id: OrderId,
        verification: &Verification,
    ) -> Result<Settlement, LedgerError> {
        let user_id = self
            .store
            .owner_of_order(order_id)
            .ok_or(LedgerError::OrderNotFound)?;

        self.store.atomic(user_id, |unit| {
            let order = unit
                .order(order_id)
                .cloned()
                .ok_or(LedgerError::OrderNotFound)?;
            if order.gateway.as_deref() != Some(gateway) {
                return Err(LedgerError::Validation(
                    "payment belongs to another gateway".into(),
                ));
            }
            if order.payment_status.is_terminal() {
                return Ok(Settlement::AlreadySettled(SettledRecord::Order(order)));
            }

            let status = match verification.outcome {
                PaymentOutcome::Pending => {
                    return Ok(Settlement::Pending(SettledRecord::Order(order)));
                }
                PaymentOutcome::Success => {
                    check_amount(verification.amount, order.gateway_amount())?;
                    if let Some(hold_id) = order.hold_transaction {
                        hold::capture(unit, hold_id)?;
                    }
                    PaymentStatus::Paid
                }
                PaymentOutcome::Failure => {
                    if let Some(hold_id) = order.hold_transaction {
                        hold::release(unit, hold_id)?;
                    }
                    PaymentStatus::Failed
                }
            };

            let updated = unit
                .order_mut(order_id)
                .ok_or(LedgerError::OrderNotFound)?;
            updated.close(status);
            if updated.gateway_ref.is_none() {
                updated.gateway_ref = verification.gateway_ref.clone();
            }
            Ok(Settlement::Applied(SettledRecord::Order(updated.clone())))
        })
    }

    fn settle_topup(
        &self,
        gateway: &str,
        id: TransactionId,
        verification: &Verification,
    ) -> Result<Settlement, LedgerError> {
        let user_id = self
            .store
            .owner_of_transaction(id)
            .ok_or(LedgerError::TransactionNotFound)?;

        self.store.atomic(user_id, |unit| {
            let entry = unit
                .entry(id)
                .cloned()
                .ok_or(LedgerError::TransactionNotFound)?;
            if entry.kind != TransactionKind::Topup || entry.gateway.as_deref() != Some(gateway) {
                return Err(LedgerError::Validation(
                    "reference is not a top-up through this gateway".into(),
                ));
            }
            if entry.status.is_terminal() {
                return Ok(Settlement::AlreadySettled(SettledRecord::Topup(entry)));
            }

            match verification.outcome {
                PaymentOutcome::Pending => {
                    return Ok(Settlement::Pending(SettledRecord::Topup(entry)));
                }
                PaymentOutcome::Success => {
                    check_amount(verification.amount, entry.amount)?;
                    unit.settle_entry(id, TransactionStatus::Success)?;
                }
                PaymentOutcome::Failure => {}
            }

            let updated = unit
                .entry_mut(id)
                .ok_or(LedgerError::TransactionNotFound)?;
            if verification.outcome == PaymentOutcome::Failure {
                updated.status = TransactionStatus::Failed;
            }
            if updated.gateway_ref.is_none() {
                updated.gateway_ref = verification.gateway_ref.clone();
            }
            updated.gateway_payload = Some(verification.payload.clone());
            Ok(Settlement::Applied(SettledRecord::Topup(updated.clone())))
        })
    }
}

fn check_amount(reported: Option<Money>, expected: Money) -> Result<(), LedgerError> {
    match reported {
        Some(amount) if amount != expected => Err(LedgerError::Validation(format!(
            "gateway reported {amount}, expected {expected}"
        ))),
        _ => Ok(()),
    }
}
