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

//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use wallet_ledger_rs::catalog::InMemoryCatalog;
use wallet_ledger_rs::checkout::{CartItem, CheckoutOrchestrator, IntentRequest};
use wallet_ledger_rs::gateway::{
    GatewayFailure, InitiateRequest, Initiation, PaymentGateway, PaymentOutcome, Redirect,
    Verification,
};
use wallet_ledger_rs::mailer::MemoryMailer;
use wallet_ledger_rs::order::PaymentReference;
use wallet_ledger_rs::reconciler::{WebhookEnvelope, WebhookReconciler};
use wallet_ledger_rs::review::AdminReview;
use wallet_ledger_rs::signature::sign_hex;
use wallet_ledger_rs::transaction::{EntryDraft, TransactionKind, TransactionStatus};
use wallet_ledger_rs::{GatewayRegistry, LedgerStore, Money, ProductId, UserId};

pub const GATEWAY: &str = "scripted";
pub const WEBHOOK_SECRET: &str = "scripted-webhook-secret";

/// How the scripted gateway answers `initiate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    Redirect,
    Reject,
    Unreachable,
    Timeout,
}

/// Gateway double whose answers are set by the test.
pub struct ScriptedGateway {
    script: Mutex<Script>,
    initiated: Mutex<Vec<InitiateRequest>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(Script::Redirect),
            initiated: Mutex::new(Vec::new()),
        }
    }

    pub fn set(&self, script: Script) {
        *self.script.lock() = script;
    }

    pub fn initiated(&self) -> Vec<InitiateRequest> {
        self.initiated.lock().clone()
    }
}

pub fn gateway_ref(reference: PaymentReference) -> String {
    format!("gw-{reference}")
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    fn name(&self) -> &str {
        GATEWAY
    }

    fn webhook_secret(&self) -> &str {
        WEBHOOK_SECRET
    }

    async fn initiate(&self, request: &InitiateRequest) -> Result<Initiation, GatewayFailure> {
        self.initiated.lock().push(request.clone());
        let script = *self.script.lock();
        match script {
            Script::Redirect => Ok(Initiation {
                redirect: Redirect::Url {
                    url: format!("https://pay.test/{}", request.reference),
                },
                gateway_ref: gateway_ref(request.reference),
            }),
            Script::Reject => Err(GatewayFailure::Rejected("card declined".into())),
            Script::Unreachable => Err(GatewayFailure::Unreachable("connection refused".into())),
            Script::Timeout => Err(GatewayFailure::Timeout),
        }
    }

    /// Echoes the envelope it is given.
    async fn verify(&self, payload: &serde_json::Value) -> Result<Verification, GatewayFailure> {
        let envelope: WebhookEnvelope = serde_json::from_value(payload.clone())
            .map_err(|e| GatewayFailure::InvalidPayload(e.to_string()))?;
        Ok(Verification {
            reference: envelope.reference,
            gateway_ref: envelope.gateway_ref,
            amount: envelope.amount,
            outcome: envelope.status,
            payload: payload.clone(),
        })
    }
}

/// Everything a checkout scenario needs, wired against one store.
pub struct Harness {
    pub store: Arc<LedgerStore>,
    pub catalog: Arc<InMemoryCatalog>,
    pub gateway: Arc<ScriptedGateway>,
    pub gateways: Arc<GatewayRegistry>,
    pub checkout: Arc<CheckoutOrchestrator>,
    pub reconciler: Arc<WebhookReconciler>,
    pub review: Arc<AdminReview>,
    pub mailer: Arc<MemoryMailer>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store(Arc::new(LedgerStore::in_memory()))
    }

    pub fn with_store(store: Arc<LedgerStore>) -> Self {
        let catalog = Arc::new(InMemoryCatalog::new());
        let gateway = Arc::new(ScriptedGateway::new());
        let gateways = Arc::new(GatewayRegistry::default().with(gateway.clone()));
        let mailer = Arc::new(MemoryMailer::new());
        Self {
            checkout: Arc::new(CheckoutOrchestrator::new(
                store.clone(),
                catalog.clone(),
                gateways.clone(),
            )),
            reconciler: Arc::new(WebhookReconciler::new(store.clone(), gateways.clone())),
            review: Arc::new(AdminReview::new(
                store.clone(),
                mailer.clone(),
                AdminReview::DEFAULT_MAX_OPEN,
            )),
            store,
            catalog,
            gateway,
            gateways,
            mailer,
        }
    }

    /// Credits `amount` to a fresh user.
    pub fn funded_user(&self, amount: i64) -> UserId {
        let user = UserId::new();
        self.fund(user, amount);
        user
    }

    pub fn fund(&self, user: UserId, amount: i64) {
        self.store
            .apply_entry(
                user,
                Money(amount),
                EntryDraft::new(TransactionKind::Topup, TransactionStatus::Success)
                    .gateway("esewa"),
            )
            .unwrap();
    }

    pub fn product(&self, price: i64) -> ProductId {
        self.catalog.add("Widget", Money(price))
    }
}

pub fn intent(product: ProductId, wallet: i64, key: &str) -> IntentRequest {
    IntentRequest {
        items: vec![CartItem::new(product, 1)],
        wallet_amount: Money(wallet),
        gateway: Some(GATEWAY.to_string()),
        idempotency_key: key.to_string(),
    }
}

/// A signed webhook body for `reference`.
pub fn signed_webhook(
    reference: PaymentReference,
    status: PaymentOutcome,
    amount: Option<i64>,
) -> (Vec<u8>, String) {
    let body = serde_json::to_vec(&WebhookEnvelope {
        reference: Some(reference),
        gateway_ref: None,
        status,
        amount: amount.map(Money),
    })
    .unwrap();
    let signature = sign_hex(WEBHOOK_SECRET, &body).unwrap();
    (body, signature)
}
