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

//! Gateway top-ups and settlement: webhook replays, signatures, verify and
//! the Khalti adapter against a local mock of its API.

mod common;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
};
use clap::Parser;
use common::{GATEWAY, Harness, Script, gateway_ref, signed_webhook};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpListener;
use wallet_ledger_rs::catalog::InMemoryCatalog;
use wallet_ledger_rs::checkout::{CheckoutOrchestrator, TopupRequest};
use wallet_ledger_rs::config::Config;
use wallet_ledger_rs::gateway::{
    EsewaConfig, KhaltiConfig, KhaltiGateway, PaymentOutcome, Redirect,
};
use wallet_ledger_rs::order::PaymentReference;
use wallet_ledger_rs::reconciler::{SettledRecord, Settlement, WebhookReconciler};
use wallet_ledger_rs::signature::sign_hex;
use wallet_ledger_rs::transaction::{TransactionKind, TransactionStatus};
use wallet_ledger_rs::{
    GatewayRegistry, LedgerError, LedgerStore, Money, TransactionId, UserId,
};

fn topup_request(amount: i64, key: &str) -> TopupRequest {
    TopupRequest {
        amount: Money(amount),
        purpose: None,
        idempotency_key: key.to_string(),
    }
}

// === Scripted Gateway Top-ups ===

#[tokio::test]
async fn gateway_topup_is_credited_only_on_confirmation() {
    let h = Harness::new();
    let user = UserId::new();

    let topup = h
        .checkout
        .initiate_topup(user, GATEWAY, topup_request(5_000, "topup-1"))
        .await
        .unwrap();
    assert_eq!(topup.status, TransactionStatus::Pending);
    assert!(matches!(topup.redirect, Some(Redirect::Url { .. })));
    assert_eq!(h.store.balance(user), Money::ZERO);

    let (body, signature) = signed_webhook(
        PaymentReference::Topup(topup.transaction_id),
        PaymentOutcome::Success,
        Some(5_000),
    );
    let settlement = h.reconciler.handle(GATEWAY, &body, Some(&signature)).unwrap();
    assert!(matches!(settlement, Settlement::Applied(SettledRecord::Topup(_))));
    assert_eq!(h.store.balance(user), Money(5_000));

    let entry = h.store.transaction(topup.transaction_id).unwrap();
    assert_eq!(entry.status, TransactionStatus::Success);
    assert_eq!(entry.balance_after, Some(Money(5_000)));
}

#[tokio::test]
async fn replayed_webhook_is_applied_once() {
    let h = Harness::new();
    let user = UserId::new();
    let topup = h
        .checkout
        .initiate_topup(user, GATEWAY, topup_request(5_000, "topup-replay"))
        .await
        .unwrap();
    let (body, signature) = signed_webhook(
        PaymentReference::Topup(topup.transaction_id),
        PaymentOutcome::Success,
        Some(5_000),
    );

    for attempt in 0..5 {
        let settlement = h.reconciler.handle(GATEWAY, &body, Some(&signature)).unwrap();
        if attempt == 0 {
            assert!(matches!(settlement, Settlement::Applied(_)));
        } else {
            assert!(matches!(settlement, Settlement::AlreadySettled(_)));
        }
    }
    assert_eq!(h.store.balance(user), Money(5_000));

    // A late contradicting delivery changes nothing either.
    let (body, signature) = signed_webhook(
        PaymentReference::Topup(topup.transaction_id),
        PaymentOutcome::Failure,
        None,
    );
    let settlement = h.reconciler.handle(GATEWAY, &body, Some(&signature)).unwrap();
    assert!(matches!(settlement, Settlement::AlreadySettled(_)));
    assert_eq!(h.store.balance(user), Money(5_000));
}

#[tokio::test]
async fn forged_or_tampered_webhooks_are_unauthorized() {
    let h = Harness::new();
    let user = UserId::new();
    let topup = h
        .checkout
        .initiate_topup(user, GATEWAY, topup_request(5_000, "topup-forged"))
        .await
        .unwrap();
    let (body, signature) = signed_webhook(
        PaymentReference::Topup(topup.transaction_id),
        PaymentOutcome::Success,
        Some(5_000),
    );

    assert_eq!(
        h.reconciler.handle(GATEWAY, &body, None),
        Err(LedgerError::Unauthorized)
    );
    let forged = sign_hex("not-the-secret", &body).unwrap();
    assert_eq!(
        h.reconciler.handle(GATEWAY, &body, Some(&forged)),
        Err(LedgerError::Unauthorized)
    );
    let mut tampered = body.clone();
    tampered.extend_from_slice(b" ");
    assert_eq!(
        h.reconciler.handle(GATEWAY, &tampered, Some(&signature)),
        Err(LedgerError::Unauthorized)
    );

    assert_eq!(h.store.balance(user), Money::ZERO);
    assert_eq!(
        h.store.transaction(topup.transaction_id).unwrap().status,
        TransactionStatus::Pending
    );
}

#[tokio::test]
async fn webhook_resolves_by_gateway_ref() {
    let h = Harness::new();
    let user = UserId::new();
    let topup = h
        .checkout
        .initiate_topup(user, GATEWAY, topup_request(2_000, "topup-ref"))
        .await
        .unwrap();

    let body = serde_json::to_vec(&json!({
        "gateway_ref": gateway_ref(PaymentReference::Topup(topup.transaction_id)),
        "status": "success",
        "amount": 2_000,
    }))
    .unwrap();
    let signature = sign_hex(common::WEBHOOK_SECRET, &body).unwrap();
    h.reconciler.handle(GATEWAY, &body, Some(&signature)).unwrap();

    assert_eq!(h.store.balance(user), Money(2_000));
}

#[tokio::test]
async fn amount_mismatch_leaves_topup_pending() {
    let h = Harness::new();
    let user = UserId::new();
    let topup = h
        .checkout
        .initiate_topup(user, GATEWAY, topup_request(5_000, "topup-short"))
        .await
        .unwrap();
    let (body, signature) = signed_webhook(
        PaymentReference::Topup(topup.transaction_id),
        PaymentOutcome::Success,
        Some(500),
    );

    let err = h
        .reconciler
        .handle(GATEWAY, &body, Some(&signature))
        .unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)));
    assert_eq!(h.store.balance(user), Money::ZERO);
    assert_eq!(
        h.store.transaction(topup.transaction_id).unwrap().status,
        TransactionStatus::Pending
    );
}

#[tokio::test]
async fn pending_verdict_changes_nothing() {
    let h = Harness::new();
    let user = UserId::new();
    let topup = h
        .checkout
        .initiate_topup(user, GATEWAY, topup_request(5_000, "topup-wait"))
        .await
        .unwrap();

    let settlement = h
        .reconciler
        .verify(
            GATEWAY,
            &json!({
                "reference": PaymentReference::Topup(topup.transaction_id).to_string(),
                "status": "pending",
            }),
        )
        .await
        .unwrap();
    assert!(matches!(settlement, Settlement::Pending(_)));
    assert_eq!(h.store.balance(user), Money::ZERO);
}

#[tokio::test]
async fn topup_initiation_replays_and_fails_cleanly() {
    let h = Harness::new();
    let user = UserId::new();

    let first = h
        .checkout
        .initiate_topup(user, GATEWAY, topup_request(3_000, "topup-same"))
        .await
        .unwrap();
    let again = h
        .checkout
        .initiate_topup(user, GATEWAY, topup_request(3_000, "topup-same"))
        .await
        .unwrap();
    assert!(again.replayed);
    assert_eq!(first.transaction_id, again.transaction_id);
    assert_eq!(first.redirect, again.redirect);
    assert_eq!(h.gateway.initiated().len(), 1);

    h.gateway.set(Script::Reject);
    let err = h
        .checkout
        .initiate_topup(user, GATEWAY, topup_request(3_000, "topup-declined"))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Gateway(_)));
    let failed = h
        .store
        .entries(user)
        .into_iter()
        .filter(|e| e.status == TransactionStatus::Failed)
        .count();
    assert_eq!(failed, 1);

    assert!(matches!(
        h.checkout
            .initiate_topup(user, GATEWAY, topup_request(500, "topup-small"))
            .await,
        Err(LedgerError::Validation(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_topup_replays_resolve_to_one_entry() {
    let h = Arc::new(Harness::new());
    let user = UserId::new();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let h = h.clone();
        handles.push(tokio::spawn(async move {
            h.checkout
                .initiate_topup(user, GATEWAY, topup_request(3_000, "topup-double-tap"))
                .await
        }));
    }
    let intents: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .collect();

    let first = intents[0].transaction_id;
    assert!(intents.iter().all(|i| i.transaction_id == first));
    assert_eq!(intents.iter().filter(|i| !i.replayed).count(), 1);
    assert_eq!(h.store.entries(user).len(), 1);
    assert_eq!(h.gateway.initiated().len(), 1);
}

// === Configured Gateways ===

fn configured(args: &[&str]) -> (Arc<LedgerStore>, CheckoutOrchestrator, WebhookReconciler) {
    let config = Config::try_parse_from(args).unwrap();
    let gateways = Arc::new(config.gateway_registry().unwrap());
    let store = Arc::new(LedgerStore::in_memory());
    let checkout = CheckoutOrchestrator::new(
        store.clone(),
        Arc::new(InMemoryCatalog::new()),
        gateways.clone(),
    );
    (store.clone(), checkout, WebhookReconciler::new(store, gateways))
}

fn esewa_webhook(reference: PaymentReference, secret: &str) -> (Vec<u8>, String) {
    let body = json!({
        "reference": reference,
        "status": "success",
        "amount": 5_000_000,
    })
    .to_string()
    .into_bytes();
    let signature = sign_hex(secret, &body).unwrap();
    (body, signature)
}

#[tokio::test]
async fn unconfigured_esewa_accepts_nothing() {
    let (store, checkout, reconciler) = configured(&["wallet-ledger-rs"]);
    let user = UserId::new();

    let err = checkout
        .initiate_topup(user, "esewa", topup_request(5_000_000, "esewa-topup"))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)));

    let (body, signature) = esewa_webhook(
        PaymentReference::Topup(TransactionId::new()),
        "esewa-webhook-secret",
    );
    assert!(reconciler.handle("esewa", &body, Some(&signature)).is_err());
    assert_eq!(store.balance(user), Money::ZERO);
}

#[tokio::test]
async fn sandbox_esewa_only_trusts_our_webhook_secret() {
    let (store, checkout, reconciler) = configured(&[
        "wallet-ledger-rs",
        "--esewa-sandbox",
        "--esewa-webhook-secret",
        "shop-whsec",
    ]);
    let user = UserId::new();
    let topup = checkout
        .initiate_topup(user, "esewa", topup_request(5_000_000, "esewa-topup"))
        .await
        .unwrap();
    let reference = PaymentReference::Topup(topup.transaction_id);

    for guess in ["esewa-webhook-secret", EsewaConfig::SANDBOX_SECRET_KEY] {
        let (body, signature) = esewa_webhook(reference, guess);
        assert_eq!(
            reconciler.handle("esewa", &body, Some(&signature)),
            Err(LedgerError::Unauthorized)
        );
    }
    assert_eq!(store.balance(user), Money::ZERO);

    let (body, signature) = esewa_webhook(reference, "shop-whsec");
    reconciler.handle("esewa", &body, Some(&signature)).unwrap();
    assert_eq!(store.balance(user), Money(5_000_000));
}

// === Khalti Adapter ===

const KHALTI_KEY: &str = "test_secret_key";

#[derive(Clone)]
struct KhaltiMock {
    payments: Arc<Mutex<HashMap<String, i64>>>,
    status: Arc<Mutex<String>>,
    broken: Arc<AtomicBool>,
}

impl KhaltiMock {
    fn new() -> Self {
        Self {
            payments: Arc::new(Mutex::new(HashMap::new())),
            status: Arc::new(Mutex::new("Completed".to_string())),
            broken: Arc::new(AtomicBool::new(false)),
        }
    }
}

fn authorized(headers: &HeaderMap) -> bool {
    headers.get("authorization").and_then(|v| v.to_str().ok())
        == Some(format!("Key {KHALTI_KEY}").as_str())
}

async fn mock_initiate(
    State(mock): State<KhaltiMock>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Response {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, "invalid token").into_response();
    }
    if mock.broken.load(Ordering::SeqCst) {
        return (StatusCode::BAD_GATEWAY, "upstream error").into_response();
    }
    let order = body["purchase_order_id"].as_str().unwrap_or_default();
    let pidx = format!("pidx-{order}");
    let amount = body["amount"].as_i64().unwrap_or_default();
    mock.payments.lock().insert(pidx.clone(), amount);
    Json(json!({
        "pidx": pidx,
        "payment_url": format!("https://pay.khalti.test/?pidx={pidx}"),
    }))
    .into_response()
}

async fn mock_lookup(
    State(mock): State<KhaltiMock>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Response {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, "invalid token").into_response();
    }
    let pidx = body["pidx"].as_str().unwrap_or_default().to_string();
    let amount = mock.payments.lock().get(&pidx).copied();
    match amount {
        Some(amount) => {
            let status = mock.status.lock().clone();
            Json(json!({
                "pidx": pidx,
                "total_amount": amount,
                "status": status,
                "transaction_id": "GFq9PFS7b2iYvL8Lir9oXe",
                "fee": 0,
                "refunded": false,
            }))
            .into_response()
        }
        None => (StatusCode::BAD_REQUEST, Json(json!({ "detail": "Not found." }))).into_response(),
    }
}

struct KhaltiFixture {
    mock: KhaltiMock,
    store: Arc<LedgerStore>,
    checkout: CheckoutOrchestrator,
    reconciler: WebhookReconciler,
}

async fn khalti_fixture() -> KhaltiFixture {
    let mock = KhaltiMock::new();
    let app = Router::new()
        .route("/epayment/initiate/", post(mock_initiate))
        .route("/epayment/lookup/", post(mock_lookup))
        .with_state(mock.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let khalti = KhaltiGateway::new(KhaltiConfig {
        base_url: format!("http://{addr}/"),
        secret_key: KHALTI_KEY.to_string(),
        ..KhaltiConfig::default()
    });
    let gateways = Arc::new(GatewayRegistry::default().with(Arc::new(khalti)));
    let store = Arc::new(LedgerStore::in_memory());
    KhaltiFixture {
        checkout: CheckoutOrchestrator::new(
            store.clone(),
            Arc::new(InMemoryCatalog::new()),
            gateways.clone(),
        ),
        reconciler: WebhookReconciler::new(store.clone(), gateways),
        mock,
        store,
    }
}

#[tokio::test]
async fn khalti_topup_settles_through_lookup() {
    let f = khalti_fixture().await;
    let user = UserId::new();

    let topup = f
        .checkout
        .initiate_topup(user, KhaltiGateway::NAME, topup_request(5_000, "khalti-1"))
        .await
        .unwrap();
    let pidx = format!("pidx-{}", PaymentReference::Topup(topup.transaction_id));
    assert_eq!(
        topup.redirect,
        Some(Redirect::Url {
            url: format!("https://pay.khalti.test/?pidx={pidx}")
        })
    );
    let entry = f.store.transaction(topup.transaction_id).unwrap();
    assert_eq!(entry.gateway_ref.as_deref(), Some(pidx.as_str()));

    let settlement = f
        .reconciler
        .verify(KhaltiGateway::NAME, &json!({ "pidx": pidx }))
        .await
        .unwrap();
    assert!(matches!(settlement, Settlement::Applied(_)));
    assert_eq!(f.store.balance(user), Money(5_000));

    let again = f
        .reconciler
        .verify(KhaltiGateway::NAME, &json!({ "pidx": pidx }))
        .await
        .unwrap();
    assert!(matches!(again, Settlement::AlreadySettled(_)));
    assert_eq!(f.store.balance(user), Money(5_000));
}

#[tokio::test]
async fn khalti_cancelled_payment_fails_topup() {
    let f = khalti_fixture().await;
    let user = UserId::new();
    *f.mock.status.lock() = "User canceled".to_string();

    let topup = f
        .checkout
        .initiate_topup(user, KhaltiGateway::NAME, topup_request(5_000, "khalti-2"))
        .await
        .unwrap();
    let pidx = format!("pidx-{}", PaymentReference::Topup(topup.transaction_id));
    f.reconciler
        .verify(KhaltiGateway::NAME, &json!({ "pidx": pidx }))
        .await
        .unwrap();

    let entry = f.store.transaction(topup.transaction_id).unwrap();
    assert_eq!(entry.status, TransactionStatus::Failed);
    assert_eq!(entry.kind, TransactionKind::Topup);
    assert_eq!(f.store.balance(user), Money::ZERO);
}

#[tokio::test]
async fn khalti_unknown_pidx_is_not_found() {
    let f = khalti_fixture().await;
    assert_eq!(
        f.reconciler
            .verify(KhaltiGateway::NAME, &json!({ "pidx": "pidx-unknown" }))
            .await,
        Err(LedgerError::TransactionNotFound)
    );
    assert!(matches!(
        f.reconciler
            .verify(KhaltiGateway::NAME, &json!({}))
            .await,
        Err(LedgerError::Validation(_))
    ));
}

#[tokio::test]
async fn khalti_server_error_leaves_topup_pending() {
    let f = khalti_fixture().await;
    f.mock.broken.store(true, Ordering::SeqCst);
    let user = UserId::new();

    let err = f
        .checkout
        .initiate_topup(user, KhaltiGateway::NAME, topup_request(5_000, "khalti-3"))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Gateway(_)));

    let entries = f.store.entries(user);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, TransactionStatus::Pending);
}
