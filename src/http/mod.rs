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

//! REST and SSE surface.
//!
//! Handlers are thin: they authenticate, call one ledger component and map
//! [`LedgerError`](crate::error::LedgerError) to a status code through
//! [`AppError`]. Every amount in a request or response body is an integer
//! number of paisa.
//!
//! | Method | Path | Caller |
//! |--------|------|--------|
//! | POST | `/checkout/quote`, `/checkout/create-intent`, `/checkout/cancel` | user |
//! | GET | `/orders/{id}` | user |
//! | POST | `/payments/{gateway}/initiate`, `/payments/{gateway}/verify` | user |
//! | POST | `/webhooks/{gateway}` | gateway, `X-Webhook-Signature` |
//! | POST | `/wallet/topup/manual/init`, `/wallet/topup/manual/upload-receipt` | user |
//! | GET | `/wallet/me`, `/wallet/stream?token=` | user |
//! | GET | `/admin/topups?status=`, `/admin/wallet/export` | admin |
//! | POST | `/admin/topups/{id}/approve`, `reject`, `adjust`, `revert` | admin |

mod admin;
mod checkout;
pub mod error;
pub mod extract;
mod payments;
mod stream;
mod wallet;

pub use error::{AppError, ErrorResponse};
pub use extract::{AdminUser, AuthUser};

use crate::auth::Authenticator;
use crate::catalog::Catalog;
use crate::checkout::CheckoutOrchestrator;
use crate::gateway::GatewayRegistry;
use crate::mailer::Mailer;
use crate::reconciler::WebhookReconciler;
use crate::review::AdminReview;
use crate::store::LedgerStore;
use axum::{
    Json, Router,
    routing::{get, post},
};
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<LedgerStore>,
    pub checkout: Arc<CheckoutOrchestrator>,
    pub reconciler: Arc<WebhookReconciler>,
    pub review: Arc<AdminReview>,
    pub auth: Arc<dyn Authenticator>,
}

impl AppState {
    pub fn new(
        store: Arc<LedgerStore>,
        catalog: Arc<dyn Catalog>,
        gateways: Arc<GatewayRegistry>,
        mailer: Arc<dyn Mailer>,
        auth: Arc<dyn Authenticator>,
        max_open_topups: usize,
    ) -> Self {
        Self {
            checkout: Arc::new(CheckoutOrchestrator::new(
                store.clone(),
                catalog,
                gateways.clone(),
            )),
            reconciler: Arc::new(WebhookReconciler::new(store.clone(), gateways)),
            review: Arc::new(AdminReview::new(store.clone(), mailer, max_open_topups)),
            store,
            auth,
        }
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/checkout/quote", post(checkout::quote))
        .route("/checkout/create-intent", post(checkout::create_intent))
        .route("/checkout/cancel", post(checkout::cancel))
        .route("/orders/{id}", get(checkout::order))
        .route("/payments/{gateway}/initiate", post(payments::initiate))
        .route("/payments/{gateway}/verify", post(payments::verify))
        .route("/webhooks/{gateway}", post(payments::webhook))
        .route("/wallet/me", get(wallet::me))
        .route("/wallet/topup/manual/init", post(wallet::manual_init))
        .route(
            "/wallet/topup/manual/upload-receipt",
            post(wallet::upload_receipt),
        )
        .route("/wallet/stream", get(stream::balance_stream))
        .route("/admin/topups", get(admin::list))
        .route("/admin/topups/{id}/approve", post(admin::approve))
        .route("/admin/topups/{id}/reject", post(admin::reject))
        .route("/admin/topups/{id}/adjust", post(admin::adjust))
        .route("/admin/topups/{id}/revert", post(admin::revert))
        .route("/admin/wallet/export", get(admin::export))
        .with_state(state)
}
