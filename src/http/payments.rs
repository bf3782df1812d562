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

use super::{AppError, AppState, AuthUser};
use crate::checkout::{TopupIntent, TopupRequest};
use crate::error::LedgerError;
use crate::reconciler::{SIGNATURE_HEADER, SettledRecord, Settlement};
use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
};

/// POST /payments/{gateway}/initiate - starts a gateway top-up.
pub(super) async fn initiate(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(gateway): Path<String>,
    Json(request): Json<TopupRequest>,
) -> Result<(StatusCode, Json<TopupIntent>), AppError> {
    let intent = state
        .checkout
        .initiate_topup(principal.user_id, &gateway, request)
        .await?;
    let status = if intent.replayed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(intent)))
}

/// POST /payments/{gateway}/verify - the client came back from the gateway.
///
/// The verdict is applied whoever submits it, but only the owner sees the
/// resulting record.
pub(super) async fn verify(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(gateway): Path<String>,
    Json(payload): Json<serde_json::Value>,
) -> Result<Json<Settlement>, AppError> {
    let settlement = state.reconciler.verify(&gateway, &payload).await?;
    let owner = match settlement.record() {
        SettledRecord::Order(order) => order.user_id,
        SettledRecord::Topup(entry) => entry.user_id,
    };
    if owner != principal.user_id {
        return Err(LedgerError::TransactionNotFound.into());
    }
    Ok(Json(settlement))
}

/// POST /webhooks/{gateway} - signed asynchronous settlement.
pub(super) async fn webhook(
    State(state): State<AppState>,
    Path(gateway): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Settlement>, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    Ok(Json(state.reconciler.handle(&gateway, &body, signature)?))
}
