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
use crate::base::{Money, Page, PageRequest, TransactionId, UserId};
use crate::review::{ManualTopupRequest, Ticket};
use crate::transaction::WalletTransaction;
use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};

/// Response body for `GET /wallet/me`.
#[derive(Debug, Serialize, Deserialize)]
pub struct WalletResponse {
    pub user_id: UserId,
    pub balance: Money,
    pub transactions: Page<WalletTransaction>,
}

#[derive(Debug, Deserialize)]
pub struct ReceiptRequest {
    pub transaction_id: TransactionId,
    pub receipt_ref: String,
}

/// GET /wallet/me?page=&per_page=
pub(super) async fn me(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Query(page): Query<PageRequest>,
) -> Json<WalletResponse> {
    let user_id = principal.user_id;
    Json(WalletResponse {
        user_id,
        balance: state.store.balance(user_id),
        transactions: state.store.list_entries(user_id, page),
    })
}

/// POST /wallet/topup/manual/init
pub(super) async fn manual_init(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Json(request): Json<ManualTopupRequest>,
) -> Result<(StatusCode, Json<Ticket>), AppError> {
    let ticket = state.review.initialize(principal.user_id, request)?;
    let status = if ticket.replayed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(ticket)))
}

/// POST /wallet/topup/manual/upload-receipt
///
/// The receipt image is stored elsewhere; this records its reference.
pub(super) async fn upload_receipt(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Json(request): Json<ReceiptRequest>,
) -> Result<Json<WalletTransaction>, AppError> {
    Ok(Json(state.review.attach_receipt(
        principal.user_id,
        request.transaction_id,
        &request.receipt_ref,
    )?))
}
