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

use super::{AdminUser, AppError, AppState};
use crate::base::{Money, Page, PageRequest, TransactionId};
use crate::error::LedgerError;
use crate::export::export_csv;
use crate::transaction::{TransactionStatus, WalletTransaction};
use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::header,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<TransactionStatus>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct NoteRequest {
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AdjustRequest {
    pub amount: Money,
    #[serde(default)]
    pub note: Option<String>,
}

/// The note body is optional; an empty body means no note.
fn note(body: &Bytes) -> Result<Option<String>, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    let request: NoteRequest = serde_json::from_slice(body)
        .map_err(|e| LedgerError::Validation(format!("malformed body: {e}")))?;
    Ok(request.note.filter(|n| !n.trim().is_empty()))
}

/// GET /admin/topups?status=&page=&per_page=
pub(super) async fn list(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
    Query(query): Query<ListQuery>,
) -> Json<Page<WalletTransaction>> {
    let defaults = PageRequest::default();
    let page = PageRequest::new(
        query.page.unwrap_or(defaults.page),
        query.per_page.unwrap_or(defaults.per_page),
    );
    Json(state.review.list(query.status, page))
}

/// POST /admin/topups/{id}/approve
pub(super) async fn approve(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<TransactionId>,
    body: Bytes,
) -> Result<Json<WalletTransaction>, AppError> {
    info!(admin = %admin.user_id, ticket = %id, "approve requested");
    Ok(Json(state.review.approve(id, note(&body)?).await?))
}

/// POST /admin/topups/{id}/reject
pub(super) async fn reject(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<TransactionId>,
    body: Bytes,
) -> Result<Json<WalletTransaction>, AppError> {
    info!(admin = %admin.user_id, ticket = %id, "reject requested");
    Ok(Json(state.review.reject(id, note(&body)?).await?))
}

/// POST /admin/topups/{id}/adjust
pub(super) async fn adjust(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<TransactionId>,
    Json(request): Json<AdjustRequest>,
) -> Result<Json<WalletTransaction>, AppError> {
    info!(admin = %admin.user_id, ticket = %id, amount = request.amount.minor(), "adjust requested");
    Ok(Json(state.review.adjust(id, request.amount, request.note)?))
}

/// POST /admin/topups/{id}/revert
pub(super) async fn revert(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<TransactionId>,
    body: Bytes,
) -> Result<Json<WalletTransaction>, AppError> {
    info!(admin = %admin.user_id, ticket = %id, "revert requested");
    Ok(Json(state.review.revert(id, note(&body)?)?))
}

/// GET /admin/wallet/export - every wallet transaction as CSV.
pub(super) async fn export(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
) -> Result<impl IntoResponse, AppError> {
    let mut csv = Vec::new();
    export_csv(&state.store, &mut csv).map_err(|e| LedgerError::Storage(e.to_string()))?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"wallet-transactions.csv\"",
            ),
        ],
        csv,
    ))
}
