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
use crate::base::OrderId;
use crate::checkout::{CartItem, CheckoutIntent, IntentRequest, Quote};
use crate::order::Order;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct QuoteRequest {
    pub items: Vec<CartItem>,
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub order_id: OrderId,
}

/// POST /checkout/quote
pub(super) async fn quote(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Json(request): Json<QuoteRequest>,
) -> Result<Json<Quote>, AppError> {
    let quote = state
        .checkout
        .quote(principal.user_id, &request.items)
        .await?;
    Ok(Json(quote))
}

/// POST /checkout/create-intent - 201 for a new order, 200 for a replay.
pub(super) async fn create_intent(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Json(request): Json<IntentRequest>,
) -> Result<(StatusCode, Json<CheckoutIntent>), AppError> {
    let intent = state
        .checkout
        .create_intent(principal.user_id, request)
        .await?;
    let status = if intent.replayed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(intent)))
}

/// POST /checkout/cancel
pub(super) async fn cancel(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Json(request): Json<CancelRequest>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(
        state.checkout.cancel(principal.user_id, request.order_id)?,
    ))
}

/// GET /orders/{id}
pub(super) async fn order(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<OrderId>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.checkout.order(principal.user_id, id)?))
}
