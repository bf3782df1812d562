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

use crate::error::LedgerError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

/// Response body for errors.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    /// Whether repeating the same request may succeed. Gateways delivering
    /// webhooks use this to decide on redelivery.
    pub retryable: bool,
}

/// Wrapper for converting `LedgerError` into HTTP responses.
#[derive(Debug)]
pub struct AppError(pub LedgerError);

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        AppError(err)
    }
}

impl AppError {
    pub fn status(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            LedgerError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            LedgerError::ProductUnavailable(_) => (StatusCode::NOT_FOUND, "PRODUCT_UNAVAILABLE"),
            LedgerError::OrderNotFound => (StatusCode::NOT_FOUND, "ORDER_NOT_FOUND"),
            LedgerError::TransactionNotFound => (StatusCode::NOT_FOUND, "TRANSACTION_NOT_FOUND"),
            LedgerError::InsufficientFunds => (StatusCode::BAD_REQUEST, "INSUFFICIENT_FUNDS"),
            LedgerError::AlreadyPaid => (StatusCode::CONFLICT, "ALREADY_PAID"),
            LedgerError::TooManyPending => (StatusCode::CONFLICT, "TOO_MANY_PENDING"),
            LedgerError::InvalidState(_) => (StatusCode::CONFLICT, "INVALID_STATE"),
            LedgerError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            LedgerError::Forbidden => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            LedgerError::Gateway(_) => (StatusCode::INTERNAL_SERVER_ERROR, "GATEWAY_ERROR"),
            LedgerError::Storage(_) => (StatusCode::SERVICE_UNAVAILABLE, "STORAGE_ERROR"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status();
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
                code: code.to_string(),
                retryable: self.0.is_retryable(),
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_ledger_errors_to_status_codes() {
        let cases = [
            (LedgerError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (LedgerError::InsufficientFunds, StatusCode::BAD_REQUEST),
            (LedgerError::OrderNotFound, StatusCode::NOT_FOUND),
            (LedgerError::AlreadyPaid, StatusCode::CONFLICT),
            (LedgerError::Unauthorized, StatusCode::UNAUTHORIZED),
            (LedgerError::Forbidden, StatusCode::FORBIDDEN),
            (LedgerError::Storage("disk".into()), StatusCode::SERVICE_UNAVAILABLE),
        ];
        for (error, expected) in cases {
            assert_eq!(AppError(error).status().0, expected);
        }
    }
}
