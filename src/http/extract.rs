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

//! Caller identity extractors.

use super::{AppError, AppState};
use crate::auth::Principal;
use crate::error::LedgerError;
use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
};

/// Any authenticated caller.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub Principal);

/// An authenticated staff member.
#[derive(Debug, Clone, Copy)]
pub struct AdminUser(pub Principal);

/// Token from `Authorization: Bearer <token>`.
pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

pub(crate) fn authenticate(state: &AppState, token: Option<&str>) -> Result<Principal, AppError> {
    let token = token.ok_or(LedgerError::Unauthorized)?;
    Ok(state.auth.authenticate(token)?)
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        authenticate(state, bearer_token(&parts.headers)).map(AuthUser)
    }
}

impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let principal = authenticate(state, bearer_token(&parts.headers))?;
        if !principal.admin {
            return Err(LedgerError::Forbidden.into());
        }
        Ok(AdminUser(principal))
    }
}
