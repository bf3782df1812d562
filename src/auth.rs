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

//! Bearer token resolution. Accounts and sign-in live elsewhere; this crate
//! only needs to know who is calling and whether they are staff.

use crate::base::UserId;
use crate::error::LedgerError;
use dashmap::DashMap;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub user_id: UserId,
    pub admin: bool,
}

pub trait Authenticator: Send + Sync {
    fn authenticate(&self, token: &str) -> Result<Principal, LedgerError>;
}

/// Tokens held in memory.
#[derive(Debug, Default)]
pub struct TokenDirectory {
    tokens: DashMap<String, Principal>,
}

impl TokenDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, token: impl Into<String>, principal: Principal) {
        self.tokens.insert(token.into(), principal);
    }

    /// Creates a fresh random token for `user_id`.
    pub fn issue(&self, user_id: UserId, admin: bool) -> String {
        let token = Uuid::new_v4().simple().to_string();
        self.insert(token.clone(), Principal { user_id, admin });
        token
    }

    /// Parses a comma-separated list of `token:user-uuid[:admin]`.
    ///
    /// ```
    /// use wallet_ledger_rs::auth::{Authenticator, TokenDirectory};
    ///
    /// let tokens = TokenDirectory::parse(
    ///     "alice:0190c8a2-6a4e-7c1e-9f00-000000000001,ops:0190c8a2-6a4e-7c1e-9f00-000000000002:admin",
    /// )
    /// .unwrap();
    /// assert!(tokens.authenticate("ops").unwrap().admin);
    /// assert!(!tokens.authenticate("alice").unwrap().admin);
    /// ```
    pub fn parse(list: &str) -> Result<Self, LedgerError> {
        let directory = Self::new();
        for item in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let mut parts = item.split(':');
            let (Some(token), Some(user)) = (parts.next(), parts.next()) else {
                return Err(LedgerError::Validation(format!("malformed token entry: {item}")));
            };
            let user_id: UserId = user
                .parse()
                .map_err(|_| LedgerError::Validation(format!("bad user id in token entry: {item}")))?;
            let admin = match parts.next() {
                None => false,
                Some("admin") => true,
                Some(other) => {
                    return Err(LedgerError::Validation(format!("unknown token role: {other}")));
                }
            };
            directory.insert(token, Principal { user_id, admin });
        }
        Ok(directory)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl Authenticator for TokenDirectory {
    fn authenticate(&self, token: &str) -> Result<Principal, LedgerError> {
        self.tokens
            .get(token)
            .map(|p| *p)
            .ok_or(LedgerError::Unauthorized)
    }
}
