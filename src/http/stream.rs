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

//! `GET /wallet/stream`: server-sent balance events.
//!
//! `EventSource` cannot set headers, so the token may come as `?token=`.
//! The first event carries the current balance; later ones follow every
//! committed unit. A subscriber that falls behind gets a fresh snapshot
//! instead of the events it missed.

use super::extract::{authenticate, bearer_token};
use super::{AppError, AppState};
use crate::base::UserId;
use crate::notifier::BalanceChanged;
use crate::store::LedgerStore;
use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::sse::{Event, KeepAlive, Sse},
};
use chrono::Utc;
use futures::stream::Stream;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;

const KEEP_ALIVE: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub token: Option<String>,
}

fn snapshot(store: &LedgerStore, user_id: UserId) -> BalanceChanged {
    BalanceChanged {
        user_id,
        balance: store.balance(user_id),
        transaction_id: None,
        at: Utc::now(),
    }
}

fn balance_event(change: &BalanceChanged) -> Result<Event, axum::Error> {
    Event::default().event("balance").json_data(change)
}

pub(super) async fn balance_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<StreamQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, AppError> {
    let token = bearer_token(&headers).or(query.token.as_deref());
    let user_id = authenticate(&state, token)?.user_id;

    // Subscribe before reading the snapshot so no commit falls in between.
    let mut rx = state.store.notifier().subscribe(user_id);
    let store: Arc<LedgerStore> = state.store.clone();
    debug!(%user_id, "balance stream opened");

    let stream = async_stream::stream! {
        yield balance_event(&snapshot(&store, user_id));
        loop {
            match rx.recv().await {
                Ok(change) => yield balance_event(&change),
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    yield balance_event(&snapshot(&store, user_id));
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE).text("ping")))
}
