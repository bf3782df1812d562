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

//! Balance change fan-out, one topic per user.
//!
//! Delivery is best effort. Slow subscribers lag and miss events; a client
//! reconnecting to the stream reads the balance again from `/wallet/me`.

use crate::base::{Money, TransactionId, UserId};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Published after a unit that wrote a ledger entry commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceChanged {
    pub user_id: UserId,
    pub balance: Money,
    pub transaction_id: Option<TransactionId>,
    pub at: DateTime<Utc>,
}

/// Pub/sub seam between the ledger and whatever pushes events to clients.
pub trait BalanceNotifier: Send + Sync {
    fn publish(&self, event: BalanceChanged);

    fn subscribe(&self, user_id: UserId) -> broadcast::Receiver<BalanceChanged>;
}

/// In-process bus backed by one broadcast channel per subscribed user.
pub struct InProcessBus {
    channels: DashMap<UserId, broadcast::Sender<BalanceChanged>>,
    capacity: usize,
}

impl InProcessBus {
    pub const DEFAULT_CAPACITY: usize = 64;

    pub fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn subscriber_count(&self, user_id: UserId) -> usize {
        self.channels
            .get(&user_id)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

impl Default for InProcessBus {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl BalanceNotifier for InProcessBus {
    fn publish(&self, event: BalanceChanged) {
        let user_id = event.user_id;
        let delivered = match self.channels.get(&user_id) {
            Some(tx) => tx.send(event).is_ok(),
            None => return,
        };
        if !delivered {
            // Every receiver is gone; drop the channel unless someone resubscribed.
            self.channels
                .remove_if(&user_id, |_, tx| tx.receiver_count() == 0);
        }
        tracing::trace!(%user_id, delivered, "balance event published");
    }

    fn subscribe(&self, user_id: UserId) -> broadcast::Receiver<BalanceChanged> {
        self.channels
            .entry(user_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }
}
