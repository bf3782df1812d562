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

//! Payment gateway adapters.
//!
//! An adapter turns an amount and a [`PaymentReference`] into redirect
//! instructions, and turns a gateway callback into a [`Verification`]. It
//! never touches the ledger; settling a verification is the reconciler's job.
//!
//! [`GatewayRegistry`] is the only way callers reach an adapter. It enforces
//! the amount bounds before any network call and bounds every call by a
//! timeout, classifying failures as definitive or ambiguous:
//!
//! | Failure | Meaning | Record |
//! |---------|---------|--------|
//! | [`GatewayFailure::Rejected`] | processor refused the payment | marked FAILED |
//! | [`GatewayFailure::Unreachable`] | request never reached the processor | marked FAILED |
//! | [`GatewayFailure::Timeout`] | outcome unknown | left PENDING for webhook or verify |

pub mod esewa;
pub mod khalti;

use crate::base::Money;
use crate::error::LedgerError;
use crate::order::PaymentReference;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

pub use esewa::{EsewaConfig, EsewaGateway};
pub use khalti::{KhaltiConfig, KhaltiGateway};

/// What the client must do to complete a gateway payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Redirect {
    /// Navigate the browser to `url`.
    Url { url: String },
    /// Auto-submit an HTML form to `action`.
    FormPost {
        action: String,
        fields: BTreeMap<String, String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitiateRequest {
    pub reference: PaymentReference,
    pub amount: Money,
    pub purpose: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Initiation {
    pub redirect: Redirect,
    /// Gateway-side id for this payment, used to match callbacks.
    pub gateway_ref: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentOutcome {
    Success,
    Failure,
    Pending,
}

/// A gateway's verdict on one payment.
#[derive(Debug, Clone, PartialEq)]
pub struct Verification {
    /// Our reference, when the gateway echoes it back.
    pub reference: Option<PaymentReference>,
    pub gateway_ref: Option<String>,
    /// Amount the gateway reports as collected.
    pub amount: Option<Money>,
    pub outcome: PaymentOutcome,
    pub payload: serde_json::Value,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayFailure {
    #[error("payment rejected by gateway: {0}")]
    Rejected(String),

    #[error("gateway unreachable: {0}")]
    Unreachable(String),

    #[error("gateway call timed out")]
    Timeout,

    #[error("invalid gateway payload: {0}")]
    InvalidPayload(String),

    #[error("gateway callback signature mismatch")]
    BadSignature,
}

impl GatewayFailure {
    /// A definitive failure lets the caller mark the record FAILED.
    pub fn is_definitive(&self) -> bool {
        matches!(
            self,
            GatewayFailure::Rejected(_) | GatewayFailure::Unreachable(_)
        )
    }

    pub(crate) fn from_reqwest(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            GatewayFailure::Timeout
        } else if error.is_connect() {
            GatewayFailure::Unreachable(error.to_string())
        } else if error.is_decode() {
            GatewayFailure::InvalidPayload(error.to_string())
        } else {
            // Sent but no usable answer: the processor may have acted on it.
            GatewayFailure::Timeout
        }
    }
}

/// Details stay in the logs; callers get a generic message.
impl From<GatewayFailure> for LedgerError {
    fn from(failure: GatewayFailure) -> Self {
        match failure {
            GatewayFailure::InvalidPayload(reason) => LedgerError::Validation(reason),
            GatewayFailure::BadSignature => LedgerError::Unauthorized,
            GatewayFailure::Timeout => {
                LedgerError::Gateway("payment is still being confirmed".into())
            }
            GatewayFailure::Rejected(_) | GatewayFailure::Unreachable(_) => {
                LedgerError::Gateway("payment could not be started, please retry".into())
            }
        }
    }
}

/// One external payment processor.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn name(&self) -> &str;

    /// Shared secret for `X-Webhook-Signature`.
    fn webhook_secret(&self) -> &str;

    async fn initiate(&self, request: &InitiateRequest) -> Result<Initiation, GatewayFailure>;

    /// Checks a callback payload and reports the payment outcome.
    async fn verify(&self, payload: &serde_json::Value) -> Result<Verification, GatewayFailure>;
}

/// Smallest and largest amount a gateway may be asked to collect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmountBounds {
    pub min: Money,
    pub max: Money,
}

impl AmountBounds {
    pub fn check(&self, amount: Money) -> Result<(), LedgerError> {
        if amount < self.min || amount > self.max {
            return Err(LedgerError::Validation(format!(
                "gateway amount must be between {} and {}",
                self.min, self.max
            )));
        }
        Ok(())
    }
}

impl Default for AmountBounds {
    fn default() -> Self {
        Self {
            min: Money(1_000),
            max: Money(10_000_000),
        }
    }
}

/// Configured gateways plus the limits every call goes through.
pub struct GatewayRegistry {
    gateways: HashMap<String, Arc<dyn PaymentGateway>>,
    bounds: AmountBounds,
    timeout: Duration,
}

impl GatewayRegistry {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(bounds: AmountBounds, timeout: Duration) -> Self {
        Self {
            gateways: HashMap::new(),
            bounds,
            timeout,
        }
    }

    pub fn register(&mut self, gateway: Arc<dyn PaymentGateway>) {
        self.gateways.insert(gateway.name().to_string(), gateway);
    }

    pub fn with(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.register(gateway);
        self
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn PaymentGateway>, LedgerError> {
        self.gateways
            .get(name)
            .cloned()
            .ok_or_else(|| LedgerError::Validation(format!("unknown payment gateway: {name}")))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.gateways.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn bounds(&self) -> AmountBounds {
        self.bounds
    }

    /// Validates gateway and amount without calling out.
    pub fn check(&self, name: &str, amount: Money) -> Result<(), LedgerError> {
        self.get(name)?;
        self.bounds.check(amount)
    }

    /// Starts a payment. The caller must have run [`GatewayRegistry::check`].
    pub async fn initiate(
        &self,
        name: &str,
        request: &InitiateRequest,
    ) -> Result<Initiation, GatewayFailure> {
        let gateway = self
            .get(name)
            .map_err(|e| GatewayFailure::InvalidPayload(e.to_string()))?;
        let result = match tokio::time::timeout(self.timeout, gateway.initiate(request)).await {
            Ok(result) => result,
            Err(_) => Err(GatewayFailure::Timeout),
        };
        match &result {
            Ok(initiation) => info!(
                gateway = name,
                reference = %request.reference,
                amount = request.amount.minor(),
                gateway_ref = %initiation.gateway_ref,
                "gateway payment initiated"
            ),
            Err(failure) => warn!(
                gateway = name,
                reference = %request.reference,
                amount = request.amount.minor(),
                error = %failure,
                "gateway initiate failed"
            ),
        }
        result
    }

    pub async fn verify(
        &self,
        name: &str,
        payload: &serde_json::Value,
    ) -> Result<Verification, GatewayFailure> {
        let gateway = self
            .get(name)
            .map_err(|e| GatewayFailure::InvalidPayload(e.to_string()))?;
        let result = match tokio::time::timeout(self.timeout, gateway.verify(payload)).await {
            Ok(result) => result,
            Err(_) => Err(GatewayFailure::Timeout),
        };
        if let Err(failure) = &result {
            warn!(gateway = name, error = %failure, "gateway verify failed");
        }
        result
    }
}

impl Default for GatewayRegistry {
    fn default() -> Self {
        Self::new(AmountBounds::default(), Self::DEFAULT_TIMEOUT)
    }
}
