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

//! Khalti ePayment: server-side initiate, redirect, lookup.

use super::{
    GatewayFailure, InitiateRequest, Initiation, PaymentGateway, PaymentOutcome, Redirect,
    Verification,
};
use crate::base::Money;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub struct KhaltiConfig {
    /// API root ending in `/`, e.g. `https://dev.khalti.com/api/v2/`.
    pub base_url: String,
    pub secret_key: String,
    pub return_url: String,
    pub website_url: String,
    pub webhook_secret: String,
}

/// Sandbox endpoints with no credentials. Both secrets must be filled in;
/// an empty webhook secret verifies nothing.
impl Default for KhaltiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://dev.khalti.com/api/v2/".into(),
            secret_key: String::new(),
            return_url: "http://localhost:5173/payment/khalti/return".into(),
            website_url: "http://localhost:5173".into(),
            webhook_secret: String::new(),
        }
    }
}

#[derive(Serialize)]
struct InitiateBody<'a> {
    return_url: &'a str,
    website_url: &'a str,
    /// Paisa.
    amount: i64,
    purchase_order_id: String,
    purchase_order_name: &'a str,
}

#[derive(Deserialize)]
struct InitiateResponse {
    pidx: String,
    payment_url: String,
}

#[derive(Serialize)]
struct LookupBody<'a> {
    pidx: &'a str,
}

#[derive(Deserialize)]
struct LookupResponse {
    pidx: String,
    total_amount: i64,
    status: String,
}

pub struct KhaltiGateway {
    client: Client,
    config: KhaltiConfig,
}

impl KhaltiGateway {
    pub const NAME: &'static str = "khalti";

    pub fn new(config: KhaltiConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url)
    }

    async fn send<B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, GatewayFailure> {
        self.client
            .post(self.url(path))
            .header("Authorization", format!("Key {}", self.config.secret_key))
            .json(body)
            .send()
            .await
            .map_err(GatewayFailure::from_reqwest)
    }
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response, GatewayFailure> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status.is_server_error() {
        // The processor may have acted before failing.
        return Err(GatewayFailure::Timeout);
    }
    let detail = response.text().await.unwrap_or_default();
    Err(GatewayFailure::Rejected(format!("{status}: {detail}")))
}

#[async_trait]
impl PaymentGateway for KhaltiGateway {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn webhook_secret(&self) -> &str {
        &self.config.webhook_secret
    }

    async fn initiate(&self, request: &InitiateRequest) -> Result<Initiation, GatewayFailure> {
        let body = InitiateBody {
            return_url: &self.config.return_url,
            website_url: &self.config.website_url,
            amount: request.amount.minor(),
            purchase_order_id: request.reference.to_string(),
            purchase_order_name: &request.purpose,
        };
        let response = check(self.send("epayment/initiate/", &body).await?).await?;
        let response: InitiateResponse =
            response.json().await.map_err(GatewayFailure::from_reqwest)?;

        Ok(Initiation {
            redirect: Redirect::Url {
                url: response.payment_url,
            },
            gateway_ref: response.pidx,
        })
    }

    /// Expects `{"pidx": ...}` from the return URL and asks Khalti for the
    /// authoritative status.
    async fn verify(&self, payload: &serde_json::Value) -> Result<Verification, GatewayFailure> {
        let pidx = payload
            .get("pidx")
            .and_then(|p| p.as_str())
            .ok_or_else(|| GatewayFailure::InvalidPayload("missing pidx".into()))?;

        let response = self.send("epayment/lookup/", &LookupBody { pidx }).await?;
        // Lookup answers 400 for expired or unknown payments.
        if response.status() == StatusCode::BAD_REQUEST {
            let detail = response.text().await.unwrap_or_default();
            return Ok(Verification {
                reference: None,
                gateway_ref: Some(pidx.to_string()),
                amount: None,
                outcome: PaymentOutcome::Failure,
                payload: serde_json::json!({ "pidx": pidx, "detail": detail }),
            });
        }
        let raw: serde_json::Value = check(response)
            .await?
            .json()
            .await
            .map_err(GatewayFailure::from_reqwest)?;
        let lookup: LookupResponse = serde_json::from_value(raw.clone())
            .map_err(|e| GatewayFailure::InvalidPayload(e.to_string()))?;

        let outcome = match lookup.status.as_str() {
            "Completed" => PaymentOutcome::Success,
            "Pending" | "Initiated" => PaymentOutcome::Pending,
            _ => PaymentOutcome::Failure,
        };
        Ok(Verification {
            reference: None,
            gateway_ref: Some(lookup.pidx),
            amount: Some(Money(lookup.total_amount)),
            outcome,
            payload: raw,
        })
    }
}
