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

//! eSewa ePay v2: signed form post, base64 callback.
//!
//! Initiation needs no network call. The browser posts the signed form to
//! eSewa and comes back to `success_url` with a base64 `data` parameter that
//! carries its own signature over `signed_field_names`.

use super::{
    GatewayFailure, InitiateRequest, Initiation, PaymentGateway, PaymentOutcome, Redirect,
    Verification,
};
use crate::base::Money;
use crate::signature::{sign_base64, verify_base64};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::str::FromStr;

const SIGNED_FIELDS: &str = "total_amount,transaction_uuid,product_code";

#[derive(Debug, Clone)]
pub struct EsewaConfig {
    pub product_code: String,
    pub secret_key: String,
    pub form_url: String,
    pub success_url: String,
    pub failure_url: String,
    pub webhook_secret: String,
}

impl EsewaConfig {
    pub const SANDBOX_PRODUCT_CODE: &'static str = "EPAYTEST";
    /// Signing key eSewa publishes for its test merchant. Anyone can sign
    /// callbacks with it, so it is only used when the sandbox is asked for.
    pub const SANDBOX_SECRET_KEY: &'static str = "8gBm/:&EnhH.1/q";

    /// Live merchant credentials with the default return URLs.
    pub fn new(
        product_code: impl Into<String>,
        secret_key: impl Into<String>,
        webhook_secret: impl Into<String>,
    ) -> Self {
        Self {
            product_code: product_code.into(),
            secret_key: secret_key.into(),
            form_url: "https://epay.esewa.com.np/api/epay/main/v2/form".into(),
            success_url: "http://localhost:5173/payment/esewa/success".into(),
            failure_url: "http://localhost:5173/payment/esewa/failure".into(),
            webhook_secret: webhook_secret.into(),
        }
    }

    /// eSewa's public test merchant. The webhook secret is still ours.
    pub fn sandbox(webhook_secret: impl Into<String>) -> Self {
        Self {
            form_url: "https://rc-epay.esewa.com.np/api/epay/main/v2/form".into(),
            ..Self::new(
                Self::SANDBOX_PRODUCT_CODE,
                Self::SANDBOX_SECRET_KEY,
                webhook_secret,
            )
        }
    }
}

pub struct EsewaGateway {
    config: EsewaConfig,
}

impl EsewaGateway {
    pub const NAME: &'static str = "esewa";

    pub fn new(config: EsewaConfig) -> Self {
        Self { config }
    }

    fn sign(&self, message: &str) -> Result<String, GatewayFailure> {
        sign_base64(&self.config.secret_key, message.as_bytes())
            .map_err(|e| GatewayFailure::Rejected(e.to_string()))
    }
}

/// Callback values arrive as strings or numbers depending on the field.
fn field(data: &serde_json::Map<String, serde_json::Value>, name: &str) -> Option<String> {
    match data.get(name)? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn signed_message<'a>(
    names: impl Iterator<Item = &'a str>,
    value: impl Fn(&str) -> Option<String>,
) -> Option<String> {
    let parts: Option<Vec<String>> = names
        .map(|name| value(name).map(|v| format!("{name}={v}")))
        .collect();
    parts.map(|p| p.join(","))
}

#[async_trait]
impl PaymentGateway for EsewaGateway {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn webhook_secret(&self) -> &str {
        &self.config.webhook_secret
    }

    async fn initiate(&self, request: &InitiateRequest) -> Result<Initiation, GatewayFailure> {
        let total = request.amount.to_major().to_string();
        let transaction_uuid = request.reference.to_string();

        let mut fields = BTreeMap::new();
        fields.insert("amount".to_string(), total.clone());
        fields.insert("tax_amount".to_string(), "0".to_string());
        fields.insert("product_service_charge".to_string(), "0".to_string());
        fields.insert("product_delivery_charge".to_string(), "0".to_string());
        fields.insert("total_amount".to_string(), total);
        fields.insert("transaction_uuid".to_string(), transaction_uuid.clone());
        fields.insert("product_code".to_string(), self.config.product_code.clone());
        fields.insert("success_url".to_string(), self.config.success_url.clone());
        fields.insert("failure_url".to_string(), self.config.failure_url.clone());
        fields.insert("signed_field_names".to_string(), SIGNED_FIELDS.to_string());

        let message = signed_message(SIGNED_FIELDS.split(','), |name| fields.get(name).cloned())
            .ok_or_else(|| GatewayFailure::Rejected("incomplete payment form".into()))?;
        let signature = self.sign(&message)?;
        fields.insert("signature".to_string(), signature);

        Ok(Initiation {
            redirect: Redirect::FormPost {
                action: self.config.form_url.clone(),
                fields,
            },
            gateway_ref: transaction_uuid,
        })
    }

    async fn verify(&self, payload: &serde_json::Value) -> Result<Verification, GatewayFailure> {
        let encoded = payload
            .get("data")
            .and_then(|d| d.as_str())
            .ok_or_else(|| GatewayFailure::InvalidPayload("missing data".into()))?;
        let decoded = BASE64
            .decode(encoded.trim())
            .map_err(|e| GatewayFailure::InvalidPayload(format!("data is not base64: {e}")))?;
        let data: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(&decoded)
            .map_err(|e| GatewayFailure::InvalidPayload(format!("data is not JSON: {e}")))?;

        let names = field(&data, "signed_field_names")
            .ok_or_else(|| GatewayFailure::InvalidPayload("missing signed_field_names".into()))?;
        let signature = field(&data, "signature").ok_or(GatewayFailure::BadSignature)?;
        let message = signed_message(names.split(','), |name| field(&data, name))
            .ok_or_else(|| GatewayFailure::InvalidPayload("signed field missing".into()))?;
        if !verify_base64(&self.config.secret_key, message.as_bytes(), &signature) {
            return Err(GatewayFailure::BadSignature);
        }
        if field(&data, "product_code").as_deref() != Some(self.config.product_code.as_str()) {
            return Err(GatewayFailure::InvalidPayload("product code mismatch".into()));
        }

        let transaction_uuid = field(&data, "transaction_uuid");
        let amount = field(&data, "total_amount")
            .map(|raw| raw.replace(',', ""))
            .and_then(|raw| Decimal::from_str(&raw).ok())
            .and_then(Money::from_major);
        let outcome = match field(&data, "status").as_deref() {
            Some("COMPLETE") => PaymentOutcome::Success,
            Some("PENDING") | Some("AMBIGUOUS") => PaymentOutcome::Pending,
            _ => PaymentOutcome::Failure,
        };

        Ok(Verification {
            reference: transaction_uuid.as_deref().and_then(|u| u.parse().ok()),
            gateway_ref: transaction_uuid,
            amount,
            outcome,
            payload: serde_json::Value::Object(data),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::OrderId;
    use crate::order::PaymentReference;
    use serde_json::json;

    fn gateway() -> EsewaGateway {
        EsewaGateway::new(EsewaConfig::sandbox("test-webhook-secret"))
    }

    fn callback(status: &str, total: &str, uuid: &str, secret: &str) -> serde_json::Value {
        let names = "transaction_code,status,total_amount,transaction_uuid,product_code,signed_field_names";
        let message = format!(
            "transaction_code=000AWEO,status={status},total_amount={total},transaction_uuid={uuid},product_code=EPAYTEST,signed_field_names={names}"
        );
        let data = json!({
            "transaction_code": "000AWEO",
            "status": status,
            "total_amount": total,
            "transaction_uuid": uuid,
            "product_code": "EPAYTEST",
            "signed_field_names": names,
            "signature": sign_base64(secret, message.as_bytes()).unwrap(),
        });
        json!({ "data": BASE64.encode(data.to_string()) })
    }

    #[tokio::test]
    async fn initiate_builds_signed_form() {
        let reference = PaymentReference::Order(OrderId::new());
        let initiation = gateway()
            .initiate(&InitiateRequest {
                reference,
                amount: Money(7_000),
                purpose: "Order".into(),
            })
            .await
            .unwrap();

        let Redirect::FormPost { action, fields } = initiation.redirect else {
            panic!("expected a form post");
        };
        assert!(action.contains("esewa"));
        assert_eq!(fields["total_amount"], "70.00");
        assert_eq!(fields["transaction_uuid"], reference.to_string());
        assert_eq!(initiation.gateway_ref, reference.to_string());

        let message = format!(
            "total_amount=70.00,transaction_uuid={reference},product_code=EPAYTEST"
        );
        assert!(verify_base64(
            EsewaConfig::SANDBOX_SECRET_KEY,
            message.as_bytes(),
            &fields["signature"]
        ));
    }

    #[tokio::test]
    async fn verify_accepts_complete_callback() {
        let reference = PaymentReference::Order(OrderId::new()).to_string();
        let payload = callback(
            "COMPLETE",
            "7,000.0",
            &reference,
            EsewaConfig::SANDBOX_SECRET_KEY,
        );

        let verification = gateway().verify(&payload).await.unwrap();
        assert_eq!(verification.outcome, PaymentOutcome::Success);
        assert_eq!(verification.amount, Some(Money(700_000)));
        assert_eq!(
            verification.reference.map(|r| r.to_string()),
            Some(reference)
        );
    }

    #[tokio::test]
    async fn verify_rejects_forged_signature() {
        let payload = callback("COMPLETE", "70.0", "order-x", "not-the-secret");
        assert_eq!(
            gateway().verify(&payload).await,
            Err(GatewayFailure::BadSignature)
        );
    }

    #[tokio::test]
    async fn verify_maps_cancelled_to_failure() {
        let payload = callback("CANCELED", "70.0", "order-x", EsewaConfig::SANDBOX_SECRET_KEY);
        let verification = gateway().verify(&payload).await.unwrap();
        assert_eq!(verification.outcome, PaymentOutcome::Failure);
        assert_eq!(verification.reference, None);
    }
}
