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

//! Server configuration from flags, environment and `.env`.
//!
//! Every flag has an environment fallback. A gateway is only registered
//! once its credentials and webhook secret are given; there are no built-in
//! secrets. eSewa's public test merchant is available behind
//! `--esewa-sandbox`, which still needs our own webhook secret.

use crate::auth::TokenDirectory;
use crate::base::Money;
use crate::error::LedgerError;
use crate::gateway::{
    AmountBounds, EsewaConfig, EsewaGateway, GatewayRegistry, KhaltiConfig, KhaltiGateway,
};
use crate::review::AdminReview;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Storefront payment and wallet ledger server
#[derive(Parser, Debug, Clone)]
#[command(name = "wallet-ledger-rs")]
#[command(about = "Storefront payment and wallet ledger server", long_about = None)]
pub struct Config {
    /// Address to listen on
    #[arg(long, env = "LEDGER_BIND", default_value = "127.0.0.1:3000")]
    pub bind: SocketAddr,

    /// Journal file; state is kept in memory only when unset
    #[arg(long, env = "LEDGER_JOURNAL", value_name = "FILE")]
    pub journal: Option<PathBuf>,

    /// JSON array of products to sell
    #[arg(long, env = "LEDGER_CATALOG", value_name = "FILE")]
    pub catalog: Option<PathBuf>,

    /// fsync the journal after every committed unit
    #[arg(long, env = "LEDGER_JOURNAL_FSYNC")]
    pub fsync: bool,

    /// Smallest amount a gateway may collect, in paisa
    #[arg(long, env = "GATEWAY_MIN_AMOUNT", default_value_t = 1_000)]
    pub gateway_min: i64,

    /// Largest amount a gateway may collect, in paisa
    #[arg(long, env = "GATEWAY_MAX_AMOUNT", default_value_t = 10_000_000)]
    pub gateway_max: i64,

    /// Upper bound on one gateway call
    #[arg(long, env = "GATEWAY_TIMEOUT_SECS", default_value_t = 10)]
    pub gateway_timeout_secs: u64,

    /// Open manual top-ups allowed per user
    #[arg(long, env = "MAX_PENDING_TOPUPS", default_value_t = AdminReview::DEFAULT_MAX_OPEN)]
    pub max_pending_topups: usize,

    /// Use eSewa's public test merchant instead of live credentials
    #[arg(long, env = "ESEWA_SANDBOX")]
    pub esewa_sandbox: bool,

    #[arg(long, env = "ESEWA_PRODUCT_CODE")]
    pub esewa_product_code: Option<String>,

    #[arg(long, env = "ESEWA_SECRET_KEY", hide_env_values = true)]
    pub esewa_secret_key: Option<String>,

    #[arg(long, env = "ESEWA_FORM_URL")]
    pub esewa_form_url: Option<String>,

    #[arg(long, env = "ESEWA_SUCCESS_URL")]
    pub esewa_success_url: Option<String>,

    #[arg(long, env = "ESEWA_FAILURE_URL")]
    pub esewa_failure_url: Option<String>,

    #[arg(long, env = "ESEWA_WEBHOOK_SECRET", hide_env_values = true)]
    pub esewa_webhook_secret: Option<String>,

    /// Enables Khalti when set
    #[arg(long, env = "KHALTI_SECRET_KEY", hide_env_values = true)]
    pub khalti_secret_key: Option<String>,

    #[arg(long, env = "KHALTI_BASE_URL")]
    pub khalti_base_url: Option<String>,

    #[arg(long, env = "KHALTI_RETURN_URL")]
    pub khalti_return_url: Option<String>,

    #[arg(long, env = "KHALTI_WEBSITE_URL")]
    pub khalti_website_url: Option<String>,

    #[arg(long, env = "KHALTI_WEBHOOK_SECRET", hide_env_values = true)]
    pub khalti_webhook_secret: Option<String>,

    /// Bearer tokens as `token:user-uuid[:admin]`, comma separated
    #[arg(long, env = "LEDGER_TOKENS", default_value = "", hide_env_values = true)]
    pub tokens: String,
}

impl Config {
    pub fn bounds(&self) -> Result<AmountBounds, LedgerError> {
        if self.gateway_min <= 0 || self.gateway_min > self.gateway_max {
            return Err(LedgerError::Validation(format!(
                "gateway bounds must satisfy 0 < min <= max, got {}..={}",
                self.gateway_min, self.gateway_max
            )));
        }
        Ok(AmountBounds {
            min: Money(self.gateway_min),
            max: Money(self.gateway_max),
        })
    }

    /// eSewa settings, or `None` when the webhook secret or the merchant
    /// credentials are missing.
    pub fn esewa(&self) -> Option<EsewaConfig> {
        let webhook_secret = non_empty(&self.esewa_webhook_secret)?;
        let mut config = if self.esewa_sandbox {
            EsewaConfig::sandbox(webhook_secret)
        } else {
            EsewaConfig::new(
                non_empty(&self.esewa_product_code)?,
                non_empty(&self.esewa_secret_key)?,
                webhook_secret,
            )
        };
        if let Some(url) = &self.esewa_form_url {
            config.form_url = url.clone();
        }
        if let Some(url) = &self.esewa_success_url {
            config.success_url = url.clone();
        }
        if let Some(url) = &self.esewa_failure_url {
            config.failure_url = url.clone();
        }
        Some(config)
    }

    /// Khalti settings, or `None` unless both the secret key and the
    /// webhook secret are set.
    pub fn khalti(&self) -> Option<KhaltiConfig> {
        let secret_key = non_empty(&self.khalti_secret_key)?;
        let webhook_secret = non_empty(&self.khalti_webhook_secret)?;
        let defaults = KhaltiConfig::default();
        Some(KhaltiConfig {
            base_url: self.khalti_base_url.clone().unwrap_or(defaults.base_url),
            secret_key,
            return_url: self.khalti_return_url.clone().unwrap_or(defaults.return_url),
            website_url: self.khalti_website_url.clone().unwrap_or(defaults.website_url),
            webhook_secret,
        })
    }

    pub fn gateway_registry(&self) -> Result<GatewayRegistry, LedgerError> {
        let mut registry = GatewayRegistry::new(
            self.bounds()?,
            Duration::from_secs(self.gateway_timeout_secs),
        );
        if let Some(esewa) = self.esewa() {
            registry.register(Arc::new(EsewaGateway::new(esewa)));
        }
        if let Some(khalti) = self.khalti() {
            registry.register(Arc::new(KhaltiGateway::new(khalti)));
        }
        Ok(registry)
    }

    pub fn token_directory(&self) -> Result<TokenDirectory, LedgerError> {
        TokenDirectory::parse(&self.tokens)
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty()).map(str::to_owned)
}
