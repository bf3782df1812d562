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

use clap::Parser;
use std::fs::File;
use std::io::BufReader;
use std::process;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use wallet_ledger_rs::auth::Authenticator;
use wallet_ledger_rs::catalog::InMemoryCatalog;
use wallet_ledger_rs::config::Config;
use wallet_ledger_rs::http::{self, AppState};
use wallet_ledger_rs::mailer::LogMailer;
use wallet_ledger_rs::{FileJournal, InProcessBus, LedgerError, LedgerStore, MemoryJournal};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("wallet_ledger_rs=info")),
        )
        .init();

    let config = Config::parse();

    if let Err(e) = run(config).await {
        error!(error = %e, "server failed");
        process::exit(1);
    }
}

async fn run(config: Config) -> Result<(), LedgerError> {
    let notifier = Arc::new(InProcessBus::default());
    let store = match &config.journal {
        Some(path) => LedgerStore::open(FileJournal::open(path, config.fsync)?, notifier)?,
        None => {
            warn!("no journal configured, ledger state will not survive a restart");
            LedgerStore::new(Arc::new(MemoryJournal), notifier)
        }
    };

    let catalog = match &config.catalog {
        Some(path) => {
            let file = File::open(path)
                .map_err(|e| LedgerError::Storage(format!("{}: {e}", path.display())))?;
            InMemoryCatalog::from_json(BufReader::new(file))?
        }
        None => InMemoryCatalog::new(),
    };
    info!(products = catalog.len(), "catalog loaded");

    let gateways = config.gateway_registry()?;
    info!(gateways = ?gateways.names(), "payment gateways registered");
    if gateways.names().is_empty() {
        warn!("no payment gateway configured, only wallet payments will succeed");
    }
    if config.esewa_sandbox && config.esewa().is_some() {
        warn!("eSewa runs against the public test merchant, callbacks can be forged");
    }

    let tokens = config.token_directory()?;
    if tokens.is_empty() {
        warn!("LEDGER_TOKENS is empty, every authenticated route will answer 401");
    }
    let auth: Arc<dyn Authenticator> = Arc::new(tokens);

    let state = AppState::new(
        Arc::new(store),
        Arc::new(catalog),
        Arc::new(gateways),
        Arc::new(LogMailer),
        auth,
        config.max_pending_topups,
    );

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .map_err(|e| LedgerError::Storage(format!("bind {}: {e}", config.bind)))?;
    info!(addr = %config.bind, "listening");

    axum::serve(listener, http::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| LedgerError::Storage(e.to_string()))?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
