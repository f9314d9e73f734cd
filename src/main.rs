// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 SkillSwap

use std::net::SocketAddr;

use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use skillswap_payments::{
    api::router, config::Settings, reconciler::PayoutReconciler, state::AppState,
    storage::LedgerDb,
};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));

    let format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    let settings = Settings::from_env();
    let db = LedgerDb::open(&settings.data_dir.join("ledger.redb"))
        .expect("Failed to open ledger database");

    let state = AppState::new(db, settings.clone()).with_providers_from_env();
    info!(
        paypal = state.paypal.is_some(),
        whish = state.whish.is_some(),
        "provider clients configured"
    );

    // Background reconciliation sweep; stops on the shutdown token.
    let shutdown = CancellationToken::new();
    tokio::spawn(PayoutReconciler::new(state.clone()).run(shutdown.clone()));

    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", settings.host, settings.port)
        .parse()
        .expect("Failed to parse bind address");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind");

    info!("SkillSwap payments server listening on http://{addr} (docs at /docs)");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c()
                .await
                .expect("Failed to listen for shutdown signal");
            shutdown.cancel();
        })
        .await
        .expect("HTTP server failed");
}
