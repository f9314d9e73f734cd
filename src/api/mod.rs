// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 SkillSwap

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::state::AppState;

pub mod admin;
pub mod deposits;
pub mod health;
pub mod identity;
pub mod methods;
pub mod payouts;
pub mod wallet;
pub mod webhooks;

pub fn router(state: AppState) -> Router {
    let v1_routes = Router::new()
        .route("/wallet", get(wallet::get_wallet))
        .route("/wallet/transactions", get(wallet::list_transactions))
        .route(
            "/payouts",
            get(payouts::list_my_payouts).post(payouts::create_payout),
        )
        .route(
            "/payout-methods",
            get(methods::list_methods).post(methods::create_method),
        )
        .route(
            "/payout-methods/{method_id}",
            delete(methods::delete_method),
        )
        .route(
            "/payout-methods/{method_id}/default",
            post(methods::set_default_method),
        )
        .route("/deposits/paypal", post(deposits::create_paypal_deposit))
        .route("/deposits/whish", post(deposits::create_whish_deposit))
        .route("/admin/payouts", get(admin::list_payouts))
        .route("/admin/payouts/{payout_id}/approve", post(admin::approve))
        .route("/admin/payouts/{payout_id}/reject", post(admin::reject))
        .route(
            "/admin/payouts/{payout_id}/mark-paid",
            post(admin::mark_paid_by_hand),
        )
        .route("/admin/reconcile", post(admin::reconcile))
        .route("/admin/webhook-events", get(admin::list_webhook_events))
        .route(
            "/admin/webhook-events/{event_id}/replay",
            post(admin::replay_webhook_event),
        );

    Router::new()
        .nest("/v1", v1_routes)
        .route("/health", get(health::health))
        // Webhook receivers are public: no identity headers, authenticity
        // comes from provider signatures.
        .route("/webhooks/paypal", post(webhooks::paypal_webhook))
        .route("/webhooks/whish", post(webhooks::whish_webhook))
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(OpenApi)]
#[openapi(
    paths(
        wallet::get_wallet,
        wallet::list_transactions,
        payouts::create_payout,
        payouts::list_my_payouts,
        methods::list_methods,
        methods::create_method,
        methods::set_default_method,
        methods::delete_method,
        deposits::create_paypal_deposit,
        deposits::create_whish_deposit,
        admin::list_payouts,
        admin::approve,
        admin::reject,
        admin::mark_paid_by_hand,
        admin::reconcile,
        admin::list_webhook_events,
        admin::replay_webhook_event,
        health::health
    ),
    components(
        schemas(
            wallet::WalletResponse,
            wallet::TransactionListResponse,
            payouts::RequestPayoutBody,
            payouts::PayoutResponse,
            payouts::PayoutListResponse,
            methods::CreateMethodBody,
            methods::MethodResponse,
            methods::MethodListResponse,
            deposits::PayPalDepositBody,
            deposits::WhishDepositBody,
            deposits::PayPalDepositResponse,
            deposits::WhishDepositResponse,
            admin::RejectPayoutBody,
            admin::ReconcileBody,
            admin::WebhookEventListResponse,
            crate::reconciler::ReconcileOutcome,
            crate::storage::WebhookEventRecord,
            crate::storage::TransactionRecord,
            health::HealthResponse
        )
    ),
    tags(
        (name = "Wallet", description = "Credit balance and ledger history"),
        (name = "Payouts", description = "Payout requests"),
        (name = "PayoutMethods", description = "Saved payout destinations"),
        (name = "Deposits", description = "Credit purchases"),
        (name = "Admin", description = "Payout workflow, reconciliation and webhook triage"),
        (name = "Health", description = "Service health")
    )
)]
struct ApiDoc;
