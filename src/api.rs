use crate::{
    service::MatchingService,
    types::{parse_address, ClaimRequest, IntentRequest, MatchNotification, OperationResult},
};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::Serialize;
use std::{collections::BTreeMap, sync::Arc};
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{debug, Level};

type AppState = Arc<MatchingService>;

#[derive(Debug, Serialize)]
pub struct NotificationsResponse {
    pub success: bool,
    pub notifications: Vec<MatchNotification>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalancesResponse {
    pub user_address: String,
    /// token -> decimal amount
    pub balances: BTreeMap<String, String>,
}

pub fn router(service: Arc<MatchingService>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/intent", post(submit_intent).get(list_intents))
        .route("/api/intent/claim", post(claim_withdrawal))
        .route("/api/intent/matches/:user_address", get(match_notifications))
        .route("/api/intent/user/:user_address", get(intents_by_owner))
        .route("/api/balances/:user_address", get(balances))
        .route("/api/deposits", get(deposits))
        .route("/api/v1/metrics", get(metrics))
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                        .on_response(DefaultOnResponse::new().level(Level::INFO)),
                )
                .layer(CorsLayer::permissive()),
        )
        .with_state(service)
}

fn bad_request(message: impl Into<String>) -> Response {
    (StatusCode::BAD_REQUEST, Json(OperationResult::failure(message))).into_response()
}

async fn health_check(State(service): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "running": service.is_running(),
        "timestamp": Utc::now()
    }))
}

async fn submit_intent(
    State(service): State<AppState>,
    payload: Result<Json<IntentRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return bad_request(rejection.body_text()),
    };

    let result = service.submit_intent(request);
    debug!("Intent submission processed: {}", result.message);

    let status = if result.success { StatusCode::OK } else { StatusCode::BAD_REQUEST };
    (status, Json(result)).into_response()
}

async fn claim_withdrawal(
    State(service): State<AppState>,
    payload: Result<Json<ClaimRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return bad_request(rejection.body_text()),
    };

    let result = service.claim_withdrawal(request).await;
    debug!("Token claim processed: {}", result.message);
    Json(result).into_response()
}

async fn match_notifications(State(service): State<AppState>, Path(user_address): Path<String>) -> Response {
    match parse_address("userAddress", &user_address) {
        Ok(owner) => Json(NotificationsResponse {
            success: true,
            notifications: service.get_match_notifications(owner),
        })
        .into_response(),
        Err(e) => bad_request(e.to_string()),
    }
}

async fn list_intents(State(service): State<AppState>) -> impl IntoResponse {
    Json(service.intents())
}

async fn intents_by_owner(State(service): State<AppState>, Path(user_address): Path<String>) -> Response {
    match parse_address("userAddress", &user_address) {
        Ok(owner) => Json(service.intents_by_owner(owner)).into_response(),
        Err(e) => bad_request(e.to_string()),
    }
}

async fn balances(State(service): State<AppState>, Path(user_address): Path<String>) -> Response {
    let owner = match parse_address("userAddress", &user_address) {
        Ok(owner) => owner,
        Err(e) => return bad_request(e.to_string()),
    };

    let balances = service
        .balances_of(owner)
        .into_iter()
        .map(|(token, amount)| (token.to_string(), amount.to_string()))
        .collect();

    Json(BalancesResponse {
        user_address: owner.to_string(),
        balances,
    })
    .into_response()
}

async fn deposits(State(service): State<AppState>) -> impl IntoResponse {
    Json(service.deposits())
}

async fn metrics(State(service): State<AppState>) -> impl IntoResponse {
    Json(service.metrics())
}
