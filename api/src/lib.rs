pub mod config;
pub mod error;

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use config::{Cli, StorageMode};
use error::ApiError;
use ledger::adapters::{MemoryAdapter, PostgresAdapter};
use ledger::{CreditRequest, DebitRequest, LedgerEntry, LedgerStore, ReversalRequest, UserBalance};
use rules::adapters::PostgresRuleStore;
use rules::{evaluate_event, EvaluationResult, MemoryRuleStore, NewRule, Rule, RuleStore};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

#[derive(Clone)]
pub struct ServiceState {
    pub ledger: Arc<dyn LedgerStore>,
    pub rules: Arc<dyn RuleStore>,
}

impl ServiceState {
    pub async fn bootstrap(cli: &Cli) -> Result<Self, ApiError> {
        match cli.resolved_storage() {
            StorageMode::Memory => {
                let ledger: Arc<dyn LedgerStore> = Arc::new(MemoryAdapter::new());
                let rules: Arc<dyn RuleStore> = Arc::new(MemoryRuleStore::new());
                ledger.init_schema().await?;
                rules.init_schema().await?;
                Ok(Self { ledger, rules })
            }
            StorageMode::Postgres => {
                let database_url = cli
                    .database_url
                    .as_deref()
                    .ok_or_else(|| ApiError::bad_request("--database-url is required for the postgres backend"))?;
                let pool = sqlx::postgres::PgPoolOptions::new()
                    .max_connections(cli.pg_max_connections)
                    .connect(database_url)
                    .await
                    .map_err(|e| ledger::LedgerError::Storage(e.to_string()))?;

                let ledger: Arc<dyn LedgerStore> = Arc::new(PostgresAdapter::from_pool(pool.clone()));
                let rules: Arc<dyn RuleStore> = Arc::new(PostgresRuleStore::new(pool));
                ledger.init_schema().await?;
                rules.init_schema().await?;
                Ok(Self { ledger, rules })
            }
            StorageMode::Auto => unreachable!("resolved_storage never returns Auto"),
        }
    }
}

pub fn build_router(state: ServiceState) -> Router {
    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/ledger/credit", post(credit))
        .route("/api/v1/ledger/debit", post(debit))
        .route("/api/v1/ledger/reverse", post(reverse))
        .route("/api/v1/ledger/entries", get(get_entries))
        .route("/api/v1/ledger/balance/:user_id", get(get_balance))
        .route("/api/v1/rules", post(create_rule).get(list_rules))
        .route("/api/v1/rules/:id", get(get_rule))
        .route("/api/v1/rules/evaluate", post(evaluate))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

fn idempotency_key(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::unprocessable("missing Idempotency-Key header"))
}

#[derive(Serialize)]
struct IdempotentResponse<T> {
    data: T,
    is_duplicate: bool,
}

fn mutation_response<T: Serialize>(data: T, is_duplicate: bool) -> Response {
    let status = if is_duplicate { StatusCode::OK } else { StatusCode::CREATED };
    (status, Json(IdempotentResponse { data, is_duplicate })).into_response()
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn credit(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Json(request): Json<CreditRequest>,
) -> Result<Response, ApiError> {
    let key = idempotency_key(&headers)?;
    let outcome = state.ledger.credit(&request, &key).await?;
    Ok(mutation_response(outcome.entry, outcome.is_duplicate))
}

async fn debit(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Json(request): Json<DebitRequest>,
) -> Result<Response, ApiError> {
    let key = idempotency_key(&headers)?;
    let outcome = state.ledger.debit(&request, &key).await?;
    Ok(mutation_response(outcome.entry, outcome.is_duplicate))
}

async fn reverse(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Json(request): Json<ReversalRequest>,
) -> Result<Response, ApiError> {
    let key = idempotency_key(&headers)?;
    let outcome = state.ledger.reverse(&request, &key).await?;
    Ok(mutation_response(outcome.entry, outcome.is_duplicate))
}

#[derive(Deserialize)]
struct EntriesQuery {
    user_id: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

#[derive(Serialize)]
struct EntriesResponse {
    entries: Vec<LedgerEntry>,
    total: i64,
}

async fn get_entries(
    State(state): State<ServiceState>,
    Query(query): Query<EntriesQuery>,
) -> Result<Json<EntriesResponse>, ApiError> {
    let limit = query.limit.unwrap_or(100).clamp(1, 1000);
    let offset = query.offset.unwrap_or(0).max(0);
    let (entries, total) = state
        .ledger
        .get_entries(query.user_id.as_deref(), limit, offset)
        .await?;
    Ok(Json(EntriesResponse { entries, total }))
}

async fn get_balance(
    State(state): State<ServiceState>,
    Path(user_id): Path<String>,
) -> Result<Json<UserBalanceResponse>, ApiError> {
    let balance = state.ledger.get_balance(&user_id).await?;
    Ok(Json(UserBalanceResponse::from(balance)))
}

#[derive(Serialize)]
struct UserBalanceResponse {
    user_id: String,
    balance_cents: i64,
    balance_dollars: f64,
    version: i64,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<UserBalance> for UserBalanceResponse {
    fn from(balance: UserBalance) -> Self {
        Self {
            balance_dollars: balance.balance_dollars(),
            user_id: balance.user_id,
            balance_cents: balance.balance_cents,
            version: balance.version,
            updated_at: balance.updated_at,
        }
    }
}

#[derive(Deserialize)]
struct CreateRuleRequest {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(flatten)]
    rule_json: rules::RuleDefinition,
}

async fn create_rule(
    State(state): State<ServiceState>,
    Json(request): Json<CreateRuleRequest>,
) -> Result<(StatusCode, Json<Rule>), ApiError> {
    let rule = state
        .rules
        .create(NewRule {
            name: request.name,
            description: request.description,
            rule_json: request.rule_json,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(rule)))
}

#[derive(Deserialize)]
struct ListRulesQuery {
    #[serde(default)]
    active_only: Option<bool>,
}

async fn list_rules(
    State(state): State<ServiceState>,
    Query(query): Query<ListRulesQuery>,
) -> Result<Json<Vec<Rule>>, ApiError> {
    let rules = state.rules.list(query.active_only.unwrap_or(true)).await?;
    Ok(Json(rules))
}

async fn get_rule(State(state): State<ServiceState>, Path(id): Path<Uuid>) -> Result<Json<Rule>, ApiError> {
    Ok(Json(state.rules.get(id).await?))
}

#[derive(Deserialize)]
struct EvaluateRequest {
    event_data: serde_json::Value,
    rule_id: Option<Uuid>,
}

async fn evaluate(
    State(state): State<ServiceState>,
    Json(request): Json<EvaluateRequest>,
) -> Result<Json<EvaluationResult>, ApiError> {
    let candidate_rules = match request.rule_id {
        Some(id) => vec![state.rules.get(id).await?],
        None => state.rules.list(true).await?,
    };

    let result = evaluate_event(&candidate_rules, request.event_data, state.ledger.as_ref()).await;
    Ok(Json(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn test_state() -> ServiceState {
        let ledger: Arc<dyn LedgerStore> = Arc::new(MemoryAdapter::new());
        let rules: Arc<dyn RuleStore> = Arc::new(MemoryRuleStore::new());
        ServiceState { ledger, rules }
    }

    #[tokio::test]
    async fn health_check_responds_ok() {
        let app = build_router(test_state().await);
        let response = app
            .oneshot(Request::builder().uri("/api/v1/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn credit_without_idempotency_key_is_rejected() {
        let app = build_router(test_state().await);
        let body = serde_json::json!({"user_id": "u1", "amount_cents": 1000}).to_string();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/ledger/credit")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn fresh_credit_returns_201_and_duplicate_returns_200() {
        let state = test_state().await;
        let app = build_router(state);
        let body = serde_json::json!({"user_id": "u1", "amount_cents": 1000}).to_string();

        let request = |body: String| {
            Request::builder()
                .method("POST")
                .uri("/api/v1/ledger/credit")
                .header("content-type", "application/json")
                .header("Idempotency-Key", "k1")
                .body(Body::from(body))
                .unwrap()
        };

        let first = app.clone().oneshot(request(body.clone())).await.unwrap();
        assert_eq!(first.status(), StatusCode::CREATED);

        let second = app.oneshot(request(body)).await.unwrap();
        assert_eq!(second.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn balance_for_unknown_user_is_zero() {
        let app = build_router(test_state().await);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/ledger/balance/unknown-user")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
