use crate::errors::{Result, TransferEngineError};
use crate::metrics;
use actix_web::{web, HttpResponse};
use ledger_core::{ids, LedgerClient};
use message_bus::{publish_json, QueuePublisher};
use serde::Deserialize;
use serde_json::json;
use settlement::{
    AccountSearch, AccountService, CurrencyCache, CurrencyProvisioner, CurrencyService,
    HistoryQuery, MetadataStore, MovementKind, MovementRequest, NewAccount, NewCurrency,
};
use std::sync::Arc;
use tracing::info;

/// Everything the admin handlers need
#[derive(Clone)]
pub struct AppState {
    pub currencies: CurrencyService,
    pub provisioner: CurrencyProvisioner,
    pub accounts: AccountService,
    pub publisher: Arc<dyn QueuePublisher>,
}

impl AppState {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        store: Arc<dyn MetadataStore>,
        cache: Arc<CurrencyCache>,
        publisher: Arc<dyn QueuePublisher>,
    ) -> Self {
        Self {
            currencies: CurrencyService::new(store.clone(), cache.clone()),
            provisioner: CurrencyProvisioner::new(ledger.clone(), store, cache.clone()),
            accounts: AccountService::new(ledger, cache),
            publisher,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListCurrenciesQuery {
    #[serde(default)]
    pub include_inactive: bool,
}

/// Health check endpoint
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "service": "transfer-engine",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Prometheus scrape endpoint
pub async fn prometheus_metrics() -> HttpResponse {
    match metrics::render() {
        Ok(body) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(body),
        Err(e) => HttpResponse::InternalServerError().body(e),
    }
}

/// Create a currency and its company account
pub async fn create_currency(
    state: web::Data<AppState>,
    request: web::Json<NewCurrency>,
) -> Result<HttpResponse> {
    let outcome = state.provisioner.provision(request.into_inner()).await;
    metrics::record("create_currency", &outcome);
    let currency = outcome?;

    info!("✅ Currency {} ({}) provisioned", currency.id, currency.code);
    Ok(HttpResponse::Created().json(currency))
}

/// Get currency by id
pub async fn get_currency(
    state: web::Data<AppState>,
    currency_id: web::Path<u32>,
) -> Result<HttpResponse> {
    let currency = state.currencies.get(*currency_id).await?;
    Ok(HttpResponse::Ok().json(currency))
}

/// List currencies
pub async fn list_currencies(
    state: web::Data<AppState>,
    query: web::Query<ListCurrenciesQuery>,
) -> Result<HttpResponse> {
    let currencies = state.currencies.list(query.include_inactive).await?;

    Ok(HttpResponse::Ok().json(json!({
        "total": currencies.len(),
        "currencies": currencies
    })))
}

pub async fn activate_currency(
    state: web::Data<AppState>,
    currency_id: web::Path<u32>,
) -> Result<HttpResponse> {
    let outcome = state.currencies.activate(*currency_id).await;
    metrics::record("activate_currency", &outcome);
    Ok(HttpResponse::Ok().json(outcome?))
}

pub async fn deactivate_currency(
    state: web::Data<AppState>,
    currency_id: web::Path<u32>,
) -> Result<HttpResponse> {
    let outcome = state.currencies.deactivate(*currency_id).await;
    metrics::record("deactivate_currency", &outcome);
    Ok(HttpResponse::Ok().json(outcome?))
}

pub async fn delete_currency(
    state: web::Data<AppState>,
    currency_id: web::Path<u32>,
) -> Result<HttpResponse> {
    let outcome = state.currencies.delete(*currency_id).await;
    metrics::record("delete_currency", &outcome);
    outcome?;
    Ok(HttpResponse::NoContent().finish())
}

/// Open a user account
pub async fn create_account(
    state: web::Data<AppState>,
    request: web::Json<NewAccount>,
) -> Result<HttpResponse> {
    let outcome = state.accounts.create_account(request.into_inner()).await;
    metrics::record("create_account", &outcome);
    Ok(HttpResponse::Created().json(outcome?))
}

/// Open several accounts in one ledger call
pub async fn create_accounts(
    state: web::Data<AppState>,
    request: web::Json<Vec<NewAccount>>,
) -> Result<HttpResponse> {
    let outcome = state.accounts.create_accounts(request.into_inner()).await;
    metrics::record("create_accounts", &outcome);
    let created: Vec<String> = outcome?.into_iter().map(ids::format_id).collect();

    Ok(HttpResponse::Created().json(json!({
        "total": created.len(),
        "ids": created
    })))
}

/// Search accounts by owner, currency and state
pub async fn search_accounts(
    state: web::Data<AppState>,
    query: web::Query<AccountSearch>,
) -> Result<HttpResponse> {
    let page = state.accounts.search_accounts(&query).await?;
    Ok(HttpResponse::Ok().json(page))
}

pub async fn get_account(
    state: web::Data<AppState>,
    path: web::Path<(u32, u64)>,
) -> Result<HttpResponse> {
    let (currency_id, owner_id) = path.into_inner();
    let account = state.accounts.get_account(currency_id, owner_id).await?;
    Ok(HttpResponse::Ok().json(account))
}

pub async fn get_account_by_id(
    state: web::Data<AppState>,
    account_id: web::Path<String>,
) -> Result<HttpResponse> {
    let id = ids::parse_id(&account_id).map_err(|e| TransferEngineError::Validation(e.to_string()))?;
    let account = state.accounts.get_account_by_id(id).await?;
    Ok(HttpResponse::Ok().json(account))
}

/// Balance history of one account, newest first
pub async fn get_balances(
    state: web::Data<AppState>,
    path: web::Path<(u32, u64)>,
    query: web::Query<HistoryQuery>,
) -> Result<HttpResponse> {
    let (currency_id, owner_id) = path.into_inner();
    let history = state
        .accounts
        .balance_history(currency_id, owner_id, query.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(history))
}

pub async fn get_transfer(
    state: web::Data<AppState>,
    transfer_id: web::Path<String>,
) -> Result<HttpResponse> {
    let id = ids::parse_id(&transfer_id).map_err(|e| TransferEngineError::Validation(e.to_string()))?;
    let transfer = state.accounts.get_transfer(id).await?;
    Ok(HttpResponse::Ok().json(transfer))
}

/// Queue one movement for the settlement pipeline
pub async fn submit_movement(
    state: web::Data<AppState>,
    request: web::Json<MovementRequest>,
) -> Result<HttpResponse> {
    let request = request.into_inner();
    let key = movement_key(&request)?;

    let outcome = publish_json(state.publisher.as_ref(), &key, &request).await;
    metrics::record("submit_movement", &outcome);
    outcome?;

    Ok(HttpResponse::Accepted().json(json!({
        "status": "queued",
        "key": key
    })))
}

/// Deduplication key of a movement.
///
/// A reversal carries the id of the transfer it undoes, so it is keyed by
/// the reversal id to stay distinct from the original.
fn movement_key(request: &MovementRequest) -> Result<String> {
    let raw = request
        .transfer_id
        .as_ref()
        .map(|id| id.to_text())
        .ok_or_else(|| TransferEngineError::Validation("transferId is required".to_string()))?;
    let id = ids::parse_id(&raw).map_err(|e| TransferEngineError::Validation(e.to_string()))?;

    let reversal = request.kind.as_deref().and_then(MovementKind::parse) == Some(MovementKind::Reversal);
    Ok(ids::format_id(if reversal { ids::reversal_id(id) } else { id }))
}

/// Configure routes
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check))
        .route("/metrics", web::get().to(prometheus_metrics))
        .service(
            web::scope("/api/v1")
                .route("/currencies", web::post().to(create_currency))
                .route("/currencies", web::get().to(list_currencies))
                .route("/currencies/{id}", web::get().to(get_currency))
                .route("/currencies/{id}", web::delete().to(delete_currency))
                .route("/currencies/{id}/activate", web::post().to(activate_currency))
                .route("/currencies/{id}/deactivate", web::post().to(deactivate_currency))
                .route("/accounts", web::post().to(create_account))
                .route("/accounts", web::get().to(search_accounts))
                .route("/accounts/batch", web::post().to(create_accounts))
                .route("/accounts/by-id/{id}", web::get().to(get_account_by_id))
                .route("/accounts/{currency_id}/{owner_id}", web::get().to(get_account))
                .route("/accounts/{currency_id}/{owner_id}/balances", web::get().to(get_balances))
                .route("/transfers", web::post().to(submit_movement))
                .route("/transfers/{id}", web::get().to(get_transfer)),
        );
}
