use actix_web::{http::StatusCode, test, web, App};
use async_trait::async_trait;
use bytes::Bytes;
use ledger_core::{ids, MemoryLedger};
use message_bus::{MemoryQueue, MessageSource, QueuePublisher};
use serde_json::{json, Value};
use settlement::{CurrencyCache, MemoryMetadataStore};
use std::sync::Arc;
use std::time::Duration;
use transfer_engine::handlers::{self, AppState};

mockall::mock! {
    Publisher {}

    #[async_trait]
    impl QueuePublisher for Publisher {
        async fn publish(&self, key: &str, payload: Bytes) -> message_bus::Result<()>;
    }
}

struct Fixture {
    ledger: Arc<MemoryLedger>,
    store: Arc<MemoryMetadataStore>,
    queue: Arc<MemoryQueue>,
}

impl Fixture {
    fn new() -> Self {
        Self {
            ledger: Arc::new(MemoryLedger::new()),
            store: Arc::new(MemoryMetadataStore::new()),
            queue: Arc::new(MemoryQueue::new()),
        }
    }

    fn state(&self) -> AppState {
        self.state_with_publisher(self.queue.clone())
    }

    fn state_with_publisher(&self, publisher: Arc<dyn QueuePublisher>) -> AppState {
        let cache = Arc::new(CurrencyCache::new(self.store.clone(), Duration::from_secs(15)));
        AppState::new(self.ledger.clone(), self.store.clone(), cache, publisher)
    }
}

macro_rules! app {
    ($state:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($state))
                .configure(handlers::configure_routes),
        )
        .await
    };
}

#[actix_web::test]
async fn test_health() {
    let fixture = Fixture::new();
    let app = app!(fixture.state());

    let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["service"], "transfer-engine");
}

#[actix_web::test]
async fn test_currency_lifecycle() {
    let fixture = Fixture::new();
    let app = app!(fixture.state());

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/api/v1/currencies")
            .set_json(json!({"id": 840, "code": "USD", "name": "US Dollar"}))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let created: Value = test::read_body_json(resp).await;
    assert_eq!(created["state"], "A");
    assert_eq!(
        created["companyAccountId"],
        ids::format_id(ids::company_account_id(840))
    );

    // A second create for the same id is refused
    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/api/v1/currencies")
            .set_json(json!({"id": 840, "code": "USD", "name": "US Dollar"}))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["code"], 409);

    // Active currencies cannot be deleted
    let resp = test::call_service(&app, test::TestRequest::delete().uri("/api/v1/currencies/840").to_request()).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = test::call_service(
        &app,
        test::TestRequest::post().uri("/api/v1/currencies/840/deactivate").to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = test::call_service(&app, test::TestRequest::get().uri("/api/v1/currencies").to_request()).await;
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["total"], 0);

    let resp = test::call_service(
        &app,
        test::TestRequest::get().uri("/api/v1/currencies?includeInactive=true").to_request(),
    )
    .await;
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["total"], 1);

    let resp = test::call_service(&app, test::TestRequest::delete().uri("/api/v1/currencies/840").to_request()).await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = test::call_service(&app, test::TestRequest::get().uri("/api/v1/currencies/840").to_request()).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn test_account_open_and_lookup() {
    let fixture = Fixture::new();
    let app = app!(fixture.state());

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/api/v1/currencies")
            .set_json(json!({"id": 978, "code": "EUR", "name": "Euro"}))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/api/v1/accounts")
            .set_json(json!({"ownerId": 42, "currencyId": 978}))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let account: Value = test::read_body_json(resp).await;
    assert_eq!(account["balance"], "0");
    assert_eq!(account["state"], "A");

    let resp = test::call_service(&app, test::TestRequest::get().uri("/api/v1/accounts/978/42").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let by_id = format!("/api/v1/accounts/by-id/{}", ids::account_id(978, 42));
    let resp = test::call_service(&app, test::TestRequest::get().uri(&by_id).to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = test::call_service(
        &app,
        test::TestRequest::get().uri("/api/v1/accounts?ownerId=42").to_request(),
    )
    .await;
    let page: Value = test::read_body_json(resp).await;
    assert_eq!(page["total"], 1);

    let resp = test::call_service(&app, test::TestRequest::get().uri("/api/v1/accounts/978/43").to_request()).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = test::call_service(&app, test::TestRequest::get().uri("/api/v1/transfers/abc").to_request()).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn test_bulk_account_open() {
    let fixture = Fixture::new();
    let app = app!(fixture.state());

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/api/v1/currencies")
            .set_json(json!({"id": 978, "code": "EUR", "name": "Euro"}))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/api/v1/accounts/batch")
            .set_json(json!([
                {"ownerId": 1, "currencyId": 978},
                {"ownerId": 2, "currencyId": 978, "allowOverdraft": true}
            ]))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["total"], 2);
    assert_eq!(body["ids"][0], ids::format_id(ids::account_id(978, 1)));
    assert_eq!(body["ids"][1], ids::format_id(ids::account_id(978, 2)));
    assert!(fixture.ledger.account(ids::account_id(978, 2)).is_some());

    // one bad request keeps the whole batch out of the ledger
    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/api/v1/accounts/batch")
            .set_json(json!([
                {"ownerId": 3, "currencyId": 978},
                {"ownerId": 0, "currencyId": 978}
            ]))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(fixture.ledger.account(ids::account_id(978, 3)).is_none());
}

#[actix_web::test]
async fn test_movement_is_queued_under_its_key() {
    let fixture = Fixture::new();
    let app = app!(fixture.state());

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/api/v1/transfers")
            .set_json(json!({
                "transferId": 77, "ownerId": 42, "amount": 500,
                "currency": 978, "kind": "credit-in"
            }))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::ACCEPTED);

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/api/v1/transfers")
            .set_json(json!({"transferId": "77", "kind": "reversal"}))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::ACCEPTED);

    let first = fixture.queue.next_message().await.unwrap();
    assert_eq!(first.key.as_deref(), Some("77"));
    let payload: Value = serde_json::from_slice(&first.payload).unwrap();
    assert_eq!(payload["amount"], 500);

    let second = fixture.queue.next_message().await.unwrap();
    assert_eq!(second.key, Some(ids::format_id(ids::reversal_id(77))));
}

#[actix_web::test]
async fn test_movement_without_id_is_rejected() {
    let fixture = Fixture::new();
    let app = app!(fixture.state());

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/api/v1/transfers")
            .set_json(json!({"ownerId": 42, "amount": 500, "currency": 978, "kind": "credit-in"}))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(fixture.queue.uncommitted_count(), 0);
}

#[actix_web::test]
async fn test_publish_failure_is_bad_gateway() {
    let fixture = Fixture::new();
    let mut publisher = MockPublisher::new();
    publisher
        .expect_publish()
        .times(1)
        .returning(|_, _| Err(message_bus::Error::Publish("no responders".to_string())));
    let app = app!(fixture.state_with_publisher(Arc::new(publisher)));

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/api/v1/transfers")
            .set_json(json!({"transferId": 5, "ownerId": 1, "amount": 10, "currency": 978, "kind": "debit-out"}))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
}
