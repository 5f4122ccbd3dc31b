use super::*;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

use crate::config::WhatsAppConfig;
use crate::database::sqlite::models::{NewTenant, Plan, Tenant};
use crate::pipeline::fakes::{CountingEmbedder, FakeVectors, ScriptedCompleter, metadata};
use crate::pipeline::{FAILURE_REPLY, UPGRADE_MESSAGE};

struct TestApp {
    _dir: TempDir,
    database: Database,
    vectors: Arc<FakeVectors>,
    completer: Arc<ScriptedCompleter>,
    tenant: Tenant,
    router: Router,
}

async fn test_app(plan: Plan) -> TestApp {
    test_app_with(plan, Config::default()).await
}

async fn test_app_with(plan: Plan, config: Config) -> TestApp {
    let dir = TempDir::new().expect("temp dir");
    let database = Database::new(dir.path().join("metadata.db"))
        .await
        .expect("database");
    let tenant = database
        .create_tenant(NewTenant {
            name: "La Vedaa".to_string(),
            plan,
        })
        .await
        .expect("tenant");

    let vectors = Arc::new(FakeVectors::new());
    let completer = Arc::new(ScriptedCompleter::new());
    let state = AppState::new(
        database.clone(),
        Arc::clone(&vectors) as Arc<dyn VectorIndex>,
        Arc::new(CountingEmbedder::new(4)),
        Arc::clone(&completer) as Arc<dyn Completer>,
        &config,
    )
    .expect("state");

    TestApp {
        _dir: dir,
        database,
        vectors,
        completer,
        tenant,
        router: router(state),
    }
}

impl TestApp {
    async fn send(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(API_KEY_HEADER, &self.tenant.api_key);
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).expect("request"))
            .await
            .expect("response");

        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn seed_sleep_catalog(&self) {
        self.database
            .save_keyword(
                &self.tenant.id,
                &crate::database::sqlite::models::NewKeyword::new("sleep", "Deep Sleep Capsules"),
            )
            .await
            .expect("keyword");
        self.vectors.insert(
            "sleep-benefits",
            metadata(
                &self.tenant.id,
                "Deep Sleep Capsules",
                Some("benefits"),
                "Supports restful sleep",
            ),
        );
    }
}

#[tokio::test]
async fn missing_or_wrong_api_key_is_unauthorized() {
    let app = test_app(Plan::Free).await;

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/user/plan")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/user/plan")
                .header(API_KEY_HEADER, "not-a-key")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn health_needs_no_key() {
    let app = test_app(Plan::Free).await;
    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).expect("request"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn chat_answers_and_counts() {
    let app = test_app(Plan::Free).await;
    app.seed_sleep_catalog().await;
    app.completer.push_reply("It supports restful sleep.");

    let (status, body) = app
        .send(
            "POST",
            "/chat",
            Some(json!({"message": "sleep benefits?", "visitorId": "v1"})),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reply"], "It supports restful sleep.");

    let (_, plan) = app.send("GET", "/user/plan", None).await;
    assert_eq!(plan["plan"], "free");
    assert_eq!(plan["questionCount"], 1);
    assert_eq!(plan["uploadCount"], 0);

    let (status, turns) = app.send("GET", "/chats?visitorId=v1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(turns.as_array().map(Vec::len), Some(1));
    assert_eq!(turns[0]["message"], "sleep benefits?");
}

#[tokio::test]
async fn chat_over_quota_is_forbidden_with_upgrade_reply() {
    let mut config = Config::default();
    config.limits.free_question_limit = 0;
    let app = test_app_with(Plan::Free, config).await;

    let (status, body) = app
        .send("POST", "/chat", Some(json!({"message": "hello", "visitorId": "v1"})))
        .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["reply"], UPGRADE_MESSAGE);
}

#[tokio::test]
async fn chat_rejects_blank_message() {
    let app = test_app(Plan::Free).await;
    let (status, body) = app
        .send("POST", "/chat", Some(json!({"message": "  ", "visitorId": "v1"})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn chat_without_visitor_is_rejected_before_any_model_call() {
    let app = test_app(Plan::Free).await;
    app.seed_sleep_catalog().await;

    let (status, body) = app
        .send("POST", "/chat", Some(json!({"message": "sleep benefits?"})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "visitorId is required");

    let (status, _) = app
        .send(
            "POST",
            "/chat",
            Some(json!({"message": "sleep benefits?", "visitorId": "   "})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert_eq!(app.completer.call_count(), 0);
    let (_, plan) = app.send("GET", "/user/plan", None).await;
    assert_eq!(plan["questionCount"], 0);
    assert!(
        app.database
            .chat_summaries(&app.tenant.id)
            .await
            .expect("summaries")
            .is_empty()
    );
}

#[tokio::test]
async fn chat_without_message_field_is_a_json_bad_request() {
    let app = test_app(Plan::Free).await;

    let (status, body) = app
        .send("POST", "/chat", Some(json!({"visitorId": "v1"})))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "message is required");
    assert_eq!(app.completer.call_count(), 0);
}

#[tokio::test]
async fn chat_failure_is_still_a_reply() {
    let app = test_app(Plan::Free).await;
    app.seed_sleep_catalog().await;
    app.completer.push_error("model offline");

    let (status, body) = app
        .send(
            "POST",
            "/chat",
            Some(json!({"message": "sleep benefits?", "visitorId": "v1"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reply"], FAILURE_REPLY);
}

#[tokio::test]
async fn reset_session_endpoint() {
    let app = test_app(Plan::Free).await;
    app.seed_sleep_catalog().await;
    app.send("POST", "/chat", Some(json!({"message": "sleep benefits?", "visitorId": "v1"})))
        .await;

    let (status, _) = app
        .send("POST", "/reset-session", Some(json!({"visitorId": "v1"})))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .send("POST", "/reset-session", Some(json!({"visitorId": " "})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app.send("POST", "/reset-session", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "visitorId is required");
}

#[tokio::test]
async fn widget_reset_path_clears_the_session() {
    let app = test_app(Plan::Free).await;
    app.seed_sleep_catalog().await;
    app.send(
        "POST",
        "/chat",
        Some(json!({"message": "sleep benefits?", "visitorId": "v1"})),
    )
    .await;
    assert!(
        app.database
            .session(&app.tenant.id, "v1")
            .await
            .expect("session read")
            .is_some()
    );

    let (status, body) = app
        .send("POST", "/chat/reset-session", Some(json!({"visitorId": "v1"})))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Session reset");
    assert!(
        app.database
            .session(&app.tenant.id, "v1")
            .await
            .expect("session read")
            .is_none()
    );
}

#[tokio::test]
async fn upload_then_list_and_search() {
    let app = test_app(Plan::Free).await;

    let (status, body) = app
        .send(
            "POST",
            "/upload",
            Some(json!({
                "filename": "catalog.json",
                "visitorId": "admin",
                "mode": "fields",
                "items": [
                    {"product": "Men Care", "field": "pricing", "text": "Rs 699"},
                    {"product": "Men Care", "field": "usage", "text": "Two daily"}
                ]
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["records"], 2);

    let (_, uploads) = app.send("GET", "/uploads?visitorId=admin", None).await;
    assert_eq!(uploads.as_array().map(Vec::len), Some(2));
    assert_eq!(uploads[0]["filename"], "catalog.json");

    let (_, listed) = app.send("GET", "/vectors", None).await;
    assert_eq!(listed.as_array().map(Vec::len), Some(2));
    assert!(listed[0].get("score").is_none());

    let (_, found) = app.send("GET", "/vectors?queryText=price", None).await;
    assert_eq!(found.as_array().map(Vec::len), Some(2));
    assert!(found[0]["score"].is_number());

    let (_, plan) = app.send("GET", "/user/plan", None).await;
    assert_eq!(plan["uploadCount"], 1);
}

#[tokio::test]
async fn upload_over_limit_is_forbidden() {
    let mut config = Config::default();
    config.limits.free_upload_limit = 0;
    let app = test_app_with(Plan::Free, config).await;

    let (status, body) = app
        .send(
            "POST",
            "/upload",
            Some(json!({"filename": "a.txt", "mode": "text", "text": "hello"})),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["reply"], UPGRADE_MESSAGE);
}

#[tokio::test]
async fn vector_update_and_delete() {
    let app = test_app(Plan::Paid).await;
    let id = format!("{}_admin_a.txt_0", app.tenant.id);
    app.send(
        "POST",
        "/upload",
        Some(json!({"filename": "a.txt", "visitorId": "admin", "mode": "text", "text": "old"})),
    )
    .await;

    let (status, _) = app
        .send("PUT", &format!("/vectors/{id}"), Some(json!({"newText": "new"})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.vectors.records()[0].metadata.text, "new");

    let (status, _) = app.send("DELETE", &format!("/vectors/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app.send("DELETE", &format!("/vectors/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn keyword_admin_round() {
    let app = test_app(Plan::Free).await;

    let (status, created) = app
        .send(
            "POST",
            "/admin/keywords",
            Some(json!({"phrase": "  Heart ", "product": "Happy Heart", "weight": 2})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["phrase"], "heart");
    let id = created["id"].as_i64().expect("id");

    let (status, updated) = app
        .send(
            "PUT",
            &format!("/admin/keywords/{id}"),
            Some(json!({"weight": 5})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["weight"], 5);
    assert_eq!(updated["product"], "Happy Heart");

    let (status, _) = app
        .send(
            "PUT",
            &format!("/admin/keywords/{id}"),
            Some(json!({"weight": 0})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .send("POST", "/admin/keywords", Some(json!({"phrase": " ", "product": "X"})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, listed) = app.send("GET", "/admin/keywords", None).await;
    assert_eq!(listed.as_array().map(Vec::len), Some(1));

    let (status, _) = app
        .send("DELETE", &format!("/admin/keywords/{id}"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app
        .send("DELETE", &format!("/admin/keywords/{id}"), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn admin_chat_viewer() {
    let app = test_app(Plan::Paid).await;
    app.seed_sleep_catalog().await;
    for visitor in ["v1", "v2"] {
        app.send(
            "POST",
            "/chat",
            Some(json!({"message": "sleep benefits?", "visitorId": visitor})),
        )
        .await;
    }

    let (_, summaries) = app.send("GET", "/admin/chats", None).await;
    let summaries = summaries.as_array().cloned().unwrap_or_default();
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0]["visitorId"], "v2");

    let (_, history) = app.send("GET", "/admin/chats/v1", None).await;
    assert_eq!(history.as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn whatsapp_without_sender_is_bad_request() {
    let app = test_app(Plan::Free).await;
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/whatsapp")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from("Body=hello"))
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test(flavor = "multi_thread")]
async fn whatsapp_reply_is_sent_through_twilio() {
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    let twilio = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/2010-04-01/Accounts/AC1/Messages.json"))
        .and(body_string_contains("Body=Please+send+a+valid+message."))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"sid": "SM1"})))
        .expect(1)
        .mount(&twilio)
        .await;

    let dir = TempDir::new().expect("temp dir");
    let database = Database::new(dir.path().join("metadata.db"))
        .await
        .expect("database");
    let tenant = database
        .create_tenant(NewTenant {
            name: "wa".to_string(),
            plan: Plan::Free,
        })
        .await
        .expect("tenant");
    let config = Config {
        whatsapp: Some(WhatsAppConfig {
            account_sid: "AC1".to_string(),
            auth_token: "token".to_string(),
            from_number: "+15550000000".to_string(),
            tenant_id: tenant.id.clone(),
            api_base: twilio.uri(),
        }),
        ..Config::default()
    };
    let state = AppState::new(
        database,
        Arc::new(FakeVectors::new()),
        Arc::new(CountingEmbedder::new(4)),
        Arc::new(ScriptedCompleter::new()),
        &config,
    )
    .expect("state");

    let response = router(state)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/whatsapp")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from("Body=%20&From=whatsapp%3A%2B919999"))
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
}
