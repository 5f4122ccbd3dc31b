use super::*;
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(api_base: &str) -> WhatsAppConfig {
    WhatsAppConfig {
        account_sid: "AC123".to_string(),
        auth_token: "secret".to_string(),
        from_number: "+15550001111".to_string(),
        tenant_id: "tenant-1".to_string(),
        api_base: api_base.to_string(),
    }
}

#[test]
fn channel_prefix_is_added_once() {
    assert_eq!(channel_address("+911234"), "whatsapp:+911234");
    assert_eq!(channel_address(" whatsapp:+911234 "), "whatsapp:+911234");
}

#[test]
fn invalid_api_base_is_rejected() {
    assert!(TwilioClient::new(&config("not a url")).is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn sends_form_with_basic_auth() {
    let server = MockServer::start().await;
    let expected_auth = format!("Basic {}", STANDARD.encode("AC123:secret"));
    Mock::given(method("POST"))
        .and(path("/2010-04-01/Accounts/AC123/Messages.json"))
        .and(header("Authorization", expected_auth.as_str()))
        .and(body_string_contains("To=whatsapp%3A%2B919999"))
        .and(body_string_contains("From=whatsapp%3A%2B15550001111"))
        .and(body_string_contains("Body=Hello"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"sid": "SM1"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = TwilioClient::new(&config(&server.uri())).expect("client");
    let sid = client
        .send_message("whatsapp:+919999", "Hello")
        .await
        .expect("send");

    assert_eq!(sid, "SM1");
}

#[tokio::test(flavor = "multi_thread")]
async fn api_errors_are_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let client = TwilioClient::new(&config(&server.uri())).expect("client");
    assert!(client.send_message("+1", "Hi").await.is_err());
}
