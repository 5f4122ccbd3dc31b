use super::*;
use chrono::Utc;

fn tenant(plan: Plan, status: SubscriptionStatus, questions: i64, uploads: i64) -> Tenant {
    Tenant {
        id: "t1".to_string(),
        name: "Store".to_string(),
        api_key: "key".to_string(),
        plan,
        subscription_status: status,
        upload_count: uploads,
        question_count: questions,
        created_date: Utc::now().naive_utc(),
    }
}

#[test]
fn question_quota_applies_to_free_plan_only() {
    assert!(tenant(Plan::Free, SubscriptionStatus::Inactive, 20, 0).question_quota_exhausted(20));
    assert!(!tenant(Plan::Free, SubscriptionStatus::Inactive, 19, 0).question_quota_exhausted(20));
    assert!(!tenant(Plan::Paid, SubscriptionStatus::Inactive, 500, 0).question_quota_exhausted(20));
}

#[test]
fn upload_quota_needs_active_paid_plan_to_bypass() {
    assert!(tenant(Plan::Free, SubscriptionStatus::Active, 0, 5).upload_quota_exhausted(5));
    assert!(tenant(Plan::Paid, SubscriptionStatus::Pending, 0, 5).upload_quota_exhausted(5));
    assert!(!tenant(Plan::Paid, SubscriptionStatus::Active, 0, 50).upload_quota_exhausted(5));
    assert!(!tenant(Plan::Free, SubscriptionStatus::Inactive, 0, 4).upload_quota_exhausted(5));
}

#[test]
fn new_keyword_normalization() {
    let keyword = NewKeyword {
        phrase: "  Men Combo ".to_string(),
        product: " Men Combo Pack ".to_string(),
        weight: 2,
    };
    let normalized = keyword.normalized().expect("keyword should be usable");
    assert_eq!(normalized.phrase, "men combo");
    assert_eq!(normalized.product, "Men Combo Pack");
    assert_eq!(normalized.weight, 2);

    assert!(NewKeyword::new("   ", "Product").normalized().is_none());
    assert!(
        NewKeyword {
            weight: 0,
            ..NewKeyword::new("sleep", "Deep Sleep")
        }
        .normalized()
        .is_none()
    );
}

#[test]
fn new_keyword_weight_defaults_to_one() {
    let keyword: NewKeyword =
        serde_json::from_str(r#"{"phrase":"sleep","product":"Deep Sleep"}"#).expect("valid json");
    assert_eq!(keyword.weight, 1);
}

#[test]
fn session_row_decodes_matched_products() {
    let row = SessionRow {
        tenant_id: "t1".to_string(),
        visitor_id: "v1".to_string(),
        last_product: Some("Happy Heart".to_string()),
        last_intent: None,
        last_matched_products: r#"["Happy Heart","Men Care"]"#.to_string(),
        updated_date: Utc::now().naive_utc(),
    };
    let state = SessionState::from(row);
    assert_eq!(state.last_matched_products.len(), 2);
    assert!(!state.is_empty());
    assert!(SessionState::new("t1", "v1").is_empty());
}

#[test]
fn display_matches_stored_text() {
    assert_eq!(Plan::Paid.to_string(), "paid");
    assert_eq!(SubscriptionStatus::Pending.to_string(), "pending");
}

#[test]
fn tenant_serialization_hides_api_key() {
    let json = serde_json::to_value(tenant(Plan::Free, SubscriptionStatus::Inactive, 1, 2))
        .expect("should serialize");
    assert!(json.get("apiKey").is_none());
    assert_eq!(json["questionCount"], 1);
    assert_eq!(json["plan"], "free");
}
