use super::*;

#[test]
fn predicate_always_scopes_tenant() {
    assert_eq!(
        MetadataFilter::default().predicate("tenant-1"),
        "tenant_id = 'tenant-1'"
    );
    assert_eq!(
        MetadataFilter::product_field("Deep Sleep", "benefits").predicate("t"),
        "tenant_id = 't' AND product = 'Deep Sleep' AND field = 'benefits'"
    );
    assert_eq!(
        MetadataFilter::visitor("v1").predicate("t"),
        "tenant_id = 't' AND visitor_id = 'v1'"
    );
}

#[test]
fn predicate_escapes_quotes() {
    let predicate = MetadataFilter::product("Nature's Gift").predicate("o'brien");
    assert_eq!(
        predicate,
        "tenant_id = 'o''brien' AND product = 'Nature''s Gift'"
    );
}

#[test]
fn metadata_serializes_camel_case() {
    let metadata = VectorMetadata {
        tenant_id: "t".to_string(),
        visitor_id: "default".to_string(),
        product: Some("Happy Heart".to_string()),
        field: None,
        text: "Supports heart health".to_string(),
        filename: "catalog.json".to_string(),
        created_at: "2024-01-01T00:00:00Z".to_string(),
    };

    let json = serde_json::to_value(&metadata).expect("can serialize json");
    assert_eq!(json["tenantId"], "t");
    assert_eq!(json["visitorId"], "default");
    assert!(json["field"].is_null());
}
