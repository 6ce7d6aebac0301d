use serde_json::{Map, Value, json};

pub fn token_response(access_token: &str, refresh_token: &str, expires_in: i64) -> Value {
    json!({
        "access_token": access_token,
        "refresh_token": refresh_token,
        "expires_in": expires_in,
        "refresh_expires_in": expires_in * 6,
        "token_type": "Bearer"
    })
}

pub fn invalid_grant() -> Value {
    json!({
        "error": "invalid_grant",
        "error_description": "Token is not active"
    })
}

pub fn resource(resource_type: &str, id: &str, attributes: Value) -> Value {
    json!({ "type": resource_type, "id": id, "attributes": attributes })
}

/// Reference-only entry as it appears in `included` before resolution.
pub fn stub(resource_type: &str, id: &str) -> Value {
    json!({ "type": resource_type, "id": id })
}

/// Single-resource document. `external` lists the included types the
/// upstream expects consumers to resolve themselves.
pub fn document(data: Value, included: Vec<Value>, external: &[&str]) -> Value {
    let mut meta = Map::new();
    if !external.is_empty() {
        meta.insert("external".to_string(), json!(external));
    }
    let mut document = json!({ "data": data, "meta": meta });
    if !included.is_empty() {
        document["included"] = Value::Array(included);
    }
    document
}
