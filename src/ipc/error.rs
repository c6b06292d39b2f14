use serde_json::json;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({ "id": id, "ok": true, "result": result })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let error = match details {
        Some(details) => json!({
            "code": code,
            "message": message.into(),
            "details": details,
        }),
        None => json!({ "code": code, "message": message.into() }),
    };
    json!({ "id": id, "ok": false, "error": error })
}
