use serde_json::Value;

/// Picks one usable URL out of the candidate shapes the service hands out:
/// a plain string, an object with an `all` field, or a list (first entry wins).
pub fn resolve_url(candidates: &Value) -> Option<String> {
    match candidates {
        Value::String(url) => non_empty(url),
        Value::Object(fields) => fields.get("all").and_then(Value::as_str).and_then(non_empty),
        Value::Array(items) => items.first().and_then(resolve_url),
        _ => None,
    }
}

fn non_empty(url: &str) -> Option<String> {
    let url = url.trim();
    (!url.is_empty()).then(|| url.to_string())
}
