use sha2::{Digest, Sha256};
use serde_json::Value;

/// SHA-256 over the request payload with object keys sorted lexicographically,
/// so semantically-identical requests hash identically regardless of field order.
pub fn request_hash(payload: &Value) -> String {
    let canonical = canonicalize(payload);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn canonicalize(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let parts: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}:{}", canonicalize(&Value::String(k.clone())), canonicalize(&map[k])))
                .collect();
            format!("{{{}}}", parts.join(","))
        }
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(canonicalize).collect();
            format!("[{}]", parts.join(","))
        }
        other => other.to_string(),
    }
}

/// Outcome of consulting the idempotency guard before a mutation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardCheck {
    Fresh,
    Duplicate,
    Conflict,
}

pub fn check(stored_hash: Option<&str>, computed_hash: &str) -> GuardCheck {
    match stored_hash {
        None => GuardCheck::Fresh,
        Some(h) if h == computed_hash => GuardCheck::Duplicate,
        Some(_) => GuardCheck::Conflict,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hash_is_stable_under_key_reordering() {
        let a = json!({"user_id": "u1", "amount_cents": 100});
        let b = json!({"amount_cents": 100, "user_id": "u1"});
        assert_eq!(request_hash(&a), request_hash(&b));
    }

    #[test]
    fn hash_differs_on_value_change() {
        let a = json!({"user_id": "u1", "amount_cents": 100});
        let b = json!({"user_id": "u1", "amount_cents": 200});
        assert_ne!(request_hash(&a), request_hash(&b));
    }
}
