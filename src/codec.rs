// Self-describing structured codec (§4.2). Payloads are `serde_json`
// values encoded to UTF-8 bytes — a compact text format, byte-for-byte
// round-trippable, and safe on untrusted input (unlike a language
// native serialized-object format).
use serde_json::{json, Value};

use crate::error::ErrorKind;

pub fn encode(value: &Value) -> Vec<u8> {
    // `serde_json::to_vec` never fails for a `Value` (no non-serializable
    // types can appear in it), so this is infallible in practice.
    serde_json::to_vec(value).expect("Value always serializes")
}

pub fn decode(bytes: &[u8]) -> Result<Value, serde_json::Error> {
    serde_json::from_slice(bytes)
}

pub fn ok() -> Value {
    json!({ "status": 1 })
}

pub fn ok_with(mut fields: Value) -> Value {
    fields["status"] = json!(1);
    fields
}

pub fn err(kind: ErrorKind) -> Value {
    json!({ "status": 0, "error": kind.as_str() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_arbitrary_payloads() {
        let payloads = vec![
            json!({"a": 1, "b": [1,2,3], "c": {"nested": true}}),
            json!({}),
            json!({"blob": "opaque-bytes-as-base64-or-string"}),
            json!(null),
        ];
        for p in payloads {
            let encoded = encode(&p);
            let decoded = decode(&encoded).unwrap();
            assert_eq!(p, decoded);
        }
    }

    #[test]
    fn err_envelope_carries_kind() {
        let v = err(ErrorKind::WrongCode);
        assert_eq!(v["status"], 0);
        assert_eq!(v["error"], "wrong_code");
    }
}
