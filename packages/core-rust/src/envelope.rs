//! RPC-over-job wire convention.
//!
//! A call travels as a flat JSON object: the reserved [`METHOD_KEY`] holds the
//! target method name and every other key is an argument. [`Envelope`] is the
//! typed view of the same payload; converting through it keeps the wire form
//! unchanged.

use serde_json::{Map, Value};

use crate::error::RpcError;

/// Reserved payload key carrying the target method name.
pub const METHOD_KEY: &str = "_";

/// Encode a call into a job payload.
///
/// A caller-supplied [`METHOD_KEY`] argument is overwritten by `method`.
///
/// # Errors
///
/// `InvalidMethodName` for an empty method, `InvalidArguments` if `data` is
/// not a JSON object.
pub fn encode(method: &str, data: Value) -> Result<Value, RpcError> {
    if method.is_empty() {
        return Err(RpcError::InvalidMethodName(method.to_string()));
    }
    let Value::Object(args) = data else {
        return Err(RpcError::InvalidArguments);
    };
    Ok(Envelope::new(method, args).into_payload())
}

/// Extract the method name from a job payload.
///
/// # Errors
///
/// `MalformedPayload` if the payload is not an object or the method key is
/// missing or not a string.
pub fn decode(payload: &Value) -> Result<&str, RpcError> {
    let Value::Object(map) = payload else {
        return Err(RpcError::MalformedPayload("payload is not an object".into()));
    };
    match map.get(METHOD_KEY) {
        Some(Value::String(method)) => Ok(method),
        Some(_) => Err(RpcError::MalformedPayload(format!(
            "`{METHOD_KEY}` is not a string"
        ))),
        None => Err(RpcError::MalformedPayload(format!("missing `{METHOD_KEY}`"))),
    }
}

/// Typed form of a call: explicit method plus argument object.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub method: String,
    pub args: Map<String, Value>,
}

impl Envelope {
    #[must_use]
    pub fn new(method: impl Into<String>, args: Map<String, Value>) -> Self {
        Self {
            method: method.into(),
            args,
        }
    }

    /// Flatten into the wire payload.
    #[must_use]
    pub fn into_payload(self) -> Value {
        let mut args = self.args;
        if let Some(previous) = args.insert(METHOD_KEY.to_string(), Value::String(self.method)) {
            tracing::warn!(
                previous = %previous,
                "argument `{METHOD_KEY}` collides with the reserved method key and was overwritten"
            );
        }
        Value::Object(args)
    }

    /// Split a wire payload back into method and arguments.
    ///
    /// # Errors
    ///
    /// Same conditions as [`decode`].
    pub fn from_payload(payload: Value) -> Result<Self, RpcError> {
        let method = decode(&payload)?.to_string();
        let mut args = match payload {
            Value::Object(args) => args,
            _ => Map::new(),
        };
        args.remove(METHOD_KEY);
        Ok(Self { method, args })
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    #[test]
    fn encode_sets_method_key() {
        let payload = encode("echo", json!({ "t": 42 })).unwrap();
        assert_eq!(payload, json!({ "t": 42, "_": "echo" }));
    }

    #[test]
    fn encode_rejects_empty_method() {
        let err = encode("", json!({})).unwrap_err();
        assert!(matches!(err, RpcError::InvalidMethodName(_)));
    }

    #[test]
    fn encode_rejects_non_object_data() {
        for data in [json!([1, 2]), json!("text"), json!(null), json!(3)] {
            let err = encode("echo", data).unwrap_err();
            assert!(matches!(err, RpcError::InvalidArguments));
        }
    }

    #[test]
    fn encode_overwrites_caller_method_key() {
        let payload = encode("echo", json!({ "_": "smuggled", "a": 1 })).unwrap();
        assert_eq!(decode(&payload).unwrap(), "echo");
        assert_eq!(payload["a"], 1);
    }

    #[test]
    fn decode_rejects_malformed_payloads() {
        for payload in [json!([]), json!({ "a": 1 }), json!({ "_": 5 }), json!("echo")] {
            let err = decode(&payload).unwrap_err();
            assert!(matches!(err, RpcError::MalformedPayload(_)));
        }
    }

    #[test]
    fn envelope_strips_method_key() {
        let env = Envelope::from_payload(json!({ "_": "sum", "a": 1, "b": 2 })).unwrap();
        assert_eq!(env.method, "sum");
        assert_eq!(Value::Object(env.args), json!({ "a": 1, "b": 2 }));
    }

    fn arb_args() -> impl Strategy<Value = Map<String, Value>> {
        prop::collection::btree_map("[a-z]{1,8}", any::<i64>(), 0..8).prop_map(|m| {
            m.into_iter()
                .map(|(k, v)| (k, Value::from(v)))
                .collect::<Map<String, Value>>()
        })
    }

    proptest! {
        #[test]
        fn decode_recovers_encoded_call(method in "[a-zA-Z][a-zA-Z0-9]{0,16}", args in arb_args()) {
            let payload = encode(&method, Value::Object(args.clone())).unwrap();
            prop_assert_eq!(decode(&payload).unwrap(), method.as_str());

            let env = Envelope::from_payload(payload).unwrap();
            prop_assert_eq!(env.args, args);
        }
    }
}
