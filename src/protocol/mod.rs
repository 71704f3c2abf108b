//! Wire-level glue: framing plus the server-generated error payloads the
//! connection loop replies with on each failure kind.

pub mod frame;

use serde_json::{json, Value};

use crate::codec::Payload;

/// Builds one of the four fixed server-generated error payloads.
pub fn error_payload(code: &str) -> Payload {
    match json!({"status": "failure", "error": code}) {
        Value::Object(map) => map,
        _ => unreachable!(),
    }
}

pub const ERR_REQUEST_MALFORMED: &str = "ERR_REQUEST_MALFORMED";
pub const ERR_HEADER_INVALID: &str = "ERR_HEADER_INVALID";
pub const ERR_TIMED_OUT: &str = "ERR_TIMED_OUT";
pub const ERR_SESSION_LIMIT_REACHED: &str = "ERR_SESSION_LIMIT_REACHED";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_payload_has_the_required_shape() {
        let payload = error_payload(ERR_HEADER_INVALID);
        assert_eq!(payload.get("status").unwrap(), "failure");
        assert_eq!(payload.get("error").unwrap(), "ERR_HEADER_INVALID");
    }
}
