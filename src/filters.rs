//! Filter engine: predicates over `(Client, Message)` evaluated as a
//! conjunction before a handler is considered for dispatch.

use regex::Regex;
use serde_json::Value;

use crate::client::Client;
use crate::codec::Payload;

/// Validates a dotted-quad IPv4-shaped string. Deliberately only checks
/// shape (each octet is 1-3 digits), not the 0-255 range, matching the
/// anchored pattern this filter is specified against.
fn is_dotted_quad(addr: &str) -> bool {
    static PATTERN: &str = r"^\d{1,3}(\.\d{1,3}){3}$";
    Regex::new(PATTERN).expect("static pattern is valid").is_match(addr)
}

/// Accepts if the client's address is a member of a fixed, non-empty set of
/// dotted-quad addresses. Every address is validated at construction time.
#[derive(Debug, Clone)]
pub struct AddressFilter {
    addresses: Vec<String>,
}

impl AddressFilter {
    /// Builds a filter over `addresses`. Fails if `addresses` is empty or
    /// any entry does not match the dotted-quad shape.
    pub fn new<I, S>(addresses: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let addresses: Vec<String> = addresses.into_iter().map(Into::into).collect();
        if addresses.is_empty() {
            return Err("address filter requires at least one address".to_string());
        }
        for addr in &addresses {
            if !is_dotted_quad(addr) {
                return Err(format!("address {addr:?} is not a dotted-quad IPv4 string"));
            }
        }
        Ok(AddressFilter { addresses })
    }

    fn matches(&self, client: &Client) -> bool {
        self.addresses.iter().any(|a| a == client.address())
    }
}

/// One declared field in a [`FieldsFilter`]: present, and optionally
/// matching a left-anchored regex against its stringified value.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub pattern: Option<Regex>,
}

/// Accepts iff every declared field is present (and matches its pattern, if
/// any) and the payload carries no keys beyond those declared — an
/// exact-shape match.
#[derive(Debug, Clone)]
pub struct FieldsFilter {
    fields: Vec<FieldSpec>,
}

impl FieldsFilter {
    /// Builds a filter from `(name, pattern)` pairs; a `None` pattern means
    /// "must be present, value unconstrained". Patterns are matched
    /// left-anchored (`re.match` semantics), mirroring an implicit `^`.
    pub fn new<I>(fields: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = (String, Option<String>)>,
    {
        let mut specs = Vec::new();
        for (name, pattern) in fields {
            let pattern = match pattern {
                Some(p) => Some(Regex::new(&anchor_left(&p))?),
                None => None,
            };
            specs.push(FieldSpec { name, pattern });
        }
        Ok(FieldsFilter { fields: specs })
    }

    fn matches(&self, payload: &Payload) -> bool {
        let declared: std::collections::HashSet<&str> =
            self.fields.iter().map(|f| f.name.as_str()).collect();
        if payload.keys().any(|k| !declared.contains(k.as_str())) {
            return false;
        }
        for spec in &self.fields {
            let Some(value) = payload.get(&spec.name) else {
                return false;
            };
            if let Some(pattern) = &spec.pattern {
                let stringified = stringify(value);
                if !pattern.is_match(&stringified) {
                    return false;
                }
            }
        }
        true
    }
}

fn anchor_left(pattern: &str) -> String {
    if pattern.starts_with('^') {
        pattern.to_string()
    } else {
        format!("^(?:{pattern})")
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A predicate over `(Client, Message-payload)`. A handler's filter list is
/// a conjunction: every filter must accept.
#[derive(Debug, Clone)]
pub enum Filter {
    AddressSet(AddressFilter),
    FieldShape(FieldsFilter),
}

impl Filter {
    pub fn matches(&self, client: &Client, payload: &Payload) -> bool {
        match self {
            Filter::AddressSet(f) => f.matches(client),
            Filter::FieldShape(f) => f.matches(payload),
        }
    }
}

/// Evaluates a conjunction of filters; an empty list always accepts.
pub fn matches_all(filters: &[Filter], client: &Client, payload: &Payload) -> bool {
    filters.iter().all(|f| f.matches(client, payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::test_support::test_client;
    use serde_json::json;

    fn payload(v: serde_json::Value) -> Payload {
        match v {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn address_filter_rejects_malformed_construction() {
        assert!(AddressFilter::new(["not-an-ip"]).is_err());
        assert!(AddressFilter::new(Vec::<String>::new()).is_err());
        assert!(AddressFilter::new(["10.0.0.1", "192.168.1.2"]).is_ok());
    }

    #[test]
    fn address_filter_matches_member() {
        let filter = AddressFilter::new(["127.0.0.1"]).unwrap();
        let client = test_client("127.0.0.1");
        assert!(filter.matches(&client));
        let other = test_client("10.0.0.9");
        assert!(!filter.matches(&other));
    }

    #[test]
    fn fields_filter_exact_shape() {
        let filter = FieldsFilter::new([("req".to_string(), None)]).unwrap();
        assert!(filter.matches(&payload(json!({"req": "hi"}))));
        assert!(!filter.matches(&payload(json!({"req": "hi", "extra": 1}))));
        assert!(!filter.matches(&payload(json!({}))));
    }

    #[test]
    fn fields_filter_pattern_left_anchored() {
        let filter =
            FieldsFilter::new([("req".to_string(), Some("hi".to_string()))]).unwrap();
        assert!(filter.matches(&payload(json!({"req": "hiya"}))));
        assert!(!filter.matches(&payload(json!({"req": "oh hi"}))));
    }

    #[test]
    fn conjunction_requires_every_filter() {
        let addr = Filter::AddressSet(AddressFilter::new(["127.0.0.1"]).unwrap());
        let fields = Filter::FieldShape(FieldsFilter::new([("req".to_string(), None)]).unwrap());
        let client = test_client("127.0.0.1");
        let good = payload(json!({"req": "hi"}));
        let bad = payload(json!({"other": "hi"}));
        assert!(matches_all(&[addr.clone(), fields.clone()], &client, &good));
        assert!(!matches_all(&[addr, fields], &client, &bad));
    }
}
