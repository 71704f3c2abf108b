//! Dispatcher: given one decoded message, selects at most one handler per
//! group and invokes it, honoring the ban list and propagation control.

use tracing::{debug, error};

use crate::client::{Client, Message};
use crate::handler::{HandlerRegistry, Propagation};
use crate::session::SessionRegistry;

/// Outcome of dispatching one message, used by the connection loop to
/// decide whether to keep reading or close.
#[derive(Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// All matched handlers ran to completion without requesting a stop.
    Continue,
    /// A handler returned `Propagation::Stop`; the caller must close the
    /// connection.
    Stop,
}

/// Dispatches `message` to the registry's handlers for `client`.
///
/// 1. If the client's address is banned, skip dispatch entirely.
/// 2. Walk groups in ascending order; within each group, invoke the first
///    handler whose filters match and stop scanning that group (at most
///    one handler per group).
/// 3. A handler returning `Propagation::Stop` aborts dispatch for every
///    remaining group.
/// 4. A handler error is logged and aborts dispatch for every remaining
///    group, the same as `Propagation::Stop`, except the connection
///    stays open.
pub async fn dispatch(
    registry: &HandlerRegistry,
    sessions: &SessionRegistry,
    client: Client,
    message: Message,
) -> DispatchOutcome {
    if sessions.is_banned(client.address()).await {
        debug!(address = client.address(), "dispatch skipped: address banned");
        return DispatchOutcome::Continue;
    }

    for (group, entries) in registry.groups_ascending() {
        let Some(entry) = entries.iter().find(|e| e.matches(&client, &message)) else {
            continue;
        };

        match entry.invoke(client.clone(), message.clone()).await {
            Ok(Propagation::Continue) => {
                debug!(group, "handler completed");
            }
            Ok(Propagation::Stop) => {
                debug!(group, "handler stopped propagation");
                return DispatchOutcome::Stop;
            }
            Err(err) => {
                error!(group, error = %err, "handler failed");
                return DispatchOutcome::Continue;
            }
        }
    }

    DispatchOutcome::Continue
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::test_support::test_client;
    use crate::codec::Encoding;
    use crate::filters::{AddressFilter, Filter};
    use crate::handler::HandlerRegistry;
    use serde_json::{json, Value};

    fn message(v: serde_json::Value) -> Message {
        let payload = match v {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        Message {
            payload,
            encoding: Encoding::Text,
        }
    }

    #[tokio::test]
    async fn skips_dispatch_for_banned_address() {
        let mut registry = HandlerRegistry::new();
        let invoked = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = invoked.clone();
        registry.register(0, vec![], move |_c: Client, _m: Message| {
            let flag = flag.clone();
            async move {
                flag.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(crate::handler::Propagation::Continue)
            }
        });

        let sessions = SessionRegistry::new(0);
        sessions.ban("127.0.0.1").await;
        let client = test_client("127.0.0.1");
        let outcome = dispatch(&registry, &sessions, client, message(json!({}))).await;
        assert_eq!(outcome, DispatchOutcome::Continue);
        assert!(!invoked.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn at_most_one_handler_per_group() {
        let mut registry = HandlerRegistry::new();
        let calls = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        for _ in 0..3 {
            let calls = calls.clone();
            registry.register(0, vec![], move |_c: Client, _m: Message| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    Ok(crate::handler::Propagation::Continue)
                }
            });
        }
        let sessions = SessionRegistry::new(0);
        let client = test_client("127.0.0.1");
        dispatch(&registry, &sessions, client, message(json!({}))).await;
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stop_propagation_skips_later_groups() {
        let mut registry = HandlerRegistry::new();
        registry.register(0, vec![], |_c: Client, _m: Message| async {
            Ok(crate::handler::Propagation::Stop)
        });
        let calls = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = calls.clone();
        registry.register(1, vec![], move |_c: Client, _m: Message| {
            let flag = flag.clone();
            async move {
                flag.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(crate::handler::Propagation::Continue)
            }
        });
        let sessions = SessionRegistry::new(0);
        let client = test_client("127.0.0.1");
        let outcome = dispatch(&registry, &sessions, client, message(json!({}))).await;
        assert_eq!(outcome, DispatchOutcome::Stop);
        assert!(!calls.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn handler_error_skips_later_groups() {
        let mut registry = HandlerRegistry::new();
        registry.register(-1, vec![], |_c: Client, _m: Message| async {
            Err(crate::error::HandlerError::Failed("anti-spam check failed".into()))
        });
        let calls = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = calls.clone();
        registry.register(0, vec![], move |_c: Client, _m: Message| {
            let flag = flag.clone();
            async move {
                flag.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(crate::handler::Propagation::Continue)
            }
        });
        let sessions = SessionRegistry::new(0);
        let client = test_client("127.0.0.1");
        let outcome = dispatch(&registry, &sessions, client, message(json!({}))).await;
        assert_eq!(outcome, DispatchOutcome::Continue);
        assert!(!calls.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn non_matching_filter_is_skipped() {
        let mut registry = HandlerRegistry::new();
        let addr_filter = Filter::AddressSet(AddressFilter::new(["10.0.0.1"]).unwrap());
        let calls = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = calls.clone();
        registry.register(0, vec![addr_filter], move |_c: Client, _m: Message| {
            let flag = flag.clone();
            async move {
                flag.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(crate::handler::Propagation::Continue)
            }
        });
        let sessions = SessionRegistry::new(0);
        let client = test_client("127.0.0.1");
        dispatch(&registry, &sessions, client, message(json!({}))).await;
        assert!(!calls.load(std::sync::atomic::Ordering::SeqCst));
    }
}
