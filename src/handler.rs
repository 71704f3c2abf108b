//! Handler registry: handlers indexed by signed integer group, dispatched
//! in ascending group order, insertion order within a group.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::client::{Client, Message};
use crate::error::HandlerError;
use crate::filters::Filter;

/// Whether the dispatcher should keep considering later groups for this
/// message, or stop entirely and close the connection. A plain sentinel
/// return value rather than an exception type, so stopping propagation
/// is an ordinary control-flow branch for callers to match on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    Continue,
    Stop,
}

pub type HandlerResult = Result<Propagation, HandlerError>;
type BoxedFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

/// A callable taking `(Client, Message)`. Implemented automatically for any
/// `Fn(Client, Message) -> impl Future<Output = HandlerResult> + Send`, so
/// ordinary async closures and `fn` items register directly without an
/// `async_trait`-style macro.
pub trait Handler: Send + Sync {
    fn call(&self, client: Client, message: Message) -> BoxedFuture;
}

impl<F, Fut> Handler for F
where
    F: Fn(Client, Message) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, client: Client, message: Message) -> BoxedFuture {
        Box::pin(self(client, message))
    }
}

/// One registered handler: its filter conjunction plus the callable.
struct HandlerEntry {
    filters: Vec<Filter>,
    handler: Arc<dyn Handler>,
}

/// Handlers grouped by signed integer priority. Read-only once
/// `Server::serve` begins running — registering handlers while serving is
/// not supported.
#[derive(Default)]
pub struct HandlerRegistry {
    groups: BTreeMap<i64, Vec<HandlerEntry>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        HandlerRegistry::default()
    }

    /// Appends `handler` to `group` (default 0), creating the group's list
    /// if absent. The registry's top-level map stays in ascending
    /// group-key order by construction (`BTreeMap`).
    pub fn register<H>(&mut self, group: i64, filters: Vec<Filter>, handler: H)
    where
        H: Handler + 'static,
    {
        self.groups.entry(group).or_default().push(HandlerEntry {
            filters,
            handler: Arc::new(handler),
        });
    }

    /// Iterates `(group, handlers)` in ascending group order; within a
    /// group, handlers are in insertion order.
    pub(crate) fn groups_ascending(
        &self,
    ) -> impl Iterator<Item = (i64, &[HandlerEntry])> {
        self.groups.iter().map(|(g, entries)| (*g, entries.as_slice()))
    }
}

impl HandlerEntry {
    pub(crate) fn matches(&self, client: &Client, message: &Message) -> bool {
        crate::filters::matches_all(&self.filters, client, &message.payload)
    }

    pub(crate) async fn invoke(&self, client: Client, message: Message) -> HandlerResult {
        self.handler.call(client, message).await
    }
}

/// Fluent registration sugar: `registry.group(n).filter(f).register(handler)`.
pub struct GroupBuilder<'a> {
    registry: &'a mut HandlerRegistry,
    group: i64,
    filters: Vec<Filter>,
}

impl HandlerRegistry {
    pub fn group(&mut self, group: i64) -> GroupBuilder<'_> {
        GroupBuilder {
            registry: self,
            group,
            filters: Vec::new(),
        }
    }
}

impl<'a> GroupBuilder<'a> {
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn register<H>(self, handler: H)
    where
        H: Handler + 'static,
    {
        self.registry.register(self.group, self.filters, handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::test_support::test_client;
    use serde_json::json;
    use serde_json::Value;

    fn payload(v: serde_json::Value) -> Message {
        let map = match v {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        Message {
            payload: map,
            encoding: crate::codec::Encoding::Text,
        }
    }

    #[tokio::test]
    async fn groups_iterate_in_ascending_order() {
        let mut registry = HandlerRegistry::new();
        registry.register(5, vec![], |_c: Client, _m: Message| async { Ok(Propagation::Continue) });
        registry.register(-1, vec![], |_c: Client, _m: Message| async { Ok(Propagation::Continue) });
        registry.register(0, vec![], |_c: Client, _m: Message| async { Ok(Propagation::Continue) });

        let order: Vec<i64> = registry.groups_ascending().map(|(g, _)| g).collect();
        assert_eq!(order, vec![-1, 0, 5]);
    }

    #[tokio::test]
    async fn first_matching_handler_in_group_is_found() {
        let mut registry = HandlerRegistry::new();
        registry.register(0, vec![], |_c: Client, _m: Message| async { Ok(Propagation::Continue) });
        registry.register(0, vec![], |_c: Client, _m: Message| async { Ok(Propagation::Stop) });

        let client = test_client("127.0.0.1");
        let message = payload(json!({}));
        let (_, entries) = registry.groups_ascending().next().unwrap();
        let matched = entries.iter().find(|e| e.matches(&client, &message));
        assert!(matched.is_some());
        let result = matched.unwrap().invoke(client, message).await.unwrap();
        assert_eq!(result, Propagation::Continue);
    }

    #[test]
    fn builder_sugar_registers_with_filters() {
        let mut registry = HandlerRegistry::new();
        registry
            .group(3)
            .register(|_c: Client, _m: Message| async { Ok(Propagation::Continue) });
        let order: Vec<i64> = registry.groups_ascending().map(|(g, _)| g).collect();
        assert_eq!(order, vec![3]);
    }
}
