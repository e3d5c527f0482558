use std::sync::Arc;

use serde_json::Value;

/// Handler invoked with the payload of a named event.
pub type EventHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// Token identifying one registered handler, returned by [`EventChannel::on`]
/// and consumed by [`EventChannel::off`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// The shared realtime connection between client and server.
///
/// Injected into [`crate::RequestCoordinator`] at construction. Subscribers
/// never own the channel; they register and release listeners against it.
pub trait EventChannel: Send + Sync {
    /// Fire-and-forget publish of a named event.
    fn emit(&self, event: &str, payload: Value);

    /// Register `handler` for every inbound `event`.
    fn on(&self, event: &str, handler: EventHandler) -> ListenerId;

    /// Remove a previously registered handler. Stale or foreign ids are a
    /// no-op.
    fn off(&self, event: &str, listener: ListenerId);
}
