use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
};

use anyhow::{anyhow, Context, Result};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use shared::protocol::{events, EventFrame};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

use crate::channel::{EventChannel, EventHandler, ListenerId};

type HandlerRegistry = HashMap<String, Vec<(ListenerId, EventHandler)>>;

/// Production [`EventChannel`] over a websocket.
///
/// Outbound events are serialized as [`EventFrame`] JSON text messages and
/// drained by a writer task; a reader task dispatches inbound frames to the
/// listeners registered for each event name. A websocket failure is
/// surfaced to listeners as a synthesized `request_error` event rather than
/// an error return, matching the fire-and-forget channel contract.
pub struct WsEventChannel {
    handlers: Arc<Mutex<HandlerRegistry>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<EventFrame>>>,
    next_listener: AtomicU64,
}

impl std::fmt::Debug for WsEventChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsEventChannel").finish_non_exhaustive()
    }
}

impl WsEventChannel {
    pub async fn connect(server_url: &str) -> Result<Arc<Self>> {
        let ws_url = if server_url.starts_with("https://") {
            server_url.replacen("https://", "wss://", 1)
        } else if server_url.starts_with("http://") {
            server_url.replacen("http://", "ws://", 1)
        } else {
            return Err(anyhow!("server_url must start with http:// or https://"));
        };
        let ws_url = format!("{ws_url}/ws");
        let (ws_stream, _) = connect_async(&ws_url)
            .await
            .with_context(|| format!("failed to connect websocket: {ws_url}"))?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let handlers: Arc<Mutex<HandlerRegistry>> = Arc::new(Mutex::new(HashMap::new()));
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<EventFrame>();

        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                match serde_json::to_string(&frame) {
                    Ok(text) => {
                        if let Err(err) = ws_writer.send(Message::Text(text)).await {
                            warn!("websocket send failed: {err}");
                            break;
                        }
                    }
                    Err(err) => warn!(event = %frame.event, "failed to encode event frame: {err}"),
                }
            }
            let _ = ws_writer.send(Message::Close(None)).await;
        });

        let reader_handlers = Arc::clone(&handlers);
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => match serde_json::from_str::<EventFrame>(&text) {
                        Ok(frame) => dispatch(&reader_handlers, &frame.event, frame.data),
                        Err(err) => warn!("invalid event frame: {err}"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        dispatch(
                            &reader_handlers,
                            events::REQUEST_ERROR,
                            json!({ "message": format!("websocket receive failed: {err}") }),
                        );
                        break;
                    }
                }
            }
            debug!("websocket reader stopped");
        });

        Ok(Arc::new(Self {
            handlers,
            outbound: Mutex::new(Some(outbound)),
            next_listener: AtomicU64::new(1),
        }))
    }

    /// Stop the writer task. Emissions after close are dropped; inbound
    /// delivery continues until the server side closes the socket.
    pub fn close(&self) {
        self.lock_outbound().take();
    }

    fn lock_outbound(&self) -> std::sync::MutexGuard<'_, Option<mpsc::UnboundedSender<EventFrame>>> {
        self.outbound.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_handlers(&self) -> std::sync::MutexGuard<'_, HandlerRegistry> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EventChannel for WsEventChannel {
    fn emit(&self, event: &str, payload: Value) {
        let frame = EventFrame::new(event, payload);
        let delivered = match self.lock_outbound().as_ref() {
            Some(outbound) => outbound.send(frame).is_ok(),
            None => false,
        };
        if !delivered {
            warn!(event, "dropping event emitted after websocket writer stopped");
        }
    }

    fn on(&self, event: &str, handler: EventHandler) -> ListenerId {
        let listener = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.lock_handlers()
            .entry(event.to_string())
            .or_default()
            .push((listener, handler));
        listener
    }

    fn off(&self, event: &str, listener: ListenerId) {
        let mut registry = self.lock_handlers();
        if let Some(entries) = registry.get_mut(event) {
            entries.retain(|(id, _)| *id != listener);
            if entries.is_empty() {
                registry.remove(event);
            }
        }
    }
}

// Handlers are cloned out before invocation so a handler can re-enter the
// registry (subscribe or unsubscribe) without deadlocking.
fn dispatch(handlers: &Mutex<HandlerRegistry>, event: &str, payload: Value) {
    let targets: Vec<EventHandler> = {
        let registry = handlers.lock().unwrap_or_else(PoisonError::into_inner);
        registry
            .get(event)
            .map(|entries| {
                entries
                    .iter()
                    .map(|(_, handler)| Arc::clone(handler))
                    .collect()
            })
            .unwrap_or_default()
    };
    if targets.is_empty() {
        debug!(event, "no listeners registered for inbound event");
        return;
    }
    for handler in targets {
        handler(payload.clone());
    }
}
