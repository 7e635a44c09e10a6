//! Channel lifecycle and serialized event dispatch.
//!
//! A channel is one transport connection bound to one room. Inbound frames
//! are handled by a single task, so handlers for a channel never run
//! concurrently and always run in arrival order. The [`ChannelHandle`]
//! returned by `open` is the only way to stop that task; dropping it counts
//! as a forced teardown.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, warn};
use uuid::Uuid;

use super::protocol::{ClientEvent, EventName, LiveEvent, Room};
use crate::error::ChannelError;

/// Upper bound on waiting for the close frame to flush during teardown.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

const OUTBOUND_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Unopened,
    Joining,
    Active,
    /// Terminal. Reconnecting means opening a new channel.
    Closed,
}

pub type Handler = Box<dyn FnMut(&LiveEvent) + Send>;

/// Fixed mapping of event name → handler, registered at `open`.
#[derive(Default)]
pub struct Handlers {
    map: HashMap<EventName, Handler>,
}

impl Handlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `name`, replacing any earlier one.
    pub fn on(mut self, name: EventName, handler: impl FnMut(&LiveEvent) + Send + 'static) -> Self {
        self.map.insert(name, Box::new(handler));
        self
    }

    pub fn handles(&self, name: EventName) -> bool {
        self.map.contains_key(&name)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Invoke the handler registered for `event`, if any.
    pub fn dispatch(&mut self, event: &LiveEvent) -> bool {
        match self.map.get_mut(&event.name) {
            Some(handler) => {
                handler(event);
                true
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for Handlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.map.keys()).finish()
    }
}

/// Disposable handle for an open channel.
pub struct ChannelHandle {
    id: Uuid,
    room: Room,
    state: watch::Receiver<ChannelState>,
    dispatching: Arc<AtomicBool>,
    shutdown: Option<oneshot::Sender<()>>,
    outbound: mpsc::Sender<ClientEvent>,
    task: Option<JoinHandle<()>>,
}

impl ChannelHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn room(&self) -> &Room {
        &self.room
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    /// Watch for the transport going away on its own.
    pub fn state_changes(&self) -> watch::Receiver<ChannelState> {
        self.state.clone()
    }

    /// Queue an outbound event.
    pub async fn emit(&self, event: ClientEvent) -> Result<(), ChannelError> {
        self.outbound
            .send(event)
            .await
            .map_err(|_| ChannelError::Closed)
    }

    /// Release the channel. Once this returns no handler will run again.
    pub async fn close(mut self) {
        self.teardown();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(channel = %self.id, "Channel task ended abnormally: {}", e);
            }
        }
    }

    fn teardown(&mut self) {
        self.dispatching.store(false, Ordering::SeqCst);
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl std::fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("id", &self.id)
            .field("room", &self.room)
            .field("state", &self.state())
            .finish()
    }
}

/// Join `room` over an already-connected transport and start dispatching.
pub(crate) async fn start<R, W>(
    room: Room,
    handlers: Handlers,
    mut sink: W,
    stream: R,
) -> Result<ChannelHandle, ChannelError>
where
    R: Stream<Item = Result<Message, tungstenite::Error>> + Send + Unpin + 'static,
    W: Sink<Message> + Send + Unpin + 'static,
    W::Error: std::error::Error + Send + Sync + 'static,
{
    let id = Uuid::new_v4();
    let (state, state_rx) = watch::channel(ChannelState::Unopened);
    state.send_replace(ChannelState::Joining);

    let join = serde_json::to_string(&room.join()).map_err(anyhow::Error::from)?;
    if let Err(e) = sink.send(Message::Text(join.into())).await {
        state.send_replace(ChannelState::Closed);
        return Err(ChannelError::Other(e.into()));
    }
    debug!(channel = %id, room = %room.id(), "Joined room");

    state.send_replace(ChannelState::Active);

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
    let dispatching = Arc::new(AtomicBool::new(true));

    let task = tokio::spawn(run(
        id,
        handlers,
        sink,
        stream,
        shutdown_rx,
        outbound_rx,
        dispatching.clone(),
        state,
    ));

    Ok(ChannelHandle {
        id,
        room,
        state: state_rx,
        dispatching,
        shutdown: Some(shutdown_tx),
        outbound: outbound_tx,
        task: Some(task),
    })
}

#[allow(clippy::too_many_arguments)]
async fn run<R, W>(
    id: Uuid,
    mut handlers: Handlers,
    mut sink: W,
    mut stream: R,
    mut shutdown: oneshot::Receiver<()>,
    mut outbound: mpsc::Receiver<ClientEvent>,
    dispatching: Arc<AtomicBool>,
    state: watch::Sender<ChannelState>,
) where
    R: Stream<Item = Result<Message, tungstenite::Error>> + Send + Unpin + 'static,
    W: Sink<Message> + Send + Unpin + 'static,
    W::Error: std::error::Error + Send + Sync + 'static,
{
    loop {
        tokio::select! {
            biased;

            // Explicit close, or the handle was dropped.
            _ = &mut shutdown => {
                match tokio::time::timeout(CLOSE_TIMEOUT, sink.send(Message::Close(None))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => debug!(channel = %id, "Close frame not delivered: {}", e),
                    Err(_) => debug!(channel = %id, "Close frame timed out"),
                }
                break;
            }

            Some(event) = outbound.recv() => {
                let json = match serde_json::to_string(&event) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(channel = %id, "Failed to encode outbound event: {}", e);
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(json.into())).await {
                    warn!(channel = %id, "Live channel send failed: {}", e);
                    break;
                }
            }

            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => match LiveEvent::decode(text.as_str()) {
                        Ok(Some(event)) => {
                            if !dispatching.load(Ordering::SeqCst) {
                                break;
                            }
                            if !handlers.dispatch(&event) {
                                debug!(channel = %id, event = event.name.as_str(), "No handler registered");
                            }
                        }
                        Ok(None) => debug!(channel = %id, "Ignoring unknown event"),
                        Err(e) => debug!(channel = %id, "Ignoring malformed frame: {}", e),
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(channel = %id, "Live channel closed by server");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        // No reconnect: the view keeps working from REST data.
                        warn!(channel = %id, "Live channel dropped: {}", e);
                        break;
                    }
                }
            }
        }
    }

    dispatching.store(false, Ordering::SeqCst);
    drop(handlers);
    drop(outbound);
    state.send_replace(ChannelState::Closed);
    debug!(channel = %id, "Channel closed");
}
