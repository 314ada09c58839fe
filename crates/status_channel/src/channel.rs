//! Connection engine: socket lifecycle, query correlation and status map

use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::config::ChannelConfig;
use crate::error::{ChannelError, Result};
use crate::protocol::{
    InboundEnvelope, InboundMessage, OutboundMessage, QUERY_STATUS_ACTION, STATUS_UPDATE_ACTION,
};
use crate::subscribers::{SubscriberList, Subscription};
use crate::token::TokenProvider;
use crate::types::{ConnectionState, StatusEntry};

/// Realtime status channel.
///
/// Cheap to clone; all clones drive the same connection. `connect`,
/// `disconnect` and the reconnect timer spawn onto the current Tokio runtime.
#[derive(Clone)]
pub struct StatusChannel {
    inner: Arc<Inner>,
}

struct Inner {
    config: ChannelConfig,
    token_provider: Arc<dyn TokenProvider>,
    state: watch::Sender<ConnectionState>,
    link: Mutex<Link>,
    pending: Mutex<HashMap<String, oneshot::Sender<InboundMessage>>>,
    statuses: RwLock<HashMap<String, StatusEntry>>,
    subscribers: Arc<SubscriberList>,
}

/// Connection bookkeeping. `generation` is bumped whenever the current
/// connection is superseded; tasks holding an older value must not touch
/// shared state.
#[derive(Default)]
struct Link {
    generation: u64,
    attempts: u32,
    outbound: Option<mpsc::UnboundedSender<Message>>,
    connection_task: Option<JoinHandle<()>>,
    reconnect_timer: Option<JoinHandle<()>>,
}

impl StatusChannel {
    pub fn new(config: ChannelConfig, token_provider: Arc<dyn TokenProvider>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                config,
                token_provider,
                state,
                link: Mutex::new(Link::default()),
                pending: Mutex::new(HashMap::new()),
                statuses: RwLock::new(HashMap::new()),
                subscribers: Arc::new(SubscriberList::default()),
            }),
        }
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.inner.config
    }

    /// Opens the socket unless already connected or connecting.
    ///
    /// Connection failures are not returned; they drive the reconnect policy
    /// and show up in [`StatusChannel::watch_state`].
    pub fn connect(&self) {
        let mut link = self.inner.link.lock();
        let current = *self.inner.state.borrow();
        if matches!(
            current,
            ConnectionState::Connected | ConnectionState::Connecting
        ) {
            debug!("Status channel already {}, ignoring connect", current);
            return;
        }

        link.attempts = 0;
        if let Some(timer) = link.reconnect_timer.take() {
            timer.abort();
        }
        Inner::open(&self.inner, &mut link);
    }

    /// Closes the connection and stops any further reconnection.
    ///
    /// Queries still in flight are left to their timeout.
    pub fn disconnect(&self) {
        let mut link = self.inner.link.lock();
        link.generation += 1;
        link.attempts = 0;
        if let Some(timer) = link.reconnect_timer.take() {
            timer.abort();
        }

        let task = link.connection_task.take();
        let closed = link
            .outbound
            .take()
            .map(|outbound| outbound.send(Message::Close(None)).is_ok())
            .unwrap_or(false);
        if !closed {
            if let Some(task) = task {
                task.abort();
            }
        }

        self.inner.set_state(ConnectionState::Disconnected);
        info!("Status channel disconnected");
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Consecutive failed attempts since the last successful open.
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.link.lock().attempts
    }

    /// Sends `{ action, msg_uuid, data }` and waits for the response carrying
    /// the same `msg_uuid`.
    pub async fn query(&self, kind: &str, payload: Option<Value>) -> Result<InboundMessage> {
        let outbound = self
            .inner
            .link
            .lock()
            .outbound
            .clone()
            .ok_or(ChannelError::NotConnected)?;

        let msg_uuid = Uuid::new_v4().to_string();
        let frame = serde_json::to_string(&OutboundMessage {
            action: kind.to_string(),
            msg_uuid: msg_uuid.clone(),
            data: payload,
        })?;

        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().insert(msg_uuid.clone(), tx);
        let _guard = PendingGuard {
            inner: &self.inner,
            msg_uuid: &msg_uuid,
        };

        outbound
            .send(Message::Text(frame.into()))
            .map_err(|_| ChannelError::NotConnected)?;
        debug!(action = kind, msg_uuid = %msg_uuid, "Query sent");

        let timeout = self.inner.config.query_timeout();
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(message)) => Ok(message),
            Ok(Err(_)) => Err(ChannelError::Disconnected),
            Err(_) => {
                warn!(action = kind, msg_uuid = %msg_uuid, "Query timed out");
                Err(ChannelError::Timeout(format!(
                    "Query '{}' ({}) timed out after {}ms",
                    kind,
                    msg_uuid,
                    timeout.as_millis()
                )))
            }
        }
    }

    /// Asks the server for the current status of `resource_ids` and merges
    /// the answer into the status map. Subscribers are not notified.
    pub async fn query_status(&self, resource_ids: &[String]) -> Result<Vec<StatusEntry>> {
        let response = self
            .query(
                QUERY_STATUS_ACTION,
                Some(serde_json::json!({ "resource_ids": resource_ids })),
            )
            .await?;

        let entries: Vec<StatusEntry> = match response.data {
            Some(data) => serde_json::from_value(data)?,
            None => Vec::new(),
        };
        self.inner.merge_statuses(&entries);
        Ok(entries)
    }

    /// Registers a callback invoked once per `status_update` batch.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&[StatusEntry]) + Send + Sync + 'static,
    {
        self.inner.subscribers.add(Arc::new(callback))
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    pub fn status(&self, resource_id: &str) -> Option<StatusEntry> {
        self.inner.statuses.read().get(resource_id).cloned()
    }

    /// Snapshot of every known entry, sorted by resource id.
    pub fn statuses(&self) -> Vec<StatusEntry> {
        let mut entries: Vec<StatusEntry> = self.inner.statuses.read().values().cloned().collect();
        entries.sort_by(|a, b| a.resource_id.cmp(&b.resource_id));
        entries
    }

    pub fn clear_statuses(&self) {
        self.inner.statuses.write().clear();
    }

    pub fn pending_queries(&self) -> usize {
        self.inner.pending.lock().len()
    }
}

impl std::fmt::Debug for StatusChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusChannel")
            .field("url", &self.inner.config.url)
            .field("state", &self.state())
            .finish()
    }
}

/// Removes a pending query on every exit path of `query`.
struct PendingGuard<'a> {
    inner: &'a Inner,
    msg_uuid: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.inner.pending.lock().remove(self.msg_uuid);
    }
}

impl Inner {
    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("Status channel state: {} -> {}", previous, state);
        }
    }

    /// Starts a new connection attempt under a fresh generation.
    fn open(inner: &Arc<Self>, link: &mut Link) {
        link.generation += 1;
        let generation = link.generation;
        if let Some(task) = link.connection_task.take() {
            task.abort();
        }
        link.outbound = None;
        inner.set_state(ConnectionState::Connecting);

        let endpoint = match inner.token_provider.access_token() {
            Some(token) => inner.config.endpoint_url(&token),
            None => Err(ChannelError::Connection(
                "no access token available".to_string(),
            )),
        };

        let task_inner = Arc::clone(inner);
        link.connection_task = Some(tokio::spawn(async move {
            task_inner.run_connection(generation, endpoint).await;
        }));
    }

    async fn run_connection(self: Arc<Self>, generation: u64, endpoint: Result<Url>) {
        let endpoint = match endpoint {
            Ok(endpoint) => endpoint,
            Err(e) => {
                warn!("Cannot open status channel: {}", e);
                self.connection_lost(generation);
                return;
            }
        };

        info!("Connecting status channel to {}", self.config.url);
        let stream = match tokio_tungstenite::connect_async(endpoint.as_str())
            .await
            .map_err(ChannelError::from)
        {
            Ok((stream, _response)) => stream,
            Err(e) => {
                warn!("Status channel connection failed: {}", e);
                self.connection_lost(generation);
                return;
            }
        };

        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        {
            let mut link = self.link.lock();
            if link.generation != generation {
                debug!("Discarding superseded status channel connection");
                return;
            }
            link.attempts = 0;
            link.outbound = Some(tx);
            self.set_state(ConnectionState::Connected);
        }
        info!("Status channel connected");

        let (mut write, mut read) = stream.split();
        loop {
            tokio::select! {
                outgoing = rx.recv() => match outgoing {
                    Some(message) => {
                        let closing = matches!(message, Message::Close(_));
                        if let Err(e) = write.send(message).await.map_err(ChannelError::from) {
                            warn!("Status channel send failed: {}", e);
                            break;
                        }
                        if closing {
                            break;
                        }
                    }
                    None => break,
                },
                incoming = read.next() => match incoming {
                    Some(Ok(Message::Text(text))) => self.handle_frame(&text),
                    Some(Ok(Message::Close(frame))) => {
                        info!("Status channel closed by server: {:?}", frame);
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Status channel read error: {}", ChannelError::from(e));
                        break;
                    }
                    None => break,
                },
            }
        }

        self.connection_lost(generation);
    }

    /// Reacts to the loss of connection `generation`: schedules the next
    /// attempt, or gives up once the cap is reached.
    fn connection_lost(self: &Arc<Self>, generation: u64) {
        let mut link = self.link.lock();
        if link.generation != generation {
            return;
        }
        link.outbound = None;
        link.connection_task = None;

        let reconnect = &self.config.reconnect;
        if !reconnect.enabled {
            self.set_state(ConnectionState::Disconnected);
            return;
        }
        if link.attempts >= reconnect.max_attempts {
            warn!(
                "Status channel gave up after {} reconnect attempts",
                link.attempts
            );
            self.set_state(ConnectionState::GaveUp);
            return;
        }

        link.attempts += 1;
        let attempt = link.attempts;
        let interval = reconnect.interval();
        info!(
            "Status channel reconnect {}/{} in {:?}",
            attempt, reconnect.max_attempts, interval
        );
        self.set_state(ConnectionState::RetryScheduled { attempt });

        let inner = Arc::clone(self);
        link.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            let mut link = inner.link.lock();
            if link.generation != generation {
                return;
            }
            link.reconnect_timer = None;
            Inner::open(&inner, &mut link);
        }));
    }

    fn handle_frame(&self, text: &str) {
        let envelope: InboundEnvelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Dropping malformed status frame: {}", e);
                return;
            }
        };

        if envelope.is_error() {
            warn!(
                code = envelope.code,
                action = %envelope.data.action,
                msg_uuid = %envelope.data.msg_uuid,
                "Status channel reported an error"
            );
            return;
        }

        let message = envelope.data;
        let is_push = message.action == STATUS_UPDATE_ACTION
            && message.data.as_ref().is_some_and(Value::is_array);
        if is_push {
            self.apply_status_update(message.data);
            return;
        }

        if !message.msg_uuid.is_empty() {
            let resolver = self.pending.lock().remove(&message.msg_uuid);
            if let Some(resolver) = resolver {
                let _ = resolver.send(message);
                return;
            }
        }

        if message.action == STATUS_UPDATE_ACTION {
            warn!("Dropping status_update without an array payload");
        } else {
            debug!("Ignoring unsolicited '{}' frame", message.action);
        }
    }

    fn apply_status_update(&self, data: Option<Value>) {
        let entries: Vec<StatusEntry> = match data.map(serde_json::from_value) {
            Some(Ok(entries)) => entries,
            Some(Err(e)) => {
                warn!("Dropping malformed status_update payload: {}", e);
                return;
            }
            None => {
                warn!("Dropping status_update without payload");
                return;
            }
        };

        self.merge_statuses(&entries);
        self.subscribers.notify(&entries);
    }

    fn merge_statuses(&self, entries: &[StatusEntry]) {
        let mut statuses = self.statuses.write();
        for entry in entries {
            statuses
                .entry(entry.resource_id.clone())
                .and_modify(|existing| {
                    existing.is_online = entry.is_online;
                    if entry.last_connected_at.is_some() {
                        existing.last_connected_at = entry.last_connected_at;
                    }
                })
                .or_insert_with(|| entry.clone());
        }
    }
}
