//! Connection registry and fan-out.
//!
//! One task owns the live client set. Registration, removal, broadcasts,
//! and count queries all arrive as commands on a single channel and are
//! applied in arrival order, so no lock guards the map. Broadcasts only ever
//! `try_send` into client queues: a client whose queue is full is shed on the
//! spot instead of holding up everyone else.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use metrics::{counter, gauge};
use permit_core::{ClientId, Envelope, ThreadId, UserId};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::{Client, EnqueueError};
use crate::metrics::{WS_CLIENTS_SHED_TOTAL, WS_CONNECTIONS_ACTIVE};

/// The hub task is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("hub is not running")]
pub struct HubError;

enum Command {
    Register(Arc<Client>),
    Unregister(ClientId),
    BroadcastToThread {
        thread_id: ThreadId,
        envelope: Arc<Envelope>,
        exclude: HashSet<UserId>,
    },
    BroadcastToAll(Arc<Envelope>),
    ClientCount(oneshot::Sender<usize>),
    CloseAll,
}

/// Cloneable front door to the hub task.
#[derive(Clone, Debug)]
pub struct HubHandle {
    tx: mpsc::Sender<Command>,
}

impl HubHandle {
    /// Add a client to the live set.
    pub async fn register(&self, client: Arc<Client>) -> Result<(), HubError> {
        self.send(Command::Register(client)).await
    }

    /// Remove a client and close its queue. Unknown ids are ignored.
    pub async fn unregister(&self, client_id: ClientId) -> Result<(), HubError> {
        self.send(Command::Unregister(client_id)).await
    }

    /// Deliver to every client subscribed to `thread_id` whose user is not
    /// in `exclude`.
    ///
    /// Thread-scoped kinds go out carrying `thread_id`; global kinds go out
    /// with no `threadId` at all.
    pub async fn broadcast_to_thread(
        &self,
        thread_id: ThreadId,
        mut envelope: Envelope,
        exclude: impl IntoIterator<Item = UserId>,
    ) -> Result<(), HubError> {
        envelope.route_to(thread_id);
        self.send(Command::BroadcastToThread {
            thread_id,
            envelope: Arc::new(envelope),
            exclude: exclude.into_iter().collect(),
        })
        .await
    }

    /// Deliver to every registered client.
    pub async fn broadcast_to_all(&self, envelope: Envelope) -> Result<(), HubError> {
        self.send(Command::BroadcastToAll(Arc::new(envelope))).await
    }

    /// Number of registered clients, after every earlier command has applied.
    pub async fn client_count(&self) -> Result<usize, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::ClientCount(reply)).await?;
        rx.await.map_err(|_| HubError)
    }

    /// Close every client's queue and empty the registry. Used at shutdown
    /// so each writer sends a close frame.
    pub async fn close_all(&self) -> Result<(), HubError> {
        self.send(Command::CloseAll).await
    }

    async fn send(&self, command: Command) -> Result<(), HubError> {
        self.tx.send(command).await.map_err(|_| HubError)
    }
}

/// The registry itself. Lives inside the task started by [`Hub::spawn`].
pub struct Hub {
    clients: HashMap<ClientId, Arc<Client>>,
    rx: mpsc::Receiver<Command>,
}

impl Hub {
    /// Start the hub task with a control channel of `capacity`.
    ///
    /// The task runs until every [`HubHandle`] is dropped, then closes the
    /// queues of any clients still registered.
    pub fn spawn(capacity: usize) -> (HubHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let hub = Self {
            clients: HashMap::new(),
            rx,
        };
        let task = tokio::spawn(hub.run());
        (HubHandle { tx }, task)
    }

    async fn run(mut self) {
        info!("hub started");
        while let Some(command) = self.rx.recv().await {
            self.apply(command);
        }
        for client in self.clients.values() {
            let _ = client.close_queue();
        }
        info!(remaining = self.clients.len(), "hub stopped");
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::Register(client) => {
                debug!(client_id = %client.id(), user_id = %client.user_id(), "client registered");
                let id = client.id().clone();
                if let Some(previous) = self.clients.insert(id, Arc::clone(&client)) {
                    if !Arc::ptr_eq(&previous, &client) {
                        let _ = previous.close_queue();
                    }
                }
                self.record_active();
            }
            Command::Unregister(client_id) => {
                if let Some(client) = self.clients.remove(&client_id) {
                    let _ = client.close_queue();
                    debug!(client_id = %client_id, "client unregistered");
                    self.record_active();
                }
            }
            Command::BroadcastToThread {
                thread_id,
                envelope,
                exclude,
            } => {
                let delivered = self.deliver(&envelope, |client| {
                    client.is_subscribed(&thread_id) && !exclude.contains(&client.user_id())
                });
                debug!(thread_id = %thread_id, kind = %envelope.kind, delivered, "thread broadcast");
            }
            Command::BroadcastToAll(envelope) => {
                let delivered = self.deliver(&envelope, |_| true);
                debug!(kind = %envelope.kind, delivered, "global broadcast");
            }
            Command::ClientCount(reply) => {
                let _ = reply.send(self.clients.len());
            }
            Command::CloseAll => {
                info!(clients = self.clients.len(), "closing all clients");
                for (_, client) in self.clients.drain() {
                    let _ = client.close_queue();
                }
                self.record_active();
            }
        }
    }

    fn deliver(&mut self, envelope: &Arc<Envelope>, wants: impl Fn(&Client) -> bool) -> usize {
        let mut delivered = 0;
        let mut dropped = Vec::new();

        for (id, client) in &self.clients {
            if !wants(client) {
                continue;
            }
            match client.try_enqueue(Arc::clone(envelope)) {
                Ok(()) => delivered += 1,
                Err(EnqueueError::Full) => {
                    warn!(client_id = %id, user_id = %client.user_id(), "outbound queue full, shedding client");
                    counter!(WS_CLIENTS_SHED_TOTAL).increment(1);
                    dropped.push(id.clone());
                }
                Err(EnqueueError::Closed) => dropped.push(id.clone()),
            }
        }

        if !dropped.is_empty() {
            for id in dropped {
                if let Some(client) = self.clients.remove(&id) {
                    let _ = client.close_queue();
                }
            }
            self.record_active();
        }
        delivered
    }

    #[allow(clippy::cast_precision_loss)]
    fn record_active(&self) {
        gauge!(WS_CONNECTIONS_ACTIVE).set(self.clients.len() as f64);
    }
}
