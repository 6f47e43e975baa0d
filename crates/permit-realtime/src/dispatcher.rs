//! Inbound envelope routing.
//!
//! Every envelope a client sends passes through [`Dispatcher::dispatch`].
//! Failures never end the connection: they come back to the sender as an
//! `ERROR` envelope and the read loop keeps going.

use metrics::counter;
use permit_core::{Envelope, EnvelopeKind, IdError, ThreadId};
use permit_store::StoreError;
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use crate::client::Client;
use crate::hub::{HubError, HubHandle};
use crate::metrics::WS_ENVELOPES_RECEIVED_TOTAL;
use crate::reconciler::Reconciler;

/// A rejected inbound envelope.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// A thread-scoped kind arrived without `threadId`.
    #[error("threadId is required for {0}")]
    MissingThread(EnvelopeKind),
    /// `threadId` is not a valid id.
    #[error("invalid threadId: {0}")]
    InvalidThread(#[from] IdError),
    /// Required payload field missing or mistyped.
    #[error("invalid payload: {0}")]
    InvalidPayload(&'static str),
    /// Receipt persistence failed.
    #[error("failed to process read receipt: {0}")]
    Receipt(#[from] StoreError),
    /// The hub has stopped.
    #[error("server is shutting down")]
    Unavailable(#[from] HubError),
    /// No handler for this type tag.
    #[error("unknown message type: {0}")]
    UnknownKind(String),
}

impl DispatchError {
    /// Machine-readable code for the `ERROR` payload.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingThread(_) => "MISSING_THREAD_ID",
            Self::InvalidThread(_) => "INVALID_THREAD_ID",
            Self::InvalidPayload(_) => "INVALID_PAYLOAD",
            Self::Receipt(_) => "RECEIPT_FAILED",
            Self::Unavailable(_) => "UNAVAILABLE",
            Self::UnknownKind(_) => "UNKNOWN_TYPE",
        }
    }

    /// The `ERROR` envelope sent back to the offending client.
    pub fn to_envelope(&self) -> Envelope {
        let mut envelope = Envelope::error(self.code(), self.to_string());
        if let Self::UnknownKind(kind) = self {
            let _ = envelope
                .payload
                .insert("kind".into(), Value::String(kind.clone()));
        }
        envelope
    }
}

/// Routes envelopes by kind.
#[derive(Clone)]
pub struct Dispatcher {
    hub: HubHandle,
    reconciler: Reconciler,
}

impl Dispatcher {
    /// Build a dispatcher over a hub and receipt reconciler.
    pub fn new(hub: HubHandle, reconciler: Reconciler) -> Self {
        Self { hub, reconciler }
    }

    /// Handle one envelope from `client`.
    #[instrument(skip_all, fields(client_id = %client.id(), kind = %envelope.kind))]
    pub async fn dispatch(&self, client: &Client, envelope: Envelope) {
        counter!(WS_ENVELOPES_RECEIVED_TOTAL, "kind" => envelope.kind.as_str().to_owned())
            .increment(1);

        let kind = envelope.kind.clone();
        let result = match kind {
            EnvelopeKind::Typing => self.on_typing(client, envelope).await,
            EnvelopeKind::ReadReceipt => self.on_read_receipt(client, envelope).await,
            EnvelopeKind::Presence => self.on_presence(client, envelope).await,
            EnvelopeKind::Chat => on_chat(&envelope),
            EnvelopeKind::Subscribe => thread_of(&envelope).map(|thread_id| {
                if client.subscribe(thread_id) {
                    debug!(thread_id = %thread_id, "subscribed");
                }
            }),
            EnvelopeKind::Unsubscribe => thread_of(&envelope).map(|thread_id| {
                if client.unsubscribe(&thread_id) {
                    debug!(thread_id = %thread_id, "unsubscribed");
                }
            }),
            EnvelopeKind::Error => {
                debug!(code = envelope.payload_str("code"), "client reported error");
                Ok(())
            }
            EnvelopeKind::Other(raw) => Err(DispatchError::UnknownKind(raw)),
        };

        if let Err(err) = result {
            match &err {
                DispatchError::Receipt(_) | DispatchError::Unavailable(_) => {
                    warn!(code = err.code(), error = %err, "envelope failed");
                }
                _ => debug!(code = err.code(), error = %err, "envelope rejected"),
            }
            if let Err(e) = client.send(err.to_envelope()) {
                debug!(error = %e, "error reply not queued");
            }
        }
    }

    async fn on_typing(&self, client: &Client, mut envelope: Envelope) -> Result<(), DispatchError> {
        let thread_id = thread_of(&envelope)?;
        if envelope.payload_bool("isTyping").is_none() {
            return Err(DispatchError::InvalidPayload("isTyping must be a boolean"));
        }
        stamp_sender(&mut envelope, client);
        self.hub
            .broadcast_to_thread(thread_id, envelope, [client.user_id()])
            .await?;
        Ok(())
    }

    async fn on_read_receipt(
        &self,
        client: &Client,
        mut envelope: Envelope,
    ) -> Result<(), DispatchError> {
        let thread_id = thread_of(&envelope)?;
        let message_ids = match envelope.payload.get("messageIds") {
            Some(Value::Array(items)) if !items.is_empty() => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect::<Vec<_>>(),
            _ => {
                return Err(DispatchError::InvalidPayload(
                    "messageIds must be a non-empty array",
                ));
            }
        };

        let processed = self
            .reconciler
            .reconcile(thread_id, client.user_id(), message_ids)
            .await?;

        stamp_sender(&mut envelope, client);
        let _ = envelope
            .payload
            .insert("processedCount".into(), Value::from(processed));
        self.hub
            .broadcast_to_thread(thread_id, envelope, [client.user_id()])
            .await?;
        Ok(())
    }

    async fn on_presence(&self, client: &Client, envelope: Envelope) -> Result<(), DispatchError> {
        let status = envelope
            .payload_str("status")
            .ok_or(DispatchError::InvalidPayload("status must be a string"))?;

        for thread_id in client.subscribed_threads() {
            let mut payload = Map::new();
            let _ = payload.insert("userId".into(), Value::String(client.user_id().to_string()));
            let _ = payload.insert("status".into(), Value::String(status.to_owned()));
            let _ = payload.insert("threadId".into(), Value::String(thread_id.to_string()));
            let outbound = Envelope {
                kind: EnvelopeKind::Presence,
                payload,
                timestamp: envelope.timestamp,
                thread_id: None,
            };
            self.hub
                .broadcast_to_thread(thread_id, outbound, [client.user_id()])
                .await?;
        }
        Ok(())
    }
}

/// Chat content is persisted by the REST path; the live path only notes it.
fn on_chat(envelope: &Envelope) -> Result<(), DispatchError> {
    let thread_id = thread_of(envelope)?;
    info!(
        thread_id = %thread_id,
        message_id = envelope.payload_str("messageId"),
        "chat message acknowledged"
    );
    Ok(())
}

fn thread_of(envelope: &Envelope) -> Result<ThreadId, DispatchError> {
    let raw = envelope
        .thread_id
        .as_deref()
        .ok_or_else(|| DispatchError::MissingThread(envelope.kind.clone()))?;
    Ok(ThreadId::parse(raw)?)
}

fn stamp_sender(envelope: &mut Envelope, client: &Client) {
    let _ = envelope
        .payload
        .insert("userId".into(), Value::String(client.user_id().to_string()));
}
