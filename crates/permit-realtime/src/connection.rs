//! Per-connection read and write loops.
//!
//! Each connection runs two loops. The writer is spawned and owns the sink:
//! it drains the client's outbound queue and sends keepalive pings. The
//! reader runs on the connection task itself and feeds the dispatcher. When
//! either side ends, the client is unregistered and the other side is wound
//! down.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::Message;
use futures::{Sink, SinkExt, Stream, StreamExt};
use permit_core::Envelope;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::client::Client;
use crate::config::ConnectionConfig;
use crate::dispatcher::Dispatcher;
use crate::hub::HubHandle;

/// Why the read loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundExit {
    /// Peer closed or the stream ended.
    Closed,
    /// Nothing arrived within the idle window.
    IdleTimeout,
    /// A frame exceeded the size limit.
    Oversized(usize),
    /// A frame was not a valid envelope.
    Decode(String),
    /// The transport failed.
    Transport(String),
}

/// Why the write loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundExit {
    /// The outbound queue was closed; a close frame was attempted.
    QueueClosed,
    /// A write did not finish within the write deadline.
    WriteTimeout,
    /// The sink rejected a write.
    WriteFailed(String),
}

/// Read frames until the peer leaves, goes quiet, or sends garbage.
///
/// Every frame, pings and pongs included, pushes the idle deadline out.
/// Envelopes without a timestamp are stamped before dispatch.
pub async fn inbound_loop<S>(
    mut stream: S,
    client: &Client,
    dispatcher: &Dispatcher,
    config: &ConnectionConfig,
) -> InboundExit
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    loop {
        let frame = match time::timeout(config.idle_timeout, stream.next()).await {
            Err(_) => return InboundExit::IdleTimeout,
            Ok(None) => return InboundExit::Closed,
            Ok(Some(Err(e))) => return InboundExit::Transport(e.to_string()),
            Ok(Some(Ok(frame))) => frame,
        };

        let decoded = match frame {
            Message::Text(text) => {
                if text.as_str().len() > config.max_message_bytes {
                    return InboundExit::Oversized(text.as_str().len());
                }
                Envelope::decode(text.as_str())
            }
            Message::Binary(bytes) => {
                if bytes.len() > config.max_message_bytes {
                    return InboundExit::Oversized(bytes.len());
                }
                Envelope::decode_bytes(&bytes)
            }
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Close(_) => return InboundExit::Closed,
        };

        match decoded {
            Ok(mut envelope) => {
                let _ = envelope.stamp();
                dispatcher.dispatch(client, envelope).await;
            }
            Err(e) => return InboundExit::Decode(e.to_string()),
        }
    }
}

/// Drain the outbound queue into the sink, pinging on a fixed cadence.
///
/// When the queue closes, a close frame is sent and the loop ends.
pub async fn outbound_loop<W>(
    mut sink: W,
    mut queue: mpsc::Receiver<Arc<Envelope>>,
    ping_interval: Duration,
    write_timeout: Duration,
) -> OutboundExit
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    let mut keepalive = time::interval_at(Instant::now() + ping_interval, ping_interval);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            next = queue.recv() => {
                let Some(envelope) = next else {
                    let _ = write(&mut sink, Message::Close(None), write_timeout).await;
                    return OutboundExit::QueueClosed;
                };
                let text = match envelope.encode() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = %e, kind = %envelope.kind, "failed to encode outbound envelope");
                        continue;
                    }
                };
                if let Err(exit) = write(&mut sink, Message::Text(text.into()), write_timeout).await {
                    return exit;
                }
            }
            _ = keepalive.tick() => {
                if let Err(exit) = write(&mut sink, Message::Ping(Bytes::new()), write_timeout).await {
                    return exit;
                }
            }
        }
    }
}

async fn write<W>(sink: &mut W, message: Message, deadline: Duration) -> Result<(), OutboundExit>
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    match time::timeout(deadline, sink.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(OutboundExit::WriteFailed(e.to_string())),
        Err(_) => Err(OutboundExit::WriteTimeout),
    }
}

/// Run a registered client until its connection ends.
///
/// The client is always unregistered on the way out. If the hub is already
/// gone its queue is closed directly.
pub async fn run_connection<S, W>(
    stream: S,
    sink: W,
    client: Arc<Client>,
    queue: mpsc::Receiver<Arc<Envelope>>,
    hub: HubHandle,
    dispatcher: Arc<Dispatcher>,
    config: ConnectionConfig,
) where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
    W: Sink<Message> + Unpin + Send + 'static,
    W::Error: Display,
{
    let writer_id = client.id().clone();
    let mut writer = tokio::spawn(async move {
        let exit = outbound_loop(sink, queue, config.ping_interval, config.write_timeout).await;
        debug!(client_id = %writer_id, ?exit, "writer finished");
        exit
    });

    let reader_exit = tokio::select! {
        exit = inbound_loop(stream, &client, &dispatcher, &config) => Some(exit),
        _ = &mut writer => None,
    };

    if hub.unregister(client.id().clone()).await.is_err() {
        let _ = client.close_queue();
    }

    match reader_exit {
        Some(exit) => {
            match &exit {
                InboundExit::Closed => debug!(client_id = %client.id(), "peer closed"),
                InboundExit::IdleTimeout => {
                    info!(client_id = %client.id(), "idle timeout, closing connection");
                }
                other => warn!(client_id = %client.id(), exit = ?other, "read loop ended"),
            }
            if time::timeout(config.write_timeout, &mut writer).await.is_err() {
                writer.abort();
            }
        }
        None => debug!(client_id = %client.id(), "writer ended first"),
    }
}
