//! Event loop: accept, read, dispatch, housekeeping.
//!
//! One task owns the [`Registry`] and applies every event in arrival order. Per-connection
//! read tasks only forward bytes; writers only drain queues. Nothing else touches
//! connection state.

use crate::config::RelaySettings;
use crate::events::LoopEvent;
use crate::registry::Registry;
use crate::transport::TcpTransport;
use crate::types::ConnectionId;
use crate::Result;
use bytes::Bytes;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Instant;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

/// Bytes requested per socket read.
pub const READ_CHUNK: usize = 8192;

/// Run the relay on `listener` until `shutdown` resolves, then close every connection.
pub async fn serve<F>(listener: TcpListener, settings: RelaySettings, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    let mut housekeeping = tokio::time::interval(settings.tick);
    housekeeping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut registry = Registry::new(settings);
    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<LoopEvent>();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            Some(event) = events_rx.recv() => registry.handle_event(event),
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => accept(&mut registry, stream, peer, &events_tx),
                Err(e) => tracing::warn!(err = %e, "accept failed"),
            },
            _ = housekeeping.tick() => {
                let swept = registry.sweep(Instant::now());
                if swept > 0 {
                    tracing::debug!(
                        swept,
                        open = registry.len(),
                        upgraded = registry.upgraded_count(),
                        "housekeeping"
                    );
                }
            }
        }
    }

    tracing::info!(open = registry.len(), "shutting down");
    registry.close_all();
    Ok(())
}

fn accept(
    registry: &mut Registry,
    stream: TcpStream,
    peer: SocketAddr,
    events: &mpsc::UnboundedSender<LoopEvent>,
) {
    let _ = stream.set_nodelay(true);
    let id = registry.next_id();
    let (reader, writer) = stream.into_split();
    // The loop registers the connection before it can observe any of its events.
    let read_task = tokio::spawn(read_loop(id, reader, events.clone()));
    let transport = TcpTransport::spawn(
        id,
        writer,
        Some(read_task.abort_handle()),
        registry.settings().outbound_queue,
    );
    tracing::debug!(conn = id, %peer, "accepted");
    registry.register(id, Box::new(transport), Instant::now());
}

async fn read_loop(
    conn: ConnectionId,
    mut reader: OwnedReadHalf,
    events: mpsc::UnboundedSender<LoopEvent>,
) {
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let event = match reader.read(&mut buf).await {
            Ok(0) => LoopEvent::Eof { conn },
            Ok(n) => LoopEvent::Data {
                conn,
                bytes: Bytes::copy_from_slice(&buf[..n]),
            },
            Err(e) => LoopEvent::ReadFailed {
                conn,
                error: e.to_string(),
            },
        };
        let last = !matches!(event, LoopEvent::Data { .. });
        if events.send(event).is_err() || last {
            return;
        }
    }
}
