//! Outbound side of a connection.
//!
//! The registry only ever pushes bytes into a [`Transport`]; pushing never blocks the
//! event loop. The TCP implementation queues writes to a per-connection writer task
//! through a bounded queue. A peer that stops reading fills its queue, and the next push
//! fails instead of buffering without limit.

use crate::error::Error;
use crate::types::ConnectionId;
use crate::Result;
use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::AbortHandle;

/// Sink for bytes destined to one peer.
pub trait Transport: Send {
    /// Queue bytes for the peer. Fails with [`Error::QueueFull`] when the peer is not
    /// draining its queue, and with [`Error::Closed`] once the writer has gone away.
    fn send(&self, data: Bytes) -> Result<()>;

    /// Flush anything queued, then close. Calling it again is a no-op.
    fn close(&self);
}

enum Outbound {
    Data(Bytes),
    Close,
}

/// Default number of frames or responses queued per connection.
pub const DEFAULT_QUEUE_DEPTH: usize = 64;

/// TCP transport: a writer task owns the write half; the read task is aborted on close.
pub struct TcpTransport {
    tx: mpsc::Sender<Outbound>,
    writer: AbortHandle,
    reader: Option<AbortHandle>,
}

impl TcpTransport {
    /// Spawn the writer task for `writer` with room for `depth` queued writes. `reader` is
    /// the connection's read task, if any.
    pub fn spawn(
        id: ConnectionId,
        writer: OwnedWriteHalf,
        reader: Option<AbortHandle>,
        depth: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(depth.max(1));
        let writer = tokio::spawn(write_loop(id, writer, rx)).abort_handle();
        Self { tx, writer, reader }
    }
}

impl Transport for TcpTransport {
    fn send(&self, data: Bytes) -> Result<()> {
        match self.tx.try_send(Outbound::Data(data)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(Error::QueueFull),
            Err(TrySendError::Closed(_)) => Err(Error::Closed),
        }
    }

    fn close(&self) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(Outbound::Close) {
            // Nothing queued will ever drain; drop it with the socket.
            self.writer.abort();
        }
        if let Some(reader) = &self.reader {
            reader.abort();
        }
    }
}

async fn write_loop(
    id: ConnectionId,
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::Receiver<Outbound>,
) {
    while let Some(msg) = rx.recv().await {
        match msg {
            Outbound::Data(bytes) => {
                if let Err(e) = writer.write_all(&bytes).await {
                    tracing::debug!(conn = id, err = %e, "write failed");
                    return;
                }
            }
            Outbound::Close => break,
        }
    }
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream};

    #[tokio::test]
    async fn queued_bytes_are_flushed_before_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        let (_read, write) = server.into_split();

        let transport = TcpTransport::spawn(1, write, None, DEFAULT_QUEUE_DEPTH);
        transport.send(Bytes::from_static(b"hello ")).unwrap();
        transport.send(Bytes::from_static(b"world")).unwrap();
        transport.close();
        transport.close();

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"hello world");
    }

    #[tokio::test]
    async fn send_after_writer_exit_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        let (_read, write) = server.into_split();

        let transport = TcpTransport::spawn(2, write, None, DEFAULT_QUEUE_DEPTH);
        transport.close();
        // Give the writer task a chance to drain the close and drop its receiver.
        for _ in 0..100 {
            if transport.send(Bytes::from_static(b"late")).is_err() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("writer never exited");
    }

    #[tokio::test]
    async fn full_queue_rejects_sends_and_close_drops_the_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        let (_read, write) = server.into_split();

        // Single-threaded test runtime: the writer cannot drain until this task yields.
        let transport = TcpTransport::spawn(3, write, None, 2);
        transport.send(Bytes::from_static(b"one")).unwrap();
        transport.send(Bytes::from_static(b"two")).unwrap();
        assert!(matches!(
            transport.send(Bytes::from_static(b"three")),
            Err(Error::QueueFull)
        ));

        transport.close();
        let mut received = Vec::new();
        let eof = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            client.read_to_end(&mut received),
        )
        .await;
        assert!(eof.is_ok(), "socket stayed open after close on a full queue");
        assert!(received.is_empty());
    }
}
