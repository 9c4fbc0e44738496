//! Server-side message stream for streaming RPCs.
//!
//! A [`ServerStream`] is the handler's end of a bidirectional message
//! channel. The transport owns the other end, a [`StreamPeer`], and moves
//! frames between it and the wire.

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::status::Status;

/// The handler's view of a streaming call.
#[derive(Debug)]
pub struct ServerStream {
    inbound: mpsc::Receiver<Result<Bytes, Status>>,
    outbound: mpsc::Sender<Bytes>,
}

/// The transport's end of a [`ServerStream`].
#[derive(Debug)]
pub struct StreamPeer {
    /// Delivers inbound messages (or a transport error) to the handler.
    pub inbound: mpsc::Sender<Result<Bytes, Status>>,
    /// Receives messages the handler sends.
    pub outbound: mpsc::Receiver<Bytes>,
}

impl ServerStream {
    /// Creates a connected stream/peer pair with `buffer` slots per direction.
    #[must_use]
    pub fn pair(buffer: usize) -> (Self, StreamPeer) {
        let (in_tx, in_rx) = mpsc::channel(buffer);
        let (out_tx, out_rx) = mpsc::channel(buffer);
        (
            Self {
                inbound: in_rx,
                outbound: out_tx,
            },
            StreamPeer {
                inbound: in_tx,
                outbound: out_rx,
            },
        )
    }

    /// Receives the next inbound message.
    ///
    /// Returns `None` once the client has half-closed the stream.
    pub async fn recv(&mut self) -> Option<Result<Bytes, Status>> {
        self.inbound.recv().await
    }

    /// Sends a message to the client.
    ///
    /// Fails with `Cancelled` when the client has gone away.
    pub async fn send(&self, message: impl Into<Bytes>) -> Result<(), Status> {
        self.outbound
            .send(message.into())
            .await
            .map_err(|_| Status::cancelled("stream closed by peer"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo_through_pair() {
        tokio_test::block_on(async {
            let (mut stream, mut peer) = ServerStream::pair(4);

            peer.inbound.send(Ok(Bytes::from_static(b"ping"))).await.unwrap();
            drop(peer.inbound);

            while let Some(msg) = stream.recv().await {
                stream.send(msg.unwrap()).await.unwrap();
            }
            drop(stream);

            assert_eq!(peer.outbound.recv().await, Some(Bytes::from_static(b"ping")));
            assert_eq!(peer.outbound.recv().await, None);
        });
    }

    #[test]
    fn test_send_after_peer_dropped() {
        tokio_test::block_on(async {
            let (stream, peer) = ServerStream::pair(1);
            drop(peer);
            let err = stream.send("late").await.unwrap_err();
            assert_eq!(err.code(), crate::Code::Cancelled);
        });
    }
}
