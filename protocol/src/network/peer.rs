//! Peer connections.
//!
//! A TCP stream is split in two. The read half goes to a reader task that
//! only decodes frames and forwards them to the node's event loop; it never
//! touches the ledger. The write half stays behind an async mutex inside
//! [`Peer`], so concurrent sends to the same peer cannot interleave frames.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

use super::message::{read_frame, CodecError, Message};
use crate::config::PEER_SEND_TIMEOUT;

/// What reader tasks report to the event loop.
#[derive(Debug)]
pub enum PeerEvent {
    Message { from: SocketAddr, message: Message },
    Disconnected { addr: SocketAddr, reason: String },
}

/// Sending side of a connected peer. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Peer {
    addr: SocketAddr,
    writer: Arc<Mutex<OwnedWriteHalf>>,
}

impl Peer {
    /// Split `stream`, spawn its reader task and return the sending side.
    pub fn attach(
        stream: TcpStream,
        addr: SocketAddr,
        events: mpsc::Sender<PeerEvent>,
    ) -> (Self, JoinHandle<()>) {
        let _ = stream.set_nodelay(true);
        let (reader, writer) = stream.into_split();
        let handle = spawn_reader(addr, reader, events);
        (
            Self {
                addr,
                writer: Arc::new(Mutex::new(writer)),
            },
            handle,
        )
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Write a pre-encoded frame, bounded by [`PEER_SEND_TIMEOUT`].
    pub async fn send_frame(&self, frame: &[u8]) -> Result<(), CodecError> {
        let write = async {
            let mut writer = self.writer.lock().await;
            writer.write_all(frame).await?;
            writer.flush().await
        };
        match tokio::time::timeout(PEER_SEND_TIMEOUT, write).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(CodecError::Io(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("send to {} timed out", self.addr),
            ))),
        }
    }

    /// Close the write half. The remote sees EOF and its reader exits.
    pub async fn close(&self) {
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}

/// Decode frames from `reader` until the stream ends or a frame is bad,
/// then report the disconnect.
pub fn spawn_reader(
    addr: SocketAddr,
    mut reader: OwnedReadHalf,
    events: mpsc::Sender<PeerEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let reason = loop {
            match read_frame(&mut reader).await {
                Ok(message) => {
                    if events
                        .send(PeerEvent::Message {
                            from: addr,
                            message,
                        })
                        .await
                        .is_err()
                    {
                        // Event loop gone.
                        return;
                    }
                }
                Err(e) if e.is_eof() => break "closed by peer".to_string(),
                Err(e) => break e.to_string(),
            }
        };
        debug!(peer = %addr, %reason, "peer reader stopped");
        let _ = events.send(PeerEvent::Disconnected { addr, reason }).await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::message::write_frame;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn reader_forwards_messages_then_disconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            write_frame(&mut stream, &Message::ChainInfoRequest).await.unwrap();
            write_frame(&mut stream, &Message::BlockRequest { height: 4 })
                .await
                .unwrap();
        });

        let (stream, remote) = listener.accept().await.unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let (_peer, _handle) = Peer::attach(stream, remote, tx);
        client.await.unwrap();

        match rx.recv().await.unwrap() {
            PeerEvent::Message { message, .. } => assert_eq!(message, Message::ChainInfoRequest),
            other => panic!("unexpected {other:?}"),
        }
        match rx.recv().await.unwrap() {
            PeerEvent::Message { message, .. } => {
                assert_eq!(message, Message::BlockRequest { height: 4 })
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            rx.recv().await.unwrap(),
            PeerEvent::Disconnected { addr, .. } if addr == remote
        ));
    }

    #[tokio::test]
    async fn send_reaches_remote() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });

        let (server_stream, remote) = listener.accept().await.unwrap();
        let client_stream = connect.await.unwrap();

        let (tx, _rx) = mpsc::channel(8);
        let (peer, _handle) = Peer::attach(server_stream, remote, tx);
        let frame = Message::ChainInfoResponse { height: 12 }.to_frame().unwrap();
        peer.send_frame(&frame).await.unwrap();

        let (mut read, _write) = client_stream.into_split();
        let got = read_frame(&mut read).await.unwrap();
        assert_eq!(got, Message::ChainInfoResponse { height: 12 });
    }
}
