//! TCP front end.
//!
//! Every connection gets its own [`Session`](crate::session::Session). Frames on the wire are a
//! little-endian `u32` length followed by one protocol message (header and
//! payload). The connection's read half feeds [`Session::on_message`](crate::session::Session::on_message); a
//! writer task drains the session's outbound channel and encodes events.

use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::session::{OutboundReceiver, SessionManager};

/// Largest frame accepted from or sent to a client (64 MiB).
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Accept failed: {0}")]
    Accept(#[source] std::io::Error),
}

/// Codec used on both ends of a connection.
pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .little_endian()
        .length_field_length(4)
        .max_frame_length(MAX_FRAME_LEN)
        .new_codec()
}

pub struct Server {
    listener: TcpListener,
    sessions: Arc<SessionManager>,
}

impl Server {
    pub async fn bind(addr: &str, sessions: Arc<SessionManager>) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        Ok(Self { listener, sessions })
    }

    /// Address actually bound, useful when binding port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().ok()
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Accept connections until `shutdown` fires, then close all sessions.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ServerError> {
        info!(addr = ?self.local_addr(), "Server listening");

        let result = loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Server shutting down");
                    break Ok(());
                }

                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let sessions = Arc::clone(&self.sessions);
                            let cancel = shutdown.child_token();
                            tokio::spawn(async move {
                                serve_connection(stream, peer, sessions, cancel).await;
                            });
                        }
                        Err(e) if is_transient(&e) => {
                            warn!(error = %e, "Transient accept error");
                        }
                        Err(e) => break Err(ServerError::Accept(e)),
                    }
                }
            }
        };

        self.sessions.close_all();
        result
    }
}

fn is_transient(error: &std::io::Error) -> bool {
    use std::io::ErrorKind;
    matches!(
        error.kind(),
        ErrorKind::ConnectionAborted | ErrorKind::ConnectionReset | ErrorKind::Interrupted
    )
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    sessions: Arc<SessionManager>,
    cancel: CancellationToken,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(%peer, error = %e, "Could not disable Nagle");
    }

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let session = sessions.create_session(outbound_tx);
    info!(session_id = session.id(), %peer, "Client connected");

    let (sink, mut stream) = Framed::new(stream, frame_codec()).split();
    let writer = tokio::spawn(write_events(sink, outbound_rx, session.id()));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            frame = stream.next() => match frame {
                Some(Ok(frame)) => session.on_message(frame.freeze()),
                Some(Err(e)) => {
                    warn!(session_id = session.id(), error = %e, "Read failed");
                    break;
                }
                None => break,
            },
        }
    }

    info!(session_id = session.id(), %peer, "Client disconnected");
    sessions.delete_session(session.id());
    writer.abort();
}

async fn write_events<S>(mut sink: S, mut events: OutboundReceiver, session_id: u32)
where
    S: futures::Sink<bytes::Bytes, Error = std::io::Error> + Unpin,
{
    while let Some((request_id, event)) = events.recv().await {
        if let Err(e) = sink.send(event.encode(request_id)).await {
            debug!(session_id, error = %e, "Write failed, dropping connection output");
            break;
        }
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("addr", &self.local_addr())
            .field("sessions", &self.sessions.len())
            .finish()
    }
}
