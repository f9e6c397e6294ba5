//! Connection handling for the protocol server.
//!
//! The server runs until a termination signal arrives, a client sends
//! `server/shutdown`, or (in single-client mode) the client disconnects.
//! On the way out every server is force-stopped, and connections get to
//! flush the resulting notifications before they close.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::bus::{Notification, Subscription};
use crate::protocol::handler::RequestHandler;
use crate::protocol::jsonrpc::{parse_message, IncomingMessage, OutgoingNotification};
use crate::protocol::transport::{LineReader, LineWriter};
use crate::session::Session;

/// Lines buffered between a connection's reader task and its main loop.
const LINE_BUFFER: usize = 32;

/// The protocol server.
#[derive(Debug)]
pub struct RspServer {
    session: Arc<Session>,
    /// Set when shutdown is requested.
    shutdown: Arc<watch::Sender<bool>>,
    /// Set once servers are stopped and connections should close.
    closing: watch::Sender<bool>,
}

impl RspServer {
    /// Creates a server over `session`.
    #[must_use]
    pub fn new(session: Arc<Session>) -> Self {
        Self {
            session,
            shutdown: Arc::new(watch::channel(false).0),
            closing: watch::channel(false).0,
        }
    }

    /// The session shared by all connections.
    #[must_use]
    pub const fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Asks a running server to shut down, as `server/shutdown` does.
    pub fn request_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Serves TCP clients until shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if signal handlers cannot be installed.
    pub async fn serve(&self, listener: TcpListener) -> io::Result<()> {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "Accepting connections");
        }
        self.supervise(Some(listener), JoinSet::new()).await
    }

    /// Serves a single client on stdin/stdout until it disconnects.
    ///
    /// # Errors
    ///
    /// Returns an error if signal handlers cannot be installed.
    pub async fn serve_stdio(&self) -> io::Result<()> {
        self.serve_stream(tokio::io::stdin(), tokio::io::stdout())
            .await
    }

    /// Serves a single client on an arbitrary byte stream until it
    /// disconnects.
    ///
    /// # Errors
    ///
    /// Returns an error if signal handlers cannot be installed.
    pub async fn serve_stream<R, W>(&self, reader: R, writer: W) -> io::Result<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let mut connections = JoinSet::new();
        connections.spawn(self.connection("stream").run(reader, writer));
        self.supervise(None, connections).await
    }

    fn connection(&self, peer: impl Into<String>) -> Connection {
        Connection {
            peer: peer.into(),
            handler: RequestHandler::new(Arc::clone(&self.session), Arc::clone(&self.shutdown)),
            events: self.session.subscribe(),
            closing: self.closing.subscribe(),
        }
    }

    /// Accepts clients (if `listener` is given) and waits for the end of
    /// the session.
    async fn supervise(
        &self,
        listener: Option<TcpListener>,
        mut connections: JoinSet<()>,
    ) -> io::Result<()> {
        let mut requested = self.shutdown.subscribe();
        let signal = termination_signal();
        tokio::pin!(signal);

        loop {
            tokio::select! {
                result = &mut signal => {
                    let name = result?;
                    info!("Received {name}, initiating graceful shutdown");
                    break;
                }

                () = until_set(&mut requested) => {
                    info!("Shutdown requested, stopping servers");
                    break;
                }

                accepted = accept(listener.as_ref()), if listener.is_some() => {
                    match accepted {
                        Ok((stream, peer)) => self.spawn_tcp(&mut connections, stream, peer),
                        Err(e) => warn!(error = %e, "Failed to accept connection"),
                    }
                }

                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Connection task failed");
                    }
                    if listener.is_none() {
                        info!("Client disconnected, shutting down");
                        break;
                    }
                }
            }
        }

        drop(listener);
        self.session.shutdown().await;
        self.closing.send_replace(true);
        while connections.join_next().await.is_some() {}
        info!("Server stopped");
        Ok(())
    }

    fn spawn_tcp(&self, connections: &mut JoinSet<()>, stream: TcpStream, peer: SocketAddr) {
        info!(%peer, "Client connected");
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%peer, error = %e, "Failed to disable Nagle's algorithm");
        }
        let (reader, writer) = stream.into_split();
        connections.spawn(self.connection(peer.to_string()).run(reader, writer));
    }
}

async fn accept(listener: Option<&TcpListener>) -> io::Result<(TcpStream, SocketAddr)> {
    match listener {
        Some(listener) => listener.accept().await,
        None => std::future::pending().await,
    }
}

/// Completes once the flag is `true` (or its sender is gone).
async fn until_set(flag: &mut watch::Receiver<bool>) {
    let _ = flag.wait_for(|set| *set).await;
}

/// Waits for SIGINT or SIGTERM.
#[cfg(unix)]
async fn termination_signal() -> io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt()).map_err(io::Error::other)?;
    let mut sigterm = signal(SignalKind::terminate()).map_err(io::Error::other)?;

    tokio::select! {
        _ = sigint.recv() => Ok("SIGINT"),
        _ = sigterm.recv() => Ok("SIGTERM"),
    }
}

/// Waits for Ctrl+C.
#[cfg(windows)]
async fn termination_signal() -> io::Result<&'static str> {
    tokio::signal::ctrl_c().await.map(|()| "Ctrl+C")
}

/// One client connection.
struct Connection {
    peer: String,
    handler: RequestHandler,
    events: Subscription,
    closing: watch::Receiver<bool>,
}

impl Connection {
    async fn run<R, W>(mut self, reader: R, writer: W)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let mut writer = LineWriter::new(writer);

        // Reads happen in their own task so a half-read line is never lost
        // when the select below picks another branch.
        let (line_tx, mut lines) = mpsc::channel(LINE_BUFFER);
        let reader_task = tokio::spawn(async move {
            let mut reader = LineReader::new(reader);
            loop {
                let result = reader.read_line().await;
                let done = !matches!(result, Ok(Some(_)));
                if line_tx.send(result).await.is_err() || done {
                    break;
                }
            }
        });

        let result = self.serve(&mut lines, &mut writer).await;
        reader_task.abort();

        match result {
            Ok(()) => info!(peer = %self.peer, "Client disconnected"),
            Err(e) => warn!(peer = %self.peer, error = %e, "Connection closed with error"),
        }
    }

    async fn serve<W: AsyncWrite + Unpin + Send>(
        &mut self,
        lines: &mut mpsc::Receiver<io::Result<Option<String>>>,
        writer: &mut LineWriter<W>,
    ) -> io::Result<()> {
        loop {
            tokio::select! {
                line = lines.recv() => {
                    let Some(line) = line.transpose()?.flatten() else {
                        return Ok(());
                    };
                    self.handle_line(writer, &line).await?;
                }

                event = self.events.recv() => {
                    let Some(event) = event else {
                        return match self.events.lagged() {
                            Some(missed) => Err(io::Error::other(format!(
                                "client fell {missed} notifications behind"
                            ))),
                            None => Ok(()),
                        };
                    };
                    write_event(writer, &event).await?;
                }

                () = until_set(&mut self.closing) => {
                    while let Some(event) = self.events.try_recv() {
                        write_event(writer, &event).await?;
                    }
                    return Ok(());
                }
            }
        }
    }

    /// Handles a single line of input.
    async fn handle_line<W: AsyncWrite + Unpin + Send>(
        &self,
        writer: &mut LineWriter<W>,
        line: &str,
    ) -> io::Result<()> {
        if line.trim().is_empty() {
            return Ok(());
        }

        match parse_message(line) {
            Ok(IncomingMessage::Request(req)) => match self.handler.handle(&req).await {
                Ok(response) => writer.write_response(&response).await,
                Err(error) => writer.write_error(&error).await,
            },
            Ok(IncomingMessage::Notification(notification)) => {
                debug!(peer = %self.peer, method = %notification.method, "Ignoring client notification");
                Ok(())
            }
            Err(error) => {
                debug!(peer = %self.peer, code = error.error.code, "Rejected malformed message");
                writer.write_error(&error).await
            }
        }
    }
}

async fn write_event<W: AsyncWrite + Unpin + Send>(
    writer: &mut LineWriter<W>,
    event: &Notification,
) -> io::Result<()> {
    writer
        .write_notification(&OutgoingNotification::from(event))
        .await
}
