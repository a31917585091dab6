use std::net::SocketAddr;
use std::sync::Arc;

use chatrelay::{
    FramingError, Operation, Request, Response, ResponsePayload, UserStatus, decode_request,
    encode_response, read_frame, write_frame,
};
use tokio::io::{AsyncRead, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::ChatError;
use crate::outbox::Outbox;
use crate::registry::{ConnectionId, SessionRegistry};
use crate::router::Router;

/// Per-connection limits taken from the server config.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionSettings {
    pub max_frame_bytes: usize,
    pub outbound_queue: usize,
}

impl From<&ServerConfig> for ConnectionSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            max_frame_bytes: config.max_frame_bytes,
            outbound_queue: config.outbound_queue,
        }
    }
}

/// What the read loop does after a request has been answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

/// Serve one client until it disconnects, misbehaves, unregisters, or the
/// server shuts down. Any session bound to the connection is released on exit.
pub async fn handle_connection(
    stream: TcpStream,
    origin: SocketAddr,
    registry: Arc<SessionRegistry>,
    settings: ConnectionSettings,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let connection_id = ConnectionId::next();
    stream.set_nodelay(true).ok();
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let (outbox, out_rx) = Outbox::channel(settings.outbound_queue);
    let writer_task = tokio::spawn(write_loop(write_half, out_rx, connection_id));
    let handler = RequestHandler::new(connection_id, origin, Arc::clone(&registry), outbox);
    debug!(connection = %connection_id, peer = %origin, "connection opened");

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let Some(frame) =
            next_frame(&mut reader, settings.max_frame_bytes, &mut shutdown_rx).await
        else {
            debug!(connection = %connection_id, "shutdown signalled");
            break;
        };

        let payload = match frame {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                debug!(connection = %connection_id, "peer closed connection");
                break;
            }
            Err(err) => {
                warn!(connection = %connection_id, peer = %origin, "framing error: {err}");
                break;
            }
        };

        let request = match decode_request(&payload) {
            Ok(request) => request,
            Err(err) => {
                warn!(connection = %connection_id, peer = %origin, "dropping connection: {err}");
                let _ = handler
                    .outbox
                    .deliver(Response::bad_request(None, format!("malformed request: {err}")));
                break;
            }
        };

        debug!(connection = %connection_id, op = %request.operation(), "request");
        let (response, flow) = handler.dispatch(request);
        // The queue may be full of other users' broadcasts; wait for room.
        let queued = tokio::select! {
            queued = handler.outbox.send(response) => queued,
            _ = shutdown_rx.changed() => break,
        };
        if let Err(err) = queued {
            warn!(connection = %connection_id, "failed to queue response: {err}");
            break;
        }
        if flow == Flow::Close {
            break;
        }
    }

    if let Ok(username) = registry.unregister(connection_id) {
        info!(connection = %connection_id, username = %username, "session released");
    }

    // The writer drains whatever is queued once the last outbox is gone.
    drop(handler);
    if let Err(err) = writer_task.await {
        error!(connection = %connection_id, "writer task failed: {err}");
    }
    debug!(connection = %connection_id, "connection closed");
}

// Waits for the next frame, or `None` once shutdown is signalled. The read is
// polled to completion across unrelated watch updates so no bytes are lost.
async fn next_frame<R>(
    reader: &mut R,
    max_frame_bytes: usize,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> Option<Result<Option<Vec<u8>>, FramingError>>
where
    R: AsyncRead + Unpin,
{
    let read = read_frame(reader, max_frame_bytes);
    tokio::pin!(read);
    loop {
        tokio::select! {
            frame = &mut read => return Some(frame),
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    return None;
                }
            }
        }
    }
}

async fn write_loop(
    write_half: OwnedWriteHalf,
    mut out_rx: mpsc::Receiver<Response>,
    connection_id: ConnectionId,
) {
    let mut writer = BufWriter::new(write_half);
    while let Some(response) = out_rx.recv().await {
        let payload = match encode_response(&response) {
            Ok(payload) => payload,
            Err(err) => {
                error!(connection = %connection_id, "failed to encode response: {err}");
                continue;
            }
        };
        if let Err(err) = write_frame(&mut writer, &payload).await {
            warn!(connection = %connection_id, "socket write failed: {err}");
            return;
        }
    }
    let _ = writer.shutdown().await;
}

/// Turns decoded requests into registry/router calls for one connection.
pub struct RequestHandler {
    connection_id: ConnectionId,
    origin: SocketAddr,
    registry: Arc<SessionRegistry>,
    router: Router,
    outbox: Outbox,
}

impl RequestHandler {
    pub fn new(
        connection_id: ConnectionId,
        origin: SocketAddr,
        registry: Arc<SessionRegistry>,
        outbox: Outbox,
    ) -> Self {
        let router = Router::new(Arc::clone(&registry));
        Self {
            connection_id,
            origin,
            registry,
            router,
            outbox,
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Apply one request. Returns the answer for this connection and whether
    /// to keep reading.
    pub fn dispatch(&self, request: Request) -> (Response, Flow) {
        let operation = request.operation();
        self.registry.touch(self.connection_id);

        if !matches!(request, Request::Register { .. })
            && !self.registry.is_registered(self.connection_id)
        {
            return (
                ChatError::NotRegistered.into_response(operation),
                Flow::Continue,
            );
        }

        let result = match request {
            Request::Register { username } => self.register(&username),
            Request::SendMessage {
                recipient: None,
                content,
            } => self.broadcast(&content),
            Request::SendMessage {
                recipient: Some(recipient),
                content,
            } => self.direct(&recipient, &content),
            Request::UpdateStatus { new_status } => self.update_status(new_status),
            Request::GetUsers { username } => self.get_users(username.as_deref()),
            Request::Unregister => {
                return match self.registry.unregister(self.connection_id) {
                    Ok(username) => {
                        info!(connection = %self.connection_id, username = %username, "user unregistered");
                        (
                            Response::ok(operation, "user unregistered"),
                            Flow::Close,
                        )
                    }
                    Err(err) => (err.into_response(operation), Flow::Continue),
                };
            }
        };

        let response = match result {
            Ok(response) => response,
            Err(err) => {
                debug!(connection = %self.connection_id, op = %operation, "request rejected: {err}");
                err.into_response(operation)
            }
        };
        (response, Flow::Continue)
    }

    fn register(&self, username: &str) -> Result<Response, ChatError> {
        self.registry.register(
            self.connection_id,
            username,
            self.origin,
            self.outbox.clone(),
        )?;
        info!(
            connection = %self.connection_id,
            username = %username,
            peer = %self.origin,
            "user registered"
        );
        Ok(Response::ok(Operation::RegisterUser, "user registered"))
    }

    fn broadcast(&self, content: &str) -> Result<Response, ChatError> {
        let count = self.router.broadcast(self.connection_id, content)?;
        Ok(
            Response::ok(Operation::SendMessage, format!("message broadcast to {count} users"))
                .with_payload(ResponsePayload::Delivered { count }),
        )
    }

    fn direct(&self, recipient: &str, content: &str) -> Result<Response, ChatError> {
        self.router.direct(self.connection_id, recipient, content)?;
        Ok(Response::ok(Operation::SendMessage, "message sent"))
    }

    fn update_status(&self, status: UserStatus) -> Result<Response, ChatError> {
        self.registry.set_status(self.connection_id, status)?;
        Ok(Response::ok(Operation::UpdateStatus, "status updated"))
    }

    fn get_users(&self, filter: Option<&str>) -> Result<Response, ChatError> {
        let users: Vec<_> = self
            .registry
            .snapshot()
            .into_iter()
            .filter(|s| filter.is_none_or(|name| s.user.username == name))
            .map(|s| s.user.to_info())
            .collect();
        if users.is_empty() {
            return Err(ChatError::UserNotFound(filter.unwrap_or_default().to_string()));
        }
        Ok(Response::ok(Operation::GetUsers, "user list fetched")
            .with_payload(ResponsePayload::Users { users }))
    }
}
