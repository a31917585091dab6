use crate::codec::{decode_response, encode_request};
use crate::frame::{DEFAULT_MAX_FRAME_BYTES, frame_codec};
use crate::protocol::{IncomingMessage, Request, Response, ResponsePayload, UserInfo, UserStatus};
use anyhow::{Context, Result, anyhow, bail};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use std::collections::VecDeque;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

/// Client for the chatrelay server.
pub struct ChatClient {
    reader: FramedRead<OwnedReadHalf, LengthDelimitedCodec>,
    writer: FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>,
    /// Notifications read while waiting for a request's answer.
    pending: VecDeque<IncomingMessage>,
}

impl ChatClient {
    /// Connect to a server at `addr`.
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .context("failed to connect to chat server")?;
        stream.set_nodelay(true).ok();
        let (r, w) = stream.into_split();
        Ok(Self {
            reader: FramedRead::new(r, frame_codec(DEFAULT_MAX_FRAME_BYTES)),
            writer: FramedWrite::new(w, frame_codec(DEFAULT_MAX_FRAME_BYTES)),
            pending: VecDeque::new(),
        })
    }

    /// Send a request without waiting for the answer.
    pub async fn send(&mut self, req: &Request) -> Result<()> {
        send_request(&mut self.writer, req).await
    }

    /// Read the next message from the server, notification or not.
    pub async fn next_response(&mut self) -> Result<Response> {
        match read_response(&mut self.reader).await {
            Some(resp) => resp,
            None => bail!("server disconnected"),
        }
    }

    /// Send a request and wait for its answer. Notifications that arrive in
    /// between are kept for [`ChatClient::next_notification`].
    pub async fn request(&mut self, req: &Request) -> Result<Response> {
        self.send(req).await?;
        loop {
            let resp = self.next_response().await?;
            match resp.incoming_message() {
                Some(msg) => self.pending.push_back(msg.clone()),
                None => return Ok(resp),
            }
        }
    }

    /// Next pushed chat message, buffered or freshly read. Answers to
    /// requests read here are an error since they belong to `request`.
    pub async fn next_notification(&mut self) -> Result<IncomingMessage> {
        if let Some(msg) = self.pending.pop_front() {
            return Ok(msg);
        }
        let resp = self.next_response().await?;
        match resp.payload {
            Some(ResponsePayload::Incoming(msg)) => Ok(msg),
            _ => Err(anyhow!("expected a notification, got: {}", resp.message)),
        }
    }

    /// Notifications already read but not yet consumed.
    pub fn pending_notifications(&self) -> usize {
        self.pending.len()
    }

    pub async fn register(&mut self, username: &str) -> Result<Response> {
        self.request(&Request::Register {
            username: username.to_string(),
        })
        .await
    }

    pub async fn broadcast(&mut self, content: &str) -> Result<Response> {
        self.request(&Request::SendMessage {
            recipient: None,
            content: content.to_string(),
        })
        .await
    }

    pub async fn direct(&mut self, recipient: &str, content: &str) -> Result<Response> {
        self.request(&Request::SendMessage {
            recipient: Some(recipient.to_string()),
            content: content.to_string(),
        })
        .await
    }

    pub async fn set_status(&mut self, status: UserStatus) -> Result<Response> {
        self.request(&Request::UpdateStatus { new_status: status })
            .await
    }

    /// List users, failing on a BadRequest answer.
    pub async fn users(&mut self, filter: Option<&str>) -> Result<Vec<UserInfo>> {
        let resp = self
            .request(&Request::GetUsers {
                username: filter.map(str::to_string),
            })
            .await?;
        if !resp.is_ok() {
            bail!("{}", resp.message);
        }
        Ok(resp.users().map(<[UserInfo]>::to_vec).unwrap_or_default())
    }

    pub async fn unregister(&mut self) -> Result<Response> {
        self.request(&Request::Unregister).await
    }

    /// Split into independent halves, e.g. to print notifications while
    /// another task sends requests.
    pub fn into_split(self) -> (ChatWriter, ChatReader) {
        (
            ChatWriter {
                writer: self.writer,
            },
            ChatReader {
                reader: self.reader,
            },
        )
    }
}

/// Write half of a split [`ChatClient`].
pub struct ChatWriter {
    writer: FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>,
}

impl ChatWriter {
    pub async fn send(&mut self, req: &Request) -> Result<()> {
        send_request(&mut self.writer, req).await
    }
}

/// Read half of a split [`ChatClient`]. Yields every server message.
pub struct ChatReader {
    reader: FramedRead<OwnedReadHalf, LengthDelimitedCodec>,
}

impl ChatReader {
    /// Returns `None` once the server has closed the connection.
    pub async fn next(&mut self) -> Option<Result<Response>> {
        read_response(&mut self.reader).await
    }
}

async fn send_request(
    writer: &mut FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>,
    req: &Request,
) -> Result<()> {
    let payload = encode_request(req)?;
    writer.send(Bytes::from(payload)).await?;
    Ok(())
}

async fn read_response(
    reader: &mut FramedRead<OwnedReadHalf, LengthDelimitedCodec>,
) -> Option<Result<Response>> {
    let frame = reader.next().await?;
    Some(
        frame
            .map_err(Into::into)
            .and_then(|f| decode_response(&f).map_err(Into::into)),
    )
}
