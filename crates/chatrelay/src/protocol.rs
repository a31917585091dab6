use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Client-to-server requests. One request per frame.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    /// Bind a username to this connection.
    Register { username: String },
    /// Send to one user, or to everyone else when `recipient` is absent.
    SendMessage {
        #[serde(
            default,
            deserialize_with = "empty_as_none",
            skip_serializing_if = "Option::is_none"
        )]
        recipient: Option<String>,
        content: String,
    },
    UpdateStatus { new_status: UserStatus },
    /// List connected users, optionally narrowed to a single username.
    GetUsers {
        #[serde(
            default,
            deserialize_with = "empty_as_none",
            skip_serializing_if = "Option::is_none"
        )]
        username: Option<String>,
    },
    Unregister,
}

impl Request {
    pub fn operation(&self) -> Operation {
        match self {
            Request::Register { .. } => Operation::RegisterUser,
            Request::SendMessage { .. } => Operation::SendMessage,
            Request::UpdateStatus { .. } => Operation::UpdateStatus,
            Request::GetUsers { .. } => Operation::GetUsers,
            Request::Unregister => Operation::UnregisterUser,
        }
    }
}

/// Operation tag echoed back on responses.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    RegisterUser,
    SendMessage,
    UpdateStatus,
    GetUsers,
    UnregisterUser,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::RegisterUser => "REGISTER_USER",
            Operation::SendMessage => "SEND_MESSAGE",
            Operation::UpdateStatus => "UPDATE_STATUS",
            Operation::GetUsers => "GET_USERS",
            Operation::UnregisterUser => "UNREGISTER_USER",
        };
        f.write_str(name)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusCode {
    Ok,
    BadRequest,
}

/// Presence state of a registered user.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserStatus {
    #[default]
    Online,
    Busy,
    Offline,
    /// Set by the server after a quiet period, cleared by the next request.
    Inactive,
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserStatus::Online => write!(f, "online"),
            UserStatus::Busy => write!(f, "busy"),
            UserStatus::Offline => write!(f, "offline"),
            UserStatus::Inactive => write!(f, "inactive"),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Broadcast,
    Direct,
}

/// A chat message pushed to a recipient's connection.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub sender: String,
    pub content: String,
    pub kind: MessageKind,
}

/// Presence entry returned by `GetUsers`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub username: String,
    pub status: UserStatus,
    /// Peer IP the user registered from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsePayload {
    Users { users: Vec<UserInfo> },
    Incoming(IncomingMessage),
    /// Number of connections a broadcast was queued to.
    Delivered { count: usize },
}

/// Server-to-client message: either the answer to a request or a pushed
/// incoming-message notification.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: StatusCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<Operation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<ResponsePayload>,
}

impl Response {
    pub fn ok(operation: Operation, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::Ok,
            message: message.into(),
            operation: Some(operation),
            payload: None,
        }
    }

    pub fn bad_request(operation: Option<Operation>, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BadRequest,
            message: message.into(),
            operation,
            payload: None,
        }
    }

    /// Notification delivered to the recipient of a chat message.
    pub fn incoming(message: IncomingMessage) -> Self {
        Self {
            status: StatusCode::Ok,
            message: "incoming message".to_string(),
            operation: None,
            payload: Some(ResponsePayload::Incoming(message)),
        }
    }

    pub fn with_payload(mut self, payload: ResponsePayload) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == StatusCode::Ok
    }

    /// True for pushed messages that do not answer a request.
    pub fn is_notification(&self) -> bool {
        matches!(self.payload, Some(ResponsePayload::Incoming(_)))
    }

    pub fn incoming_message(&self) -> Option<&IncomingMessage> {
        match &self.payload {
            Some(ResponsePayload::Incoming(msg)) => Some(msg),
            _ => None,
        }
    }

    pub fn users(&self) -> Option<&[UserInfo]> {
        match &self.payload {
            Some(ResponsePayload::Users { users }) => Some(users),
            _ => None,
        }
    }
}

// An empty recipient or filter reads as absent: broadcast, or list everyone.
fn empty_as_none<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    let value = Option::<String>::deserialize(d)?;
    Ok(value.filter(|s| !s.is_empty()))
}
