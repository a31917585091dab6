use chatrelay::{Operation, Response};
use thiserror::Error;

/// Request-level failures. These are answered with a BadRequest response and
/// leave the connection open.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    #[error("username taken")]
    AlreadyTaken(String),

    #[error("username must not be empty")]
    InvalidUsername,

    #[error("no session bound to this connection")]
    NotFound,

    #[error("not registered")]
    NotRegistered,

    #[error("recipient not found")]
    RecipientNotFound(String),

    #[error("user not found")]
    UserNotFound(String),

    #[error("message could not be delivered to {0}")]
    DeliveryFailed(String),
}

impl ChatError {
    pub fn into_response(self, operation: Operation) -> Response {
        Response::bad_request(Some(operation), self.to_string())
    }
}
