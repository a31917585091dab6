pub mod activity;
pub mod config;
pub mod connection;
pub mod error;
pub mod outbox;
pub mod registry;
pub mod router;
pub mod server;

pub use config::ServerConfig;
pub use error::ChatError;
pub use registry::{ConnectionId, Session, SessionRegistry, User};
pub use server::{ChatServer, ShutdownHandle, start_server};
