pub mod client;
pub mod codec;
pub mod frame;
pub mod protocol;

pub use codec::{DecodeError, decode_request, decode_response, encode_request, encode_response};
pub use frame::{DEFAULT_MAX_FRAME_BYTES, FramingError, frame_codec, read_frame, write_frame};
pub use protocol::{
    IncomingMessage, MessageKind, Operation, Request, Response, ResponsePayload, StatusCode,
    UserInfo, UserStatus,
};

/// Default TCP port the server listens on.
pub const DEFAULT_PORT: u16 = 8080;
