//! Payload encoding. Frames carry one JSON document each.

use thiserror::Error;

use crate::protocol::{Request, Response};

/// A frame whose payload is not a well-formed message.
#[derive(Error, Debug)]
#[error("malformed payload: {0}")]
pub struct DecodeError(#[from] serde_json::Error);

pub fn decode_request(bytes: &[u8]) -> Result<Request, DecodeError> {
    Ok(serde_json::from_slice(bytes)?)
}

pub fn encode_request(request: &Request) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(request)
}

pub fn decode_response(bytes: &[u8]) -> Result<Response, DecodeError> {
    Ok(serde_json::from_slice(bytes)?)
}

pub fn encode_response(response: &Response) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(response)
}
