//! Commands and the envelope they travel in.
//!
//! Every transport message is a bincode-encoded [`CommandEnvelope`]. Requests
//! carry a serialized [`Command`] as payload; responses carry the handler's
//! result bytes, or fault bytes when execution failed.
//!
//! ```text
//! one-way    { payload: Command,  correlation_id: None,     is_response: false }
//! request    { payload: Command,  correlation_id: Some(id), is_response: false }
//! response   { payload: result,   correlation_id: Some(id), is_response: true  }
//! fault      { payload: empty,    correlation_id: Some(id), is_response: true, fault: Some(..) }
//! ```

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{TopologyError, TopologyResult};
use crate::membership::Endpoint;

/// Correlation id of a synchronous request. Unique per sending node.
pub type CorrelationId = u64;

/// A typed command. The registry dispatches on `command_type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub command_type: String,
    pub body: Bytes,
}

impl Command {
    pub fn new(command_type: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            command_type: command_type.into(),
            body: body.into(),
        }
    }

    /// Build a command whose body is the bincode encoding of `value`.
    pub fn encode_body<T: Serialize>(
        command_type: impl Into<String>,
        value: &T,
    ) -> TopologyResult<Self> {
        let body = bincode::serialize(value)?;
        Ok(Self::new(command_type, body))
    }

    /// Decode the body as bincode.
    pub fn decode_body<'a, T: Deserialize<'a>>(&'a self) -> TopologyResult<T> {
        bincode::deserialize(&self.body).map_err(|e| {
            TopologyError::Decode(format!(
                "invalid body for command {}: {}",
                self.command_type, e
            ))
        })
    }

    pub fn to_bytes(&self) -> TopologyResult<Bytes> {
        Ok(Bytes::from(bincode::serialize(self)?))
    }

    pub fn from_bytes(bytes: &[u8]) -> TopologyResult<Self> {
        bincode::deserialize(bytes)
            .map_err(|e| TopologyError::Decode(format!("invalid command: {}", e)))
    }
}

/// The unit exchanged over the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub payload: Bytes,
    pub origin: Endpoint,
    /// Absent on one-way messages.
    pub correlation_id: Option<CorrelationId>,
    pub is_response: bool,
    pub fault: Option<Bytes>,
}

impl CommandEnvelope {
    /// A message that expects no reply.
    pub fn one_way(origin: Endpoint, payload: Bytes) -> Self {
        Self {
            payload,
            origin,
            correlation_id: None,
            is_response: false,
            fault: None,
        }
    }

    /// A request expecting a correlated reply.
    pub fn request(origin: Endpoint, correlation_id: CorrelationId, payload: Bytes) -> Self {
        Self {
            payload,
            origin,
            correlation_id: Some(correlation_id),
            is_response: false,
            fault: None,
        }
    }

    /// A successful reply to `correlation_id`.
    pub fn response(origin: Endpoint, correlation_id: CorrelationId, payload: Bytes) -> Self {
        Self {
            payload,
            origin,
            correlation_id: Some(correlation_id),
            is_response: true,
            fault: None,
        }
    }

    /// A fault reply to `correlation_id`.
    pub fn fault(origin: Endpoint, correlation_id: CorrelationId, fault: Bytes) -> Self {
        Self {
            payload: Bytes::new(),
            origin,
            correlation_id: Some(correlation_id),
            is_response: true,
            fault: Some(fault),
        }
    }

    pub fn is_one_way(&self) -> bool {
        self.correlation_id.is_none()
    }

    pub fn encode(&self) -> TopologyResult<Bytes> {
        Ok(Bytes::from(bincode::serialize(self)?))
    }

    pub fn decode(bytes: &[u8]) -> TopologyResult<Self> {
        bincode::deserialize(bytes)
            .map_err(|e| TopologyError::Decode(format!("invalid envelope: {}", e)))
    }
}
