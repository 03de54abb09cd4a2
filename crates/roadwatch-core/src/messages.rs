//! JSON messages exchanged with the browser client.

use serde::{Deserialize, Serialize};

use crate::errors::StartMessageError;
use crate::ids::SessionId;
use crate::labels::FrameCounts;

/// Response body of `POST /upload`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub path: String,
    pub session_id: SessionId,
}

/// First client message on `/ws/process`, as received.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct StartMessage {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
}

/// A validated start message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StartRequest {
    pub session_id: SessionId,
    pub path: String,
}

impl StartMessage {
    /// Parse and validate the raw text of a start message. Both fields must
    /// be present and non-empty.
    pub fn parse(text: &str) -> Result<StartRequest, StartMessageError> {
        let msg: StartMessage = serde_json::from_str(text)
            .map_err(|e| StartMessageError::InvalidJson(e.to_string()))?;
        let session_id = msg
            .session_id
            .filter(|s| !s.is_empty())
            .ok_or(StartMessageError::MissingSessionId)?;
        let path = msg
            .path
            .filter(|p| !p.is_empty())
            .ok_or(StartMessageError::MissingPath)?;
        Ok(StartRequest {
            session_id: SessionId::from_raw(session_id),
            path,
        })
    }
}

/// One processed frame, sent server to client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrameMessage {
    pub counts: FrameCounts,
    /// Base64 (standard alphabet) of the annotated JPEG.
    pub frame: String,
    pub session_id: SessionId,
}

impl FrameMessage {
    pub fn new(session_id: SessionId, counts: FrameCounts, frame: String) -> Self {
        Self {
            counts,
            frame,
            session_id,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
