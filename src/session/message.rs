use crate::error::{Error, Result};
use crate::vrf::{Challenge, VrfProof};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    // holder -> verifier
    ChallengeRequest,
    ProofSubmission,
    Ping,
    Quit,
    Exit,
    // verifier -> holder
    ChallengeResponse,
    VerificationResult,
    Pong,
    Goodbye,
    Error,
}

/// JSON envelope, one per line on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VrfMessage {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default)]
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub challenge: Option<Challenge>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<VrfProof>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl VrfMessage {
    fn bare(kind: MessageType, session_id: impl Into<String>) -> Self {
        Self {
            kind,
            session_id: session_id.into(),
            challenge: None,
            proof: None,
            success: None,
            message: None,
        }
    }

    pub fn challenge_request(session_id: impl Into<String>) -> Self {
        Self::bare(MessageType::ChallengeRequest, session_id)
    }

    pub fn proof_submission(session_id: impl Into<String>, proof: VrfProof) -> Self {
        Self {
            proof: Some(proof),
            ..Self::bare(MessageType::ProofSubmission, session_id)
        }
    }

    pub fn ping() -> Self {
        Self::bare(MessageType::Ping, "")
    }

    pub fn quit() -> Self {
        Self::bare(MessageType::Quit, "")
    }

    pub fn challenge_response(challenge: Challenge) -> Self {
        let session_id = challenge.session_id.clone();
        Self {
            challenge: Some(challenge),
            success: Some(true),
            ..Self::bare(MessageType::ChallengeResponse, session_id)
        }
    }

    pub fn verification_result(session_id: impl Into<String>, verified: bool) -> Self {
        let message = if verified {
            "verified successfully"
        } else {
            "invalid proof"
        };
        Self {
            success: Some(verified),
            message: Some(message.to_string()),
            ..Self::bare(MessageType::VerificationResult, session_id)
        }
    }

    pub fn pong() -> Self {
        Self {
            success: Some(true),
            message: Some("pong".to_string()),
            ..Self::bare(MessageType::Pong, "")
        }
    }

    pub fn goodbye() -> Self {
        Self {
            success: Some(true),
            message: Some("goodbye".to_string()),
            ..Self::bare(MessageType::Goodbye, "")
        }
    }

    pub fn error(session_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: Some(false),
            message: Some(message.into()),
            ..Self::bare(MessageType::Error, session_id)
        }
    }

    /// Whether the verifier closes the connection after answering.
    pub fn ends_connection(&self) -> bool {
        matches!(self.kind, MessageType::Quit | MessageType::Exit)
    }

    /// Newline-terminated JSON.
    pub fn encode(&self) -> Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    pub fn decode(line: &str) -> Result<Self> {
        serde_json::from_str(line.trim_end()).map_err(|e| Error::MalformedMessage(e.to_string()))
    }
}
