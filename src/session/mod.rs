//! VRF challenge-response sessions over an authenticated connection.
//!
//! The transport authenticates the holder before any message is read, and the
//! holder's public key taken from that handshake is bound to every session
//! opened on the connection. A session moves
//! `Created -> Challenged -> Verified | Failed`; the last two are terminal.

pub mod client;
pub mod message;
pub mod server;

use crate::error::{Error, Result};
use crate::vrf::{Challenge, VrfEngine, VrfProof, VrfPublicKey};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use uuid::Uuid;

pub use client::HolderClient;
pub use message::{MessageType, VrfMessage};
pub use server::{MAX_LINE_BYTES, serve_connection, spawn_connection};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Challenged,
    Verified,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Verified | SessionState::Failed)
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub client_key: VrfPublicKey, // fixed when the session is created
    pub challenge: Option<Challenge>,
    pub state: SessionState,
    pub created_at: Instant,
}

/// Sessions keyed by id, each living at most `ttl` after creation.
#[derive(Debug)]
pub struct SessionTable {
    sessions: Mutex<HashMap<String, Session>>,
    ttl: Duration,
}

impl SessionTable {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    fn is_expired(&self, session: &Session, now: Instant) -> bool {
        now.duration_since(session.created_at) >= self.ttl
    }

    /// Reserves `id` for `client_key`. A live, unfinished session with the
    /// same id is never replaced. Expired sessions of any state are dropped
    /// first, so the table never outgrows what one ttl window admits.
    pub fn create(&self, id: &str, client_key: VrfPublicKey) -> Result<()> {
        let now = Instant::now();
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        sessions.retain(|_, s| !self.is_expired(s, now));
        if let Some(existing) = sessions.get(id) {
            if !existing.state.is_terminal() && !self.is_expired(existing, now) {
                return Err(Error::SessionExists(id.to_string()));
            }
        }
        sessions.insert(
            id.to_string(),
            Session {
                id: id.to_string(),
                client_key,
                challenge: None,
                state: SessionState::Created,
                created_at: now,
            },
        );
        Ok(())
    }

    pub fn attach_challenge(&self, id: &str, challenge: Challenge) -> Result<()> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))?;
        if session.state != SessionState::Created {
            return Err(Error::SessionTerminal(id.to_string()));
        }
        session.challenge = Some(challenge);
        session.state = SessionState::Challenged;
        Ok(())
    }

    /// Drops a reservation whose challenge could not be produced.
    pub fn abandon(&self, id: &str) {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        if sessions.get(id).is_some_and(|s| s.state == SessionState::Created) {
            sessions.remove(id);
        }
    }

    /// Challenge and bound key of a session waiting for its proof.
    pub fn pending(&self, id: &str) -> Result<(Challenge, VrfPublicKey)> {
        let now = Instant::now();
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(session) = sessions.get(id) else {
            return Err(Error::SessionNotFound(id.to_string()));
        };
        if self.is_expired(session, now) {
            sessions.remove(id);
            return Err(Error::SessionNotFound(id.to_string()));
        }
        if session.state.is_terminal() {
            return Err(Error::SessionTerminal(id.to_string()));
        }
        match &session.challenge {
            Some(challenge) if session.state == SessionState::Challenged => {
                Ok((challenge.clone(), session.client_key.clone()))
            }
            _ => Err(Error::SessionNotFound(id.to_string())),
        }
    }

    /// Moves a challenged session to its terminal state.
    pub fn finish(&self, id: &str, verified: bool) -> Result<()> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))?;
        if session.state != SessionState::Challenged {
            return Err(Error::SessionTerminal(id.to_string()));
        }
        session.state = if verified {
            SessionState::Verified
        } else {
            SessionState::Failed
        };
        Ok(())
    }

    pub fn state(&self, id: &str) -> Option<SessionState> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map(|s| s.state)
    }

    /// Removes expired and finished sessions; returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let before = sessions.len();
        sessions.retain(|_, s| !s.state.is_terminal() && !self.is_expired(s, now));
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Verifier side of the protocol, shared by all connections.
#[derive(Debug, Clone)]
pub struct SessionProtocol {
    engine: Arc<VrfEngine>,
    sessions: Arc<SessionTable>,
}

impl SessionProtocol {
    pub fn new(engine: Arc<VrfEngine>, ttl: Duration) -> Self {
        Self {
            engine,
            sessions: Arc::new(SessionTable::new(ttl)),
        }
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    /// An empty `session_id` gets a fresh one.
    pub fn handle_challenge_request(&self, session_id: &str, client_key: &VrfPublicKey) -> Result<Challenge> {
        let session_id = if session_id.is_empty() {
            format!("session-{}", Uuid::new_v4())
        } else {
            session_id.to_string()
        };

        self.sessions.create(&session_id, client_key.clone())?;
        let challenge = match self.engine.generate_challenge(&session_id) {
            Ok(challenge) => challenge,
            Err(err) => {
                self.sessions.abandon(&session_id);
                return Err(err);
            }
        };
        self.sessions.attach_challenge(&session_id, challenge.clone())?;

        tracing::info!(session_id = %session_id, "challenge issued");
        Ok(challenge)
    }

    /// `Ok(false)` for a proof that does not verify; the session is then failed.
    /// Only the connection holding the session's bound key may answer it.
    pub fn handle_proof_submission(
        &self,
        session_id: &str,
        proof: &VrfProof,
        connection_key: &VrfPublicKey,
    ) -> Result<bool> {
        let (challenge, client_key) = self.sessions.pending(session_id)?;
        if client_key != *connection_key {
            tracing::warn!(session_id, "proof submitted from a foreign connection");
            return Err(Error::SessionNotFound(session_id.to_string()));
        }

        // verification runs without holding the table lock
        let verified = match self.engine.verify_proof(&client_key, &challenge, proof) {
            Ok(()) => true,
            Err(Error::InvalidProof) => false,
            Err(err) => return Err(err),
        };

        self.sessions.finish(session_id, verified)?;
        if verified {
            tracing::info!(session_id, "proof verified");
        } else {
            tracing::warn!(session_id, "proof rejected");
        }
        Ok(verified)
    }

    /// Answers one envelope. Failures become `error` envelopes.
    pub fn handle_message(&self, message: &VrfMessage, client_key: &VrfPublicKey) -> VrfMessage {
        tracing::debug!(kind = ?message.kind, session_id = %message.session_id, "message received");
        match message.kind {
            MessageType::ChallengeRequest => {
                match self.handle_challenge_request(&message.session_id, client_key) {
                    Ok(challenge) => VrfMessage::challenge_response(challenge),
                    Err(err) => VrfMessage::error(&message.session_id, err.to_string()),
                }
            }
            MessageType::ProofSubmission => {
                let Some(proof) = &message.proof else {
                    return VrfMessage::error(&message.session_id, "proof submission without proof");
                };
                match self.handle_proof_submission(&message.session_id, proof, client_key) {
                    Ok(verified) => VrfMessage::verification_result(&message.session_id, verified),
                    Err(err) => VrfMessage::error(&message.session_id, err.to_string()),
                }
            }
            MessageType::Ping => VrfMessage::pong(),
            MessageType::Quit | MessageType::Exit => VrfMessage::goodbye(),
            other => VrfMessage::error(
                &message.session_id,
                format!("unexpected message type {:?}", other),
            ),
        }
    }

    /// Decodes and answers one line from the wire.
    pub fn handle_line(&self, line: &str, client_key: &VrfPublicKey) -> VrfMessage {
        match VrfMessage::decode(line) {
            Ok(message) => self.handle_message(&message, client_key),
            Err(err) => {
                tracing::warn!(error = %err, "undecodable message");
                VrfMessage::error("", err.to_string())
            }
        }
    }
}
