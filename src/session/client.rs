use super::server::exchange;
use super::{MessageType, VrfMessage};
use crate::error::{Error, Result};
use crate::vrf::{Challenge, VrfEngine, VrfKeyPair};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, BufReader, ReadHalf, WriteHalf};

/// Certificate holder proving possession of its VRF key to a verifier.
pub struct HolderClient<S> {
    reader: BufReader<ReadHalf<S>>,
    writer: WriteHalf<S>,
    engine: Arc<VrfEngine>,
    keys: VrfKeyPair,
    io_timeout: Duration,
}

impl<S> HolderClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, engine: Arc<VrfEngine>, keys: VrfKeyPair, io_timeout: Duration) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(reader),
            writer,
            engine,
            keys,
            io_timeout,
        }
    }

    async fn send(&mut self, request: VrfMessage) -> Result<VrfMessage> {
        let reply = exchange(&mut self.reader, &mut self.writer, &request, self.io_timeout).await?;
        if reply.kind == MessageType::Error {
            return Err(Error::Remote(reply.message.unwrap_or_default()));
        }
        Ok(reply)
    }

    pub async fn request_challenge(&mut self, session_id: &str) -> Result<Challenge> {
        let reply = self.send(VrfMessage::challenge_request(session_id)).await?;
        match (reply.kind, reply.challenge) {
            (MessageType::ChallengeResponse, Some(challenge)) => Ok(challenge),
            (kind, _) => Err(Error::MalformedMessage(format!(
                "expected challenge_response, got {:?}",
                kind
            ))),
        }
    }

    /// Proves the challenge; returns the verifier's verdict.
    pub async fn submit_proof(&mut self, challenge: &Challenge) -> Result<bool> {
        let proof = self.engine.generate_proof(&self.keys, challenge)?;
        let reply = self
            .send(VrfMessage::proof_submission(&challenge.session_id, proof))
            .await?;
        match (reply.kind, reply.success) {
            (MessageType::VerificationResult, Some(verified)) => Ok(verified),
            (kind, _) => Err(Error::MalformedMessage(format!(
                "expected verification_result, got {:?}",
                kind
            ))),
        }
    }

    /// Challenge request followed by the proof.
    pub async fn authenticate(&mut self, session_id: &str) -> Result<bool> {
        let challenge = self.request_challenge(session_id).await?;
        self.submit_proof(&challenge).await
    }

    pub async fn ping(&mut self) -> Result<()> {
        let reply = self.send(VrfMessage::ping()).await?;
        if reply.kind != MessageType::Pong {
            return Err(Error::MalformedMessage(format!("expected pong, got {:?}", reply.kind)));
        }
        Ok(())
    }

    pub async fn quit(mut self) -> Result<()> {
        self.send(VrfMessage::quit()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{SessionProtocol, SessionState, spawn_connection};
    use assert_matches::assert_matches;

    const IO_TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_holder_authenticates() {
        let engine = Arc::new(VrfEngine::new());
        let keys = engine.generate_key_pair().unwrap();
        let protocol = SessionProtocol::new(engine.clone(), Duration::from_secs(60));

        let (client_io, server_io) = tokio::io::duplex(16 * 1024);
        let handle = spawn_connection(protocol.clone(), server_io, keys.public.clone(), IO_TIMEOUT);

        let mut holder = HolderClient::new(client_io, engine, keys, IO_TIMEOUT);
        holder.ping().await.unwrap();
        assert!(holder.authenticate("s1").await.unwrap());
        assert_eq!(protocol.sessions().state("s1"), Some(SessionState::Verified));

        // the same id cannot be reused while its challenge is pending
        let challenge = holder.request_challenge("s2").await.unwrap();
        assert_matches!(holder.request_challenge("s2").await, Err(Error::Remote(_)));
        assert!(holder.submit_proof(&challenge).await.unwrap());

        holder.quit().await.unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_wrong_key_is_rejected() {
        let engine = Arc::new(VrfEngine::new());
        let certified = engine.generate_key_pair().unwrap();
        let other = engine.generate_key_pair().unwrap();
        let protocol = SessionProtocol::new(engine.clone(), Duration::from_secs(60));

        let (client_io, server_io) = tokio::io::duplex(16 * 1024);
        let handle = spawn_connection(protocol.clone(), server_io, certified.public, IO_TIMEOUT);

        let mut holder = HolderClient::new(client_io, engine, other, IO_TIMEOUT);
        assert!(!holder.authenticate("s1").await.unwrap());
        assert_eq!(protocol.sessions().state("s1"), Some(SessionState::Failed));

        holder.quit().await.unwrap();
        handle.await.unwrap();
    }
}
