use super::{SessionProtocol, VrfMessage};
use crate::error::{Error, Result};
use crate::vrf::VrfPublicKey;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Longest accepted envelope, excluding the trailing newline.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Reads one line of at most [`MAX_LINE_BYTES`]. Returns the byte count, 0 at
/// end of stream; a longer line is a `MalformedMessage`.
async fn read_bounded_line<R>(reader: &mut BufReader<R>, line: &mut String) -> Result<usize>
where
    R: AsyncRead + Unpin,
{
    let read = reader
        .take(MAX_LINE_BYTES as u64 + 1)
        .read_line(line)
        .await?;
    if read > MAX_LINE_BYTES && !line.ends_with('\n') {
        return Err(Error::MalformedMessage(format!(
            "line exceeds {} bytes",
            MAX_LINE_BYTES
        )));
    }
    Ok(read)
}

/// Serves one authenticated connection until the peer quits or hangs up.
///
/// `peer_key` is the public key from the peer's certificate, as established
/// by the transport handshake. Every read and every write is bounded by
/// `io_timeout`; a timeout ends this connection only.
pub async fn serve_connection<S>(
    protocol: SessionProtocol,
    stream: S,
    peer_key: VrfPublicKey,
    io_timeout: Duration,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let read = match timeout(io_timeout, read_bounded_line(&mut reader, &mut line))
            .await
            .map_err(|_| Error::NetworkTimeout("reading message"))?
        {
            Ok(read) => read,
            Err(err @ Error::MalformedMessage(_)) => {
                tracing::warn!(error = %err, "oversized message, closing connection");
                let encoded = VrfMessage::error("", err.to_string()).encode()?;
                timeout(io_timeout, writer.write_all(encoded.as_bytes()))
                    .await
                    .map_err(|_| Error::NetworkTimeout("writing response"))??;
                timeout(io_timeout, writer.flush())
                    .await
                    .map_err(|_| Error::NetworkTimeout("writing response"))??;
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        if read == 0 {
            tracing::debug!("connection closed by peer");
            return Ok(());
        }
        if line.trim().is_empty() {
            continue;
        }

        let response = protocol.handle_line(&line, &peer_key);
        let done = response.kind == super::MessageType::Goodbye;

        let encoded = response.encode()?;
        timeout(io_timeout, writer.write_all(encoded.as_bytes()))
            .await
            .map_err(|_| Error::NetworkTimeout("writing response"))??;
        timeout(io_timeout, writer.flush())
            .await
            .map_err(|_| Error::NetworkTimeout("writing response"))??;

        if done {
            return Ok(());
        }
    }
}

/// Runs [`serve_connection`] on its own task and logs how it ended.
pub fn spawn_connection<S>(
    protocol: SessionProtocol,
    stream: S,
    peer_key: VrfPublicKey,
    io_timeout: Duration,
) -> JoinHandle<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        match serve_connection(protocol, stream, peer_key, io_timeout).await {
            Ok(()) => tracing::debug!("connection finished"),
            Err(err) => tracing::warn!(error = %err, "connection aborted"),
        }
    })
}

/// Sends one envelope and waits for the reply line.
pub(crate) async fn exchange<R, W>(
    reader: &mut BufReader<R>,
    writer: &mut W,
    request: &VrfMessage,
    io_timeout: Duration,
) -> Result<VrfMessage>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let encoded = request.encode()?;
    timeout(io_timeout, writer.write_all(encoded.as_bytes()))
        .await
        .map_err(|_| Error::NetworkTimeout("writing request"))??;
    timeout(io_timeout, writer.flush())
        .await
        .map_err(|_| Error::NetworkTimeout("writing request"))??;

    let mut line = String::new();
    let read = timeout(io_timeout, read_bounded_line(reader, &mut line))
        .await
        .map_err(|_| Error::NetworkTimeout("reading reply"))??;
    if read == 0 {
        return Err(Error::ConnectionClosed);
    }
    VrfMessage::decode(&line)
}
