//! Length-prefixed bincode framing for envelopes on a byte stream.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::mpsc,
    task::JoinHandle,
};

use crate::{
    config::MAX_FRAME_LEN,
    envelope::{Envelope, Messenger, ReplyRoute},
};

/// An envelope as it travels over a socket.
///
/// Reply routes cannot cross process boundaries, so only their presence is
/// sent; the receiver substitutes the connection it read the frame from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub what:     i32,
    pub json:     Option<String>,
    pub reply_to: bool,
}

impl Frame {
    pub fn from_envelope(envelope: &Envelope) -> Self {
        Self {
            what:     envelope.command_code,
            json:     envelope.payload.clone(),
            reply_to: envelope.reply_route.is_some(),
        }
    }

    /// Rebuilds the envelope, attaching `peer` as reply route when requested
    pub fn into_envelope(self, peer: &ReplyRoute) -> Envelope {
        let envelope = Envelope::new(self.what, self.json);
        if self.reply_to {
            envelope.with_reply_route(peer.clone())
        } else {
            envelope
        }
    }
}

/// Writes one frame
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let serialized = bincode::serialize(frame).context("Failed to serialize frame")?;
    if serialized.len() > MAX_FRAME_LEN {
        return Err(anyhow!("Frame too large: {} bytes", serialized.len()));
    }
    let len = serialized.len() as u32;

    writer
        .write_all(&len.to_le_bytes())
        .await
        .context("Failed to send frame length")?;
    writer
        .write_all(&serialized)
        .await
        .context("Failed to send frame data")?;
    writer.flush().await.context("Failed to flush stream")?;
    Ok(())
}

/// Reads one frame. `Ok(None)` means the peer closed the stream cleanly.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Frame>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e).context("Failed to read frame length"),
    }
    let len = u32::from_le_bytes(len_buf) as usize;

    if len > MAX_FRAME_LEN {
        return Err(anyhow!("Frame too large: {} bytes", len));
    }

    let mut frame_buf = vec![0u8; len];
    reader
        .read_exact(&mut frame_buf)
        .await
        .context("Failed to read frame data")?;

    let frame = bincode::deserialize(&frame_buf).context("Failed to deserialize frame")?;
    Ok(Some(frame))
}

/// Spawns a task that writes every envelope sent to the returned messenger.
///
/// The task ends when the stream fails or every clone of the messenger is
/// dropped.
pub fn spawn_writer<W>(mut writer: W) -> (Messenger, JoinHandle<()>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();
    let messenger = Messenger::from_sender(tx);

    let handle = tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            if let Err(e) = write_frame(&mut writer, &Frame::from_envelope(&envelope)).await {
                tracing::warn!("Stopping writer after error: {:#}", e);
                break;
            }
        }
    });

    (messenger, handle)
}

/// Reads frames until the stream ends, handing each envelope to `deliver`.
///
/// Stops early when `deliver` returns false. Returns the reason the stream
/// ended, `Ok(())` for a clean close.
pub async fn pump_frames<R, F>(reader: &mut R, peer: &ReplyRoute, mut deliver: F) -> Result<()>
where
    R: AsyncRead + Unpin,
    F: FnMut(Envelope) -> bool,
{
    while let Some(frame) = read_frame(reader).await? {
        tracing::debug!("Received frame with command {}", frame.what);
        if !deliver(frame.into_envelope(peer)) {
            break;
        }
    }
    Ok(())
}
