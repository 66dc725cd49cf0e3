//! Control channel relay: acknowledge every newline-terminated message.

use std::sync::Arc;

use guest_harness_core::error::{HarnessError, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;

use super::{next_inbound, RelayOptions, RelayStats};
use crate::channel::ChannelKind;

/// Serve the control channel until cancelled.
///
/// The guest is expected to keep the channel open for the whole run, so end
/// of stream (or a final message without its newline) is `ControlClosed`.
pub async fn run_control_relay<S>(
    stream: S,
    options: RelayOptions,
    stats: Arc<RelayStats>,
    cancel: CancellationToken,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);
    let reply = format!("{}\n", options.control_reply);
    let mut line = Vec::new();

    loop {
        line.clear();
        let read = match next_inbound(
            ChannelKind::Control,
            &options,
            &cancel,
            async { Ok::<_, HarnessError>(reader.read_until(b'\n', &mut line).await?) },
        )
        .await?
        {
            Some(n) => n,
            None => {
                tracing::debug!("Control relay cancelled");
                break;
            }
        };

        if read == 0 {
            return Err(HarnessError::ControlClosed(
                "guest closed the control channel".to_string(),
            ));
        }
        if line.last() != Some(&b'\n') {
            return Err(HarnessError::ControlClosed(format!(
                "control channel closed mid-message after {} bytes",
                line.len()
            )));
        }
        stats.record_received();

        let message = String::from_utf8_lossy(&line);
        tracing::info!(message = %message.trim_end_matches('\n'), "Got control data");

        writer.write_all(reply.as_bytes()).await?;
        writer.flush().await?;
        stats.record_sent();
    }

    Ok(())
}
