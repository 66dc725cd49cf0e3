//! Network channel relay: answer every guest frame with the canned reply.

use std::sync::Arc;

use guest_harness_core::error::Result;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

use super::frame::{read_frame, write_frame};
use super::packet::{describe_packet, synthesize_reply};
use super::{next_inbound, RelayOptions, RelayStats};
use crate::channel::ChannelKind;

/// Serve the network channel until end of stream or cancellation.
///
/// Frames are answered strictly in arrival order, one reply per frame,
/// whatever their content.
pub async fn run_network_relay<S>(
    mut stream: S,
    options: RelayOptions,
    stats: Arc<RelayStats>,
    cancel: CancellationToken,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let reply = synthesize_reply();

    loop {
        let frame = match next_inbound(
            ChannelKind::Network,
            &options,
            &cancel,
            read_frame(&mut stream),
        )
        .await?
        {
            None => {
                tracing::debug!("Network relay cancelled");
                break;
            }
            Some(None) => {
                tracing::info!(
                    frames = stats.snapshot().received,
                    "Network channel closed by guest"
                );
                break;
            }
            Some(Some(frame)) => frame,
        };
        stats.record_received();

        tracing::info!(
            len = frame.len(),
            "Got packet:\n{}",
            describe_packet(&frame)
        );
        tracing::info!("Sending packet:\n{}", describe_packet(&reply));

        write_frame(&mut stream, &reply).await?;
        stats.record_sent();
    }

    Ok(())
}
