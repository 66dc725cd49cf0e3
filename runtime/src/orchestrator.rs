//! Orchestrator - wires the channels, relays and emulator process together.

use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use guest_harness_core::error::{HarnessError, Result};
use guest_harness_core::{EmulatorConfig, HarnessConfig};
use tokio::process::Child;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::channel::{Channel, ChannelKind, InheritableFd};
use crate::emulator::EmulatorCommand;
use crate::relay::{run_control_relay, run_network_relay, RelayCounts, RelayOptions, RelayStats};

/// Time a child gets to exit on its own after a relay failed.
pub const RELAY_FAILURE_GRACE: Duration = Duration::from_millis(500);

/// Result of one emulator run.
#[derive(Debug, Clone, Copy)]
pub struct RunOutcome {
    /// Emulator exit status.
    pub status: ExitStatus,
    pub network: RelayCounts,
    pub control: RelayCounts,
}

impl RunOutcome {
    /// Exit code to report for this run; signals map to `128 + signal`.
    pub fn exit_code(&self) -> i32 {
        exit_code(self.status)
    }

    pub fn success(&self) -> bool {
        self.status.success()
    }
}

/// Map an exit status to a shell-style exit code.
pub fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(1)
}

/// Runs the emulator against one boot archive.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    emulator: EmulatorConfig,
    relay: RelayOptions,
    run_timeout: Option<Duration>,
}

impl Orchestrator {
    pub fn new(emulator: EmulatorConfig) -> Self {
        Self {
            emulator,
            relay: RelayOptions::default(),
            run_timeout: None,
        }
    }

    pub fn from_config(config: &HarnessConfig) -> Self {
        Self::new(config.emulator.clone())
            .with_relay_options(RelayOptions::from(&config.relay))
            .with_run_timeout(config.run_timeout())
    }

    pub fn with_relay_options(mut self, relay: RelayOptions) -> Self {
        self.relay = relay;
        self
    }

    pub fn with_run_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.run_timeout = timeout;
        self
    }

    /// Boot `initrd` and block until the emulator exits.
    ///
    /// Both relays are running before the emulator is spawned. The
    /// emulator's exit status is the outcome unless a relay fails first or
    /// the run deadline expires.
    pub async fn run(&self, initrd: &Path) -> Result<RunOutcome> {
        let network = Channel::open(ChannelKind::Network)?;
        let control = Channel::open(ChannelKind::Control)?;

        let cancel = CancellationToken::new();
        let _stop_relays = cancel.clone().drop_guard();

        let network_stats = Arc::new(RelayStats::default());
        let control_stats = Arc::new(RelayStats::default());
        let mut network_task = tokio::spawn(run_network_relay(
            network.host,
            self.relay.clone(),
            network_stats.clone(),
            cancel.clone(),
        ));
        let mut control_task = tokio::spawn(run_control_relay(
            control.host,
            self.relay.clone(),
            control_stats.clone(),
            cancel.clone(),
        ));

        let mut child = self.spawn(initrd, [control.guest, network.guest])?;

        let deadline = async {
            match self.run_timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(deadline);

        let mut network_done = false;
        let mut control_done = false;

        let status = loop {
            tokio::select! {
                biased;
                status = child.wait() => {
                    break status.map_err(|e| HarnessError::EmulatorError {
                        message: format!("Failed to wait for emulator: {}", e),
                        hint: None,
                    })?;
                }
                result = &mut network_task, if !network_done => {
                    network_done = true;
                    match join_relay(ChannelKind::Network, result) {
                        Ok(()) => tracing::info!(
                            frames = network_stats.snapshot().received,
                            "Network relay finished, waiting for emulator"
                        ),
                        Err(e) => break settle_after_relay_failure(&mut child, e).await?,
                    }
                }
                result = &mut control_task, if !control_done => {
                    control_done = true;
                    if let Err(e) = join_relay(ChannelKind::Control, result) {
                        break settle_after_relay_failure(&mut child, e).await?;
                    }
                }
                _ = &mut deadline => {
                    let limit = self.run_timeout.unwrap_or_default();
                    tracing::warn!(secs = limit.as_secs(), "Emulator run deadline expired, killing");
                    kill(&mut child).await;
                    return Err(HarnessError::Timeout(format!(
                        "emulator did not exit within {}s",
                        limit.as_secs()
                    )));
                }
            }
        };

        tracing::info!(code = exit_code(status), success = status.success(), "Emulator exited");

        // The guest ends are closed now, so the relays see end of stream once
        // they have consumed whatever the guest wrote before exiting.
        let network_result = if network_done {
            Ok(())
        } else {
            drain_relay(ChannelKind::Network, &mut network_task, &cancel).await
        };
        let control_result = if control_done {
            Ok(())
        } else {
            drain_relay(ChannelKind::Control, &mut control_task, &cancel).await
        };
        network_result?;
        control_result?;

        Ok(RunOutcome {
            status,
            network: network_stats.snapshot(),
            control: control_stats.snapshot(),
        })
    }

    fn spawn(&self, initrd: &Path, guest_fds: [InheritableFd; 2]) -> Result<Child> {
        let rendered = EmulatorCommand::new(&self.emulator, initrd);
        let mut command = rendered.to_command();

        // SAFETY: the hook only calls dup2, which is async-signal-safe.
        unsafe {
            command.pre_exec(move || {
                for fd in &guest_fds {
                    fd.install()?;
                }
                Ok(())
            });
        }

        tracing::info!(
            emulator = %rendered.program().to_string_lossy(),
            initrd = %initrd.display(),
            "Spawning emulator"
        );
        tracing::debug!(args = ?rendered.args(), "Emulator arguments");

        let child = command.spawn().map_err(|e| HarnessError::EmulatorError {
            message: format!(
                "Failed to spawn {}: {}",
                rendered.program().to_string_lossy(),
                e
            ),
            hint: Some("Install QEMU or set emulator.binary in the config".to_string()),
        })?;

        tracing::info!(pid = child.id(), "Emulator spawned");

        // Dropping the command releases the host's copies of the guest ends.
        drop(command);
        Ok(child)
    }
}

fn join_relay(
    channel: ChannelKind,
    result: std::result::Result<Result<()>, tokio::task::JoinError>,
) -> Result<()> {
    result.map_err(|e| HarnessError::Other(format!("{} relay task failed: {}", channel, e)))?
}

/// Whether a relay error is the expected result of the guest shutting down.
///
/// Only the control channel closing qualifies. Everything else, including a
/// frame cut short after its length prefix, is fatal even when the emulator
/// exits at the same moment.
fn is_shutdown_race(error: &HarnessError) -> bool {
    matches!(error, HarnessError::ControlClosed(_))
}

/// Wait for a relay after the emulator exited.
///
/// The relay gets [`RELAY_FAILURE_GRACE`] to reach end of stream on its own
/// before it is cancelled.
async fn drain_relay(
    channel: ChannelKind,
    task: &mut JoinHandle<Result<()>>,
    cancel: &CancellationToken,
) -> Result<()> {
    let joined = match tokio::time::timeout(RELAY_FAILURE_GRACE, &mut *task).await {
        Ok(joined) => joined,
        Err(_) => {
            tracing::debug!(channel = %channel, "Relay still open after emulator exit, cancelling");
            cancel.cancel();
            task.await
        }
    };

    match join_relay(channel, joined) {
        Err(e) if is_shutdown_race(&e) => {
            tracing::debug!(channel = %channel, error = %e, "Relay ended with emulator");
            Ok(())
        }
        Err(e) => {
            tracing::error!(channel = %channel, error = %e, "Relay failed");
            Err(e)
        }
        Ok(()) => Ok(()),
    }
}

/// A relay failed while the emulator was running.
///
/// A closed control channel gives the child the grace period to exit on its
/// own; any other failure kills it immediately. The relay error is returned
/// unless the child exited within the grace period.
async fn settle_after_relay_failure(child: &mut Child, error: HarnessError) -> Result<ExitStatus> {
    if is_shutdown_race(&error) {
        if let Ok(Ok(status)) = tokio::time::timeout(RELAY_FAILURE_GRACE, child.wait()).await {
            tracing::debug!(error = %error, "Relay stopped while emulator was exiting");
            return Ok(status);
        }
    }

    tracing::error!(error = %error, "Relay failed, stopping emulator");
    kill(child).await;
    Err(error)
}

async fn kill(child: &mut Child) {
    if let Err(e) = child.kill().await {
        tracing::warn!(error = %e, "Failed to kill emulator");
    }
}
