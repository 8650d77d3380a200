use std::process::{Child, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};

use anyhow::{Context, Result};

use mcuload_core::{Channel, ChannelError, FramedChannel};

/// Framed channel to a device program spawned as a child process.
///
/// The command line is split on whitespace; there is no shell quoting. The
/// child's stderr is inherited.
pub struct ProcessChannel {
    child: Child,
    framed: FramedChannel<ChildStdout, ChildStdin>,
}

impl ProcessChannel {
    pub fn spawn(command_line: &str) -> Result<Self> {
        let mut parts = command_line.split_whitespace();
        let program = parts.next().context("device command is empty")?;
        let mut child = Command::new(program)
            .args(parts)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("spawn device command: {command_line}"))?;
        let stdin = child.stdin.take().context("device stdin not captured")?;
        let stdout = child.stdout.take().context("device stdout not captured")?;
        tracing::debug!(pid = child.id(), command = command_line, "device process started");
        Ok(Self {
            child,
            framed: FramedChannel::new(stdout, stdin),
        })
    }

    /// Closes the device's stdin and waits for it to exit.
    pub fn finish(self) -> Result<ExitStatus> {
        let Self { mut child, framed } = self;
        drop(framed);
        let status = child.wait().context("wait for device process")?;
        tracing::debug!(%status, "device process exited");
        Ok(status)
    }
}

impl Channel for ProcessChannel {
    fn send(&mut self, message: &[u8]) -> Result<(), ChannelError> {
        self.framed.send(message)
    }

    fn receive(&mut self) -> Result<Vec<u8>, ChannelError> {
        self.framed.receive()
    }
}
