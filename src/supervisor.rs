use anyhow::{Context, Result, anyhow};
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use tokio::{
  io::{AsyncBufReadExt, AsyncRead, BufReader as TokioBufReader},
  process::{Child as TokioChild, ChildStdin, Command},
  sync::oneshot,
};
use tracing::{debug, info};

use crate::command::forward_keys;

/// Lifecycle of one player invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
  NotStarted,
  Running,
  /// Carries the player's exit code.
  Terminated(i32),
}

/// Lets the supervisor ask a capture surface to close, without touching it.
///
/// The surface owns the receiving end and acts on it from its own loop.
pub struct TeardownHandle {
  tx: oneshot::Sender<i32>,
}

pub fn teardown_channel() -> (TeardownHandle, oneshot::Receiver<i32>) {
  let (tx, rx) = oneshot::channel();
  (TeardownHandle { tx }, rx)
}

impl TeardownHandle {
  pub fn schedule(self, code: i32) {
    if self.tx.send(code).is_err() {
      debug!("supervisor: capture surface already gone");
    }
  }
}

/// Exit code of the player. A child killed by signal `N` reports `-N`.
pub fn exit_code(status: ExitStatus) -> i32 {
  status.code().or_else(|| status.signal().map(|sig| -sig)).unwrap_or(-1)
}

pub struct PlayerSupervisor {
  cmdline: String,
  state: PlayerState,
  child: Option<TokioChild>,
  /// Dropped once the player exits, which cancels the forwarding task.
  cancel_forwarder: Option<oneshot::Sender<()>>,
}

impl PlayerSupervisor {
  pub fn new(cmdline: impl Into<String>) -> Self {
    Self { cmdline: cmdline.into(), state: PlayerState::NotStarted, child: None, cancel_forwarder: None }
  }

  pub fn state(&self) -> PlayerState {
    self.state
  }

  /// Spawn the player through `sh -c` and start forwarding `keys` to its stdin.
  ///
  /// The forwarding task is never joined; it ends on quit, end of stream, a closed
  /// stdin, or when `wait` observes the player's exit.
  pub fn start<R>(&mut self, keys: R) -> Result<()>
  where
    R: AsyncRead + Unpin + Send + 'static,
  {
    if self.state != PlayerState::NotStarted {
      return Err(anyhow!("Player already started ({:?})", self.state));
    }

    info!(cmdline = %self.cmdline, "supervisor: starting player with keyboard forwarding");
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(&self.cmdline);
    cmd.stdin(Stdio::piped());
    cmd.stdout(Stdio::piped());
    // stderr would land on top of the capture surface.
    cmd.stderr(Stdio::null());
    cmd.kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| {
      if e.kind() == std::io::ErrorKind::NotFound {
        anyhow!("sh not found; the player command line needs a POSIX shell")
      } else {
        anyhow!(e).context("Failed to spawn player process")
      }
    })?;

    let stdin = child.stdin.take().context("Failed to get player stdin")?;
    let stdout = child.stdout.take().context("Failed to get player stdout")?;

    // Drain stdout so the player never stalls on a full pipe.
    tokio::spawn(async move {
      let mut segments = TokioBufReader::new(stdout).split(b'\n');
      while let Ok(Some(line)) = segments.next_segment().await {
        debug!(line = %String::from_utf8_lossy(&line), "player");
      }
    });

    let (cancel_tx, cancel_rx) = oneshot::channel();
    tokio::spawn(key_forwarder(keys, stdin, cancel_rx));

    self.child = Some(child);
    self.cancel_forwarder = Some(cancel_tx);
    self.state = PlayerState::Running;
    Ok(())
  }

  /// Block until the player exits and return its exit code.
  pub async fn wait(&mut self) -> Result<i32> {
    let Some(mut child) = self.child.take() else {
      return Err(anyhow!("Player is not running ({:?})", self.state));
    };
    let status = child.wait().await.context("Failed to wait for player process")?;
    let code = exit_code(status);
    self.cancel_forwarder = None;
    self.state = PlayerState::Terminated(code);
    info!(code, "supervisor: player process has terminated");
    Ok(code)
  }
}

async fn key_forwarder<R>(keys: R, mut stdin: ChildStdin, mut cancel: oneshot::Receiver<()>)
where
  R: AsyncRead + Unpin,
{
  let outcome = tokio::select! {
    outcome = forward_keys(keys, &mut stdin) => outcome,
    _ = &mut cancel => {
      debug!("supervisor: key forwarding cancelled, player exited");
      return;
    }
  };
  info!(outcome = ?outcome, "supervisor: key forwarding finished");

  // Keep stdin open until the player exits so it never sees EOF just because
  // forwarding stopped.
  if !outcome.player_gone() {
    let _ = cancel.await;
  }
}

/// Run the player to completion with keyboard forwarding. If `teardown` is given, it
/// is scheduled with the exit code once the player exits.
pub async fn run_video<R>(cmdline: &str, keys: R, teardown: Option<TeardownHandle>) -> Result<i32>
where
  R: AsyncRead + Unpin + Send + 'static,
{
  let mut supervisor = PlayerSupervisor::new(cmdline);
  supervisor.start(keys)?;
  let code = supervisor.wait().await?;
  if let Some(teardown) = teardown {
    teardown.schedule(code);
  }
  Ok(code)
}
