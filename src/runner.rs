//! Entry points for playing a media file with keyboard forwarding.

use anyhow::{Context, Result, anyhow};
use std::path::PathBuf;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, info};

use crate::config::Config;
use crate::constants::constants;
use crate::device::resolve_keyboard_device;
use crate::event::DeviceStream;
use crate::supervisor::{run_video, teardown_channel};
use crate::surface::CaptureSurface;

#[derive(Debug, Clone)]
pub struct PlayerOptions {
  /// Build a dedicated tokio runtime when none is running. When `false`, the caller
  /// must already be inside a multi-thread runtime.
  pub init_runtime: bool,
  /// Show the fullscreen capture surface while the player runs.
  pub capture: bool,
  /// Input device registry to resolve the keyboard from.
  pub registry: PathBuf,
  /// Skip resolution and read this device node directly.
  pub device: Option<PathBuf>,
}

impl Default for PlayerOptions {
  fn default() -> Self {
    Self { init_runtime: true, capture: true, registry: PathBuf::from(&constants().registry_path), device: None }
  }
}

impl PlayerOptions {
  pub fn from_config(config: &Config) -> Self {
    Self {
      capture: config.capture(),
      registry: config.registry(),
      device: config.keyboard_device.clone(),
      ..Self::default()
    }
  }
}

/// Quote `s` for a POSIX shell.
pub fn shell_quote(s: &str) -> String {
  if !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || "-_./:=@%+,".contains(c)) {
    return s.to_string();
  }
  format!("'{}'", s.replace('\'', r"'\''"))
}

/// Build a player command line from `template`, substituting every `{}` with the quoted
/// target. A template without a placeholder gets the target appended.
pub fn player_cmdline(template: &str, target: &str) -> String {
  let quoted = shell_quote(target);
  if template.contains("{}") {
    template.replace("{}", &quoted)
  } else {
    format!("{} {}", template.trim_end(), quoted)
  }
}

/// Play `cmdline`, forwarding playback keys from the physical keyboard. Returns the
/// player's exit code.
///
/// Failing to resolve or open the keyboard device, or to spawn the player, is an error.
pub async fn play(cmdline: &str, opts: &PlayerOptions) -> Result<i32> {
  let device = match &opts.device {
    Some(device) => {
      info!(device = %device.display(), "runner: using configured keyboard device");
      device.clone()
    }
    None => resolve_keyboard_device(&opts.registry)?,
  };
  let keys = DeviceStream::open(&device)?;

  if !opts.capture {
    return run_video(cmdline, keys, None).await;
  }

  let surface = CaptureSurface::open()?;
  let (teardown, teardown_rx) = teardown_channel();
  let cmdline = cmdline.to_string();
  let player = tokio::spawn(async move { run_video(&cmdline, keys, Some(teardown)).await });

  let held = surface.hold(teardown_rx).await;
  let code = player.await.context("Player supervisor task panicked")??;
  held?;
  Ok(code)
}

/// Blocking form of [`play`].
///
/// A runtime that is already current is always reused, whatever `init_runtime` says,
/// since a second runtime cannot be started from inside one.
pub fn run_player(cmdline: &str, opts: PlayerOptions) -> Result<i32> {
  let handle = match Handle::try_current() {
    Ok(handle) => handle,
    Err(_) if opts.init_runtime => {
      let runtime =
        tokio::runtime::Builder::new_multi_thread().enable_all().build().context("Failed to build tokio runtime")?;
      return runtime.block_on(play(cmdline, &opts));
    }
    Err(e) => return Err(anyhow!(e).context("init_runtime is false but no tokio runtime is running")),
  };

  if handle.runtime_flavor() != RuntimeFlavor::MultiThread {
    return Err(anyhow!("Cannot block inside the current tokio runtime: it is not multi-threaded"));
  }
  if opts.init_runtime {
    debug!("runner: already inside a tokio runtime, reusing it");
  }
  tokio::task::block_in_place(|| handle.block_on(play(cmdline, &opts)))
}
