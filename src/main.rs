use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use serde::Serialize;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info};

use playudev::config::Config;
use playudev::device::{KeyboardCandidate, default_device, keyboard_candidates};
use playudev::logging::{init_logging, log_dir};
use playudev::runner::{PlayerOptions, play, player_cmdline};

// --- CLI ---

#[derive(Parser, Debug)]
#[command(author, version = env!("CARGO_PKG_VERSION"), about, long_about = None)]
struct Cli {
  /// Log at debug level
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
  /// Play media, forwarding Esc/Q (quit), Space/P (pause), - and + (volume) to the player
  Play {
    /// Media path, or the whole player command line with --raw
    target: String,
    /// Treat TARGET as the complete player command line
    #[arg(long)]
    raw: bool,
    /// Do not show the fullscreen capture surface
    #[arg(long)]
    no_capture: bool,
    /// Keyboard device node to read, skipping registry resolution
    #[arg(long)]
    device: Option<PathBuf>,
    /// Input device registry to resolve the keyboard from
    #[arg(long)]
    registry: Option<PathBuf>,
  },
  /// List keyboard rows in the input device registry and the one that would be used
  Devices {
    #[arg(long)]
    registry: Option<PathBuf>,
    /// Print as JSON
    #[arg(long)]
    json: bool,
  },
  /// Show the effective configuration
  Config {
    /// Write a config file with the default values
    #[arg(long)]
    init: bool,
  },
  /// Print shell completions
  Completions { shell: Shell },
}

// --- Helpers ---

/// Map a player exit code onto a process exit status. Signals follow the shell
/// convention of `128 + N`.
fn exit_status(code: i32) -> u8 {
  if code < 0 { 128u8.saturating_add(code.unsigned_abs().min(127) as u8) } else { code.min(255) as u8 }
}

#[derive(Serialize)]
struct DeviceReport<'a> {
  registry: &'a Path,
  candidates: &'a [KeyboardCandidate],
  resolved: PathBuf,
}

// --- Commands ---

async fn cmd_play(
  config: &Config,
  target: &str,
  raw: bool,
  no_capture: bool,
  device: Option<PathBuf>,
  registry: Option<PathBuf>,
) -> Result<ExitCode> {
  let mut opts = PlayerOptions::from_config(config);
  if no_capture {
    opts.capture = false;
  }
  if let Some(device) = device {
    opts.device = Some(device);
  }
  if let Some(registry) = registry {
    opts.registry = registry;
  }

  let cmdline = if raw { target.to_string() } else { player_cmdline(config.player_command(), target) };

  if opts.capture {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
      ratatui::restore();
      default_hook(info);
    }));
  }

  let code = play(&cmdline, &opts).await?;
  info!(code, "player exited");
  Ok(ExitCode::from(exit_status(code)))
}

fn cmd_devices(config: &Config, registry: Option<PathBuf>, json: bool) -> Result<()> {
  let registry = registry.unwrap_or_else(|| config.registry());
  let file = File::open(&registry).with_context(|| format!("Failed to open {}", registry.display()))?;
  let candidates = keyboard_candidates(BufReader::new(file));
  let resolved = candidates.last().map_or_else(default_device, KeyboardCandidate::path);

  if json {
    let report = DeviceReport { registry: &registry, candidates: &candidates, resolved };
    println!("{}", serde_json::to_string_pretty(&report).context("Failed to serialize device report")?);
    return Ok(());
  }

  println!("registry: {}", registry.display());
  if candidates.is_empty() {
    println!("  no keyboard rows");
  }
  for candidate in &candidates {
    println!("  line {:<5} {:<10} {}", candidate.line, candidate.node, candidate.path().display());
  }
  println!("resolved: {}", resolved.display());
  Ok(())
}

fn cmd_config(config: &Config, init: bool) -> Result<()> {
  let path = Config::path();
  if init {
    if let Some(ref path) = path
      && path.exists()
    {
      println!("{} already exists", path.display());
      return Ok(());
    }
    let written = Config::defaults().save()?;
    println!("wrote {}", written.display());
    return Ok(());
  }

  match path {
    Some(path) => println!("config:          {}", path.display()),
    None => println!("config:          <no home directory>"),
  }
  println!("log dir:         {}", log_dir().display());
  println!("player_command:  {}", config.player_command());
  println!("capture:         {}", config.capture());
  println!("registry:        {}", config.registry().display());
  match &config.keyboard_device {
    Some(device) => println!("keyboard_device: {}", device.display()),
    None => println!("keyboard_device: <resolved from registry>"),
  }
  Ok(())
}

// --- Main ---

#[tokio::main]
async fn main() -> Result<ExitCode> {
  let cli = Cli::parse();

  let _guard = match init_logging(cli.verbose) {
    Ok(guard) => Some(guard),
    Err(e) => {
      eprintln!("warning: logging disabled: {:#}", e);
      None
    }
  };

  let config = Config::load();
  let result = match cli.command {
    Cmd::Play { target, raw, no_capture, device, registry } => {
      cmd_play(&config, &target, raw, no_capture, device, registry).await
    }
    Cmd::Devices { registry, json } => cmd_devices(&config, registry, json).map(|()| ExitCode::SUCCESS),
    Cmd::Config { init } => cmd_config(&config, init).map(|()| ExitCode::SUCCESS),
    Cmd::Completions { shell } => {
      clap_complete::generate(shell, &mut Cli::command(), "playudev", &mut std::io::stdout());
      Ok(ExitCode::SUCCESS)
    }
  };

  if let Err(ref e) = result {
    error!(err = %format!("{:#}", e), "command failed");
  }
  result
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn cli_definition_is_valid() {
    Cli::command().debug_assert();
  }

  #[test]
  fn parse_play() {
    let cli = Cli::parse_from(["playudev", "play", "--no-capture", "--device", "/dev/input/event3", "movie.mp4"]);
    match cli.command {
      Cmd::Play { target, raw, no_capture, device, registry } => {
        assert_eq!(target, "movie.mp4");
        assert!(!raw);
        assert!(no_capture);
        assert_eq!(device, Some(PathBuf::from("/dev/input/event3")));
        assert!(registry.is_none());
      }
      other => panic!("unexpected command: {:?}", other),
    }
  }

  #[test]
  fn parse_raw_play_with_global_verbose() {
    let cli = Cli::parse_from(["playudev", "play", "--raw", "mpv --fs x.mp4", "-v"]);
    assert!(cli.verbose);
    assert!(matches!(cli.command, Cmd::Play { raw: true, .. }));
  }

  #[test]
  fn parse_devices_json() {
    let cli = Cli::parse_from(["playudev", "devices", "--json", "--registry", "/tmp/devices"]);
    match cli.command {
      Cmd::Devices { registry, json } => {
        assert!(json);
        assert_eq!(registry, Some(PathBuf::from("/tmp/devices")));
      }
      other => panic!("unexpected command: {:?}", other),
    }
  }

  #[test]
  fn exit_status_mapping() {
    assert_eq!(exit_status(0), 0);
    assert_eq!(exit_status(3), 3);
    assert_eq!(exit_status(255), 255);
    assert_eq!(exit_status(1000), 255);
    assert_eq!(exit_status(-9), 137);
    assert_eq!(exit_status(-15), 143);
    assert_eq!(exit_status(i32::MIN), 255);
  }
}
