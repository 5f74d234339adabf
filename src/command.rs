//! Translate keyboard releases into player control bytes and forward them to the
//! player's stdin.

use std::io;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::event::{EventReader, RawInputEvent};

// Linux key codes (input-event-codes.h).
pub const KEY_ESC: u16 = 1;
pub const KEY_MINUS: u16 = 12;
pub const KEY_EQUAL: u16 = 13;
pub const KEY_Q: u16 = 16;
pub const KEY_P: u16 = 25;
pub const KEY_SPACE: u16 = 57;

/// Control codes understood on the player's stdin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerCommand {
  Quit,
  TogglePause,
  VolumeDown,
  VolumeUp,
}

impl PlayerCommand {
  /// Map a decoded event to a command. Only key releases count.
  pub fn from_event(event: &RawInputEvent) -> Option<Self> {
    if !event.is_key_release() {
      return None;
    }
    match event.code {
      KEY_ESC | KEY_Q => Some(PlayerCommand::Quit),
      KEY_P | KEY_SPACE => Some(PlayerCommand::TogglePause),
      KEY_MINUS => Some(PlayerCommand::VolumeDown),
      KEY_EQUAL => Some(PlayerCommand::VolumeUp),
      _ => None,
    }
  }

  pub fn as_byte(self) -> u8 {
    match self {
      PlayerCommand::Quit => b'q',
      PlayerCommand::TogglePause => b' ',
      PlayerCommand::VolumeDown => b'-',
      PlayerCommand::VolumeUp => b'+',
    }
  }

  /// Whether forwarding stops after this command is sent.
  pub fn terminates(self) -> bool {
    self == PlayerCommand::Quit
  }
}

/// What the translator decided after one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
  Continue,
  /// Quit was sent.
  Quit,
  /// The player's stdin is gone.
  PlayerGone,
}

/// Why the forwarding loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardOutcome {
  QuitKey,
  EndOfStream,
  PlayerGone,
  ReadFailed,
}

impl ForwardOutcome {
  /// The player can no longer receive input, so holding its stdin is pointless.
  pub fn player_gone(self) -> bool {
    self == ForwardOutcome::PlayerGone
  }
}

fn channel_closed(e: &io::Error) -> bool {
  matches!(e.kind(), io::ErrorKind::BrokenPipe | io::ErrorKind::NotConnected | io::ErrorKind::ConnectionReset)
}

/// Translate one event, writing and flushing its command (if any) to `sink`.
///
/// A closed channel means the player has exited. Any other write fault is logged and
/// dropped; forwarding is best effort.
pub async fn translate<W: AsyncWrite + Unpin>(event: &RawInputEvent, sink: &mut W) -> Step {
  let Some(cmd) = PlayerCommand::from_event(event) else {
    return Step::Continue;
  };
  debug!(command = ?cmd, code = event.code, "command: forwarding key");

  let sent = match sink.write_all(&[cmd.as_byte()]).await {
    Ok(()) => sink.flush().await,
    Err(e) => Err(e),
  };

  match sent {
    Ok(()) if cmd.terminates() => {
      info!("command: Esc/Q released, asking player to quit");
      Step::Quit
    }
    Ok(()) => Step::Continue,
    Err(e) if channel_closed(&e) => {
      debug!(err = %e, "command: player stdin closed");
      Step::PlayerGone
    }
    Err(e) => {
      warn!(err = %e, command = ?cmd, "command: failed to forward key, ignoring");
      Step::Continue
    }
  }
}

/// Read events from `keys` and forward commands to `sink` until quit, end of
/// stream, or the player goes away. The device stream is dropped on return.
pub async fn forward_keys<R, W>(keys: R, sink: &mut W) -> ForwardOutcome
where
  R: AsyncRead + Unpin,
  W: AsyncWrite + Unpin,
{
  let mut reader = EventReader::new(keys);
  loop {
    let event = match reader.next_event().await {
      Ok(Some(event)) => event,
      Ok(None) => return ForwardOutcome::EndOfStream,
      Err(e) => {
        warn!(err = %e, "command: keyboard device read failed");
        return ForwardOutcome::ReadFailed;
      }
    };
    match translate(&event, sink).await {
      Step::Continue => {}
      Step::Quit => return ForwardOutcome::QuitKey,
      Step::PlayerGone => return ForwardOutcome::PlayerGone,
    }
  }
}
