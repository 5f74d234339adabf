//! Fullscreen capture surface.
//!
//! Owns the terminal while the player draws on top of it: alternate screen, raw mode,
//! an opaque blank frame, and every terminal input event read and discarded so nothing
//! leaks through to the shell underneath.

use anyhow::{Context, Result};
use ratatui::{
  DefaultTerminal,
  crossterm::event,
  style::{Color, Style},
  widgets::Block,
};
use std::io;
use std::time::Duration;
use tokio::sync::oneshot::{self, error::TryRecvError};
use tracing::{debug, info, warn};

use crate::constants::constants;

pub struct CaptureSurface {
  terminal: DefaultTerminal,
}

impl CaptureSurface {
  pub fn open() -> Result<Self> {
    let terminal = ratatui::try_init().context("Failed to take over the terminal for the capture surface")?;
    info!("surface: capture surface shown");
    Ok(Self { terminal })
  }

  /// Keep the screen until the supervisor schedules teardown through `teardown`
  /// (or drops it), then restore the terminal.
  pub async fn hold(mut self, mut teardown: oneshot::Receiver<i32>) -> Result<()> {
    let poll = Duration::from_millis(constants().surface_poll_ms);
    loop {
      match teardown.try_recv() {
        Ok(code) => {
          info!(code, "surface: teardown scheduled by supervisor");
          return Ok(());
        }
        Err(TryRecvError::Closed) => {
          warn!("surface: supervisor went away without scheduling teardown");
          return Ok(());
        }
        Err(TryRecvError::Empty) => {}
      }

      self
        .terminal
        .draw(|frame| frame.render_widget(Block::default().style(Style::default().bg(Color::Black)), frame.area()))
        .context("Failed to draw capture surface")?;

      // crossterm blocks for up to `poll`; keep that off the async workers.
      let swallowed = off_worker(move || if event::poll(poll)? { event::read().map(Some) } else { Ok(None) })
        .await
        .context("Failed to read terminal events")?;
      if let Some(swallowed) = swallowed {
        debug!(event = ?swallowed, "surface: swallowed terminal event");
      }
    }
  }
}

/// Run blocking terminal I/O on tokio's blocking pool.
async fn off_worker<T, F>(f: F) -> Result<T>
where
  F: FnOnce() -> io::Result<T> + Send + 'static,
  T: Send + 'static,
{
  Ok(tokio::task::spawn_blocking(f).await.context("Terminal input task panicked")??)
}

impl Drop for CaptureSurface {
  fn drop(&mut self) {
    ratatui::restore();
    info!("surface: capture surface torn down");
  }
}
