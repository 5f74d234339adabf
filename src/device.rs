//! Keyboard device resolution.
//!
//! The kernel lists every input device in a registry pseudo-file
//! (`/proc/bus/input/devices`). A keyboard shows up with a handler row such as:
//!
//! ```text
//! H: Handlers=kbd leds event1
//! ```
//!
//! Older kernels report a bare `Handlers=kbd event0` row; newer ones add LED
//! support and frequently report the same physical keyboard twice. The last
//! matching row in registry order is the node the kernel actually feeds, so
//! resolution keeps overwriting its candidate while scanning.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::constants::constants;

/// A registry row that looks like a keyboard handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyboardCandidate {
  /// 1-based line number in the registry.
  pub line: usize,
  /// Event node name, e.g. `event1`.
  pub node: String,
}

impl KeyboardCandidate {
  pub fn path(&self) -> PathBuf {
    Path::new(&constants().device_dir).join(&self.node)
  }
}

/// Path used when no keyboard row is found.
pub fn default_device() -> PathBuf {
  let c = constants();
  Path::new(&c.device_dir).join(&c.default_device)
}

/// Check a single registry row. Rows with fewer than four tokens never match.
fn match_row(line: &str) -> Option<String> {
  let c = constants();
  let tokens: Vec<&str> = line.split_whitespace().collect();
  let (handler, leds, node) = (tokens.get(1)?, tokens.get(2)?, tokens.get(3)?);
  if *handler == c.kbd_handler && *leds == c.led_marker && node.starts_with(c.event_prefix.as_str()) {
    Some(node.to_string())
  } else {
    None
  }
}

/// Every keyboard row in registry order.
///
/// Lines that are not valid UTF-8 or otherwise fail to read are skipped rather than
/// aborting the scan.
pub fn keyboard_candidates<R: BufRead>(registry: R) -> Vec<KeyboardCandidate> {
  registry
    .split(b'\n')
    .enumerate()
    .filter_map(|(idx, raw)| {
      let raw = raw.ok()?;
      let line = std::str::from_utf8(&raw).ok()?;
      match_row(line).map(|node| KeyboardCandidate { line: idx + 1, node })
    })
    .collect()
}

/// Resolve the keyboard node from registry contents. Never fails: falls back to the
/// default node when nothing matches.
pub fn resolve_from_reader<R: BufRead>(registry: R) -> PathBuf {
  match keyboard_candidates(registry).pop() {
    Some(candidate) => {
      debug!(line = candidate.line, node = %candidate.node, "device: last keyboard row wins");
      candidate.path()
    }
    None => {
      debug!("device: no keyboard row in registry, using default");
      default_device()
    }
  }
}

/// Resolve the keyboard node from the registry file at `registry`.
///
/// Only failing to open the registry is an error.
pub fn resolve_keyboard_device(registry: &Path) -> Result<PathBuf> {
  let file = File::open(registry)
    .with_context(|| format!("Failed to open input device registry {}", registry.display()))?;
  let device = resolve_from_reader(BufReader::new(file));
  info!(registry = %registry.display(), device = %device.display(), "device: resolved keyboard input device");
  Ok(device)
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Cursor;

  fn resolve(s: &str) -> PathBuf {
    resolve_from_reader(Cursor::new(s.as_bytes()))
  }

  const REGISTRY: &str = "\
I: Bus=0011 Vendor=0001 Product=0001 Version=ab41
N: Name=\"AT Translated Set 2 keyboard\"
P: Phys=isa0060/serio0/input0
H: Handlers=sysrq kbd leds event3
B: EV=120013

I: Bus=0003 Vendor=046d Product=c52b Version=0111
N: Name=\"Logitech USB Receiver\"
H: Handlers=kbd event1
B: EV=12001f

I: Bus=0003 Vendor=046d Product=c52b Version=0111
N: Name=\"Logitech USB Receiver\"
H: Handlers=kbd leds event2
B: EV=12001f
";

  #[test]
  fn single_kbd_leds_row() {
    assert_eq!(resolve("H: Handlers=kbd leds event1\n"), PathBuf::from("/dev/input/event1"));
  }

  #[test]
  fn no_kbd_rows_falls_back_to_default() {
    assert_eq!(resolve("H: Handlers=mouse0 event4\nH: Handlers=sysrq kbd event3\n"), PathBuf::from("/dev/input/event0"));
    assert_eq!(resolve(""), PathBuf::from("/dev/input/event0"));
  }

  #[test]
  fn bare_kbd_row_without_leds_is_ignored() {
    assert_eq!(resolve("H: Handlers=kbd event5\n"), default_device());
  }

  #[test]
  fn last_matching_row_wins() {
    let s = "H: Handlers=kbd leds event1\nH: Handlers=mouse0 event4\nH: Handlers=kbd leds event7\n";
    assert_eq!(resolve(s), PathBuf::from("/dev/input/event7"));
  }

  #[test]
  fn realistic_registry() {
    assert_eq!(resolve(REGISTRY), PathBuf::from("/dev/input/event2"));
  }

  #[test]
  fn short_rows_are_skipped() {
    let s = "H:\nH: Handlers=kbd\nH: Handlers=kbd leds\n\nH: Handlers=kbd leds event9\n";
    assert_eq!(resolve(s), PathBuf::from("/dev/input/event9"));
  }

  #[test]
  fn node_must_have_event_prefix() {
    assert_eq!(resolve("H: Handlers=kbd leds js0\n"), default_device());
  }

  #[test]
  fn extra_whitespace_and_trailing_tokens() {
    assert_eq!(resolve("H:  Handlers=kbd   leds event3 \t\n"), PathBuf::from("/dev/input/event3"));
    assert_eq!(resolve("H: Handlers=kbd leds event6 extra\n"), PathBuf::from("/dev/input/event6"));
  }

  #[test]
  fn invalid_utf8_line_is_skipped() {
    let mut bytes = b"H: Handlers=kbd leds event1\n".to_vec();
    bytes.extend_from_slice(b"H: \xff\xfe leds event8\n");
    assert_eq!(resolve_from_reader(Cursor::new(bytes)), PathBuf::from("/dev/input/event1"));
  }

  #[test]
  fn candidates_keep_registry_order() {
    let found = keyboard_candidates(Cursor::new(REGISTRY.as_bytes()));
    assert_eq!(found, vec![KeyboardCandidate { line: 14, node: "event2".to_string() }]);

    let s = "H: Handlers=kbd leds event1\nH: Handlers=kbd leds event2\n";
    let nodes: Vec<String> = keyboard_candidates(Cursor::new(s.as_bytes())).into_iter().map(|c| c.node).collect();
    assert_eq!(nodes, vec!["event1", "event2"]);
  }

  #[test]
  fn missing_registry_is_an_error() {
    let path = std::env::temp_dir().join(format!("playudev-missing-registry-{}", std::process::id()));
    assert!(resolve_keyboard_device(&path).is_err());
  }

  #[test]
  fn registry_file_on_disk() {
    let path = std::env::temp_dir().join(format!("playudev-registry-{}", std::process::id()));
    std::fs::write(&path, "H: Handlers=kbd leds event4\n").unwrap();
    let resolved = resolve_keyboard_device(&path);
    let _ = std::fs::remove_file(&path);
    assert_eq!(resolved.unwrap(), PathBuf::from("/dev/input/event4"));
  }
}
