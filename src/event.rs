//! Raw `input_event` records from `/dev/input/event*`.
//!
//! Each record is a native-endian `struct input_event` on a 64-bit host:
//! `tv_sec: i64, tv_usec: i64, type: u16, code: u16, value: u32` (24 bytes).

use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll, ready};
use tokio::io::unix::AsyncFd;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tracing::info;

/// Size of one encoded record.
pub const EVENT_SIZE: usize = 24;

/// `EV_KEY` event type.
pub const EV_KEY: u16 = 0x01;

/// A decoded input event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawInputEvent {
  pub tv_sec: i64,
  pub tv_usec: i64,
  pub kind: u16,
  pub code: u16,
  pub value: u32,
}

impl RawInputEvent {
  /// A key event with a zero timestamp.
  pub fn key(code: u16, value: u32) -> Self {
    Self { tv_sec: 0, tv_usec: 0, kind: EV_KEY, code, value }
  }

  pub fn decode(buf: &[u8; EVENT_SIZE]) -> Self {
    let mut sec = [0u8; 8];
    let mut usec = [0u8; 8];
    let mut kind = [0u8; 2];
    let mut code = [0u8; 2];
    let mut value = [0u8; 4];
    sec.copy_from_slice(&buf[0..8]);
    usec.copy_from_slice(&buf[8..16]);
    kind.copy_from_slice(&buf[16..18]);
    code.copy_from_slice(&buf[18..20]);
    value.copy_from_slice(&buf[20..24]);
    Self {
      tv_sec: i64::from_ne_bytes(sec),
      tv_usec: i64::from_ne_bytes(usec),
      kind: u16::from_ne_bytes(kind),
      code: u16::from_ne_bytes(code),
      value: u32::from_ne_bytes(value),
    }
  }

  pub fn to_bytes(&self) -> [u8; EVENT_SIZE] {
    let mut buf = [0u8; EVENT_SIZE];
    buf[0..8].copy_from_slice(&self.tv_sec.to_ne_bytes());
    buf[8..16].copy_from_slice(&self.tv_usec.to_ne_bytes());
    buf[16..18].copy_from_slice(&self.kind.to_ne_bytes());
    buf[18..20].copy_from_slice(&self.code.to_ne_bytes());
    buf[20..24].copy_from_slice(&self.value.to_ne_bytes());
    buf
  }

  /// `true` for a key release (`EV_KEY` with value 0).
  pub fn is_key_release(&self) -> bool {
    self.kind == EV_KEY && self.value == 0
  }
}

/// Decode every complete record in `bytes`. A trailing partial record is dropped.
pub fn decode_events(bytes: &[u8]) -> Vec<RawInputEvent> {
  bytes
    .chunks_exact(EVENT_SIZE)
    .filter_map(|chunk| <&[u8; EVENT_SIZE]>::try_from(chunk).ok())
    .map(RawInputEvent::decode)
    .collect()
}

// --- Reader ---

/// Pulls fixed-size records off a byte stream, one at a time, in arrival order.
pub struct EventReader<R> {
  inner: R,
}

impl<R: AsyncRead + Unpin> EventReader<R> {
  pub fn new(inner: R) -> Self {
    Self { inner }
  }

  /// Next complete record, or `None` at end of stream.
  ///
  /// A stream that ends mid-record is treated exactly like a clean end of stream.
  pub async fn next_event(&mut self) -> io::Result<Option<RawInputEvent>> {
    let mut buf = [0u8; EVENT_SIZE];
    let mut filled = 0;
    while filled < EVENT_SIZE {
      match self.inner.read(&mut buf[filled..]).await {
        Ok(0) => return Ok(None),
        Ok(n) => filled += n,
        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
        Err(e) => return Err(e),
      }
    }
    Ok(Some(RawInputEvent::decode(&buf)))
  }
}

// --- Device stream ---

/// A `/dev/input/event*` node opened non-blocking and registered with the tokio
/// reactor, so a parked read can be cancelled instead of pinning a blocking thread.
pub struct DeviceStream {
  inner: AsyncFd<File>,
}

impl DeviceStream {
  /// Must be called from within a tokio runtime.
  pub fn open(path: &Path) -> Result<Self> {
    let file = OpenOptions::new()
      .read(true)
      .custom_flags(libc::O_NONBLOCK)
      .open(path)
      .with_context(|| format!("Failed to open keyboard device {}", path.display()))?;
    let inner =
      AsyncFd::new(file).with_context(|| format!("Failed to register keyboard device {}", path.display()))?;
    info!(device = %path.display(), "event: keyboard device opened");
    Ok(Self { inner })
  }
}

impl AsyncRead for DeviceStream {
  fn poll_read(self: Pin<&mut Self>, cx: &mut TaskContext<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
    loop {
      let mut guard = ready!(self.inner.poll_read_ready(cx))?;
      let unfilled = buf.initialize_unfilled();
      match guard.try_io(|inner| inner.get_ref().read(unfilled)) {
        Ok(Ok(len)) => {
          buf.advance(len);
          return Poll::Ready(Ok(()));
        }
        Ok(Err(e)) => return Poll::Ready(Err(e)),
        Err(_would_block) => continue,
      }
    }
  }
}


#[cfg(test)]
mod tests {
  use super::*;

  fn stream(events: &[RawInputEvent]) -> Vec<u8> {
    events.iter().flat_map(|e| e.to_bytes()).collect()
  }

  fn sample() -> Vec<RawInputEvent> {
    vec![
      RawInputEvent { tv_sec: 1_700_000_000, tv_usec: 123_456, kind: EV_KEY, code: 57, value: 1 },
      RawInputEvent { tv_sec: 1_700_000_000, tv_usec: 223_456, kind: EV_KEY, code: 57, value: 0 },
      RawInputEvent { tv_sec: -1, tv_usec: i64::MAX, kind: 0, code: 0, value: u32::MAX },
    ]
  }

  #[cfg(all(target_os = "linux", target_pointer_width = "64"))]
  #[test]
  fn record_size_matches_kernel_struct() {
    assert_eq!(std::mem::size_of::<libc::input_event>(), EVENT_SIZE);
  }

  #[test]
  fn field_offsets_are_native_endian() {
    let bytes = RawInputEvent { tv_sec: 7, tv_usec: 9, kind: 1, code: 16, value: 2 }.to_bytes();
    assert_eq!(&bytes[0..8], &7i64.to_ne_bytes());
    assert_eq!(&bytes[8..16], &9i64.to_ne_bytes());
    assert_eq!(&bytes[16..18], &1u16.to_ne_bytes());
    assert_eq!(&bytes[18..20], &16u16.to_ne_bytes());
    assert_eq!(&bytes[20..24], &2u32.to_ne_bytes());
  }

  #[test]
  fn decode_exact_multiple() {
    let events = sample();
    let decoded = decode_events(&stream(&events));
    assert_eq!(decoded.len(), events.len());
    assert_eq!(decoded, events);
  }

  #[test]
  fn decode_drops_truncated_tail() {
    let events = sample();
    let mut bytes = stream(&events);
    bytes.truncate(bytes.len() - 5);
    assert_eq!(decode_events(&bytes), events[..2].to_vec());
    assert!(decode_events(&bytes[..EVENT_SIZE - 1]).is_empty());
  }

  #[test]
  fn key_release_detection() {
    assert!(RawInputEvent::key(16, 0).is_key_release());
    assert!(!RawInputEvent::key(16, 1).is_key_release());
    assert!(!RawInputEvent::key(16, 2).is_key_release());
    assert!(!RawInputEvent { kind: 0, ..RawInputEvent::key(16, 0) }.is_key_release());
  }

  #[tokio::test]
  async fn reader_yields_events_in_order() {
    let events = sample();
    let bytes = stream(&events);
    let mut reader = EventReader::new(bytes.as_slice());
    let mut out = Vec::new();
    while let Some(ev) = reader.next_event().await.unwrap() {
      out.push(ev);
    }
    assert_eq!(out, events);
  }

  #[tokio::test]
  async fn reader_stops_on_short_read() {
    let events = sample();
    let bytes = stream(&events);
    let truncated = &bytes[..EVENT_SIZE + 10];
    let mut reader = EventReader::new(truncated);
    assert_eq!(reader.next_event().await.unwrap(), Some(events[0]));
    assert_eq!(reader.next_event().await.unwrap(), None);
  }

  #[tokio::test]
  async fn reader_reassembles_split_records() {
    let events = sample();
    let bytes = stream(&events);
    let (mut tx, rx) = tokio::io::duplex(7);
    let writer = tokio::spawn(async move {
      use tokio::io::AsyncWriteExt;
      for chunk in bytes.chunks(5) {
        tx.write_all(chunk).await.unwrap();
      }
    });
    let mut reader = EventReader::new(rx);
    let mut out = Vec::new();
    while let Some(ev) = reader.next_event().await.unwrap() {
      out.push(ev);
    }
    writer.await.unwrap();
    assert_eq!(out, events);
  }

  #[tokio::test]
  async fn opening_missing_device_fails() {
    let path = std::env::temp_dir().join(format!("playudev-no-such-event-{}", std::process::id()));
    assert!(DeviceStream::open(&path).is_err());
  }

  // --- DeviceStream ---

  #[tokio::test]
  async fn device_stream_reads_fifo_in_order() {
    use std::io::Write;

    let fifo = testing::Fifo::new("in-order");
    let device = DeviceStream::open(&fifo.path).unwrap();
    let mut writer = fifo.writer();
    let events = sample();
    writer.write_all(&stream(&events)).unwrap();
    drop(writer);

    let mut reader = EventReader::new(device);
    let mut out = Vec::new();
    while let Some(ev) = reader.next_event().await.unwrap() {
      out.push(ev);
    }
    assert_eq!(out, events);
  }

  #[tokio::test]
  async fn parked_device_read_can_be_dropped() {
    use std::io::Write;
    use std::time::{Duration, Instant};

    let fifo = testing::Fifo::new("parked");
    let mut reader = EventReader::new(DeviceStream::open(&fifo.path).unwrap());
    let mut writer = fifo.writer();

    let started = Instant::now();
    let parked = tokio::time::timeout(Duration::from_millis(50), reader.next_event()).await;
    assert!(parked.is_err(), "read should still be parked with no data");
    assert!(started.elapsed() < Duration::from_secs(2));

    // The stream is still usable after the parked read was dropped.
    let ev = RawInputEvent::key(57, 0);
    writer.write_all(&ev.to_bytes()).unwrap();
    assert_eq!(reader.next_event().await.unwrap(), Some(ev));
  }
}
