// CCU-Jack Rust Source Code File - See https://ccu-jack.io for more info.
//
// Copyright 2020-2026 CCU-Jack Project Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Circular buffer for log messages. The buffer implements [`std::io::Write`]
//! so it can be chained in front of the real log destination; the buffered
//! messages are exposed through the VEAP `diagnostics` variable.

use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, RwLock};

/// Number of log messages to buffer for diagnostics.
pub const LOG_BUFFER_SIZE: usize = 500;
/// Size limit of a single buffered log message in bytes.
pub const LOG_BUFFER_MAX_MSG_SIZE: usize = 250;

pub struct LogBuffer {
  // newest message is at the front
  ring: RwLock<VecDeque<String>>,
  next: Mutex<Option<Box<dyn Write + Send>>>,
}

impl LogBuffer {
  pub fn new() -> Arc<Self> {
    Arc::new(LogBuffer {
      ring: RwLock::new(VecDeque::with_capacity(LOG_BUFFER_SIZE)),
      next: Mutex::new(None),
    })
  }

  pub fn with_next(next: Box<dyn Write + Send>) -> Arc<Self> {
    let buffer = LogBuffer::new();
    *buffer.next.lock().expect("log buffer sink lock") = Some(next);
    buffer
  }

  fn push(&self, line: &[u8]) {
    let msg = if line.len() > LOG_BUFFER_MAX_MSG_SIZE {
      // possibly truncates a multi byte UTF-8 character
      let mut s = String::from_utf8_lossy(&line[..LOG_BUFFER_MAX_MSG_SIZE]).into_owned();
      s.push('…');
      s
    } else {
      String::from_utf8_lossy(line).trim_end_matches('\n').to_owned()
    };
    let mut ring = self.ring.write().expect("log buffer ring lock");
    if ring.len() == LOG_BUFFER_SIZE {
      ring.pop_back();
    }
    ring.push_front(msg);
  }

  /// Returns all buffered messages from newest to oldest. Each message is
  /// split into the columns timestamp, severity, module and text.
  pub fn messages(&self) -> Vec<Vec<String>> {
    let ring = self.ring.read().expect("log buffer ring lock");
    ring
      .iter()
      .map(|m| {
        m.splitn(4, '|')
          .map(|field| field.trim().to_owned())
          .collect()
      })
      .collect()
  }

  /// Returns a writer handle for use as a log sink.
  pub fn writer(self: &Arc<Self>) -> LogBufferWriter {
    LogBufferWriter {
      buffer: self.clone(),
    }
  }
}

/// Cloneable [`std::io::Write`] handle onto a [`LogBuffer`].
#[derive(Clone)]
pub struct LogBufferWriter {
  buffer: Arc<LogBuffer>,
}

impl Write for LogBufferWriter {
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    if let Some(next) = self.buffer.next.lock().expect("log buffer sink lock").as_mut() {
      let _ = next.write_all(buf);
    }
    self.buffer.push(buf);
    Ok(buf.len())
  }

  fn flush(&mut self) -> io::Result<()> {
    if let Some(next) = self.buffer.next.lock().expect("log buffer sink lock").as_mut() {
      next.flush()?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn buffers_newest_first() {
    let buffer = LogBuffer::new();
    let mut writer = buffer.writer();
    writer.write_all(b"10:00 | INFO | main | first\n").unwrap();
    writer.write_all(b"10:01 | WARN | mqtt | second\n").unwrap();
    let msgs = buffer.messages();
    assert_eq!(msgs.len(), 2);
    assert_eq!(msgs[0], vec!["10:01", "WARN", "mqtt", "second"]);
    assert_eq!(msgs[1], vec!["10:00", "INFO", "main", "first"]);
  }

  #[test]
  fn truncates_long_messages() {
    let buffer = LogBuffer::new();
    let mut writer = buffer.writer();
    let long = "x".repeat(LOG_BUFFER_MAX_MSG_SIZE * 2);
    writer.write_all(long.as_bytes()).unwrap();
    let msgs = buffer.messages();
    assert!(msgs[0][0].ends_with('…'));
    assert!(msgs[0][0].chars().count() <= LOG_BUFFER_MAX_MSG_SIZE + 1);
  }

  #[test]
  fn ring_is_bounded() {
    let buffer = LogBuffer::new();
    let mut writer = buffer.writer();
    for i in 0..LOG_BUFFER_SIZE + 10 {
      writer.write_all(format!("msg {i}").as_bytes()).unwrap();
    }
    let msgs = buffer.messages();
    assert_eq!(msgs.len(), LOG_BUFFER_SIZE);
    assert_eq!(msgs[0][0], format!("msg {}", LOG_BUFFER_SIZE + 9));
  }

  #[test]
  fn chains_to_next_writer() {
    struct Sink(Arc<Mutex<Vec<u8>>>);
    impl Write for Sink {
      fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
      }
      fn flush(&mut self) -> io::Result<()> {
        Ok(())
      }
    }
    let collected = Arc::new(Mutex::new(Vec::new()));
    let buffer = LogBuffer::with_next(Box::new(Sink(collected.clone())));
    buffer.writer().write_all(b"forwarded").unwrap();
    assert_eq!(&*collected.lock().unwrap(), b"forwarded");
  }
}
