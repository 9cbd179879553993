use std::{
    io::{self, BufRead, Write},
    sync::{Arc, Mutex, MutexGuard},
};

use crate::cancel::CancelFlag;

/// Longest inbound line kept, terminator excluded. Anything past it is
/// dropped up to the next newline.
pub const MAX_LINE_LEN: usize = 1024;

/// Outbound half of a line-oriented link, shareable between tasks.
///
/// Every call to [`SharedLineWriter::write_line`] holds the lock for exactly
/// one terminated line, so concurrent writers never interleave inside a
/// record.
#[derive(Clone)]
pub struct SharedLineWriter {
    inner: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl SharedLineWriter {
    pub fn new<W: Write + Send + 'static>(writer: W) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    pub fn write_line(&self, line: &str) -> io::Result<()> {
        let mut writer = self.lock()?;
        write_record(&mut *writer, line)
    }

    /// Writes `line` only if `cancel` is still clear, deciding under the
    /// same lock that orders every other line. Returns whether it was
    /// written.
    ///
    /// A writer that sets the flag and then sends its own line can
    /// therefore never get that line out ahead of this one.
    pub fn write_line_unless(&self, cancel: &CancelFlag, line: &str) -> io::Result<bool> {
        let mut writer = self.lock()?;
        if cancel.is_signaled() {
            return Ok(false);
        }

        write_record(&mut *writer, line)?;
        Ok(true)
    }

    fn lock(&self) -> io::Result<MutexGuard<'_, Box<dyn Write + Send>>> {
        self.inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "Line writer lock poisoned"))
    }
}

fn write_record(writer: &mut impl Write, line: &str) -> io::Result<()> {
    let mut record = String::with_capacity(line.len() + 1);
    record.push_str(line);
    record.push('\n');

    writer.write_all(record.as_bytes())?;
    writer.flush()
}

#[derive(Debug, PartialEq, Eq)]
pub enum ReadEvent {
    Line(String),
    /// The first [`MAX_LINE_LEN`] bytes of a line that ran past the limit.
    Truncated(String),
    /// The read timed out before a full line arrived.
    Idle,
    /// End of stream. No more lines will follow.
    Closed,
}

/// Inbound half of a line-oriented link whose reads may time out.
///
/// Bytes of a partially received line survive a timeout and are completed by
/// the next read. Lines are held to [`MAX_LINE_LEN`] bytes.
pub struct LineReader<R> {
    inner: R,
    pending: Vec<u8>,
    /// Dropping the rest of a truncated line.
    skipping: bool,
}

impl<R: BufRead> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            pending: Vec::new(),
            skipping: false,
        }
    }

    pub fn next_event(&mut self) -> io::Result<ReadEvent> {
        loop {
            let available = match self.inner.fill_buf() {
                Ok(available) => available,
                Err(e)
                    if e.kind() == io::ErrorKind::TimedOut
                        || e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::Interrupted =>
                {
                    return Ok(ReadEvent::Idle);
                }
                Err(e) => return Err(e),
            };

            if available.is_empty() {
                // The unterminated tail before EOF still counts as a line.
                if self.pending.is_empty() {
                    return Ok(ReadEvent::Closed);
                }
                return Ok(ReadEvent::Line(self.take_line()));
            }

            let newline = available.iter().position(|&b| b == b'\n');
            let content = newline.unwrap_or(available.len());
            let used = newline.map_or(available.len(), |at| at + 1);

            if self.skipping {
                self.inner.consume(used);
                self.skipping = newline.is_none();
                continue;
            }

            let room = MAX_LINE_LEN - self.pending.len();
            if content > room {
                self.pending.extend_from_slice(&available[..room]);
                self.inner.consume(used);
                self.skipping = newline.is_none();
                return Ok(ReadEvent::Truncated(self.take_line()));
            }

            self.pending.extend_from_slice(&available[..used]);
            self.inner.consume(used);
            if newline.is_some() {
                return Ok(ReadEvent::Line(self.take_line()));
            }
        }
    }

    fn take_line(&mut self) -> String {
        let bytes = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&bytes)
            .trim_end_matches(['\r', '\n'])
            .to_string()
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Read};

    use super::*;

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Hands out one chunk per read, with a timeout between chunks.
    struct Chunked {
        chunks: Vec<Option<&'static [u8]>>,
    }

    impl Read for Chunked {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.chunks.is_empty() {
                return Ok(0);
            }
            match self.chunks.remove(0) {
                Some(chunk) => {
                    buf[..chunk.len()].copy_from_slice(chunk);
                    Ok(chunk.len())
                }
                None => Err(io::Error::new(io::ErrorKind::TimedOut, "timed out")),
            }
        }
    }

    #[test]
    fn writes_terminated_lines() {
        let buffer = SharedBuffer::default();
        let writer = SharedLineWriter::new(buffer.clone());

        writer.write_line("first").unwrap();
        writer.clone().write_line("second").unwrap();

        assert_eq!(&*buffer.0.lock().unwrap(), b"first\nsecond\n");
    }

    #[test]
    fn concurrent_writers_never_interleave() {
        let buffer = SharedBuffer::default();
        let writer = SharedLineWriter::new(buffer.clone());

        let handles: Vec<_> = ["aaaaaaaa", "bbbbbbbb", "cccccccc"]
            .into_iter()
            .map(|line| {
                let writer = writer.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        writer.write_line(line).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let written = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        assert_eq!(written.lines().count(), 600);
        assert!(
            written
                .lines()
                .all(|line| ["aaaaaaaa", "bbbbbbbb", "cccccccc"].contains(&line))
        );
    }

    #[test]
    fn conditional_write_skips_once_cancelled() {
        let buffer = SharedBuffer::default();
        let writer = SharedLineWriter::new(buffer.clone());
        let cancel = CancelFlag::new();

        assert!(writer.write_line_unless(&cancel, "move").unwrap());
        cancel.trigger();
        assert!(!writer.write_line_unless(&cancel, "move again").unwrap());

        assert_eq!(&*buffer.0.lock().unwrap(), b"move\n");
    }

    /// Sets the flag while the first line is on its way out and queues a
    /// stop line from another thread, the way the watcher does.
    struct StopMidWrite {
        buffer: SharedBuffer,
        cancel: CancelFlag,
        writer: Arc<std::sync::OnceLock<SharedLineWriter>>,
        stopper: Arc<Mutex<Option<std::thread::JoinHandle<()>>>>,
    }

    impl Write for StopMidWrite {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.cancel.trigger() {
                let writer = self.writer.get().unwrap().clone();
                *self.stopper.lock().unwrap() = Some(std::thread::spawn(move || {
                    writer.write_line("stop").unwrap();
                }));
            }
            self.buffer.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn line_written_before_cancel_lands_ahead_of_the_stop() {
        let buffer = SharedBuffer::default();
        let cancel = CancelFlag::new();
        let slot = Arc::new(std::sync::OnceLock::new());
        let stopper = Arc::new(Mutex::new(None));

        let writer = SharedLineWriter::new(StopMidWrite {
            buffer: buffer.clone(),
            cancel: cancel.clone(),
            writer: slot.clone(),
            stopper: stopper.clone(),
        });
        assert!(slot.set(writer.clone()).is_ok());

        assert!(writer.write_line_unless(&cancel, "move").unwrap());
        stopper.lock().unwrap().take().unwrap().join().unwrap();

        assert!(cancel.is_signaled());
        assert_eq!(&*buffer.0.lock().unwrap(), b"move\nstop\n");
    }

    #[test]
    fn reads_lines_then_closes() {
        let mut reader = LineReader::new(Cursor::new(b"STATUS 1,2\r\nEMERGENCY STOP\ntail".to_vec()));

        assert_eq!(reader.next_event().unwrap(), ReadEvent::Line("STATUS 1,2".into()));
        assert_eq!(reader.next_event().unwrap(), ReadEvent::Line("EMERGENCY STOP".into()));
        assert_eq!(reader.next_event().unwrap(), ReadEvent::Line("tail".into()));
        assert_eq!(reader.next_event().unwrap(), ReadEvent::Closed);
    }

    #[test]
    fn partial_line_survives_timeout() {
        let chunked = Chunked {
            chunks: vec![Some(b"STAT"), None, Some(b"US 5,6\n"), None],
        };
        let mut reader = LineReader::new(io::BufReader::new(chunked));

        assert_eq!(reader.next_event().unwrap(), ReadEvent::Idle);
        assert_eq!(reader.next_event().unwrap(), ReadEvent::Line("STATUS 5,6".into()));
        assert_eq!(reader.next_event().unwrap(), ReadEvent::Idle);
        assert_eq!(reader.next_event().unwrap(), ReadEvent::Closed);
    }

    #[test]
    fn overlong_line_is_cut_and_the_rest_dropped() {
        let mut input = vec![b'x'; MAX_LINE_LEN + 40];
        input.extend_from_slice(b"\nSTATUS 1,2\n");
        let mut reader = LineReader::new(io::BufReader::with_capacity(64, Cursor::new(input)));

        match reader.next_event().unwrap() {
            ReadEvent::Truncated(head) => assert_eq!(head, "x".repeat(MAX_LINE_LEN)),
            other => panic!("expected a truncated line, got {other:?}"),
        }
        assert_eq!(reader.next_event().unwrap(), ReadEvent::Line("STATUS 1,2".into()));
        assert_eq!(reader.next_event().unwrap(), ReadEvent::Closed);
    }

    #[test]
    fn line_of_exactly_the_limit_is_kept() {
        let mut input = vec![b'y'; MAX_LINE_LEN];
        input.push(b'\n');
        let mut reader = LineReader::new(io::BufReader::with_capacity(100, Cursor::new(input)));

        assert_eq!(
            reader.next_event().unwrap(),
            ReadEvent::Line("y".repeat(MAX_LINE_LEN))
        );
        assert_eq!(reader.next_event().unwrap(), ReadEvent::Closed);
    }
}
