//! Async adapters for PTY I/O.
//!
//! These adapters convert blocking PTY read/write operations into
//! async-friendly channel-based communication to avoid blocking
//! the tokio runtime.

use std::io::{Read, Write};
use tokio::sync::mpsc;
use tracing::{debug, error, trace};

/// Async reader for PTY output.
///
/// Runs in a blocking thread and sends output chunks through a channel.
/// The channel closing is the end-of-stream signal for the consumer.
pub struct AsyncPtyReader<R: Read + Send + 'static> {
    reader: R,
    tx: mpsc::Sender<Vec<u8>>,
    buffer_size: usize,
}

impl<R: Read + Send + 'static> AsyncPtyReader<R> {
    /// Create a new AsyncPtyReader.
    pub fn new(reader: R, tx: mpsc::Sender<Vec<u8>>) -> Self {
        Self {
            reader,
            tx,
            buffer_size: 4096,
        }
    }

    /// Create with custom buffer size.
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Start the reader loop in a blocking thread.
    ///
    /// Returns when the PTY is closed (read returns 0 or EIO), when the
    /// receiver is dropped, or on an unrecoverable read error.
    pub async fn run(self) {
        let buffer_size = self.buffer_size;
        let mut reader = self.reader;
        let tx = self.tx;

        let result = tokio::task::spawn_blocking(move || {
            let mut buf = vec![0u8; buffer_size];

            loop {
                match reader.read(&mut buf) {
                    Ok(0) => {
                        debug!("PTY reader: EOF");
                        break;
                    }
                    Ok(n) => {
                        trace!("PTY reader: read {} bytes", n);
                        if tx.blocking_send(buf[..n].to_vec()).is_err() {
                            debug!("PTY reader: channel closed");
                            break;
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        // EIO on Unix means the slave side was closed
                        #[cfg(unix)]
                        if e.raw_os_error() == Some(libc::EIO) {
                            debug!("PTY reader: PTY closed (EIO)");
                            break;
                        }

                        if e.kind() == std::io::ErrorKind::BrokenPipe {
                            debug!("PTY reader: broken pipe");
                            break;
                        }

                        error!("PTY reader error: {}", e);
                        break;
                    }
                }
            }
        })
        .await;

        if let Err(e) = result {
            error!("PTY reader task panicked: {}", e);
        }
    }
}

/// Async writer for PTY input.
///
/// Receives data through a channel and writes to the PTY in a blocking thread.
/// Dropping every sender closes the writer, which releases the PTY input side.
pub struct AsyncPtyWriter<W: Write + Send + 'static> {
    writer: W,
    rx: mpsc::Receiver<Vec<u8>>,
}

impl<W: Write + Send + 'static> AsyncPtyWriter<W> {
    /// Create a new AsyncPtyWriter.
    pub fn new(writer: W, rx: mpsc::Receiver<Vec<u8>>) -> Self {
        Self { writer, rx }
    }

    /// Start the writer loop in a blocking thread.
    ///
    /// Returns the writer once the channel is closed, or `None` if a write
    /// failed.
    pub async fn run(self) -> Option<W> {
        let mut writer = self.writer;
        let mut rx = self.rx;

        let result = tokio::task::spawn_blocking(move || {
            while let Some(data) = rx.blocking_recv() {
                trace!("PTY writer: writing {} bytes", data.len());
                if let Err(e) = writer.write_all(&data).and_then(|_| writer.flush()) {
                    if e.kind() == std::io::ErrorKind::BrokenPipe {
                        debug!("PTY writer: broken pipe");
                    } else {
                        error!("PTY writer error: {}", e);
                    }
                    return None;
                }
            }
            debug!("PTY writer: channel closed");
            Some(writer)
        })
        .await;

        match result {
            Ok(writer) => writer,
            Err(e) => {
                error!("PTY writer task panicked: {}", e);
                None
            }
        }
    }
}

/// Splits a byte stream into UTF-8 text frames without breaking multi-byte
/// sequences that straddle two reads.
///
/// Bytes that can never form valid UTF-8 are replaced with U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and return all text that is complete so far.
    pub fn push(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);

        let complete = match std::str::from_utf8(&self.pending) {
            Ok(_) => self.pending.len(),
            // An incomplete sequence at the very end: hold it back.
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(_) => trailing_incomplete_start(&self.pending),
        };

        let rest = self.pending.split_off(complete);
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending = rest;
        text
    }

    /// Flush whatever is still buffered.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(text)
    }
}

/// Index where a possibly-incomplete trailing UTF-8 sequence begins, or the
/// buffer length when the tail is not a truncated sequence.
fn trailing_incomplete_start(bytes: &[u8]) -> usize {
    let len = bytes.len();
    for back in 1..=3.min(len) {
        let idx = len - back;
        let b = bytes[idx];
        if b & 0b1100_0000 == 0b1000_0000 {
            continue;
        }
        let needed = match b {
            0xC2..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF4 => 4,
            _ => return len,
        };
        return if needed > back { idx } else { len };
    }
    len
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[tokio::test]
    async fn test_async_reader_basic() {
        let data = b"Hello, World!\nTest line 2\n";
        let cursor = Cursor::new(data.to_vec());

        let (tx, mut rx) = mpsc::channel(32);
        let reader = AsyncPtyReader::new(cursor, tx);

        let handle = tokio::spawn(reader.run());

        let mut received = Vec::new();
        while let Ok(Some(chunk)) =
            tokio::time::timeout(Duration::from_millis(200), rx.recv()).await
        {
            received.extend(chunk);
        }

        let _ = tokio::time::timeout(Duration::from_millis(200), handle).await;

        assert_eq!(received, data);
    }

    #[tokio::test]
    async fn test_async_reader_eof_closes_channel() {
        let cursor = Cursor::new(Vec::new());
        let (tx, mut rx) = mpsc::channel(32);
        let reader = AsyncPtyReader::new(cursor, tx);

        let handle = tokio::spawn(reader.run());

        let result = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
        assert!(result.unwrap().is_none());

        let _ = handle.await;
    }

    #[tokio::test]
    async fn test_reader_channel_closed() {
        let cursor = Cursor::new(b"Some data that won't be fully read".to_vec());
        let (tx, rx) = mpsc::channel(1);
        let reader = AsyncPtyReader::new(cursor, tx).with_buffer_size(4);

        drop(rx);

        let handle = tokio::spawn(reader.run());
        let result = tokio::time::timeout(Duration::from_millis(500), handle).await;
        assert!(result.is_ok());
    }

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_async_writer_preserves_order() {
        let buf = SharedBuf::default();
        let (tx, rx) = mpsc::channel(32);
        let writer = AsyncPtyWriter::new(buf.clone(), rx);

        tx.send(b"Hello".to_vec()).await.unwrap();
        tx.send(b", World!".to_vec()).await.unwrap();
        drop(tx);

        let returned = tokio::time::timeout(Duration::from_secs(2), writer.run())
            .await
            .unwrap();
        assert!(returned.is_some());
        assert_eq!(buf.0.lock().unwrap().as_slice(), b"Hello, World!");
    }

    #[test]
    fn test_utf8_carry_ascii() {
        let mut carry = Utf8Carry::new();
        assert_eq!(carry.push(b"plain"), "plain");
        assert!(carry.finish().is_none());
    }

    #[test]
    fn test_utf8_carry_split_sequence() {
        let bytes = "héllo →".as_bytes();
        // split inside the three-byte arrow
        let (a, b) = bytes.split_at(bytes.len() - 1);

        let mut carry = Utf8Carry::new();
        let first = carry.push(a);
        assert_eq!(first, "héllo ");
        let second = carry.push(b);
        assert_eq!(second, "→");
    }

    #[test]
    fn test_utf8_carry_invalid_bytes_replaced() {
        let mut carry = Utf8Carry::new();
        let text = carry.push(&[b'a', 0xFF, b'b']);
        assert_eq!(text, "a\u{FFFD}b");
    }

    #[test]
    fn test_utf8_carry_invalid_then_truncated() {
        let mut carry = Utf8Carry::new();
        let arrow = "→".as_bytes();
        let mut chunk = vec![0xFF, b'x'];
        chunk.extend_from_slice(&arrow[..2]);

        assert_eq!(carry.push(&chunk), "\u{FFFD}x");
        assert_eq!(carry.push(&arrow[2..]), "→");
    }

    #[test]
    fn test_utf8_carry_finish_flushes_partial() {
        let mut carry = Utf8Carry::new();
        let arrow = "→".as_bytes();
        assert_eq!(carry.push(&arrow[..1]), "");
        assert_eq!(carry.finish(), Some("\u{FFFD}".to_string()));
    }
}
