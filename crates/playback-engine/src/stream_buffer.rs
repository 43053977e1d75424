//! Byte buffer bridging a network fetch job into a decode stage.
//!
//! Unread bytes always sit at the front of a fixed allocation; the write cursor is the number
//! of unread bytes and reads shift the remainder down. A write that would reach capacity drops
//! everything unread and starts over at 0 (an audible glitch, never an error).
//!
//! Flow control toward the producer is level-triggered over a crossbeam channel:
//! - unread bytes above the high-water mark send [`FlowSignal::Suspend`]
//! - draining below the resume threshold while suspended sends [`FlowSignal::Resume`]

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use crossbeam_channel::Sender;
use symphonia::core::io::MediaSource;

use crate::config::StreamBufferConfig;

/// Signal sent to the producer feeding a [`StreamBuffer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlowSignal {
    Suspend,
    Resume,
}

struct Inner {
    data: Vec<u8>,
    cursor: usize,
    stopped: bool,
    buffering: bool,
    suspended: bool,
    wraps: u64,
}

pub struct StreamBuffer {
    capacity: usize,
    min_fill: usize,
    high_water: usize,
    resume_below: usize,
    inner: Mutex<Inner>,
    data_ready: Condvar,
    flow: Sender<FlowSignal>,
}

impl StreamBuffer {
    pub fn new(cfg: &StreamBufferConfig, flow: Sender<FlowSignal>) -> Self {
        let capacity = cfg.capacity.max(2);
        let high_water = cfg.high_water.clamp(1, capacity - 1);
        // The producer is suspended above high water, so the initial fill must be reachable
        // below it and a drained buffer must always resume the producer.
        Self {
            capacity,
            min_fill: cfg.min_fill.clamp(1, high_water),
            high_water,
            resume_below: cfg.resume_below.clamp(1, high_water),
            inner: Mutex::new(Inner {
                data: vec![0; capacity],
                cursor: 0,
                stopped: false,
                buffering: true,
                suspended: false,
                wraps: 0,
            }),
            data_ready: Condvar::new(),
            flow,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Unread bytes; always below capacity.
    pub fn cursor(&self) -> usize {
        self.lock().cursor
    }

    /// `true` until the minimum fill has been reached once.
    pub fn is_buffering(&self) -> bool {
        self.lock().buffering
    }

    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    /// Number of times a write overflowed and reset the cursor.
    pub fn wraps(&self) -> u64 {
        self.lock().wraps
    }

    /// Unread bytes relative to the minimum fill, clamped to `[0, 1]`.
    pub fn fill_ratio(&self) -> f32 {
        let cursor = self.lock().cursor;
        (cursor as f32 / self.min_fill as f32).clamp(0.0, 1.0)
    }

    /// Append bytes from the producer. Never blocks.
    pub fn write(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let mut g = self.lock();
        if g.stopped {
            return;
        }

        let mut bytes = bytes;
        if g.cursor + bytes.len() >= self.capacity {
            g.wraps += 1;
            tracing::warn!(
                unread = g.cursor,
                incoming = bytes.len(),
                capacity = self.capacity,
                "stream buffer overflow; dropping unread bytes"
            );
            g.cursor = 0;
            if bytes.len() >= self.capacity {
                bytes = &bytes[bytes.len() - (self.capacity - 1)..];
            }
        }

        let start = g.cursor;
        g.data[start..start + bytes.len()].copy_from_slice(bytes);
        g.cursor += bytes.len();

        if g.buffering && g.cursor >= self.min_fill {
            g.buffering = false;
            tracing::debug!(bytes = g.cursor, "stream buffer filled");
        }
        let suspend = g.cursor > self.high_water && !g.suspended;
        if suspend {
            g.suspended = true;
        }
        drop(g);

        if suspend {
            let _ = self.flow.send(FlowSignal::Suspend);
        }
        self.data_ready.notify_all();
    }

    /// Producer is done (end of body, error, or cancellation).
    ///
    /// Readers drain what is left and then see end-of-stream.
    pub fn stop(&self) {
        let mut g = self.lock();
        g.stopped = true;
        drop(g);
        self.data_ready.notify_all();
        // A suspended producer must wake up to notice the stop.
        let _ = self.flow.send(FlowSignal::Resume);
    }

    /// Copy unread bytes into `out` without waiting; returns 0 when nothing is readable.
    pub fn read_available(&self, out: &mut [u8]) -> usize {
        let mut g = self.lock();
        self.take(&mut g, out)
    }

    /// Copy unread bytes into `out`, waiting for data.
    ///
    /// Waits while the initial fill is in progress. Returns 0 only once the buffer is stopped
    /// and drained.
    pub fn read_blocking(&self, out: &mut [u8]) -> usize {
        if out.is_empty() {
            return 0;
        }
        let mut g = self.lock();
        loop {
            let readable = !g.buffering || g.stopped;
            if readable && g.cursor > 0 {
                return self.take(&mut g, out);
            }
            if g.stopped {
                return 0;
            }
            g = self
                .data_ready
                .wait_timeout(g, Duration::from_millis(100))
                .map(|(g, _)| g)
                .unwrap_or_else(|e| e.into_inner().0);
        }
    }

    fn take(&self, g: &mut MutexGuard<'_, Inner>, out: &mut [u8]) -> usize {
        let n = out.len().min(g.cursor);
        if n == 0 {
            return 0;
        }
        out[..n].copy_from_slice(&g.data[..n]);
        let cursor = g.cursor;
        g.data.copy_within(n..cursor, 0);
        g.cursor -= n;

        if g.suspended && g.cursor < self.resume_below {
            g.suspended = false;
            let _ = self.flow.send(FlowSignal::Resume);
        }
        n
    }
}

/// Read side of a [`StreamBuffer`] handed to the decoder.
///
/// Blocks the decode thread (never the control thread) while waiting for bytes. Not seekable.
pub struct StreamReader {
    buffer: Arc<StreamBuffer>,
    pos: u64,
}

impl StreamReader {
    pub fn new(buffer: Arc<StreamBuffer>) -> Self {
        Self { buffer, pos: 0 }
    }
}

impl Read for StreamReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let n = self.buffer.read_blocking(out);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for StreamReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match pos {
            SeekFrom::Current(0) => Ok(self.pos),
            SeekFrom::Start(p) if p == self.pos => Ok(self.pos),
            _ => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "stream source is not seekable",
            )),
        }
    }
}

impl MediaSource for StreamReader {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{Receiver, unbounded};
    use std::thread;

    fn buffer(capacity: usize, min_fill: usize) -> (StreamBuffer, Receiver<FlowSignal>) {
        let (tx, rx) = unbounded();
        let cfg = StreamBufferConfig {
            capacity,
            min_fill,
            high_water: capacity * 3 / 4,
            resume_below: capacity / 4,
        };
        (StreamBuffer::new(&cfg, tx), rx)
    }

    #[test]
    fn oversized_write_wraps_instead_of_failing() {
        let (buf, _rx) = buffer(100, 10);
        buf.write(&[7; 101]);
        assert_eq!(buf.wraps(), 1);
        assert!(buf.cursor() < buf.capacity());
        assert_eq!(buf.cursor(), 99);
    }

    #[test]
    fn fill_ratio_counts_only_bytes_after_wrap() {
        let (buf, _rx) = buffer(100, 40);
        buf.write(&[1; 60]);
        assert_eq!(buf.fill_ratio(), 1.0);
        // 60 + 40 reaches capacity: the 60 unread bytes are dropped.
        buf.write(&[2; 40]);
        assert_eq!(buf.cursor(), 40);

        let (buf, _rx) = buffer(100, 40);
        buf.write(&[1; 90]);
        buf.write(&[2; 20]);
        assert_eq!(buf.cursor(), 20);
        assert!((buf.fill_ratio() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn buffering_clears_once_min_fill_reached() {
        let (buf, _rx) = buffer(100, 30);
        buf.write(&[0; 10]);
        assert!(buf.is_buffering());
        assert!((buf.fill_ratio() - 10.0 / 30.0).abs() < 1e-6);
        buf.write(&[0; 20]);
        assert!(!buf.is_buffering());
        let mut out = [0u8; 30];
        assert_eq!(buf.read_available(&mut out), 30);
        assert!(!buf.is_buffering());
        assert_eq!(buf.fill_ratio(), 0.0);
    }

    #[test]
    fn reads_preserve_order_across_partial_reads() {
        let (buf, _rx) = buffer(64, 1);
        buf.write(b"hello ");
        buf.write(b"world");
        let mut out = [0u8; 4];
        assert_eq!(buf.read_available(&mut out), 4);
        assert_eq!(&out, b"hell");
        let mut rest = [0u8; 16];
        let n = buf.read_available(&mut rest);
        assert_eq!(&rest[..n], b"o world");
    }

    #[test]
    fn suspend_and_resume_follow_thresholds() {
        let (buf, rx) = buffer(100, 10);
        buf.write(&[0; 70]);
        assert!(rx.try_recv().is_err());
        buf.write(&[0; 10]);
        assert_eq!(rx.try_recv(), Ok(FlowSignal::Suspend));
        // Still above high water: no duplicate suspend.
        buf.write(&[0; 5]);
        assert!(rx.try_recv().is_err());

        let mut out = [0u8; 40];
        buf.read_available(&mut out);
        assert!(rx.try_recv().is_err());
        buf.read_available(&mut out);
        assert_eq!(rx.try_recv(), Ok(FlowSignal::Resume));
    }

    #[test]
    fn stopped_and_drained_reads_as_eof() {
        let (buf, _rx) = buffer(64, 32);
        buf.write(b"abc");
        buf.stop();
        let mut reader = StreamReader::new(Arc::new(buf));
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"abc");
        assert!(!reader.is_seekable());
        assert!(reader.seek(SeekFrom::Start(0)).is_err());
        assert_eq!(reader.seek(SeekFrom::Current(0)).unwrap(), 3);
    }

    #[test]
    fn reader_waits_for_initial_fill() {
        let (buf, _rx) = buffer(64, 8);
        let buf = Arc::new(buf);
        let mut reader = StreamReader::new(buf.clone());
        let handle = thread::spawn(move || {
            let mut out = [0u8; 16];
            reader.read(&mut out).unwrap()
        });
        buf.write(&[1; 4]);
        buf.write(&[1; 4]);
        assert_eq!(handle.join().unwrap(), 8);
    }

    #[test]
    fn min_fill_above_high_water_still_becomes_readable() {
        let (tx, rx) = unbounded();
        let cfg = StreamBufferConfig {
            capacity: 100,
            min_fill: 99,
            high_water: 75,
            resume_below: 37,
        };
        let buf = Arc::new(StreamBuffer::new(&cfg, tx));
        let reader = buf.clone();
        let handle = thread::spawn(move || {
            let mut out = [0u8; 128];
            reader.read_blocking(&mut out)
        });

        // The producer stops writing once suspended.
        buf.write(&[3; 76]);
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)), Ok(FlowSignal::Suspend));
        assert_eq!(handle.join().unwrap(), 76);
        assert!(!buf.is_buffering());
        assert_eq!(rx.try_recv(), Ok(FlowSignal::Resume));
    }

    #[test]
    fn zero_resume_threshold_still_resumes_when_drained() {
        let (tx, rx) = unbounded();
        let cfg = StreamBufferConfig {
            capacity: 100,
            min_fill: 10,
            high_water: 50,
            resume_below: 0,
        };
        let buf = StreamBuffer::new(&cfg, tx);
        buf.write(&[1; 60]);
        assert_eq!(rx.try_recv(), Ok(FlowSignal::Suspend));
        let mut out = [0u8; 60];
        assert_eq!(buf.read_available(&mut out), 60);
        assert_eq!(rx.try_recv(), Ok(FlowSignal::Resume));
    }

    #[test]
    fn writes_after_stop_are_ignored() {
        let (buf, rx) = buffer(64, 8);
        buf.stop();
        assert_eq!(rx.try_recv(), Ok(FlowSignal::Resume));
        buf.write(&[1; 4]);
        assert_eq!(buf.cursor(), 0);
    }
}
