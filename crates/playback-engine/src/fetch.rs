//! HTTP fetch job feeding a [`StreamBuffer`].
//!
//! One background thread per stream pipeline: it GETs the locator, copies the body into the
//! buffer, parks while the buffer asks it to suspend, and stops the buffer when the body ends,
//! fails, or the job is cancelled.

use std::io::Read;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::arena::PipelineId;
use crate::backend::BackendEvent;
use crate::stream_buffer::{FlowSignal, StreamBuffer};

/// Configuration for HTTP stream fetching.
#[derive(Clone, Debug)]
pub struct FetchConfig {
    /// Bytes requested from the body per read.
    pub read_size: usize,
    /// Connect timeout for the initial request.
    pub connect_timeout: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            read_size: 8 * 1024,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Handle to a running fetch job. Dropping it cancels the job.
pub struct StreamFetcher {
    cancel: Arc<AtomicBool>,
    buffer: Arc<StreamBuffer>,
}

impl StreamFetcher {
    /// Start fetching `url` into `buffer`.
    ///
    /// Transport failures are reported as [`BackendEvent::StreamError`] for `id`.
    pub fn spawn(
        id: PipelineId,
        url: String,
        buffer: Arc<StreamBuffer>,
        flow: Receiver<FlowSignal>,
        events: Sender<BackendEvent>,
        cfg: FetchConfig,
    ) -> Result<Self> {
        let cancel = Arc::new(AtomicBool::new(false));
        let job = FetchJob {
            url,
            buffer: buffer.clone(),
            flow,
            cancel: cancel.clone(),
            cfg,
        };
        thread::Builder::new()
            .name(format!("fetch-{id}"))
            .spawn(move || {
                let result = job.run();
                job.buffer.stop();
                if let Err(e) = result {
                    tracing::warn!(pipeline = %id, url = %job.url, "stream fetch failed: {e:#}");
                    let _ = events.send(BackendEvent::StreamError {
                        id,
                        message: format!("{e:#}"),
                    });
                }
            })
            .context("spawn fetch thread")?;
        Ok(Self { cancel, buffer })
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
        self.buffer.stop();
    }
}

impl Drop for StreamFetcher {
    fn drop(&mut self) {
        self.cancel();
    }
}

struct FetchJob {
    url: String,
    buffer: Arc<StreamBuffer>,
    flow: Receiver<FlowSignal>,
    cancel: Arc<AtomicBool>,
    cfg: FetchConfig,
}

impl FetchJob {
    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed) || self.buffer.is_stopped()
    }

    fn run(&self) -> Result<()> {
        let started = Instant::now();
        let resp = ureq::get(&self.url)
            .config()
            .timeout_connect(Some(self.cfg.connect_timeout))
            .build()
            .call()
            .map_err(|e| anyhow!("http request failed: {e}"))?;
        tracing::debug!(
            url = %self.url,
            status = resp.status().as_u16(),
            took_ms = started.elapsed().as_millis() as u64,
            "stream connected"
        );

        let (_, body) = resp.into_parts();
        let mut reader = body.into_reader();
        let mut chunk = vec![0u8; self.cfg.read_size.max(1)];
        let mut total = 0u64;
        loop {
            if !self.wait_while_suspended() {
                break;
            }
            let n = reader.read(&mut chunk).context("http read failed")?;
            if n == 0 {
                tracing::debug!(url = %self.url, bytes = total, "stream body finished");
                break;
            }
            total += n as u64;
            self.buffer.write(&chunk[..n]);
        }
        Ok(())
    }

    /// Drain pending flow signals; park while the last one says suspend.
    ///
    /// Returns `false` when the job should end.
    fn wait_while_suspended(&self) -> bool {
        let mut suspended = false;
        while let Ok(signal) = self.flow.try_recv() {
            suspended = signal == FlowSignal::Suspend;
        }
        while suspended {
            if self.is_cancelled() {
                return false;
            }
            match self.flow.recv_timeout(Duration::from_millis(200)) {
                Ok(FlowSignal::Resume) => suspended = false,
                Ok(FlowSignal::Suspend) | Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return false,
            }
        }
        !self.is_cancelled()
    }
}
