//! Media transport seam
//!
//! The voice transport pulls frames on its own 20 ms cadence through an
//! [`OpusFrameProvider`]. Real gateways live outside this crate;
//! [`LocalConnection`] drives a provider in-process and hands each frame to
//! a [`FrameSink`].

use parking_lot::Mutex;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::engine::{FRAME_DURATION_MS, MAX_CHUNK_SIZE};
use crate::error::Result;

/// Two-step frame pull used by the transport each tick
pub trait OpusFrameProvider: Send {
    /// Try to pull the next frame; false means nothing to send this tick
    fn can_provide(&mut self) -> bool;

    /// Append the frame pulled by the preceding `can_provide` to `dest`
    fn retrieve_opus_frame(&mut self, dest: &mut Vec<u8>);
}

/// A voice connection accepting one audio sender
pub trait MediaConnection: Send + Sync {
    /// Replace the connection's frame provider
    fn set_audio_sender(&self, provider: Box<dyn OpusFrameProvider>);
}

/// Destination for frames pulled by a [`LocalConnection`]
pub trait FrameSink: Send {
    fn write_frame(&mut self, frame: &[u8]) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Discards frames, counting bytes
#[derive(Debug, Default)]
pub struct NullSink {
    pub bytes: u64,
}

impl FrameSink for NullSink {
    fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        self.bytes += frame.len() as u64;
        Ok(())
    }
}

/// Appends raw frame bytes to a file
pub struct FileSink {
    writer: BufWriter<File>,
}

impl FileSink {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        info!("Writing frames to {}", path.display());
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }
}

impl FrameSink for FileSink {
    fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        self.writer.write_all(frame)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct ConnectionCounters {
    sent: AtomicU64,
    silent: AtomicU64,
}

/// In-process connection pulling frames on a fixed 20 ms interval
pub struct LocalConnection {
    provider: Arc<Mutex<Option<Box<dyn OpusFrameProvider>>>>,
    sink: Arc<Mutex<Box<dyn FrameSink>>>,
    counters: Arc<ConnectionCounters>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LocalConnection {
    pub fn new(sink: Box<dyn FrameSink>) -> Self {
        Self {
            provider: Arc::new(Mutex::new(None)),
            sink: Arc::new(Mutex::new(sink)),
            counters: Arc::new(ConnectionCounters::default()),
            task: Mutex::new(None),
        }
    }

    /// Start pulling frames on `handle`; no-op when already running
    pub fn start(&self, handle: &Handle) {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }

        let provider = Arc::clone(&self.provider);
        let sink = Arc::clone(&self.sink);
        let counters = Arc::clone(&self.counters);

        *task = Some(handle.spawn(async move {
            let mut ticker = interval(Duration::from_millis(FRAME_DURATION_MS));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut buf = Vec::with_capacity(MAX_CHUNK_SIZE);

            loop {
                ticker.tick().await;
                buf.clear();

                let sent = match provider.lock().as_mut() {
                    Some(p) => {
                        let ready = p.can_provide();
                        if ready {
                            p.retrieve_opus_frame(&mut buf);
                        }
                        ready
                    }
                    None => false,
                };

                if !sent {
                    counters.silent.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
                counters.sent.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = sink.lock().write_frame(&buf) {
                    warn!("Frame sink failed, stopping connection: {}", e);
                    break;
                }
            }
        }));
        debug!("Local connection started");
    }

    /// Stop pulling and flush the sink
    pub fn stop(&self) -> Result<()> {
        if let Some(task) = self.task.lock().take() {
            task.abort();
            debug!("Local connection stopped");
        }
        self.sink.lock().flush()
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn has_sender(&self) -> bool {
        self.provider.lock().is_some()
    }

    /// Frames handed to the sink
    pub fn frames_sent(&self) -> u64 {
        self.counters.sent.load(Ordering::Relaxed)
    }

    /// Ticks with nothing to send
    pub fn frames_silent(&self) -> u64 {
        self.counters.silent.load(Ordering::Relaxed)
    }
}

impl MediaConnection for LocalConnection {
    fn set_audio_sender(&self, provider: Box<dyn OpusFrameProvider>) {
        *self.provider.lock() = Some(provider);
    }
}

impl Drop for LocalConnection {
    fn drop(&mut self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}
