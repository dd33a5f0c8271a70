//! Decode worker thread
//!
//! Each playing track gets one worker that pulls PCM from its source and
//! pushes 20 ms chunks into a lock-free ring buffer. The frame path only
//! pops from the consumer side.
//!
//! Seeks bump an epoch; chunks carry the epoch they were decoded under so
//! the consumer can drop audio decoded before the seek.

use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::source::PcmSource;
use super::FRAME_SAMPLES;
use crate::error::Result;

/// How long an idle worker sleeps waiting for space or commands
const IDLE_WAIT: Duration = Duration::from_millis(5);

/// Unit passed from worker to engine
#[derive(Debug)]
pub(crate) enum DecodedChunk {
    Pcm { epoch: u32, samples: Vec<f32> },
    End { epoch: u32 },
    Failed { epoch: u32, message: String },
}

impl DecodedChunk {
    pub(crate) fn epoch(&self) -> u32 {
        match self {
            DecodedChunk::Pcm { epoch, .. }
            | DecodedChunk::End { epoch }
            | DecodedChunk::Failed { epoch, .. } => *epoch,
        }
    }
}

enum WorkerCommand {
    Seek { position_ms: u64, epoch: u32 },
}

/// Handle to a running decode worker; stops the thread when dropped
pub(crate) struct DecodeWorker {
    stop: Arc<AtomicBool>,
    commands: Sender<WorkerCommand>,
}

impl DecodeWorker {
    /// Spawn a worker buffering up to `capacity` chunks ahead
    pub(crate) fn spawn(
        name: &str,
        source: Box<dyn PcmSource>,
        capacity: usize,
    ) -> Result<(Self, HeapCons<DecodedChunk>)> {
        let (producer, consumer) = HeapRb::<DecodedChunk>::new(capacity.max(1)).split();
        let (commands, command_rx) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));

        let mut worker = WorkerLoop {
            source,
            producer,
            commands: command_rx,
            stop: Arc::clone(&stop),
            outbox: VecDeque::new(),
            block: Vec::with_capacity(FRAME_SAMPLES * 2),
            epoch: 0,
            done: false,
        };

        std::thread::Builder::new()
            .name(format!("vsn-decode-{}", name))
            .spawn(move || worker.run())?;

        Ok((Self { stop, commands }, consumer))
    }

    /// Ask the worker to continue from `position_ms` under a new epoch
    pub(crate) fn seek(&self, position_ms: u64, epoch: u32) {
        if self
            .commands
            .send(WorkerCommand::Seek { position_ms, epoch })
            .is_err()
        {
            debug!("Decode worker already gone, seek dropped");
        }
    }

    pub(crate) fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }
}

impl Drop for DecodeWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

struct WorkerLoop {
    source: Box<dyn PcmSource>,
    producer: HeapProd<DecodedChunk>,
    commands: Receiver<WorkerCommand>,
    stop: Arc<AtomicBool>,
    /// Chunks decoded but not yet accepted by the ring buffer
    outbox: VecDeque<DecodedChunk>,
    block: Vec<f32>,
    epoch: u32,
    done: bool,
}

impl WorkerLoop {
    fn run(&mut self) {
        debug!("Decode worker started");

        while !self.stop.load(Ordering::Acquire) {
            loop {
                match self.commands.try_recv() {
                    Ok(command) => self.apply(command),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => return,
                }
            }

            self.flush_outbox();

            if self.done || !self.outbox.is_empty() {
                match self.commands.recv_timeout(IDLE_WAIT) {
                    Ok(command) => self.apply(command),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => return,
                }
                continue;
            }

            self.decode_step();
        }

        debug!("Decode worker stopped");
    }

    fn apply(&mut self, command: WorkerCommand) {
        match command {
            WorkerCommand::Seek { position_ms, epoch } => {
                self.epoch = epoch;
                self.outbox.clear();
                self.block.clear();
                self.done = false;

                if let Err(e) = self.source.seek(position_ms) {
                    warn!("Seek to {}ms failed: {}", position_ms, e);
                    self.outbox.push_back(DecodedChunk::Failed {
                        epoch,
                        message: e.to_string(),
                    });
                    self.done = true;
                }
            }
        }
    }

    fn flush_outbox(&mut self) {
        while let Some(chunk) = self.outbox.pop_front() {
            if let Err(chunk) = self.producer.try_push(chunk) {
                self.outbox.push_front(chunk);
                break;
            }
        }
    }

    fn decode_step(&mut self) {
        let epoch = self.epoch;
        match self.source.read(&mut self.block) {
            Ok(0) => {
                if !self.block.is_empty() {
                    let samples = std::mem::take(&mut self.block);
                    self.outbox.push_back(DecodedChunk::Pcm { epoch, samples });
                }
                self.outbox.push_back(DecodedChunk::End { epoch });
                self.done = true;
            }
            Ok(_) => {
                while self.block.len() >= FRAME_SAMPLES {
                    let samples: Vec<f32> = self.block.drain(..FRAME_SAMPLES).collect();
                    self.outbox.push_back(DecodedChunk::Pcm { epoch, samples });
                }
            }
            Err(e) => {
                warn!("Decoding failed: {}", e);
                self.outbox.push_back(DecodedChunk::Failed {
                    epoch,
                    message: e.to_string(),
                });
                self.done = true;
            }
        }
    }
}
