//! Per-tick frame adapter between the engine and the transport

use std::sync::Arc;

use super::loss_counter::AudioLossCounter;
use crate::engine::{AudioEngine, MutableAudioFrame, MAX_CHUNK_SIZE};
use crate::transport::OpusFrameProvider;

/// Pulls one frame per tick from the engine into a reusable buffer
///
/// `can_provide` counts the tick as delivered or lost. A frame it pulls is
/// only valid until the next `can_provide`; nothing is carried across ticks.
pub struct FrameProvider {
    engine: Arc<dyn AudioEngine>,
    loss: Arc<AudioLossCounter>,
    frame: MutableAudioFrame,
    ready: bool,
}

impl FrameProvider {
    pub fn new(engine: Arc<dyn AudioEngine>, loss: Arc<AudioLossCounter>) -> Self {
        Self {
            engine,
            loss,
            frame: MutableAudioFrame::with_capacity(MAX_CHUNK_SIZE),
            ready: false,
        }
    }
}

impl OpusFrameProvider for FrameProvider {
    fn can_provide(&mut self) -> bool {
        self.ready = self.engine.provide(&mut self.frame);
        if self.ready {
            self.loss.on_success();
        } else {
            self.loss.on_loss();
        }
        self.ready
    }

    fn retrieve_opus_frame(&mut self, dest: &mut Vec<u8>) {
        if !std::mem::take(&mut self.ready) {
            return;
        }
        dest.extend_from_slice(self.frame.data());
    }
}
