//! Shared helpers for vsn-player integration tests
//!
//! - SpyEngine: scripted engine recording every call
//! - audio_generator: deterministic WAV files for the local source
//! - track and message helpers

#![allow(dead_code)]

pub mod audio_generator;
pub mod spy_engine;

pub use spy_engine::{SpyEngine, SpyFactory};

use std::sync::Arc;
use tokio::sync::broadcast;
use vsn_common::events::{NodeEvent, OutboundMessage};
use vsn_common::NodeConfig;
use vsn_player::engine::{AudioTrack, AudioTrackInfo};
use vsn_player::SessionContext;

/// Seekable test track of `length_ms`
pub fn test_track(identifier: &str, length_ms: i64) -> AudioTrack {
    AudioTrack::new(
        AudioTrackInfo {
            title: format!("Title {}", identifier),
            author: "Test Author".to_string(),
            length_ms,
            identifier: identifier.to_string(),
            is_stream: false,
            uri: Some(format!("https://example.com/{}", identifier)),
            source_name: "test".to_string(),
        },
        vec![1, 2, 3],
    )
}

/// Session backed by spy engines, using the current runtime as scheduler
pub fn spy_session(config: NodeConfig) -> (Arc<SessionContext>, Arc<SpyFactory>) {
    let factory = Arc::new(SpyFactory::default());
    let session = SessionContext::new(
        factory.clone(),
        config,
        tokio::runtime::Handle::current(),
    );
    (session, factory)
}

/// Everything currently queued on `rx`
pub fn drain(rx: &mut broadcast::Receiver<OutboundMessage>) -> Vec<OutboundMessage> {
    let mut messages = Vec::new();
    while let Ok(message) = rx.try_recv() {
        messages.push(message);
    }
    messages
}

/// Short labels for assertions: "update", "start", "end:REASON", ...
pub fn labels(messages: &[OutboundMessage]) -> Vec<String> {
    messages
        .iter()
        .map(|m| match m {
            OutboundMessage::PlayerUpdate { .. } => "update".to_string(),
            OutboundMessage::Event(NodeEvent::TrackStartEvent { .. }) => "start".to_string(),
            OutboundMessage::Event(NodeEvent::TrackEndEvent { reason, .. }) => {
                format!("end:{}", reason)
            }
            OutboundMessage::Event(NodeEvent::TrackExceptionEvent { .. }) => {
                "exception".to_string()
            }
            OutboundMessage::Event(NodeEvent::TrackStuckEvent { .. }) => "stuck".to_string(),
            OutboundMessage::Event(NodeEvent::WebSocketClosedEvent { .. }) => {
                "closed".to_string()
            }
            OutboundMessage::Stats { .. } => "stats".to_string(),
        })
        .collect()
}

pub fn count_updates(messages: &[OutboundMessage]) -> usize {
    messages
        .iter()
        .filter(|m| matches!(m, OutboundMessage::PlayerUpdate { .. }))
        .count()
}
