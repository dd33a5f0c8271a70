//! Track metadata and handle

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Length reported for live streams
pub const UNKNOWN_LENGTH_MS: i64 = i64::MAX;

/// Static track metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioTrackInfo {
    pub title: String,
    pub author: String,
    #[serde(rename = "length")]
    pub length_ms: i64,
    pub identifier: String,
    pub is_stream: bool,
    pub uri: Option<String>,
    pub source_name: String,
}

impl AudioTrackInfo {
    pub fn is_seekable(&self) -> bool {
        !self.is_stream
    }
}

/// A playable track
///
/// `payload` is source-specific data needed to reopen the track; it is
/// carried opaquely through the track codec. The position is updated by the
/// engine as frames are produced.
#[derive(Debug)]
pub struct AudioTrack {
    info: AudioTrackInfo,
    payload: Vec<u8>,
    position_ms: AtomicU64,
}

impl AudioTrack {
    pub fn new(info: AudioTrackInfo, payload: Vec<u8>) -> Self {
        Self {
            info,
            payload,
            position_ms: AtomicU64::new(0),
        }
    }

    pub fn info(&self) -> &AudioTrackInfo {
        &self.info
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn position_ms(&self) -> u64 {
        self.position_ms.load(Ordering::Relaxed)
    }

    pub fn set_position_ms(&self, position_ms: u64) {
        self.position_ms.store(position_ms, Ordering::Relaxed);
    }

    /// Duplicate the track with its position reset
    ///
    /// A track handle can only be played once per engine; loading the same
    /// track again goes through this.
    pub fn make_clone(&self) -> Self {
        Self::new(self.info.clone(), self.payload.clone())
    }
}

impl Clone for AudioTrack {
    fn clone(&self) -> Self {
        let track = self.make_clone();
        track.set_position_ms(self.position_ms());
        track
    }
}

impl PartialEq for AudioTrack {
    fn eq(&self, other: &Self) -> bool {
        self.info == other.info
            && self.payload == other.payload
            && self.position_ms() == other.position_ms()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> AudioTrackInfo {
        AudioTrackInfo {
            title: "Song".to_string(),
            author: "Artist".to_string(),
            length_ms: 180_000,
            identifier: "/music/song.flac".to_string(),
            is_stream: false,
            uri: Some("/music/song.flac".to_string()),
            source_name: "local".to_string(),
        }
    }

    #[test]
    fn test_make_clone_resets_position() {
        let track = AudioTrack::new(info(), vec![1, 2]);
        track.set_position_ms(5000);

        let fresh = track.make_clone();
        assert_eq!(fresh.position_ms(), 0);
        assert_eq!(fresh.payload(), &[1, 2]);

        let copy = track.clone();
        assert_eq!(copy.position_ms(), 5000);
        assert_eq!(copy, track);
    }

    #[test]
    fn test_info_wire_names() {
        let value = serde_json::to_value(info()).unwrap();
        assert_eq!(value["length"], 180_000);
        assert_eq!(value["isStream"], false);
        assert_eq!(value["sourceName"], "local");
    }
}
