//! Outcome of resolving an identifier into tracks
//!
//! Produced by the engine's source managers and rendered for the controller
//! with [`LoadResult::to_response`].

use serde::{Deserialize, Serialize};
use tracing::warn;
use vsn_common::events::{ExceptionInfo, Severity};

use super::track::{AudioTrack, AudioTrackInfo};
use crate::codec::{decode_track, encode_track};
use crate::error::Result;

/// Result of loading an identifier
#[derive(Debug, Clone)]
pub enum LoadResult {
    TrackLoaded(AudioTrack),
    PlaylistLoaded {
        name: String,
        tracks: Vec<AudioTrack>,
        selected: Option<usize>,
    },
    NoMatches,
    LoadFailed(ExceptionInfo),
}

/// `loadType` wire value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoadType {
    TrackLoaded,
    PlaylistLoaded,
    NoMatches,
    LoadFailed,
}

/// Track as shown to the controller: encoded form plus readable info
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackResponse {
    pub track: String,
    pub info: TrackInfoResponse,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackInfoResponse {
    pub source: String,
    pub title: String,
    pub author: String,
    pub length: i64,
    pub identifier: String,
    pub uri: Option<String>,
    pub is_stream: bool,
    pub is_seekable: bool,
    pub position: u64,
}

impl From<&AudioTrack> for TrackInfoResponse {
    fn from(track: &AudioTrack) -> Self {
        let AudioTrackInfo {
            title,
            author,
            length_ms,
            identifier,
            is_stream,
            uri,
            source_name,
        } = track.info().clone();

        Self {
            source: source_name,
            title,
            author,
            length: length_ms,
            identifier,
            uri,
            is_stream,
            is_seekable: !is_stream,
            position: track.position_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistInfo {
    pub name: Option<String>,
    pub selected_track: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadResultResponse {
    pub load_type: LoadType,
    pub playlist_info: PlaylistInfo,
    pub tracks: Vec<TrackResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<ExceptionInfo>,
}

impl LoadResult {
    pub fn load_type(&self) -> LoadType {
        match self {
            LoadResult::TrackLoaded(_) => LoadType::TrackLoaded,
            LoadResult::PlaylistLoaded { .. } => LoadType::PlaylistLoaded,
            LoadResult::NoMatches => LoadType::NoMatches,
            LoadResult::LoadFailed(_) => LoadType::LoadFailed,
        }
    }

    /// Failure for an identifier a source claimed but could not open
    pub fn failed(message: impl Into<String>, severity: Severity, cause: impl Into<String>) -> Self {
        LoadResult::LoadFailed(ExceptionInfo {
            message: Some(message.into()),
            severity,
            cause: cause.into(),
        })
    }

    /// Tracks in play order, honoring a playlist's selected track
    pub fn into_tracks(self) -> Vec<AudioTrack> {
        match self {
            LoadResult::TrackLoaded(track) => vec![track],
            LoadResult::PlaylistLoaded {
                mut tracks,
                selected,
                ..
            } => {
                if let Some(index) = selected.filter(|i| *i < tracks.len()) {
                    tracks.rotate_left(index);
                }
                tracks
            }
            LoadResult::NoMatches | LoadResult::LoadFailed(_) => Vec::new(),
        }
    }

    /// Render for the controller; tracks that cannot be encoded are skipped
    pub fn to_response(&self) -> LoadResultResponse {
        let (tracks, playlist_info, exception): (&[AudioTrack], _, _) = match self {
            LoadResult::TrackLoaded(track) => (
                std::slice::from_ref(track),
                PlaylistInfo {
                    name: None,
                    selected_track: None,
                },
                None,
            ),
            LoadResult::PlaylistLoaded {
                name,
                tracks,
                selected,
            } => (
                tracks.as_slice(),
                PlaylistInfo {
                    name: Some(name.clone()),
                    selected_track: *selected,
                },
                None,
            ),
            LoadResult::NoMatches => (
                &[][..],
                PlaylistInfo {
                    name: None,
                    selected_track: None,
                },
                None,
            ),
            LoadResult::LoadFailed(exception) => (
                &[][..],
                PlaylistInfo {
                    name: None,
                    selected_track: None,
                },
                Some(exception.clone()),
            ),
        };

        let tracks = tracks
            .iter()
            .filter_map(|track| match encode_track(track) {
                Ok(encoded) => Some(TrackResponse {
                    track: encoded,
                    info: TrackInfoResponse::from(track),
                }),
                Err(e) => {
                    warn!(
                        "Failed to encode track {}, skipping: {}",
                        track.info().identifier,
                        e
                    );
                    None
                }
            })
            .collect();

        LoadResultResponse {
            load_type: self.load_type(),
            playlist_info,
            tracks,
            exception,
        }
    }
}

/// Decode a track string into its readable form
pub fn describe_track(encoded: &str) -> Result<TrackResponse> {
    let track = decode_track(encoded)?;
    Ok(TrackResponse {
        track: encoded.to_string(),
        info: TrackInfoResponse::from(&track),
    })
}
