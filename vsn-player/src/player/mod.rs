//! Per-guild playback controller
//!
//! A [`Player`] owns one engine handle and reacts to its lifecycle events:
//! a track start arms the periodic state broadcast, a track end cancels it.
//! Commands are serialised per player; the frame path goes straight to the
//! engine through a [`FrameProvider`] and never takes the command lock.

pub mod loss_counter;
pub mod provider;
pub mod updates;

use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, warn};
use vsn_common::events::{NodeEvent, OutboundMessage, PlayerState};
use vsn_common::time::now_millis;
use vsn_common::NodeConfig;

use crate::codec;
use crate::engine::{
    AudioEngine, AudioTrack, EngineEvent, EngineListener, PcmFilterFactory,
};
use crate::error::{Error, Result};
use crate::filters::FilterChain;
use crate::session::SessionHandle;
use crate::transport::MediaConnection;

pub use loss_counter::{AudioLossCounter, LossSnapshot};
pub use provider::FrameProvider;
pub use updates::UpdateSchedule;

pub struct Player {
    guild_id: String,
    engine: Arc<dyn AudioEngine>,
    session: SessionHandle,
    update_period: Duration,
    loss: Arc<AudioLossCounter>,
    filters: Mutex<Option<Arc<FilterChain>>>,
    updates: Mutex<Option<UpdateSchedule>>,
    commands: Mutex<()>,
    this: Weak<Player>,
}

impl Player {
    /// Create a player and register it for the engine's lifecycle events
    pub fn new(
        guild_id: impl Into<String>,
        engine: Arc<dyn AudioEngine>,
        session: SessionHandle,
        config: &NodeConfig,
    ) -> Arc<Self> {
        let player = Arc::new_cyclic(|this| Player {
            guild_id: guild_id.into(),
            engine,
            session,
            update_period: config.player_update_period(),
            loss: Arc::new(AudioLossCounter::new(config.loss_window())),
            filters: Mutex::new(None),
            updates: Mutex::new(None),
            commands: Mutex::new(()),
            this: this.clone(),
        });

        let listener: Weak<dyn EngineListener> = player.this.clone();
        player.engine.add_listener(listener);
        debug!(guild_id = %player.guild_id, "Player created");
        player
    }

    pub fn guild_id(&self) -> &str {
        &self.guild_id
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    pub fn engine(&self) -> &Arc<dyn AudioEngine> {
        &self.engine
    }

    pub fn loss_counter(&self) -> &Arc<AudioLossCounter> {
        &self.loss
    }

    /// Position of the active track and the current server time
    pub fn get_state(&self) -> PlayerState {
        PlayerState {
            time: now_millis(),
            position: self.engine.playing_track().map(|t| t.position_ms()),
        }
    }

    pub fn playing_track(&self) -> Option<Arc<AudioTrack>> {
        self.engine.playing_track()
    }

    pub fn filters(&self) -> Option<Arc<FilterChain>> {
        self.filters.lock().clone()
    }

    /// Replace the filter chain; installs it only if any filter is enabled
    pub fn set_filters(&self, chain: FilterChain) {
        let _guard = self.commands.lock();
        let chain = Arc::new(chain);

        if chain.is_enabled() {
            debug!(guild_id = %self.guild_id, filters = ?chain.enabled_names(), "Installing filters");
            let factory: Arc<dyn PcmFilterFactory> = chain.clone();
            self.engine.set_filter_factory(Some(factory));
        } else {
            debug!(guild_id = %self.guild_id, "Removing filters");
            self.engine.set_filter_factory(None);
        }
        *self.filters.lock() = Some(chain);
    }

    pub fn set_pause(&self, paused: bool) {
        let _guard = self.commands.lock();
        debug!(guild_id = %self.guild_id, paused, "Setting pause");
        self.engine.set_paused(paused);
    }

    pub fn set_volume(&self, volume: i32) {
        let _guard = self.commands.lock();
        self.engine.set_volume(volume);
    }

    pub fn volume(&self) -> i32 {
        self.engine.volume()
    }

    /// Play `track`, replacing whatever is playing, and announce the new state
    pub fn play(&self, track: AudioTrack) {
        {
            let _guard = self.commands.lock();
            debug!(guild_id = %self.guild_id, track = %track.info().identifier, "Playing");
            self.engine.set_paused(false);
            self.engine.play_track(Arc::new(track));
        }
        self.send_update();
    }

    pub fn stop(&self) {
        let _guard = self.commands.lock();
        debug!(guild_id = %self.guild_id, "Stopping");
        self.engine.stop_track();
    }

    pub fn seek_to(&self, position_ms: u64) -> Result<()> {
        let _guard = self.commands.lock();
        let track = self.engine.playing_track().ok_or_else(|| {
            Error::InvalidState("Can't seek when not playing anything".to_string())
        })?;
        debug!(guild_id = %self.guild_id, position_ms, "Seeking");
        self.engine.seek(&track, position_ms)
    }

    pub fn is_paused(&self) -> bool {
        self.engine.is_paused()
    }

    /// A track is active and not paused
    pub fn is_playing(&self) -> bool {
        self.engine.playing_track().is_some() && !self.engine.is_paused()
    }

    /// Whether a periodic update task is running
    pub fn has_live_updates(&self) -> bool {
        self.updates
            .lock()
            .as_ref()
            .is_some_and(|u| !u.is_cancelled())
    }

    /// Attach a frame provider for this player to `connection`
    pub fn provide_to(&self, connection: &dyn MediaConnection) {
        let provider = FrameProvider::new(Arc::clone(&self.engine), Arc::clone(&self.loss));
        connection.set_audio_sender(Box::new(provider));
    }

    /// End playback for good; the engine reports the track as cleaned up
    pub fn destroy(&self) {
        let _guard = self.commands.lock();
        debug!(guild_id = %self.guild_id, "Destroying player");
        self.engine.destroy();
        self.cancel_updates();
    }

    /// Send the current state to the controller
    pub fn send_update(&self) {
        self.session.send(OutboundMessage::PlayerUpdate {
            guild_id: self.guild_id.clone(),
            state: self.get_state(),
        });
    }

    fn arm_updates(&self) {
        let mut updates = self.updates.lock();
        if updates.as_ref().is_some_and(|u| !u.is_cancelled()) {
            return;
        }
        *updates = Some(UpdateSchedule::start(
            self.session.scheduler(),
            self.update_period,
            self.this.clone(),
        ));
        debug!(guild_id = %self.guild_id, period = ?self.update_period, "Player updates armed");
    }

    fn cancel_updates(&self) {
        if let Some(updates) = self.updates.lock().as_ref() {
            if !updates.is_cancelled() {
                updates.cancel();
                debug!(guild_id = %self.guild_id, "Player updates cancelled");
            }
        }
    }

    fn send_event(&self, event: NodeEvent) {
        self.session.send(OutboundMessage::Event(event));
    }

    fn encoded(&self, track: &AudioTrack) -> String {
        match codec::encode_track(track) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(guild_id = %self.guild_id, "Failed to encode track for event: {}", e);
                String::new()
            }
        }
    }
}

impl EngineListener for Player {
    fn on_event(&self, event: &EngineEvent) {
        match event {
            EngineEvent::TrackStarted { track } => {
                self.loss.on_track_start();
                self.arm_updates();
                self.send_event(NodeEvent::TrackStartEvent {
                    guild_id: self.guild_id.clone(),
                    track: self.encoded(track),
                });
            }
            EngineEvent::TrackEnded { track, reason } => {
                self.loss.on_track_end();
                self.cancel_updates();
                self.send_event(NodeEvent::TrackEndEvent {
                    guild_id: self.guild_id.clone(),
                    track: self.encoded(track),
                    reason: reason.as_str().to_string(),
                });
            }
            EngineEvent::TrackException { track, exception } => {
                self.send_event(NodeEvent::TrackExceptionEvent {
                    guild_id: self.guild_id.clone(),
                    track: self.encoded(track),
                    exception: exception.clone(),
                });
            }
            EngineEvent::TrackStuck {
                track,
                threshold_ms,
            } => {
                self.send_event(NodeEvent::TrackStuckEvent {
                    guild_id: self.guild_id.clone(),
                    track: self.encoded(track),
                    threshold_ms: *threshold_ms,
                });
            }
            EngineEvent::PlayerPaused => self.loss.on_track_end(),
            EngineEvent::PlayerResumed => {
                if self.engine.playing_track().is_some() {
                    self.loss.on_track_start();
                }
            }
        }
    }
}
