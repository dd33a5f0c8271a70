//! Controller session scope
//!
//! A [`SessionContext`] owns the players of one controller connection and
//! the outbound message channel. Players only see the narrow
//! [`SessionHandle`]: the session-wide pause flag, the outbound sink and the
//! scheduler their update tasks run on.
//!
//! While a session is paused (controller disconnected, waiting to resume)
//! outbound messages are queued and replayed in order on resume. A paused
//! session that is not resumed within the configured timeout shuts down.

use futures::Stream;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info};
use uuid::Uuid;
use vsn_common::events::{FrameStats, NodeEvent, OutboundMessage};
use vsn_common::NodeConfig;

use crate::engine::EngineFactory;
use crate::player::Player;

struct SessionShared {
    paused: AtomicBool,
    outbound: broadcast::Sender<OutboundMessage>,
    /// Messages held back while paused; its lock also orders pause changes
    queued: Mutex<VecDeque<OutboundMessage>>,
    scheduler: Handle,
}

/// What a player needs from its session
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<SessionShared>,
}

impl SessionHandle {
    pub fn new(scheduler: Handle, capacity: usize) -> Self {
        let (outbound, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(SessionShared {
                paused: AtomicBool::new(false),
                outbound,
                queued: Mutex::new(VecDeque::new()),
                scheduler,
            }),
        }
    }

    /// Session-wide suspension of outbound traffic
    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::Acquire)
    }

    /// Send to the controller, or queue while the session is paused
    ///
    /// Sending is lossy: with no subscriber the message is dropped.
    pub fn send(&self, message: OutboundMessage) {
        let mut queued = self.inner.queued.lock();
        if self.inner.paused.load(Ordering::Acquire) {
            queued.push_back(message);
            return;
        }
        let _ = self.inner.outbound.send(message);
    }

    /// Runtime that periodic player tasks are spawned on
    pub fn scheduler(&self) -> &Handle {
        &self.inner.scheduler
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OutboundMessage> {
        self.inner.outbound.subscribe()
    }

    pub fn queued_len(&self) -> usize {
        self.inner.queued.lock().len()
    }

    fn pause(&self) {
        let _queued = self.inner.queued.lock();
        self.inner.paused.store(true, Ordering::Release);
    }

    /// Unpause and flush the queue; returns how many messages were replayed
    fn resume(&self) -> usize {
        let mut queued = self.inner.queued.lock();
        self.inner.paused.store(false, Ordering::Release);
        let count = queued.len();
        for message in queued.drain(..) {
            let _ = self.inner.outbound.send(message);
        }
        count
    }
}

pub struct SessionContext {
    id: Uuid,
    handle: SessionHandle,
    engines: Arc<dyn EngineFactory>,
    config: NodeConfig,
    players: RwLock<HashMap<String, Arc<Player>>>,
    started: Instant,
    resume_timeout: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    this: Weak<SessionContext>,
}

impl SessionContext {
    pub fn new(engines: Arc<dyn EngineFactory>, config: NodeConfig, scheduler: Handle) -> Arc<Self> {
        let handle = SessionHandle::new(scheduler, config.event_buffer);
        let session = Arc::new_cyclic(|this| SessionContext {
            id: Uuid::new_v4(),
            handle,
            engines,
            config,
            players: RwLock::new(HashMap::new()),
            started: Instant::now(),
            resume_timeout: Mutex::new(None),
            closed: AtomicBool::new(false),
            this: this.clone(),
        });
        info!(session_id = %session.id, "Session opened");
        session
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OutboundMessage> {
        self.handle.subscribe()
    }

    /// Outbound messages as a stream; lagged messages are skipped
    pub fn subscribe_stream(&self) -> impl Stream<Item = OutboundMessage> {
        use futures::StreamExt;

        BroadcastStream::new(self.handle.subscribe())
            .filter_map(|message| futures::future::ready(message.ok()))
    }

    /// Player for `guild_id`, created on first use
    pub fn get_player(&self, guild_id: &str) -> Arc<Player> {
        if let Some(player) = self.players.read().get(guild_id) {
            return Arc::clone(player);
        }

        let mut players = self.players.write();
        let player = players.entry(guild_id.to_string()).or_insert_with(|| {
            Player::new(
                guild_id,
                self.engines.create_engine(),
                self.handle.clone(),
                &self.config,
            )
        });
        Arc::clone(player)
    }

    pub fn existing_player(&self, guild_id: &str) -> Option<Arc<Player>> {
        self.players.read().get(guild_id).cloned()
    }

    pub fn players(&self) -> Vec<Arc<Player>> {
        self.players.read().values().cloned().collect()
    }

    pub fn playing_players(&self) -> usize {
        self.players.read().values().filter(|p| p.is_playing()).count()
    }

    /// Tear down and forget the player for `guild_id`
    pub fn destroy(&self, guild_id: &str) -> bool {
        let removed = self.players.write().remove(guild_id);
        match removed {
            Some(player) => {
                player.destroy();
                debug!(session_id = %self.id, guild_id, "Player destroyed");
                true
            }
            None => false,
        }
    }

    /// Suspend outbound traffic until [`resume`](Self::resume)
    ///
    /// Shuts the session down if it is not resumed in time.
    pub fn pause(&self) {
        if self.handle.is_paused() {
            return;
        }
        self.handle.pause();
        info!(
            session_id = %self.id,
            timeout_secs = self.config.resume_timeout_secs,
            "Session paused"
        );

        let timeout = Duration::from_secs(self.config.resume_timeout_secs);
        let session = self.this.clone();
        let task = self.handle.scheduler().spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(session) = session.upgrade() {
                if session.is_paused() {
                    info!(session_id = %session.id, "Session was not resumed in time");
                    session.shutdown();
                }
            }
        });
        if let Some(old) = self.resume_timeout.lock().replace(task) {
            old.abort();
        }
    }

    /// Replay queued messages, then announce every player's state
    pub fn resume(&self) {
        if let Some(task) = self.resume_timeout.lock().take() {
            task.abort();
        }
        let replayed = self.handle.resume();
        info!(session_id = %self.id, replayed, "Session resumed");

        for player in self.players() {
            player.send_update();
        }
    }

    pub fn is_paused(&self) -> bool {
        self.handle.is_paused()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Average last-window delivery over players with usable loss data
    pub fn frame_stats(&self) -> Option<FrameStats> {
        let mut count = 0i64;
        let (mut sent, mut nulled, mut deficit) = (0i64, 0i64, 0i64);

        for player in self.players().iter().filter(|p| p.is_playing()) {
            let loss = player.loss_counter();
            if !loss.is_data_usable() {
                continue;
            }
            let last = loss.last_window();
            count += 1;
            sent += last.success as i64;
            nulled += last.loss as i64;
            deficit += loss.expected_per_window() as i64 - last.total() as i64;
        }

        (count > 0).then(|| FrameStats {
            sent: sent / count,
            nulled: nulled / count,
            deficit: deficit / count,
        })
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn stats_message(&self) -> OutboundMessage {
        OutboundMessage::Stats {
            players: self.players.read().len(),
            playing_players: self.playing_players(),
            uptime: self.uptime().as_millis() as u64,
            frame_stats: self.frame_stats(),
        }
    }

    /// Report that the voice connection for `guild_id` closed
    pub fn voice_closed(&self, guild_id: &str, code: u16, reason: &str, by_remote: bool) {
        info!(session_id = %self.id, guild_id, code, by_remote, "Voice connection closed: {}", reason);
        self.handle.send(OutboundMessage::Event(NodeEvent::WebSocketClosedEvent {
            guild_id: guild_id.to_string(),
            code,
            reason: reason.to_string(),
            by_remote,
        }));
    }

    /// Destroy every player; the session cannot be used afterwards
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(task) = self.resume_timeout.lock().take() {
            task.abort();
        }

        let players: Vec<Arc<Player>> = self.players.write().drain().map(|(_, p)| p).collect();
        for player in &players {
            player.destroy();
        }
        info!(session_id = %self.id, players = players.len(), "Session shut down");
    }
}
