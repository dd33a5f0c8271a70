//! Player state machine, broadcast scheduling and frame delivery

mod helpers;

use helpers::spy_engine::SPY_FRAME;
use helpers::{count_updates, drain, labels, spy_session, test_track};
use std::time::Duration;
use vsn_common::NodeConfig;
use vsn_player::transport::{MediaConnection, OpusFrameProvider};
use vsn_player::{Error, FilterChain};

fn config() -> NodeConfig {
    NodeConfig {
        player_update_interval: 1,
        ..NodeConfig::default()
    }
}

/// Captures the provider handed to it
#[derive(Default)]
struct CaptureConnection {
    provider: parking_lot::Mutex<Option<Box<dyn OpusFrameProvider>>>,
}

impl MediaConnection for CaptureConnection {
    fn set_audio_sender(&self, provider: Box<dyn OpusFrameProvider>) {
        *self.provider.lock() = Some(provider);
    }
}

#[tokio::test(start_paused = true)]
async fn test_idle_player_has_no_position() {
    let (session, _) = spy_session(config());
    let player = session.get_player("1");

    assert!(!player.is_playing());
    assert!(player.playing_track().is_none());
    assert_eq!(player.get_state().position, None);
    assert!(!player.has_live_updates());

    let json = serde_json::to_value(player.get_state()).unwrap();
    assert!(json.get("position").is_none());
    assert!(json.get("time").is_some());
}

#[tokio::test(start_paused = true)]
async fn test_play_then_stop_scenario() {
    let (session, factory) = spy_session(config());
    let mut rx = session.subscribe();
    let player = session.get_player("1");
    let engine = factory.last().unwrap();

    player.play(test_track("a", 60_000));
    assert!(player.is_playing());
    assert!(player.has_live_updates());
    assert_eq!(engine.calls(), vec!["pause:false", "play:a"]);

    let messages = drain(&mut rx);
    assert_eq!(labels(&messages), vec!["start", "update"]);

    player.stop();
    assert!(!player.is_playing());
    assert!(!player.has_live_updates());
    assert_eq!(labels(&drain(&mut rx)), vec!["end:STOPPED"]);
}

#[tokio::test(start_paused = true)]
async fn test_replacing_track_keeps_one_schedule() {
    let (session, _) = spy_session(config());
    let mut rx = session.subscribe();
    let player = session.get_player("1");

    player.play(test_track("a", 60_000));
    player.play(test_track("b", 60_000));

    assert!(player.has_live_updates());
    assert_eq!(
        labels(&drain(&mut rx)),
        vec!["start", "update", "end:REPLACED", "start", "update"]
    );
    assert_eq!(
        player.playing_track().unwrap().info().identifier,
        "b".to_string()
    );

    // Only the second schedule emits
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(count_updates(&drain(&mut rx)), 1);
    tokio::time::sleep(Duration::from_millis(1_000)).await;
    assert_eq!(count_updates(&drain(&mut rx)), 1);
}

#[tokio::test(start_paused = true)]
async fn test_periodic_updates_until_track_end() {
    let (session, factory) = spy_session(config());
    let mut rx = session.subscribe();
    let player = session.get_player("1");
    let engine = factory.last().unwrap();

    player.play(test_track("a", 60_000));
    tokio::time::sleep(Duration::from_millis(3_500)).await;

    // One out-of-band update plus ticks at 0s, 1s, 2s and 3s
    assert_eq!(count_updates(&drain(&mut rx)), 5);

    engine.finish();
    assert_eq!(labels(&drain(&mut rx)), vec!["end:FINISHED"]);
    assert!(!player.has_live_updates());

    tokio::time::sleep(Duration::from_millis(3_000)).await;
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_seek_on_idle_player_fails() {
    let (session, factory) = spy_session(config());
    let player = session.get_player("1");
    let engine = factory.last().unwrap();

    match player.seek_to(1_000) {
        Err(Error::InvalidState(message)) => {
            assert_eq!(message, "Can't seek when not playing anything")
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(engine.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_seek_delegates_to_engine() {
    let (session, factory) = spy_session(config());
    let player = session.get_player("1");
    let engine = factory.last().unwrap();

    player.play(test_track("a", 10_000));
    player.seek_to(4_000).unwrap();
    assert_eq!(player.get_state().position, Some(4_000));

    // Clamping is the engine's call
    player.seek_to(99_000).unwrap();
    assert_eq!(player.get_state().position, Some(10_000));
    assert!(engine.calls().contains(&"seek:99000".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_pause_keeps_schedule() {
    let (session, _) = spy_session(config());
    let player = session.get_player("1");

    player.play(test_track("a", 60_000));
    player.set_pause(true);
    assert!(player.is_paused());
    assert!(!player.is_playing());
    assert!(player.has_live_updates());

    player.set_pause(false);
    assert!(player.is_playing());
}

#[tokio::test(start_paused = true)]
async fn test_volume_delegates() {
    let (session, factory) = spy_session(config());
    let player = session.get_player("1");
    player.set_volume(5_000);
    assert_eq!(player.volume(), 1_000);
    assert_eq!(factory.last().unwrap().calls(), vec!["volume:5000"]);
}

#[tokio::test(start_paused = true)]
async fn test_filters_install_only_when_enabled() {
    let (session, factory) = spy_session(config());
    let player = session.get_player("1");
    let engine = factory.last().unwrap();

    player.set_filters(FilterChain::parse(r#"{"volume": 0.5}"#).unwrap());
    assert!(engine.filter_factory().is_some());
    assert!(player.filters().unwrap().is_enabled());

    player.set_filters(FilterChain::parse(r#"{"volume": 1.0}"#).unwrap());
    assert!(engine.filter_factory().is_none());
    assert!(player.filters().is_some());

    assert_eq!(engine.calls(), vec!["filters:true", "filters:false"]);
}

#[tokio::test(start_paused = true)]
async fn test_session_pause_suppresses_updates_not_audio() {
    let (session, _) = spy_session(config());
    let mut rx = session.subscribe();
    let player = session.get_player("1");
    let connection = CaptureConnection::default();
    player.provide_to(&connection);

    player.play(test_track("a", 60_000));
    tokio::time::sleep(Duration::from_millis(10)).await;
    drain(&mut rx);

    session.pause();
    tokio::time::sleep(Duration::from_millis(3_000)).await;
    assert!(drain(&mut rx).is_empty());
    assert_eq!(session.handle().queued_len(), 0);

    let mut provider = connection.provider.lock().take().unwrap();
    let mut buf = Vec::new();
    assert!(provider.can_provide());
    provider.retrieve_opus_frame(&mut buf);
    assert_eq!(buf, SPY_FRAME.to_vec());

    session.resume();
    assert_eq!(labels(&drain(&mut rx)), vec!["update"]);
}

#[tokio::test(start_paused = true)]
async fn test_frame_provider_counts_loss() {
    let (session, factory) = spy_session(config());
    let player = session.get_player("1");
    let engine = factory.last().unwrap();
    let connection = CaptureConnection::default();
    player.provide_to(&connection);
    let mut provider = connection.provider.lock().take().unwrap();
    let mut buf = Vec::new();

    // Idle: loss
    assert!(!provider.can_provide());

    player.play(test_track("a", 60_000));
    for _ in 0..3 {
        assert!(provider.can_provide());
        provider.retrieve_opus_frame(&mut buf);
    }

    engine.set_starving(true);
    assert!(!provider.can_provide());
    // Nothing pulled, nothing copied
    provider.retrieve_opus_frame(&mut buf);

    let snapshot = player.loss_counter().snapshot();
    assert_eq!(snapshot.success, 3);
    assert_eq!(snapshot.loss, 2);
    assert_eq!(buf.len(), SPY_FRAME.len() * 3);
}

#[tokio::test(start_paused = true)]
async fn test_provided_frame_counts_without_retrieval() {
    let (session, _) = spy_session(config());
    let player = session.get_player("1");
    let connection = CaptureConnection::default();
    player.provide_to(&connection);
    let mut provider = connection.provider.lock().take().unwrap();

    player.play(test_track("a", 60_000));
    assert!(provider.can_provide());

    let snapshot = player.loss_counter().snapshot();
    assert_eq!(snapshot.success, 1);
    assert_eq!(snapshot.loss, 0);
}

#[tokio::test(start_paused = true)]
async fn test_destroy_reports_cleanup() {
    let (session, _) = spy_session(config());
    let mut rx = session.subscribe();
    let player = session.get_player("1");

    player.play(test_track("a", 60_000));
    drain(&mut rx);

    assert!(session.destroy("1"));
    assert!(!session.destroy("1"));
    assert_eq!(labels(&drain(&mut rx)), vec!["end:CLEANUP"]);
    assert!(!player.has_live_updates());
    assert!(session.existing_player("1").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_track_events_carry_encoded_track() {
    let (session, _) = spy_session(config());
    let mut rx = session.subscribe();
    let player = session.get_player("7");

    player.play(test_track("a", 60_000));
    let start = drain(&mut rx).into_iter().next().unwrap();
    let json = serde_json::to_value(&start).unwrap();

    assert_eq!(json["op"], "event");
    assert_eq!(json["type"], "TrackStartEvent");
    assert_eq!(json["guildId"], "7");
    let decoded = vsn_player::codec::decode_track(json["track"].as_str().unwrap()).unwrap();
    assert_eq!(decoded.info().identifier, "a");
}
