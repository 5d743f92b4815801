// Record a session into an in-memory replay service, then play it back.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{drive, test_config, MemoryReplayServer};
use replaystream_core::{
    CheckpointReady, ReplayApi, ReplayVersion, SessionStreamer, StreamReady, StreamerState,
};

fn version() -> ReplayVersion {
    ReplayVersion::new("arena", 3, 4021)
}

fn streamer(server: &Arc<MemoryReplayServer>) -> SessionStreamer {
    let api = ReplayApi::new("http://replay.local").unwrap();
    SessionStreamer::new(test_config(), api, server.clone()).unwrap()
}

/// Records `a`, `b` (with a checkpoint at 2000ms) and `c`, then stops.
async fn record(server: &Arc<MemoryReplayServer>) -> String {
    let mut recorder = streamer(server);
    let mut ready = recorder
        .start_streaming("", "Grand Final", &["alice".to_string()], true, &version())
        .unwrap();
    recorder.header_archive().write_bytes(b"HEADER");
    drive(&mut recorder, |s| !s.has_pending_requests()).await;
    assert_eq!(
        ready.try_recv().unwrap(),
        StreamReady {
            ready: true,
            header_complete: true
        }
    );
    let session = recorder.session().unwrap().to_string();

    recorder.streaming_archive().write_bytes(b"a");
    recorder.update_total_demo_time(1_000);
    recorder.flush_stream().unwrap();

    recorder.streaming_archive().write_bytes(b"b");
    recorder.update_total_demo_time(2_000);
    recorder.checkpoint_archive().unwrap().write_bytes(b"STATE@2000");
    recorder.flush_checkpoint(2_000).unwrap();
    recorder
        .add_or_update_event("mvp", "highlights", 1_200, 1_800, "alice", b"{}")
        .unwrap();

    recorder.streaming_archive().write_bytes(b"c");
    recorder.update_total_demo_time(3_000);
    recorder.stop_streaming().unwrap();
    drive(&mut recorder, |s| s.state() == StreamerState::Idle).await;
    assert!(recorder.last_error().is_none());
    session
}

#[tokio::test]
async fn test_recorded_chunks_are_stored_in_order() {
    let server = Arc::new(MemoryReplayServer::new());
    let session = record(&server).await;

    let stored = server.session(&session).unwrap();
    assert_eq!(stored.friendly_name, "Grand Final");
    assert_eq!(&stored.header[..], b"HEADER");
    assert!(!stored.live);
    assert_eq!(stored.time_ms, 3_000);

    let chunks: Vec<_> = stored.chunks.iter().map(|(b, s, e)| (b.clone(), *s, *e)).collect();
    assert_eq!(chunks.len(), 3);
    assert_eq!((&chunks[0].0[..], chunks[0].1, chunks[0].2), (&b"a"[..], 0, 1_000));
    assert_eq!((&chunks[1].0[..], chunks[1].1, chunks[1].2), (&b"b"[..], 1_000, 2_000));
    assert_eq!((&chunks[2].0[..], chunks[2].1, chunks[2].2), (&b"c"[..], 2_000, 3_000));

    let checkpoint = stored
        .events
        .iter()
        .find(|e| e.record.group == "checkpoint")
        .unwrap();
    assert_eq!(checkpoint.record.meta, "2");
    assert_eq!(checkpoint.record.time1, 2_000);
    assert_eq!(&checkpoint.body[..], b"STATE@2000");

    let highlight = stored
        .events
        .iter()
        .find(|e| e.record.group == "highlights")
        .unwrap();
    assert_eq!(highlight.record.id, format!("{session}_mvp"));
}

#[tokio::test]
async fn test_playback_is_byte_identical() {
    let server = Arc::new(MemoryReplayServer::new());
    let session = record(&server).await;

    let mut player = streamer(&server);
    let mut ready = player
        .start_streaming(&session, "", &["bob".to_string()], false, &version())
        .unwrap();
    drive(&mut player, |s| s.chunk_index() == 3).await;

    assert!(ready.try_recv().unwrap().ready);
    assert!(!player.is_live());
    assert_eq!(player.total_chunks(), 3);
    assert_eq!(player.total_demo_time_ms(), 3_000);
    assert_eq!(&player.header_archive().read_available()[..], b"HEADER");
    assert_eq!(player.checkpoints().len(), 1);
    assert_eq!(&player.streaming_archive().read_available()[..], b"abc");
    assert_eq!(player.stream_time_range(), (0, 3_000));
}

#[tokio::test]
async fn test_seek_resumes_from_checkpoint() {
    let server = Arc::new(MemoryReplayServer::new());
    let session = record(&server).await;

    let mut player = streamer(&server);
    let _ready = player
        .start_streaming(&session, "", &[], false, &version())
        .unwrap();
    drive(&mut player, |s| s.chunk_index() == 3).await;

    let mut done = player.goto_time_ms(2_500).unwrap();
    drive(&mut player, |s| !s.is_loading_checkpoint()).await;
    assert_eq!(
        done.try_recv().unwrap(),
        CheckpointReady {
            success: true,
            residual_ms: 500
        }
    );
    assert_eq!(
        &player.checkpoint_archive().unwrap().read_available()[..],
        b"STATE@2000"
    );

    drive(&mut player, |s| s.is_data_available()).await;
    assert_eq!(player.chunk_index(), 3);
    assert_eq!(&player.streaming_archive().read_available()[..], b"c");
    assert!(player.is_data_available_for_time_range(2_000, 3_000));
}

#[tokio::test]
async fn test_live_session_is_tailed_until_it_finishes() {
    let server = Arc::new(MemoryReplayServer::new());

    let mut recorder = streamer(&server);
    let _ready = recorder
        .start_streaming("", "Live Match", &[], true, &version())
        .unwrap();
    recorder.header_archive().write_bytes(b"H");
    recorder.streaming_archive().write_bytes(b"first");
    recorder.update_total_demo_time(500);
    drive(&mut recorder, |s| s.session().is_some()).await;
    recorder.flush_stream().unwrap();
    drive(&mut recorder, |s| !s.has_pending_requests()).await;
    let session = recorder.session().unwrap().to_string();

    let mut player = streamer(&server);
    let mut ready = player
        .start_streaming(&session, "", &[], false, &version())
        .unwrap();
    drive(&mut player, |s| s.chunk_index() == 1).await;
    assert!(ready.try_recv().unwrap().ready);
    assert!(player.is_live());

    recorder.streaming_archive().write_bytes(b"second");
    recorder.update_total_demo_time(1_000);
    recorder.flush_stream().unwrap();
    drive(&mut recorder, |s| !s.has_pending_requests()).await;

    drive(&mut player, |s| s.chunk_index() == 2).await;
    assert_eq!(&player.streaming_archive().read_available()[..], b"firstsecond");

    recorder.stop_streaming().unwrap();
    drive(&mut recorder, |s| s.state() == StreamerState::Idle).await;

    drive(&mut player, |s| !s.is_live()).await;
    assert!(player.last_error().is_none());
    player.tick(Duration::from_millis(1));
    assert!(player.streaming_archive().at_end());
}

#[tokio::test]
async fn test_enumerate_lists_recorded_sessions() {
    let server = Arc::new(MemoryReplayServer::new());
    let session = record(&server).await;

    let mut browser = streamer(&server);
    let mut list = browser.enumerate_streams(&version(), None, None);
    drive(&mut browser, |s| !s.has_pending_requests()).await;

    let replays = list.try_recv().unwrap().unwrap();
    assert_eq!(replays.len(), 1);
    assert_eq!(replays[0].session_name, session);
    assert_eq!(replays[0].friendly_name, "Grand Final");
    assert_eq!(replays[0].demo_time_ms, 3_000);
    assert!(!replays[0].is_live);
}
