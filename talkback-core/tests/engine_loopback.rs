//! End-to-end engine runs against injected devices and the loopback transport.

mod common;

use approx::assert_abs_diff_eq;
use common::{wait_for, Mic, Speaker, TIMEOUT};
use talkback_core::{
    EngineBackends, EngineConfig, ErrorKind, LoopbackTransport, SessionState, TalkbackEngine,
    TalkbackError,
};

const FRAME: usize = 320;

fn config() -> EngineConfig {
    EngineConfig {
        frame_len: FRAME,
        tick_ms: 2,
        ..EngineConfig::default()
    }
}

fn start(transport: LoopbackTransport) -> (TalkbackEngine, Mic, Speaker) {
    let mic = Mic::at(16_000);
    let speaker = Speaker::default();
    let engine = TalkbackEngine::new(config());
    engine
        .start(EngineBackends {
            input: Box::new(mic.clone()),
            output: Box::new(speaker.clone()),
            transport: Box::new(transport),
        })
        .expect("engine start");
    (engine, mic, speaker)
}

fn wait_ready(engine: &TalkbackEngine) {
    wait_for("session ready", TIMEOUT, || {
        engine.session_state() == SessionState::Ready
    });
}

#[tokio::test(flavor = "multi_thread")]
async fn microphone_audio_comes_back_gapless() {
    let (engine, mic, speaker) = start(LoopbackTransport::new());
    wait_for("open status", TIMEOUT, || {
        engine.ui_state().status == "Session opened. Ready to record."
    });

    engine.start_recording().unwrap();
    let ui = engine.ui_state();
    assert!(ui.is_recording);
    assert_eq!(ui.status, "Recording... say something!");

    mic.speak(&[0.25; FRAME * 3]);
    wait_for("three echoed units", TIMEOUT, || engine.diagnostics().units_scheduled == 3);

    let placed = speaker.placed();
    // 320 samples at 16 kHz = 20 ms, whatever the output rate.
    for unit in &placed {
        assert_abs_diff_eq!(unit.duration, 0.02, epsilon = 1e-6);
    }
    for pair in placed.windows(2) {
        assert_abs_diff_eq!(pair[1].start, pair[0].start + pair[0].duration, epsilon = 1e-9);
    }

    let diag = engine.diagnostics();
    assert_eq!(diag.frames_sent, 3);
    assert_eq!(diag.chunks_received, 3);
    assert_eq!(diag.units_scheduled, 3);
    assert_eq!(diag.decode_errors, 0);

    engine.stop_recording().unwrap();
    let ui = engine.ui_state();
    assert!(!ui.is_recording);
    assert_eq!(ui.status, "Recording stopped. Ready to start again.");
    assert_eq!(mic.releases(), 1);

    engine.shutdown().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn recording_needs_a_ready_session() {
    let (engine, mic, _speaker) = start(LoopbackTransport::new().hanging());
    wait_for("connecting", TIMEOUT, || {
        engine.session_state() == SessionState::Connecting
    });

    let err = engine.start_recording().unwrap_err();
    assert!(matches!(
        err,
        TalkbackError::Send {
            state: SessionState::Connecting
        }
    ));
    let ui = engine.ui_state();
    assert_eq!(ui.error, "Session not ready. Please wait or reset.");
    assert!(!ui.is_recording);
    assert_eq!(mic.state.lock().opens, 0);

    engine.shutdown().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn barge_in_flushes_scheduled_audio() {
    let (engine, mic, speaker) = start(LoopbackTransport::new().with_interrupt_every(2));
    wait_ready(&engine);
    speaker.set_now(1.0);
    engine.start_recording().unwrap();

    // The second echo carries audio and the interruption flag together.
    mic.speak(&[0.1; FRAME * 2]);
    wait_for("interruption", TIMEOUT, || engine.diagnostics().interruptions == 1);

    assert_eq!(speaker.placed().len(), 2);
    assert_eq!(speaker.stopped().len(), 2);
    assert_eq!(engine.diagnostics().units_flushed, 2);

    // The next response starts at the device clock, not after the cut audio.
    speaker.set_now(1.01);
    mic.speak(&[0.1; FRAME]);
    wait_for("third unit", TIMEOUT, || speaker.placed().len() == 3);
    assert_abs_diff_eq!(speaker.placed()[2].start, 1.01, epsilon = 1e-9);

    engine.shutdown().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn finished_units_are_retired() {
    let (engine, mic, speaker) = start(LoopbackTransport::new().with_interrupt_every(2));
    wait_ready(&engine);
    engine.start_recording().unwrap();

    mic.speak(&[0.1; FRAME]);
    wait_for("first unit", TIMEOUT, || speaker.placed().len() == 1);
    speaker.finish(speaker.placed()[0].voice);
    wait_for("completion", TIMEOUT, || engine.diagnostics().units_finished == 1);

    mic.speak(&[0.1; FRAME]);
    wait_for("interruption", TIMEOUT, || engine.diagnostics().interruptions == 1);
    // Only the unit still in flight is cut.
    assert_eq!(speaker.stopped(), vec![speaker.placed()[1].voice]);

    engine.shutdown().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn reset_stops_recording_and_reconnects() {
    let (engine, mic, speaker) = start(LoopbackTransport::new());
    wait_ready(&engine);
    engine.start_recording().unwrap();
    mic.speak(&[0.1; FRAME]);
    wait_for("echo", TIMEOUT, || speaker.placed().len() == 1);

    speaker.set_now(0.5);
    engine.reset().unwrap();
    assert!(!engine.ui_state().is_recording);
    assert_eq!(mic.releases(), 1);
    assert_eq!(speaker.stopped().len(), 1);

    wait_ready(&engine);
    assert_eq!(engine.ui_state().error, "");

    engine.start_recording().unwrap();
    mic.speak(&[0.1; FRAME]);
    wait_for("echo after reset", TIMEOUT, || speaker.placed().len() == 2);
    assert_abs_diff_eq!(speaker.placed()[1].start, 0.5, epsilon = 1e-9);

    engine.shutdown().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_releases_the_microphone_once() {
    let (engine, mic, _speaker) = start(LoopbackTransport::new());
    wait_ready(&engine);
    engine.start_recording().unwrap();
    assert!(matches!(
        engine.start_recording(),
        Err(TalkbackError::AlreadyRunning)
    ));

    engine.shutdown().unwrap();
    assert_eq!(mic.releases(), 1);
    assert!(!engine.is_running());
    assert!(matches!(engine.reset(), Err(TalkbackError::NotRunning)));
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_output_device_fails_start() {
    let engine = TalkbackEngine::new(config());
    let speaker = Speaker {
        fail_open: true,
        ..Speaker::default()
    };
    let err = engine
        .start(EngineBackends {
            input: Box::new(Mic::at(16_000)),
            output: Box::new(speaker),
            transport: Box::new(LoopbackTransport::new()),
        })
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Device);
    assert!(!engine.is_running());
    assert!(engine
        .ui_state()
        .error
        .starts_with("Failed to open audio output"));
}

#[tokio::test(flavor = "multi_thread")]
async fn status_events_follow_the_session() {
    let engine = TalkbackEngine::new(config());
    let mut events = engine.subscribe_status();
    engine
        .start(EngineBackends {
            input: Box::new(Mic::at(16_000)),
            output: Box::new(Speaker::default()),
            transport: Box::new(LoopbackTransport::new()),
        })
        .unwrap();
    wait_ready(&engine);

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(seen.windows(2).all(|w| w[0].seq < w[1].seq));
    let states: Vec<_> = seen.iter().map(|e| e.state.session_state).collect();
    assert_eq!(states.first(), Some(&SessionState::Connecting));
    assert_eq!(states.last(), Some(&SessionState::Ready));

    engine.shutdown().unwrap();
}
