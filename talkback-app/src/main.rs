//! Talkback headless host.
//!
//! Opens the default (or configured) microphone and speakers, connects the
//! engine to the in-process loopback service, and takes commands on stdin:
//!
//! ```text
//! start | stop | reset | status | diag | devices
//! gain in <x> | gain out <x> | save | quit
//! ```
//!
//! Status changes are printed as JSON lines on stdout.

mod settings;

use std::sync::Arc;

use anyhow::Context;
use talkback_core::{
    list_devices, DeviceKind, EngineBackends, ErrorKind, LoopbackTransport, TalkbackEngine,
    TalkbackError,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use settings::{default_settings_path, load_settings, save_settings, AppSettings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("talkback=info,talkback_core=info")),
        )
        .init();

    info!("Talkback starting");

    let settings_path = default_settings_path();
    let mut settings = load_settings(&settings_path);
    info!(path = %settings_path.display(), "settings loaded");

    let engine = Arc::new(TalkbackEngine::new(settings.engine_config()));

    let mut status_rx = engine.subscribe_status();
    tokio::spawn(async move {
        loop {
            match status_rx.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(e) => warn!("serialize status: {e}"),
                },
                Err(RecvError::Lagged(n)) => warn!("status receiver lagged by {n} events"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let transport = LoopbackTransport::new().with_interrupt_every(settings.loopback_interrupt_every);
    engine
        .start(EngineBackends::cpal(engine.config(), Box::new(transport)))
        .context("failed to start engine")?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            [] => {}
            ["start"] => report(engine.start_recording()),
            ["stop"] => report(engine.stop_recording()),
            ["reset"] => report(engine.reset()),
            ["status"] => print_json(&engine.ui_state()),
            ["diag"] => print_json(&engine.diagnostics()),
            ["devices"] => {
                print_json(&list_devices(DeviceKind::Input));
                print_json(&list_devices(DeviceKind::Output));
            }
            ["gain", which, value] => match value.parse::<f32>() {
                Ok(gain) => set_gain(&engine, &mut settings, which, gain),
                Err(_) => eprintln!("gain must be a number, got '{value}'"),
            },
            ["save"] => {
                settings.normalize();
                match save_settings(&settings_path, &settings) {
                    Ok(()) => info!(path = %settings_path.display(), "settings saved"),
                    Err(e) => warn!("save settings: {e}"),
                }
            }
            ["quit"] | ["exit"] => break,
            _ => eprintln!("unknown command: {line}"),
        }
    }

    engine.shutdown()?;
    info!("Talkback stopped");
    Ok(())
}

fn set_gain(engine: &TalkbackEngine, settings: &mut AppSettings, which: &str, gain: f32) {
    match which {
        "in" | "input" => {
            engine.input_tap().set_gain(gain);
            settings.input_gain = engine.input_tap().gain();
        }
        "out" | "output" => {
            engine.output_tap().set_gain(gain);
            settings.output_gain = engine.output_tap().gain();
        }
        _ => eprintln!("gain target must be 'in' or 'out'"),
    }
}

/// Surface command failures the way the UI would: device and session problems
/// are already on the status board, everything else is printed here.
fn report(result: talkback_core::error::Result<()>) {
    if let Err(e) = result {
        if e.is_user_facing() || e.kind() == ErrorKind::Send {
            info!("command failed: {e}");
            return;
        }
        match e {
            TalkbackError::AlreadyRunning => eprintln!("already recording"),
            other => eprintln!("error: {other}"),
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(line) => println!("{line}"),
        Err(e) => warn!("serialize: {e}"),
    }
}
