//! The engine thread.
//!
//! ## Inputs (one `select!` per iteration)
//!
//! ```text
//! commands   ── start/stop recording, reset, shutdown (from TalkbackEngine)
//! transport  ── TransportEnvelope → SessionManager::handle_event → InboundRouter
//! finished   ── VoiceId from the output callback → scheduler
//! tick       ── drain the capture ring → encoder → SessionManager::send
//! ```
//!
//! Every component lives on this thread and is mutated sequentially, so none
//! of them need locks. This loop runs in `spawn_blocking`, keeping the Tokio
//! executor free for the host.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use crossbeam_channel::{never, select, tick, Receiver, Sender};
use tracing::{debug, info};

use crate::{
    audio::output::VoiceId,
    engine::{capture::CapturePipeline, router::InboundRouter},
    error::{Result, TalkbackError},
    ipc::status::StatusBoard,
    session::{SessionManager, TransportEnvelope},
};

const NOT_READY: &str = "Session not ready. Please wait or reset.";

/// Requests from the public handle. Each carries its reply channel.
pub(crate) enum Command {
    StartRecording(Sender<Result<()>>),
    StopRecording(Sender<()>),
    Reset(Sender<()>),
    Shutdown(Sender<()>),
}

pub(crate) struct LoopContext {
    pub session: SessionManager,
    pub capture: CapturePipeline,
    pub router: InboundRouter,
    pub commands: Receiver<Command>,
    pub transport_events: Receiver<TransportEnvelope>,
    pub finished: Receiver<VoiceId>,
    pub status: StatusBoard,
    pub running: Arc<AtomicBool>,
    pub tick_ms: u64,
}

/// Run until a `Shutdown` command arrives or the engine handle is dropped.
pub(crate) fn run(ctx: LoopContext) {
    let LoopContext {
        mut session,
        mut capture,
        mut router,
        commands,
        transport_events,
        finished,
        status,
        running,
        tick_ms,
    } = ctx;

    info!(tick_ms, "engine loop started");
    session.initialize();

    let ticker = tick(Duration::from_millis(tick_ms.max(1)));
    let idle = never::<VoiceId>();
    let mut output_reporting = true;
    let mut shutdown_ack: Option<Sender<()>> = None;

    loop {
        let finished_rx = if output_reporting { &finished } else { &idle };
        select! {
            recv(commands) -> cmd => {
                let Ok(cmd) = cmd else {
                    debug!("engine handle dropped");
                    break;
                };
                match cmd {
                    Command::StartRecording(reply) => {
                        let result = start_recording(&mut session, &mut capture, &status);
                        let _ = reply.send(result);
                    }
                    Command::StopRecording(reply) => {
                        capture.stop();
                        let _ = reply.send(());
                    }
                    Command::Reset(reply) => {
                        capture.stop();
                        session.reset(&mut router);
                        let _ = reply.send(());
                    }
                    Command::Shutdown(reply) => {
                        shutdown_ack = Some(reply);
                        break;
                    }
                }
            }
            recv(transport_events) -> envelope => {
                if let Ok(envelope) = envelope {
                    session.handle_event(envelope, &mut router);
                }
            }
            recv(finished_rx) -> voice => match voice {
                Ok(voice) => router.on_unit_finished(voice),
                Err(_) => {
                    debug!("output stream stopped reporting; ignoring completions");
                    output_reporting = false;
                }
            },
            recv(ticker) -> _ => {
                capture.pump(&mut session);
            }
        }
    }

    capture.stop();
    session.close();
    running.store(false, Ordering::SeqCst);
    info!(
        interruptions = router.interruption().interruptions(),
        "engine loop stopped"
    );

    // Devices drop with the components, on this thread.
    drop(capture);
    drop(router);
    if let Some(reply) = shutdown_ack {
        let _ = reply.send(());
    }
}

fn start_recording(
    session: &mut SessionManager,
    capture: &mut CapturePipeline,
    status: &StatusBoard,
) -> Result<()> {
    if capture.is_active() {
        return Err(TalkbackError::AlreadyRunning);
    }
    if !session.is_ready() {
        status.set_error(NOT_READY);
        return Err(TalkbackError::Send {
            state: session.state(),
        });
    }
    capture.start()
}
