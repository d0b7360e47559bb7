//! Inbound side: session events → decoder → interruption / scheduler.

use std::sync::{atomic::Ordering, Arc};

use tracing::{debug, warn};

use crate::{
    audio::output::VoiceId,
    codec::{FrameDecoder, WireChunk},
    engine::diagnostics::EngineDiagnostics,
    playback::{InterruptionHandler, PlaybackScheduler},
    session::SessionHandler,
};

/// Owns the output half of the engine. Registered as the session's handler.
pub struct InboundRouter {
    decoder: FrameDecoder,
    scheduler: PlaybackScheduler,
    interruption: InterruptionHandler,
    diagnostics: Arc<EngineDiagnostics>,
}

impl InboundRouter {
    pub fn new(scheduler: PlaybackScheduler, diagnostics: Arc<EngineDiagnostics>) -> Self {
        Self {
            decoder: FrameDecoder::new(),
            scheduler,
            interruption: InterruptionHandler::new(),
            diagnostics,
        }
    }

    pub fn scheduler(&self) -> &PlaybackScheduler {
        &self.scheduler
    }

    pub fn interruption(&self) -> &InterruptionHandler {
        &self.interruption
    }

    pub fn on_unit_finished(&mut self, voice: VoiceId) {
        if self.scheduler.on_unit_finished(voice) {
            EngineDiagnostics::bump(&self.diagnostics.units_finished);
        }
    }
}

impl SessionHandler for InboundRouter {
    fn on_audio_chunk(&mut self, chunk: WireChunk) {
        EngineDiagnostics::bump(&self.diagnostics.chunks_received);

        let unit = match self.decoder.decode(
            &chunk,
            self.scheduler.output_rate(),
            self.scheduler.output_channels(),
        ) {
            Ok(unit) => unit,
            Err(e) => {
                EngineDiagnostics::bump(&self.diagnostics.decode_errors);
                warn!(mime = %chunk.mime_type(), bytes = chunk.len(), "dropping inbound chunk: {e}");
                return;
            }
        };

        match self.scheduler.enqueue(unit) {
            Ok(Some(_)) => EngineDiagnostics::bump(&self.diagnostics.units_scheduled),
            Ok(None) => {}
            Err(e) => {
                EngineDiagnostics::bump(&self.diagnostics.schedule_errors);
                warn!("dropping decoded unit: {e}");
            }
        }
    }

    fn on_interrupted(&mut self) {
        let flushed = self.interruption.on_interrupted(&mut self.scheduler);
        self.diagnostics
            .units_flushed
            .fetch_add(flushed, Ordering::Relaxed);
        EngineDiagnostics::bump(&self.diagnostics.interruptions);
    }

    fn on_closed(&mut self, reason: &str) {
        debug!(reason, pending = self.scheduler.active_len(), "session closed; playback continues");
    }

    fn on_reset(&mut self) {
        let flushed = self.scheduler.reset();
        debug!(flushed, "playback flushed for session reset");
    }
}
