//! Voice activity segmentation.
//!
//! Each session runs a two-state machine (Idle / Speaking) over its incoming
//! PCM16 frames. Speech is detected with a plain RMS energy threshold. Once the
//! user has been speaking, a silence timer decides when the utterance is over,
//! and a no-new-audio failsafe flushes the buffer if frames stop arriving
//! altogether (the client mutes its microphone while our own reply plays).
//!
//! A flush swaps the buffer out under the session lock and publishes exactly
//! one `utterance-ready` event if the audio is longer than the configured
//! floor. Shorter blips are dropped silently.

use crate::bus::EventBus;
use crate::events::{Event, ListeningState, Payload, SessionId, topics};
use crate::session::SessionRegistry;
use crate::timer::Timer;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, trace};

/// Tunable thresholds. The defaults are starting points; tune per deployment.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmenterConfig {
    /// Normalized RMS energy above which a frame counts as speech.
    pub speech_threshold: f64,
    /// Sub-threshold audio after speech that ends the utterance.
    pub silence_duration: Duration,
    /// Force a flush if no frame at all arrives for this long while speaking.
    pub no_new_audio_timeout: Duration,
    /// Utterances must be strictly longer than this many bytes to be emitted.
    pub min_utterance_bytes: usize,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            speech_threshold: 0.02,
            silence_duration: Duration::from_millis(1200),
            no_new_audio_timeout: Duration::from_millis(2500),
            min_utterance_bytes: 8000,
        }
    }
}

/// Normalized RMS energy of a little-endian PCM16 frame, in `[0, 1]`.
///
/// A trailing odd byte is ignored; an empty frame has zero energy.
pub fn energy_level(frame: &[u8]) -> f64 {
    let (sum, count) = frame
        .chunks_exact(2)
        .map(|pair| f64::from(i16::from_le_bytes([pair[0], pair[1]])))
        .fold((0.0_f64, 0_usize), |(sum, count), sample| {
            (sum + sample * sample, count + 1)
        });
    if count == 0 {
        return 0.0;
    }
    (sum / count as f64).sqrt() / 32768.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VadState {
    #[default]
    Idle,
    Speaking,
}

/// What the segmenter did with a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDisposition {
    /// Idle and below threshold: ambient noise.
    Ignored,
    /// Dropped while echo suppression is active.
    Suppressed,
    /// Crossed the threshold from Idle; a new utterance began.
    SpeechStarted,
    /// Appended to the utterance in progress.
    Buffered,
    UnknownSession,
}

/// Why a flush happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushCause {
    Silence,
    Failsafe,
    Requested,
}

/// Per-session segmentation state, owned by the session entry.
#[derive(Debug, Default)]
pub struct VoiceState {
    vad: VadState,
    buffer: Vec<Bytes>,
    buffered_bytes: usize,
    silence_timer: Timer,
    failsafe_timer: Timer,
    tts_guard: Timer,
    echo_suppressed: bool,
    processing: bool,
}

impl VoiceState {
    pub fn vad(&self) -> VadState {
        self.vad
    }

    pub fn buffered_bytes(&self) -> usize {
        self.buffered_bytes
    }

    pub fn is_echo_suppressed(&self) -> bool {
        self.echo_suppressed
    }

    fn append(&mut self, frame: Bytes) {
        self.buffered_bytes += frame.len();
        self.buffer.push(frame);
    }

    fn take_buffer(&mut self) -> Bytes {
        let frames = std::mem::take(&mut self.buffer);
        let mut audio = BytesMut::with_capacity(self.buffered_bytes);
        for frame in frames {
            audio.extend_from_slice(&frame);
        }
        self.buffered_bytes = 0;
        audio.freeze()
    }

    /// Cancels every timer and drops buffered audio.
    pub(crate) fn release(&mut self) {
        self.silence_timer.cancel();
        self.failsafe_timer.cancel();
        self.tts_guard.cancel();
        self.buffer.clear();
        self.buffered_bytes = 0;
        self.vad = VadState::Idle;
        self.echo_suppressed = false;
    }
}

struct Shared {
    config: SegmenterConfig,
    bus: Arc<EventBus>,
    sessions: Arc<SessionRegistry>,
}

/// Turns per-session frame streams into `utterance-ready` events.
#[derive(Clone)]
pub struct Segmenter {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Segmenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segmenter")
            .field("config", &self.shared.config)
            .finish()
    }
}

impl Segmenter {
    pub fn new(config: SegmenterConfig, bus: Arc<EventBus>, sessions: Arc<SessionRegistry>) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                bus,
                sessions,
            }),
        }
    }

    pub fn config(&self) -> &SegmenterConfig {
        &self.shared.config
    }

    /// Feeds one frame through the session's state machine.
    pub fn push_frame(&self, session_id: &SessionId, frame: Bytes) -> FrameDisposition {
        let Some(session) = self.shared.sessions.session(session_id) else {
            debug!(session_id = %session_id, "Dropping frame for unknown session");
            return FrameDisposition::UnknownSession;
        };
        let voice = session.voice();
        let energy = energy_level(&frame);
        let is_speech = energy > self.shared.config.speech_threshold;

        let mut state = voice.lock();
        if state.echo_suppressed {
            trace!(session_id = %session_id, "Frame dropped during echo suppression");
            return FrameDisposition::Suppressed;
        }

        let vad = state.vad;
        match (vad, is_speech) {
            (VadState::Idle, false) => FrameDisposition::Ignored,
            (VadState::Idle, true) => {
                state.vad = VadState::Speaking;
                state.append(frame);
                self.arm_failsafe(&mut state, session_id, voice);
                drop(state);
                debug!(session_id = %session_id, energy, "Speech started");
                self.shared.publish(
                    topics::LISTENING_STATE,
                    session_id,
                    Payload::ListeningState(ListeningState::Active),
                );
                FrameDisposition::SpeechStarted
            }
            (VadState::Speaking, true) => {
                state.append(frame);
                state.silence_timer.cancel();
                self.arm_failsafe(&mut state, session_id, voice);
                FrameDisposition::Buffered
            }
            (VadState::Speaking, false) => {
                state.append(frame);
                if !state.silence_timer.is_armed() {
                    self.arm_silence(&mut state, session_id, voice);
                }
                self.arm_failsafe(&mut state, session_id, voice);
                FrameDisposition::Buffered
            }
        }
    }

    /// Cancels pending timers and flushes immediately, whatever the energy.
    ///
    /// Returns the length of the emitted utterance, if one was emitted.
    pub fn process_now(&self, session_id: &SessionId) -> Option<usize> {
        let session = self.shared.sessions.session(session_id)?;
        self.shared
            .flush(session_id, session.voice(), FlushCause::Requested)
    }

    /// Drops incoming frames for `duration` while our own reply is playing.
    pub fn suppress_echo(&self, session_id: &SessionId, duration: Duration) {
        let Some(session) = self.shared.sessions.session(session_id) else {
            return;
        };
        let voice = session.voice();
        {
            let mut state = voice.lock();
            state.echo_suppressed = true;
            let shared = self.shared.clone();
            let weak = Arc::downgrade(voice);
            let sid = session_id.clone();
            state.tts_guard.arm(duration, move |generation| {
                shared.on_tts_guard_expired(&sid, &weak, generation);
            });
        }
        debug!(session_id = %session_id, ?duration, "Echo suppression on");
        self.shared
            .publish(topics::ECHO_SUPPRESS, session_id, Payload::EchoSuppress(true));
    }

    /// Ends echo suppression early. No-op if it was not active.
    pub fn end_echo_suppression(&self, session_id: &SessionId) {
        let Some(session) = self.shared.sessions.session(session_id) else {
            return;
        };
        let was_suppressed = {
            let mut state = session.voice().lock();
            state.tts_guard.cancel();
            std::mem::replace(&mut state.echo_suppressed, false)
        };
        if was_suppressed {
            self.shared
                .publish(topics::ECHO_SUPPRESS, session_id, Payload::EchoSuppress(false));
        }
    }

    /// Current state of the session's machine, if the session exists.
    pub fn state(&self, session_id: &SessionId) -> Option<VadState> {
        self.shared
            .sessions
            .session(session_id)
            .map(|session| session.voice().lock().vad)
    }

    fn arm_silence(&self, state: &mut VoiceState, session_id: &SessionId, voice: &Arc<Mutex<VoiceState>>) {
        let shared = self.shared.clone();
        let weak = Arc::downgrade(voice);
        let sid = session_id.clone();
        state
            .silence_timer
            .arm(self.shared.config.silence_duration, move |generation| {
                shared.on_silence_expired(&sid, &weak, generation);
            });
    }

    fn arm_failsafe(&self, state: &mut VoiceState, session_id: &SessionId, voice: &Arc<Mutex<VoiceState>>) {
        let shared = self.shared.clone();
        let weak = Arc::downgrade(voice);
        let sid = session_id.clone();
        state
            .failsafe_timer
            .arm(self.shared.config.no_new_audio_timeout, move |generation| {
                shared.on_failsafe_expired(&sid, &weak, generation);
            });
    }
}

impl Shared {
    fn publish(&self, topic: &str, session_id: &SessionId, payload: Payload) {
        self.bus.publish(topic, Event::new(session_id.clone(), payload));
    }

    fn on_silence_expired(&self, session_id: &SessionId, voice: &Weak<Mutex<VoiceState>>, generation: u64) {
        let Some(voice) = voice.upgrade() else {
            return;
        };
        if !voice.lock().silence_timer.fire(generation) {
            return;
        }
        self.flush(session_id, &voice, FlushCause::Silence);
    }

    fn on_failsafe_expired(&self, session_id: &SessionId, voice: &Weak<Mutex<VoiceState>>, generation: u64) {
        let Some(voice) = voice.upgrade() else {
            return;
        };
        {
            let mut state = voice.lock();
            if !state.failsafe_timer.fire(generation) {
                return;
            }
            if state.vad != VadState::Speaking || state.buffer.is_empty() {
                return;
            }
        }
        info!(session_id = %session_id, "No audio received while speaking; forcing flush");
        self.flush(session_id, &voice, FlushCause::Failsafe);
    }

    fn on_tts_guard_expired(&self, session_id: &SessionId, voice: &Weak<Mutex<VoiceState>>, generation: u64) {
        let Some(voice) = voice.upgrade() else {
            return;
        };
        {
            let mut state = voice.lock();
            if !state.tts_guard.fire(generation) {
                return;
            }
            state.echo_suppressed = false;
        }
        debug!(session_id = %session_id, "Echo suppression off");
        self.publish(topics::ECHO_SUPPRESS, session_id, Payload::EchoSuppress(false));
    }

    /// Ends the utterance in progress.
    ///
    /// The `processing` flag makes this idempotent per session: a second flush
    /// started while one is still publishing returns immediately.
    fn flush(&self, session_id: &SessionId, voice: &Arc<Mutex<VoiceState>>, cause: FlushCause) -> Option<usize> {
        let (audio, was_speaking) = {
            let mut state = voice.lock();
            if state.processing {
                debug!(session_id = %session_id, ?cause, "Flush already in progress");
                return None;
            }
            state.processing = true;
            state.silence_timer.cancel();
            state.failsafe_timer.cancel();
            let was_speaking = state.vad == VadState::Speaking;
            state.vad = VadState::Idle;
            (state.take_buffer(), was_speaking)
        };

        if was_speaking {
            self.publish(
                topics::LISTENING_STATE,
                session_id,
                Payload::ListeningState(ListeningState::Idle),
            );
        }

        let emitted = if audio.len() > self.config.min_utterance_bytes {
            let len = audio.len();
            info!(session_id = %session_id, ?cause, bytes = len, "Utterance ready");
            self.publish(topics::UTTERANCE_READY, session_id, Payload::Utterance(audio));
            Some(len)
        } else {
            if !audio.is_empty() {
                debug!(session_id = %session_id, ?cause, bytes = audio.len(), "Discarding short utterance");
            }
            None
        };

        voice.lock().processing = false;
        emitted
    }
}
