//! Shared per-session state for the duplex bridge's two workers (§4.6).
//!
//! Everything here is touched by both the input forwarder and the response
//! forwarder, so each field carries its own synchronization: the turn-id
//! FIFO and the input-transcription buffer behind a `parking_lot::Mutex`,
//! the one-shot flags as atomics. Accumulators that only one worker ever
//! touches (the response text/media buffers, `was_interrupted`) stay local
//! to the response forwarder's own loop instead of living here.

use crate::latch::Latch;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

pub struct DuplexAccumulatorState {
    turn_ids: Mutex<VecDeque<String>>,
    turn_id_popped: AtomicBool,
    transcription_captured: AtomicBool,
    input_transcription: Mutex<String>,
    system_prompt_sent: AtomicBool,

    /// Closed by the input forwarder when its input channel closes.
    pub input_done: Latch,
    /// Closed by the input forwarder when it observes
    /// `metadata["all_responses_received"] = true`.
    pub all_responses_received: Latch,
}

impl DuplexAccumulatorState {
    pub fn new() -> Self {
        Self {
            turn_ids: Mutex::new(VecDeque::new()),
            turn_id_popped: AtomicBool::new(false),
            transcription_captured: AtomicBool::new(false),
            input_transcription: Mutex::new(String::new()),
            system_prompt_sent: AtomicBool::new(false),
            input_done: Latch::new(),
            all_responses_received: Latch::new(),
        }
    }

    pub fn push_turn_id(&self, id: String) {
        self.turn_ids.lock().push_back(id);
    }

    /// Pops at most one turn id per turn. Returns `None` once a turn id has
    /// already been popped this turn, even if the FIFO still has entries —
    /// that's what keeps a tool-call turn's extra end-of-stream event from
    /// stealing the id meant for the final turn.
    pub fn pop_turn_id_once(&self) -> Option<String> {
        if self.turn_id_popped.swap(true, Ordering::AcqRel) {
            return None;
        }
        self.turn_ids.lock().pop_front()
    }

    pub fn transcription_captured(&self) -> bool {
        self.transcription_captured.load(Ordering::Acquire)
    }

    pub fn mark_transcription_captured(&self) {
        self.transcription_captured.store(true, Ordering::Release);
    }

    pub fn append_input_transcription(&self, text: &str) {
        self.input_transcription.lock().push_str(text);
    }

    pub fn input_transcription_snapshot(&self) -> String {
        self.input_transcription.lock().clone()
    }

    /// Called by the input forwarder on entering a new user audio turn
    /// (detected by `transcription_captured` still being set from the
    /// previous turn). Resets the transcription buffer and the turn-id-popped
    /// flag so the next turn starts clean.
    pub fn reset_for_new_audio_turn(&self) {
        self.transcription_captured.store(false, Ordering::Release);
        self.turn_id_popped.store(false, Ordering::Release);
        self.input_transcription.lock().clear();
    }

    /// Returns `true` exactly once — the caller that gets `true` back is
    /// responsible for actually sending the system prompt.
    pub fn try_claim_system_prompt_send(&self) -> bool {
        !self.system_prompt_sent.swap(true, Ordering::AcqRel)
    }
}

impl Default for DuplexAccumulatorState {
    fn default() -> Self {
        Self::new()
    }
}
