//! The per-composer stream session state machine.
//!
//! `StreamSession` is pure: it never touches the network. The composer feeds
//! it transport events and asks it what to persist; every field is private
//! and changes only through the transition methods below.

use serde::{Deserialize, Serialize};
use strum::Display;
use tracing::{debug, warn};

use crate::types::{StreamEvent, ToolCall, ToolResult};

/// Lifecycle state of a stream session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Idle,
    Streaming,
    ToolActive,
    /// Flushing buffered text and queued tool results to the gateway.
    Draining,
    /// Tool results landed; a follow-up stream is about to open.
    InterpretationPending,
    /// Explicitly stopped; in-flight state was discarded.
    Stopped,
}

impl SessionStatus {
    /// Whether a new submission may start.
    pub fn is_at_rest(self) -> bool {
        matches!(self, Self::Idle | Self::Stopped)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Content,
    Tool,
}

/// What the composer should do after feeding an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Keep reading events.
    Continue,
    /// The event did not apply to the current state.
    Ignored,
    /// `end` received; the session is now draining.
    Drain,
    /// `error` received; in-flight state is cleared.
    Abort { message: String },
}

/// Outcome of a completed drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainDecision {
    /// Open an interpretation stream for the same thread.
    Interpret,
    /// The turn is over.
    Idle,
}

/// Everything thrown away by an explicit stop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discarded {
    pub text: String,
    pub active_tool: Option<ToolCall>,
    pub pending_tool_results: Vec<ToolResult>,
    pub failed_tool_results: Vec<ToolResult>,
}

impl Discarded {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
            && self.active_tool.is_none()
            && self.pending_tool_results.is_empty()
            && self.failed_tool_results.is_empty()
    }
}

/// Read-only view of a session for the rendering layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub text: String,
    pub showing_placeholder: bool,
    pub active_tool: Option<ToolCall>,
    pub pending_tool_results: Vec<ToolResult>,
    pub failed_tool_results: Vec<ToolResult>,
    pub interpretation_requested: bool,
}

#[derive(Debug, Clone)]
pub struct StreamSession {
    status: SessionStatus,
    text_buffer: String,
    showing_placeholder: bool,
    last_phase: Phase,
    active_tool: Option<ToolCall>,
    pending_tool_results: Vec<ToolResult>,
    failed_tool_results: Vec<ToolResult>,
    persisted_this_round: usize,
    interpretation_passes: u32,
    stops: u64,
}

impl Default for StreamSession {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamSession {
    pub fn new() -> Self {
        Self {
            status: SessionStatus::Idle,
            text_buffer: String::new(),
            showing_placeholder: false,
            last_phase: Phase::Content,
            active_tool: None,
            pending_tool_results: Vec::new(),
            failed_tool_results: Vec::new(),
            persisted_this_round: 0,
            interpretation_passes: 0,
            stops: 0,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Buffered text, excluding the placeholder.
    pub fn text(&self) -> &str {
        if self.showing_placeholder {
            ""
        } else {
            &self.text_buffer
        }
    }

    pub fn active_tool(&self) -> Option<&ToolCall> {
        self.active_tool.as_ref()
    }

    pub fn pending_tool_results(&self) -> &[ToolResult] {
        &self.pending_tool_results
    }

    pub fn failed_tool_results(&self) -> &[ToolResult] {
        &self.failed_tool_results
    }

    pub fn interpretation_requested(&self) -> bool {
        self.interpretation_passes > 0
    }

    pub fn interpretation_passes(&self) -> u32 {
        self.interpretation_passes
    }

    /// Number of explicit stops so far; lets a caller detect a stop that
    /// happened while it held results outside the session.
    pub fn stop_count(&self) -> u64 {
        self.stops
    }

    /// Start a top-level turn. Returns `false` (and changes nothing) unless at rest.
    pub fn begin(&mut self, placeholder: &str) -> bool {
        if !self.status.is_at_rest() {
            debug!(status = %self.status, "Submit ignored, session busy");
            return false;
        }
        self.status = SessionStatus::Streaming;
        self.interpretation_passes = 0;
        self.persisted_this_round = 0;
        self.active_tool = None;
        self.reset_buffer(placeholder);
        true
    }

    /// Undo `begin` when the turn never got off the ground.
    pub fn abandon(&mut self) {
        if self.status == SessionStatus::Streaming {
            self.status = SessionStatus::Idle;
            self.text_buffer.clear();
            self.showing_placeholder = false;
        }
    }

    /// The interpretation stream is open.
    pub fn resume_streaming(&mut self) {
        if self.status == SessionStatus::InterpretationPending {
            self.status = SessionStatus::Streaming;
        }
    }

    /// Feed one transport event.
    pub fn apply(&mut self, event: StreamEvent) -> Transition {
        if !self.is_receiving() {
            debug!(status = %self.status, ?event, "Event ignored, session not streaming");
            return Transition::Ignored;
        }
        if self.status == SessionStatus::InterpretationPending {
            self.status = SessionStatus::Streaming;
        }

        match event {
            StreamEvent::Start | StreamEvent::Unknown => Transition::Continue,
            StreamEvent::Content { text } => {
                self.append(&text);
                Transition::Continue
            }
            StreamEvent::ToolStart {
                call_id,
                function_name,
                arguments,
            } => {
                if let Some(previous) = self.active_tool.take() {
                    warn!(
                        call_id = %previous.call_id,
                        "Tool call superseded before it finished"
                    );
                }
                debug!(%call_id, %function_name, "Tool call started");
                self.text_buffer.clear();
                self.showing_placeholder = false;
                self.last_phase = Phase::Tool;
                self.active_tool = Some(ToolCall {
                    call_id,
                    function_name,
                    arguments,
                });
                self.status = SessionStatus::ToolActive;
                Transition::Continue
            }
            StreamEvent::ToolEnd {
                call_id,
                content,
                formatted_content,
            } => self.complete_tool(call_id, content, formatted_content),
            StreamEvent::Error { message } => {
                self.clear_in_flight();
                self.status = SessionStatus::Draining;
                Transition::Abort { message }
            }
            StreamEvent::End => {
                if let Some(unfinished) = self.active_tool.take() {
                    warn!(call_id = %unfinished.call_id, "Stream ended during a tool call");
                }
                self.status = SessionStatus::Draining;
                Transition::Drain
            }
        }
    }

    /// Drain step 1: assistant text worth persisting, if any.
    pub fn take_assistant_text(&mut self) -> Option<String> {
        if self.status != SessionStatus::Draining
            || self.showing_placeholder
            || self.last_phase != Phase::Content
            || self.text_buffer.is_empty()
        {
            return None;
        }
        Some(std::mem::take(&mut self.text_buffer))
    }

    /// Front of the tool-result queue, left in place until acknowledged.
    pub fn next_pending(&self) -> Option<ToolResult> {
        self.pending_tool_results.first().cloned()
    }

    /// The queued result for `call_id` was persisted.
    pub fn complete_pending(&mut self, call_id: &str) -> Option<ToolResult> {
        let result = self.remove_pending(call_id)?;
        self.persisted_this_round += 1;
        Some(result)
    }

    /// Persisting the queued result for `call_id` failed; park it for retry.
    pub fn fail_pending(&mut self, call_id: &str) -> Option<ToolResult> {
        let result = self.remove_pending(call_id)?;
        self.failed_tool_results.push(result.clone());
        Some(result)
    }

    /// Drain steps 3 and 4.
    pub fn finish_drain(&mut self, max_interpretation_passes: u32, placeholder: &str) -> DrainDecision {
        let persisted = std::mem::take(&mut self.persisted_this_round);
        if persisted > 0 && self.interpretation_passes < max_interpretation_passes {
            self.interpretation_passes += 1;
            self.status = SessionStatus::InterpretationPending;
            self.reset_buffer(placeholder);
            debug!(
                persisted,
                pass = self.interpretation_passes,
                "Requesting interpretation of tool results"
            );
            return DrainDecision::Interpret;
        }
        if persisted > 0 {
            debug!(persisted, "Interpretation cap reached, not narrating tool results");
        }
        self.settle();
        DrainDecision::Idle
    }

    /// Return to Idle after an aborted stream has been flushed.
    pub fn settle(&mut self) {
        self.clear_in_flight();
        self.persisted_this_round = 0;
        self.status = SessionStatus::Idle;
    }

    /// Discard everything in flight, including both queues.
    pub fn stop(&mut self) -> Discarded {
        let discarded = Discarded {
            text: std::mem::take(&mut self.text_buffer),
            active_tool: self.active_tool.take(),
            pending_tool_results: std::mem::take(&mut self.pending_tool_results),
            failed_tool_results: std::mem::take(&mut self.failed_tool_results),
        };
        let discarded = if self.showing_placeholder {
            Discarded {
                text: String::new(),
                ..discarded
            }
        } else {
            discarded
        };
        self.showing_placeholder = false;
        self.persisted_this_round = 0;
        self.stops += 1;
        self.status = SessionStatus::Stopped;
        discarded
    }

    /// Hand failed results to the caller for an explicit retry.
    pub fn take_failed(&mut self) -> Vec<ToolResult> {
        std::mem::take(&mut self.failed_tool_results)
    }

    /// Put a result back on the failed list after another failed attempt.
    ///
    /// `taken_at` is the [`stop_count`](Self::stop_count) observed when the
    /// result was taken. A stop since then already discarded the failed list,
    /// so the result stays discarded and `false` is returned.
    pub fn restore_failed(&mut self, result: ToolResult, taken_at: u64) -> bool {
        if self.stops != taken_at {
            debug!(call_id = %result.call_id, "Session stopped during retry, not restoring result");
            return false;
        }
        if !self.failed_tool_results.iter().any(|r| r.call_id == result.call_id) {
            self.failed_tool_results.push(result);
        }
        true
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            status: self.status,
            text: self.text_buffer.clone(),
            showing_placeholder: self.showing_placeholder,
            active_tool: self.active_tool.clone(),
            pending_tool_results: self.pending_tool_results.clone(),
            failed_tool_results: self.failed_tool_results.clone(),
            interpretation_requested: self.interpretation_requested(),
        }
    }

    fn is_receiving(&self) -> bool {
        matches!(
            self.status,
            SessionStatus::Streaming | SessionStatus::ToolActive | SessionStatus::InterpretationPending
        )
    }

    fn append(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if self.showing_placeholder {
            self.text_buffer.clear();
            self.showing_placeholder = false;
        }
        self.text_buffer.push_str(text);
        self.last_phase = Phase::Content;
    }

    fn complete_tool(
        &mut self,
        call_id: String,
        content: String,
        formatted_content: Option<String>,
    ) -> Transition {
        let matches_active = self
            .active_tool
            .as_ref()
            .is_some_and(|tool| tool.call_id == call_id);
        if !matches_active {
            warn!(%call_id, "tool_end without a matching tool_start, ignoring");
            return Transition::Ignored;
        }
        let Some(tool) = self.active_tool.take() else {
            return Transition::Ignored;
        };
        self.status = SessionStatus::Streaming;

        let already_queued = self
            .pending_tool_results
            .iter()
            .any(|r| r.call_id == call_id);
        if already_queued {
            warn!(%call_id, "Duplicate tool result, ignoring");
            return Transition::Ignored;
        }

        debug!(%call_id, function_name = %tool.function_name, "Tool call finished");
        self.pending_tool_results.push(ToolResult {
            call_id,
            function_name: tool.function_name,
            content,
            formatted_content,
        });
        Transition::Continue
    }

    fn remove_pending(&mut self, call_id: &str) -> Option<ToolResult> {
        let index = self
            .pending_tool_results
            .iter()
            .position(|r| r.call_id == call_id)?;
        Some(self.pending_tool_results.remove(index))
    }

    fn reset_buffer(&mut self, placeholder: &str) {
        self.text_buffer = placeholder.to_string();
        self.showing_placeholder = !placeholder.is_empty();
        self.last_phase = Phase::Content;
    }

    fn clear_in_flight(&mut self) {
        self.text_buffer.clear();
        self.showing_placeholder = false;
        self.active_tool = None;
    }
}
