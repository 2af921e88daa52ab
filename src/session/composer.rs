//! Per-thread composer: runs stream sessions against real collaborators.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::state::{Discarded, DrainDecision, SessionSnapshot, SessionStatus, StreamSession, Transition};
use crate::config::ThreadlineConfig;
use crate::error::{Result, ThreadlineError};
use crate::gateway::MessageGateway;
use crate::notify::{Notification, Notifier};
use crate::thread::{ThreadEntry, ThreadMessageSequence};
use crate::transport::{StreamRequest, StreamTransport};
use crate::types::{
    MessageId, PostMessage, StreamEvent, StreamMode, ThreadId, ThreadMessage, ToolResult, VoteValue,
};

/// `subtype` of assistant messages that narrate tool results.
pub const INTERPRETATION_SUBTYPE: &str = "interpretation";

/// The collaborators a composer talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub transport: Arc<dyn StreamTransport>,
    pub gateway: Arc<dyn MessageGateway>,
    pub notifier: Arc<dyn Notifier>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

/// A message the gateway refused.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistFailure {
    pub message: PostMessage,
    pub error: String,
}

/// What happened during one top-level turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnReport {
    /// Messages persisted by the turn, in order (the user message excluded).
    pub persisted: Vec<ThreadMessage>,
    pub failures: Vec<PersistFailure>,
    pub streams_opened: u32,
    pub interpretation_passes: u32,
    /// Transport error that ended the turn, if any.
    pub error: Option<String>,
    /// Set when the turn was stopped.
    pub discarded: Option<Discarded>,
    pub final_status: SessionStatus,
}

/// Result of [`Composer::submit`].
#[derive(Debug)]
pub enum SubmitOutcome {
    /// A turn is already running; nothing was sent.
    AlreadyStreaming,
    Started(StreamingTurn),
}

/// A running turn.
#[derive(Debug)]
pub struct StreamingTurn {
    pub user_message: ThreadMessage,
    task: JoinHandle<TurnReport>,
}

impl StreamingTurn {
    /// Wait for the turn to reach Idle or Stopped.
    pub async fn finished(self) -> Result<TurnReport> {
        self.task
            .await
            .map_err(|e| ThreadlineError::InvalidState(format!("stream task failed: {e}")))
    }
}

/// Outcome of [`Composer::retry_failed`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetryReport {
    pub persisted: Vec<ThreadMessage>,
    /// Back on the failed list, either after failing again or unattempted.
    pub still_failed: Vec<ToolResult>,
    /// Dropped because the session was stopped mid-retry.
    pub discarded: Vec<ToolResult>,
}

struct ActiveTurn {
    id: Uuid,
    cancel: CancellationToken,
}

struct Shared {
    thread_id: ThreadId,
    config: ThreadlineConfig,
    collaborators: Collaborators,
    session: Mutex<StreamSession>,
    messages: Mutex<ThreadMessageSequence>,
    active_turn: Mutex<Option<ActiveTurn>>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
}

/// Owns the stream session of one thread.
///
/// Only one turn runs at a time; a second `submit` while busy is a no-op.
/// Session state is mutated only from the turn's task (plus the submit
/// guard), never while a lock is held across an await.
pub struct Composer {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Composer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Composer")
            .field("thread_id", &self.shared.thread_id)
            .field("status", &self.status())
            .finish()
    }
}

impl Composer {
    pub fn new(thread_id: ThreadId, config: ThreadlineConfig, collaborators: Collaborators) -> Self {
        let (snapshot_tx, _) = watch::channel(SessionSnapshot::default());
        Self {
            shared: Arc::new(Shared {
                thread_id,
                config,
                collaborators,
                session: Mutex::new(StreamSession::new()),
                messages: Mutex::new(ThreadMessageSequence::new()),
                active_turn: Mutex::new(None),
                snapshot_tx,
            }),
        }
    }

    /// Seed already-persisted history.
    pub fn with_history(self, history: impl IntoIterator<Item = ThreadMessage>) -> Self {
        self.shared.lock_messages().extend(history);
        self
    }

    pub fn thread_id(&self) -> ThreadId {
        self.shared.thread_id
    }

    pub fn status(&self) -> SessionStatus {
        self.shared.lock_session().status()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.lock_session().snapshot()
    }

    /// Receive a snapshot after every state change.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.shared.snapshot_tx.subscribe()
    }

    /// Snapshots as a [`Stream`](futures::Stream), starting with the current one.
    pub fn snapshot_stream(&self) -> WatchStream<SessionSnapshot> {
        WatchStream::new(self.subscribe())
    }

    /// Rendering input: persisted messages plus the live entry.
    pub fn entries(&self) -> Vec<ThreadEntry> {
        let snapshot = self.snapshot();
        self.shared.lock_messages().entries(&snapshot)
    }

    /// Persist the user's text and start streaming the reply.
    pub async fn submit(&self, text: impl Into<String>) -> Result<SubmitOutcome> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(ThreadlineError::InvalidArgument(
                "message text must not be empty".to_string(),
            ));
        }

        let (turn_id, cancel) = {
            let mut session = self.shared.lock_session();
            if !session.begin(&self.shared.config.placeholder) {
                return Ok(SubmitOutcome::AlreadyStreaming);
            }
            let turn = ActiveTurn {
                id: Uuid::new_v4(),
                cancel: CancellationToken::new(),
            };
            let handles = (turn.id, turn.cancel.clone());
            *self.shared.lock_active_turn() = Some(turn);
            handles
        };
        self.shared.publish();

        let thread_id = self.shared.thread_id;
        let user_message = match self
            .shared
            .collaborators
            .gateway
            .post_message(thread_id, PostMessage::user(text))
            .await
        {
            Ok(message) => message,
            Err(e) => {
                warn!(%thread_id, error = %e, "Failed to post user message");
                self.shared.lock_session().abandon();
                self.shared.clear_active_turn(turn_id);
                self.shared.publish();
                self.shared
                    .notify(Notification::error(thread_id, format!("Could not send message: {e}")));
                return Err(e);
            }
        };
        self.shared.record(user_message.clone());

        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(async move { shared.run_turn(turn_id, cancel).await });
        Ok(SubmitOutcome::Started(StreamingTurn { user_message, task }))
    }

    /// Cancel the running turn. Returns `false` if nothing was running.
    pub fn stop(&self) -> bool {
        match self.shared.lock_active_turn().as_ref() {
            Some(turn) => {
                turn.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Re-post tool results whose persistence failed earlier.
    ///
    /// Stops early on an error that is not transient (rejected credentials, a
    /// malformed request): the remaining results go back on the failed list
    /// unattempted. A `stop` during the retry discards whatever is left.
    pub async fn retry_failed(&self) -> Result<RetryReport> {
        let (failed, taken_at) = {
            let mut session = self.shared.lock_session();
            if !session.status().is_at_rest() {
                return Err(ThreadlineError::InvalidState(format!(
                    "cannot retry while {}",
                    session.status()
                )));
            }
            (session.take_failed(), session.stop_count())
        };

        let mut report = RetryReport::default();
        let mut queue = failed.into_iter();
        while let Some(result) = queue.next() {
            let error = match self.shared.post_tool_result(&result).await {
                Ok(message) => {
                    report.persisted.push(message);
                    None
                }
                Err(e) => Some(e),
            };
            if self.shared.lock_session().stop_count() != taken_at {
                warn!(thread_id = %self.shared.thread_id, "Stopped during retry, discarding the rest");
                report.discarded.extend(error.map(|_| result));
                report.discarded.extend(queue);
                break;
            }
            let Some(e) = error else {
                continue;
            };

            self.shared.notify(Notification::error(
                self.shared.thread_id,
                format!("Could not save result of {}: {e}", result.function_name),
            ));
            let give_up = !e.is_retryable();
            let mut session = self.shared.lock_session();
            session.restore_failed(result.clone(), taken_at);
            report.still_failed.push(result);
            if give_up {
                warn!(thread_id = %self.shared.thread_id, error = %e, "Retry aborted on a permanent error");
                for rest in queue.by_ref() {
                    session.restore_failed(rest.clone(), taken_at);
                    report.still_failed.push(rest);
                }
                break;
            }
        }
        self.shared.publish();
        Ok(report)
    }

    /// Rate a persisted message.
    pub async fn vote(&self, message_id: MessageId, value: VoteValue) -> Result<()> {
        self.shared.collaborators.gateway.vote(message_id, value).await?;
        if !self.shared.lock_messages().apply_vote(message_id, value) {
            debug!(%message_id, "Voted on a message not loaded in this composer");
        }
        Ok(())
    }
}

impl Shared {
    fn lock_session(&self) -> MutexGuard<'_, StreamSession> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_messages(&self) -> MutexGuard<'_, ThreadMessageSequence> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_active_turn(&self) -> MutexGuard<'_, Option<ActiveTurn>> {
        self.active_turn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Forget the turn, unless a newer one already replaced it.
    fn clear_active_turn(&self, turn_id: Uuid) {
        let mut slot = self.lock_active_turn();
        if slot.as_ref().is_some_and(|turn| turn.id == turn_id) {
            slot.take();
        }
    }

    fn publish(&self) {
        let snapshot = self.lock_session().snapshot();
        self.snapshot_tx.send_replace(snapshot);
    }

    fn notify(&self, notification: Notification) {
        self.collaborators.notifier.notify(notification);
    }

    fn record(&self, message: ThreadMessage) {
        self.lock_messages().insert(message);
    }

    async fn run_turn(self: Arc<Self>, turn_id: Uuid, cancel: CancellationToken) -> TurnReport {
        let mut report = TurnReport::default();
        let mut request = StreamRequest::reply(self.thread_id);

        'passes: loop {
            if cancel.is_cancelled() {
                self.stop_now(&mut report);
                break;
            }

            report.streams_opened += 1;
            let opened = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.stop_now(&mut report);
                    break 'passes;
                }
                opened = self.collaborators.transport.open(&request) => opened,
            };
            let mut handle = match opened {
                Ok(handle) => handle,
                Err(e) => {
                    let transition = self.lock_session().apply(StreamEvent::error(e.to_string()));
                    if let Transition::Abort { message } = transition {
                        self.abort(message, &cancel, &mut report).await;
                    }
                    break;
                }
            };
            debug!(thread_id = %self.thread_id, stream = %handle.id(), mode = ?request.mode, "Stream opened");
            self.lock_session().resume_streaming();
            self.publish();

            loop {
                let event = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        handle.close();
                        self.stop_now(&mut report);
                        break 'passes;
                    }
                    event = handle.next_event() => event,
                };
                let event = event.unwrap_or_else(|| StreamEvent::error("stream closed"));

                let transition = self.lock_session().apply(event);
                self.publish();

                match transition {
                    Transition::Continue | Transition::Ignored => {}
                    Transition::Drain => {
                        handle.close();
                        match self.drain(request.mode, &cancel, &mut report).await {
                            Some(DrainDecision::Interpret) => {
                                report.interpretation_passes += 1;
                                request = StreamRequest::interpretation(self.thread_id);
                                continue 'passes;
                            }
                            Some(DrainDecision::Idle) => {
                                report.final_status = SessionStatus::Idle;
                                break 'passes;
                            }
                            None => break 'passes,
                        }
                    }
                    Transition::Abort { message } => {
                        handle.close();
                        self.abort(message, &cancel, &mut report).await;
                        break 'passes;
                    }
                }
            }
        }

        self.clear_active_turn(turn_id);
        self.publish();
        info!(
            thread_id = %self.thread_id,
            status = %report.final_status,
            persisted = report.persisted.len(),
            failures = report.failures.len(),
            "Turn finished"
        );
        report
    }

    /// Flush the buffer and queue. `None` means the turn was stopped midway.
    async fn drain(
        &self,
        mode: StreamMode,
        cancel: &CancellationToken,
        report: &mut TurnReport,
    ) -> Option<DrainDecision> {
        let text = self.lock_session().take_assistant_text();
        if let Some(text) = text {
            let post = match mode {
                StreamMode::Reply => PostMessage::assistant(text),
                StreamMode::Interpretation => {
                    PostMessage::assistant(text).with_subtype(INTERPRETATION_SUBTYPE)
                }
            };
            match self
                .collaborators
                .gateway
                .post_message(self.thread_id, post.clone())
                .await
            {
                Ok(message) => {
                    self.record(message.clone());
                    report.persisted.push(message);
                }
                Err(e) => {
                    warn!(thread_id = %self.thread_id, error = %e, "Failed to persist assistant reply");
                    self.notify(Notification::error(
                        self.thread_id,
                        format!("Could not save the assistant reply: {e}"),
                    ));
                    report.failures.push(PersistFailure {
                        message: post,
                        error: e.to_string(),
                    });
                }
            }
            self.publish();
        }

        if !self.flush_tool_results(cancel, report).await {
            self.stop_now(report);
            return None;
        }

        let decision = self.lock_session().finish_drain(
            self.config.max_interpretation_passes,
            &self.config.placeholder,
        );
        self.publish();
        Some(decision)
    }

    /// Post queued tool results in order. Returns `false` if cancelled.
    async fn flush_tool_results(&self, cancel: &CancellationToken, report: &mut TurnReport) -> bool {
        loop {
            if cancel.is_cancelled() {
                return false;
            }
            let next = self.lock_session().next_pending();
            let Some(result) = next else {
                return true;
            };

            match self.post_tool_result(&result).await {
                Ok(message) => {
                    self.lock_session().complete_pending(&result.call_id);
                    report.persisted.push(message);
                }
                Err(e) => {
                    warn!(
                        thread_id = %self.thread_id,
                        call_id = %result.call_id,
                        error = %e,
                        "Failed to persist tool result"
                    );
                    self.lock_session().fail_pending(&result.call_id);
                    self.notify(Notification::error(
                        self.thread_id,
                        format!("Could not save result of {}: {e}", result.function_name),
                    ));
                    report.failures.push(PersistFailure {
                        message: tool_post(&result),
                        error: e.to_string(),
                    });
                }
            }
            self.publish();
        }
    }

    async fn post_tool_result(&self, result: &ToolResult) -> Result<ThreadMessage> {
        let message = self
            .collaborators
            .gateway
            .post_message(self.thread_id, tool_post(result))
            .await?;
        self.record(message.clone());
        Ok(message)
    }

    /// Transport failed: notify, keep already-completed tool results, go Idle.
    async fn abort(&self, message: String, cancel: &CancellationToken, report: &mut TurnReport) {
        error!(thread_id = %self.thread_id, error = %message, "Stream failed");
        self.notify(Notification::error(self.thread_id, message.clone()));
        report.error = Some(message);

        if !self.flush_tool_results(cancel, report).await {
            self.stop_now(report);
            return;
        }
        self.lock_session().settle();
        report.final_status = SessionStatus::Idle;
        self.publish();
    }

    fn stop_now(&self, report: &mut TurnReport) {
        let discarded = self.lock_session().stop();
        if !discarded.is_empty() {
            warn!(
                thread_id = %self.thread_id,
                pending = discarded.pending_tool_results.len(),
                failed = discarded.failed_tool_results.len(),
                text_len = discarded.text.len(),
                active_tool = discarded.active_tool.is_some(),
                "Stopped, discarding in-flight reply"
            );
            let unsaved = discarded.pending_tool_results.len() + discarded.failed_tool_results.len();
            if unsaved > 0 {
                self.notify(Notification::warning(
                    self.thread_id,
                    format!("Stopped; {unsaved} tool result(s) were not saved"),
                ));
            }
        }
        report.discarded = Some(discarded);
        report.final_status = SessionStatus::Stopped;
        self.publish();
    }
}

fn tool_post(result: &ToolResult) -> PostMessage {
    PostMessage::tool_result(&result.call_id, &result.function_name, &result.content)
}
