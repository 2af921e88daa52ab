//! Shared test doubles: scripted transport, recording gateway and notifier.

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use threadline::config::ThreadlineConfig;
use threadline::error::{Result, ThreadlineError};
use threadline::gateway::MessageGateway;
use threadline::notify::{Notification, Notifier};
use threadline::session::{Collaborators, Composer, StreamingTurn, SubmitOutcome};
use threadline::transport::{StreamHandle, StreamRequest, StreamTransport};
use threadline::types::*;

enum Script {
    Events(Vec<StreamEvent>),
    Channel(mpsc::UnboundedReceiver<Result<StreamEvent>>),
    Refuse(String),
}

/// A transport that replays queued scripts, one per `open`.
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<StreamRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a fixed list of events for the next `open`.
    pub fn push_events(&self, events: Vec<StreamEvent>) {
        self.scripts.lock().unwrap().push_back(Script::Events(events));
    }

    /// Queue a stream fed by the returned sender.
    pub fn push_channel(&self) -> mpsc::UnboundedSender<Result<StreamEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.scripts.lock().unwrap().push_back(Script::Channel(rx));
        tx
    }

    /// Make the next `open` fail.
    pub fn push_refusal(&self, message: &str) {
        self.scripts
            .lock()
            .unwrap()
            .push_back(Script::Refuse(message.to_string()));
    }

    pub fn requests(&self) -> Vec<StreamRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn open_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl StreamTransport for ScriptedTransport {
    async fn open(&self, request: &StreamRequest) -> Result<StreamHandle> {
        self.requests.lock().unwrap().push(*request);
        let script = self.scripts.lock().unwrap().pop_front();
        match script {
            Some(Script::Events(events)) => Ok(StreamHandle::from_events(events)),
            Some(Script::Channel(rx)) => Ok(StreamHandle::new(UnboundedReceiverStream::new(rx).boxed())),
            Some(Script::Refuse(message)) => Err(ThreadlineError::Stream(message)),
            None => Err(ThreadlineError::Stream("no scripted stream left".to_string())),
        }
    }
}

/// An in-memory gateway that records every call and can be told to fail.
pub struct RecordingGateway {
    next_id: AtomicU64,
    posts: Mutex<Vec<PostMessage>>,
    votes: Mutex<Vec<(MessageId, VoteValue)>>,
    failing_roles: Mutex<HashSet<Role>>,
    failing_calls: Mutex<HashSet<String>>,
    permanent: AtomicBool,
}

impl Default for RecordingGateway {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            posts: Mutex::new(Vec::new()),
            votes: Mutex::new(Vec::new()),
            failing_roles: Mutex::new(HashSet::new()),
            failing_calls: Mutex::new(HashSet::new()),
            permanent: AtomicBool::new(false),
        }
    }
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_role(&self, role: Role) {
        self.failing_roles.lock().unwrap().insert(role);
    }

    pub fn fail_tool_call(&self, call_id: &str) {
        self.failing_calls.lock().unwrap().insert(call_id.to_string());
    }

    /// Make configured failures look like rejected credentials instead of a server fault.
    pub fn fail_permanently(&self) {
        self.permanent.store(true, Ordering::SeqCst);
    }

    pub fn heal(&self) {
        self.failing_roles.lock().unwrap().clear();
        self.failing_calls.lock().unwrap().clear();
    }

    /// Every post attempted, failed ones included.
    pub fn posts(&self) -> Vec<PostMessage> {
        self.posts.lock().unwrap().clone()
    }

    /// Posts other than the user's own message.
    pub fn reply_posts(&self) -> Vec<PostMessage> {
        self.posts()
            .into_iter()
            .filter(|p| p.role != Role::User)
            .collect()
    }

    pub fn votes(&self) -> Vec<(MessageId, VoteValue)> {
        self.votes.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageGateway for RecordingGateway {
    async fn post_message(&self, _thread_id: ThreadId, message: PostMessage) -> Result<ThreadMessage> {
        self.posts.lock().unwrap().push(message.clone());

        let role_fails = self.failing_roles.lock().unwrap().contains(&message.role);
        let call_fails = message
            .tool_call_id
            .as_ref()
            .is_some_and(|id| self.failing_calls.lock().unwrap().contains(id));
        if role_fails || call_fails {
            if self.permanent.load(Ordering::SeqCst) {
                return Err(ThreadlineError::Authentication("session expired".to_string()));
            }
            return Err(ThreadlineError::api(500, "gateway unavailable"));
        }

        Ok(ThreadMessage {
            id: MessageId(self.next_id.fetch_add(1, Ordering::SeqCst)),
            role: message.role,
            content: message.content,
            created_at: Utc::now(),
            tool_call_id: message.tool_call_id,
            tool_function_name: message.tool_function_name,
            vote_value: VoteValue::Neutral,
        })
    }

    async fn vote(&self, message_id: MessageId, value: VoteValue) -> Result<()> {
        self.votes.lock().unwrap().push((message_id, value));
        Ok(())
    }
}

/// Collects notifications for assertions.
#[derive(Default)]
pub struct RecordingNotifier {
    notifications: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.notifications
            .lock()
            .unwrap()
            .iter()
            .map(|n| n.message.clone())
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.notifications.lock().unwrap().push(notification);
    }
}

/// A composer wired to fresh doubles.
pub struct Harness {
    pub transport: Arc<ScriptedTransport>,
    pub gateway: Arc<RecordingGateway>,
    pub notifier: Arc<RecordingNotifier>,
    pub composer: Composer,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ThreadlineConfig::default())
    }

    pub fn with_config(config: ThreadlineConfig) -> Self {
        let transport = Arc::new(ScriptedTransport::new());
        let gateway = Arc::new(RecordingGateway::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let composer = Composer::new(ThreadId(1), config, collaborators(&transport, &gateway, &notifier));
        Self {
            transport,
            gateway,
            notifier,
            composer,
        }
    }

    /// Submit and expect a turn to start.
    pub async fn submit(&self, text: &str) -> StreamingTurn {
        match self.composer.submit(text).await.expect("submit") {
            SubmitOutcome::Started(turn) => turn,
            SubmitOutcome::AlreadyStreaming => panic!("expected a new turn"),
        }
    }
}

pub fn collaborators(
    transport: &Arc<ScriptedTransport>,
    gateway: &Arc<RecordingGateway>,
    notifier: &Arc<RecordingNotifier>,
) -> Collaborators {
    Collaborators {
        transport: transport.clone(),
        gateway: gateway.clone(),
        notifier: notifier.clone(),
    }
}
