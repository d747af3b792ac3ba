//! The realtime session controller.
//!
//! Owns the one channel per live session, consumes its events, and
//! reconciles optimistic local bookkeeping (pending sends, loading
//! indicator) against server-pushed inserts, lifecycle changes, presence,
//! and broadcasts. Every failure is absorbed here and turned into a
//! UI-visible state change; nothing propagates past the controller.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use livechat_core::{
    format_message, ChannelEvent, ChatMessage, ChatRole, HumanSessionChange, MessageContent,
    PresencePayload, RuntimeConfig, StoredMessage, WidgetConfig,
};
use livechat_core::message::SystemVariant;
use livechat_core::ChatError;
use livechat_session::SessionKeeper;
use livechat_services::{AgentApi, ChatBackend};

use crate::presence;
use crate::rate::TrackRateMonitor;
use crate::transport::{ChannelHandle, ChannelParams, RealtimeTransport};
use crate::turn::{InputMode, Phase, TurnTracker};

static NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-zÀ-ÿ\s]{3,40}$").unwrap());

const AGENT_ENDED_FAREWELL: &str =
    "The agent has ended the conversation. Thank you for contacting us!";
const CONVERSATION_ENDED_FAREWELL: &str =
    "The conversation has ended. Thank you for contacting us!";
const NAME_RETRY_PROMPT: &str =
    "Please tell me your first and last name. Example: Carlos Gómez";

fn name_confirmation(name: &str) -> String {
    format!("Thanks {name}! How can I help you?")
}

/// State snapshot exposed to the presentation layer.
#[derive(Debug, Clone, Default)]
pub struct ChatView {
    pub messages: Vec<ChatMessage>,
    /// Loading indicator: outstanding replies > 0 or the explicit flag.
    pub loading: bool,
    /// Online status dot.
    pub ready: bool,
    pub typing_self: bool,
    pub agent_typing: bool,
    pub human_session_active: bool,
    pub awaiting_name: bool,
    pub pending_messages: u32,
    pub outstanding_responses: u32,
    pub phase: Phase,
}

struct ControllerState {
    messages: Vec<ChatMessage>,
    turn: TurnTracker,
    mode: InputMode,
    phase: Phase,
    ready: bool,
    typing_self: bool,
    agent_typing: bool,
    human_session_active: bool,
    last_sent_at: Option<Instant>,
}

impl ControllerState {
    fn new() -> Self {
        Self {
            messages: Vec::new(),
            turn: TurnTracker::new(),
            mode: InputMode::Normal,
            phase: Phase::Disconnected,
            ready: false,
            typing_self: false,
            agent_typing: false,
            human_session_active: false,
            last_sent_at: None,
        }
    }

    fn reset(&mut self) {
        *self = Self::new();
    }

    fn view(&self) -> ChatView {
        ChatView {
            messages: self.messages.clone(),
            loading: self.turn.indicator(),
            ready: self.ready,
            typing_self: self.typing_self,
            agent_typing: self.agent_typing,
            human_session_active: self.human_session_active,
            awaiting_name: self.mode == InputMode::AwaitingName,
            pending_messages: self.turn.pending_messages(),
            outstanding_responses: self.turn.outstanding_responses(),
            phase: self.phase,
        }
    }
}

/// Orchestrates one visitor chat session end to end.
pub struct ChatController {
    runtime: RuntimeConfig,
    transport: Arc<dyn RealtimeTransport>,
    agent: Arc<dyn AgentApi>,
    backend: Arc<dyn ChatBackend>,
    keeper: Arc<SessionKeeper>,
    config: Mutex<WidgetConfig>,
    state: Mutex<ControllerState>,
    channel: Mutex<Option<Arc<dyn ChannelHandle>>>,
    pump: Mutex<Option<JoinHandle<()>>>,
    closer: Mutex<Option<JoinHandle<()>>>,
    rate: TrackRateMonitor,
    view_tx: watch::Sender<ChatView>,
}

impl ChatController {
    pub fn new(
        transport: Arc<dyn RealtimeTransport>,
        agent: Arc<dyn AgentApi>,
        backend: Arc<dyn ChatBackend>,
        keeper: Arc<SessionKeeper>,
        config: WidgetConfig,
        runtime: RuntimeConfig,
    ) -> Arc<Self> {
        let (view_tx, _) = watch::channel(ChatView::default());
        let rate = TrackRateMonitor::new(runtime.rate_limit_window, runtime.rate_limit_threshold);
        Arc::new(Self {
            runtime,
            transport,
            agent,
            backend,
            keeper,
            config: Mutex::new(config),
            state: Mutex::new(ControllerState::new()),
            channel: Mutex::new(None),
            pump: Mutex::new(None),
            closer: Mutex::new(None),
            rate,
            view_tx,
        })
    }

    /// Watch the controller's state; the presentation layer re-renders on
    /// every change.
    pub fn subscribe(&self) -> watch::Receiver<ChatView> {
        self.view_tx.subscribe()
    }

    pub async fn view(&self) -> ChatView {
        self.state.lock().await.view()
    }

    pub async fn config(&self) -> WidgetConfig {
        self.config.lock().await.clone()
    }

    fn publish(&self, state: &ControllerState) {
        self.view_tx.send_replace(state.view());
    }

    /// Establish the session's realtime channel.
    ///
    /// Requires an agent id and a session id in configuration; restores the
    /// human-session flag, checks agent readiness (fail-closed), opens
    /// exactly one channel, tracks the initial presence payload, appends
    /// the configured greeting, and loads history.
    pub async fn initialize(self: &Arc<Self>) -> Result<(), ChatError> {
        let (agent_id, session_id, greeting) = {
            let config = self.config.lock().await;
            (
                config.agent_id.clone(),
                config.session_id.clone(),
                config.initial_message.clone(),
            )
        };
        if agent_id.trim().is_empty() || session_id.is_empty() {
            debug!("Initialization blocked: missing agent or session id");
            return Ok(());
        }
        if self.channel.lock().await.is_some() {
            // At most one channel per session; tear down before re-opening.
            debug!(session_id, "Channel already open, skipping initialization");
            return Ok(());
        }

        {
            let mut state = self.state.lock().await;
            state.phase = Phase::Connecting;
            self.publish(&state);
        }

        // Restore the human-session flag (page reload mid-handoff). A
        // lookup failure is tolerated: the flag corrects itself on the next
        // lifecycle event.
        let human_active = match self.backend.has_active_human_session(&session_id).await {
            Ok(active) => active,
            Err(err) => {
                warn!(error = %err, "Human session lookup failed");
                false
            }
        };

        if !self.agent.is_agent_active(&agent_id, &session_id).await {
            let mut state = self.state.lock().await;
            state.ready = false;
            state.phase = Phase::Disconnected;
            self.publish(&state);
            return Ok(());
        }

        let (handle, events) = match self
            .transport
            .open_channel(ChannelParams::for_session(&session_id))
            .await
        {
            Ok(opened) => opened,
            Err(err) => {
                // Absorbed like every other initialization failure: the view
                // must never advertise a connection attempt that ended.
                warn!(error = %err, "Channel subscription failed");
                let mut state = self.state.lock().await;
                state.ready = false;
                state.phase = Phase::Disconnected;
                self.publish(&state);
                return Ok(());
            }
        };
        *self.channel.lock().await = Some(handle.clone());
        self.spawn_pump(events).await;

        self.rate.record();
        if let Err(err) = handle.track(PresencePayload::online(false)).await {
            warn!(error = %err, "Initial presence track failed");
        }

        {
            let mut state = self.state.lock().await;
            state.human_session_active = human_active;
            state.messages.push(ChatMessage {
                kind: ChatRole::Assistant,
                content: MessageContent::text(greeting),
                timestamp: chrono::Utc::now(),
            });
            self.publish(&state);
        }

        self.load_history(&session_id).await;
        self.keeper.schedule_inactivity_close();
        info!(session_id, "Chat session initialized");
        Ok(())
    }

    async fn spawn_pump(self: &Arc<Self>, mut events: mpsc::Receiver<ChannelEvent>) {
        let controller = Arc::clone(self);
        let handle = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                controller.handle_event(event).await;
            }
            debug!("Channel event stream ended");
        });
        if let Some(previous) = self.pump.lock().await.replace(handle) {
            previous.abort();
        }
    }

    async fn load_history(&self, session_id: &str) {
        {
            let mut state = self.state.lock().await;
            state.turn.set_loading(true);
            self.publish(&state);
        }
        let result = self.backend.fetch_history(session_id).await;
        let mut state = self.state.lock().await;
        match result {
            Ok(records) => {
                for record in &records {
                    state.messages.push(format_message(record));
                }
            }
            Err(err) => warn!(error = %err, "History fetch failed"),
        }
        state.turn.set_loading(false);
        self.publish(&state);
    }

    /// Submit a visitor message.
    ///
    /// Rejected client-side (no network call, indicator flipped on) when
    /// sent too soon, empty, or over length. In name-collection mode the
    /// text is validated as a display name instead of being forwarded.
    /// Otherwise: optimistic pending increment, gateway call, and rollback
    /// on failure. Results arriving after Closed are discarded.
    pub async fn send_message(self: &Arc<Self>, content: &str) {
        let (agent_id, session_id) = {
            let config = self.config.lock().await;
            (config.agent_id.clone(), config.session_id.clone())
        };
        if agent_id.is_empty() || session_id.is_empty() {
            return;
        }

        let trimmed = content.trim().to_string();
        let now = Instant::now();
        {
            let mut state = self.state.lock().await;

            let too_soon = state
                .last_sent_at
                .map(|last| now.duration_since(last) < self.runtime.min_time_between_messages)
                .unwrap_or(false);
            if too_soon || trimmed.is_empty() {
                state.turn.set_loading(true);
                self.publish(&state);
                return;
            }
            if content.chars().count() > self.runtime.max_message_length {
                state.messages.push(ChatMessage {
                    kind: ChatRole::Assistant,
                    content: MessageContent::System {
                        text: format!(
                            "Message too long. Maximum {} characters.",
                            self.runtime.max_message_length
                        ),
                        variant: SystemVariant::Warning,
                    },
                    timestamp: chrono::Utc::now(),
                });
                state.turn.set_loading(true);
                self.publish(&state);
                return;
            }

            if state.mode == InputMode::AwaitingName {
                drop(state);
                self.collect_name(&trimmed, &agent_id, &session_id).await;
                return;
            }

            state.last_sent_at = Some(now);
            state.turn.begin_send();
            self.publish(&state);
        }

        self.keeper.schedule_inactivity_close();
        let result = self.agent.send_message(&trimmed, &agent_id, &session_id).await;

        let mut state = self.state.lock().await;
        if !state.phase.accepts_results() {
            debug!("Discarding send result after close");
            return;
        }
        match result {
            Ok(outcome) => {
                if outcome.human_session_active {
                    state.human_session_active = true;
                    if outcome.response.is_none() {
                        // Operator message already stored server-side; it
                        // arrives as an insert, nothing left to wait for.
                        state.turn.settle_without_reply();
                    }
                } else if outcome.response.is_some() {
                    state.turn.expect_reply();
                } else {
                    state.turn.settle_without_reply();
                }
            }
            Err(err) => {
                warn!(error = %err, "Message send failed");
                state.turn.rollback_send();
            }
        }
        self.publish(&state);
    }

    async fn collect_name(&self, reply: &str, _agent_id: &str, session_id: &str) {
        let valid =
            NAME_PATTERN.is_match(reply) && reply.split_whitespace().count() >= 1;
        if !valid {
            let mut state = self.state.lock().await;
            state.turn.set_loading(false);
            state.messages.push(ChatMessage {
                kind: ChatRole::Assistant,
                content: MessageContent::text(NAME_RETRY_PROMPT),
                timestamp: chrono::Utc::now(),
            });
            self.publish(&state);
            return;
        }

        if let Err(err) = self.backend.set_user_name(session_id, reply).await {
            warn!(error = %err, "Storing visitor name failed");
        }
        let mut state = self.state.lock().await;
        state.mode = InputMode::Normal;
        state.turn.set_loading(false);
        state.messages.push(ChatMessage {
            kind: ChatRole::Assistant,
            content: MessageContent::text(name_confirmation(reply)),
            timestamp: chrono::Utc::now(),
        });
        self.publish(&state);
    }

    /// Enter name-collection mode: the next input is treated as the
    /// visitor's display name.
    pub async fn begin_name_collection(&self) {
        let mut state = self.state.lock().await;
        state.mode = InputMode::AwaitingName;
        self.publish(&state);
    }

    /// Broadcast the visitor's typing state.
    ///
    /// Only while a human session is active: typing is meaningless to the
    /// automated assistant and must not eat into the realtime rate budget.
    /// The tracked payload is always replaced whole.
    pub async fn set_typing_status(&self, typing: bool) {
        let handle = match self.channel.lock().await.clone() {
            Some(handle) => handle,
            None => return,
        };
        {
            let state = self.state.lock().await;
            if !state.human_session_active {
                return;
            }
        }

        self.rate.record();
        if let Err(err) = handle.track(PresencePayload::online(typing)).await {
            warn!(error = %err, "Typing presence track failed");
            return;
        }
        let mut state = self.state.lock().await;
        state.typing_self = typing;
        self.publish(&state);
    }

    /// Tear down the channel: presence marked offline, a short propagation
    /// delay so peers observe it, untrack, then removal. Idempotent.
    pub async fn close_chat(&self) {
        if let Some(handle) = self.channel.lock().await.take() {
            if let Err(err) = handle.track(PresencePayload::offline()).await {
                warn!(error = %err, "Offline presence track failed");
            }
            tokio::time::sleep(self.runtime.presence_propagation_delay).await;
            if let Err(err) = handle.untrack().await {
                warn!(error = %err, "Presence untrack failed");
            }
            if let Err(err) = handle.close().await {
                warn!(error = %err, "Channel removal failed");
            }
        }
        if let Some(pump) = self.pump.lock().await.take() {
            pump.abort();
        }
        self.rate.clear();
        let mut state = self.state.lock().await;
        state.ready = false;
        self.publish(&state);
    }

    /// Full reset: teardown, cleared state, closed visitor session, and a
    /// freshly generated session id in configuration. The channel re-opens
    /// on the next initialization cycle. Returns the new session id.
    pub async fn refresh_session(self: &Arc<Self>) -> String {
        if let Some(closer) = self.closer.lock().await.take() {
            closer.abort();
        }
        self.close_chat().await;

        {
            let mut state = self.state.lock().await;
            state.reset();
            self.publish(&state);
        }
        self.rate.clear();
        self.keeper.close_session();

        tokio::time::sleep(self.runtime.refresh_propagation_delay).await;

        let new_session_id = Uuid::new_v4().to_string();
        {
            let mut config = self.config.lock().await;
            config.session_id = new_session_id.clone();
        }
        info!(session_id = %new_session_id, "Session refreshed");
        new_session_id
    }

    /// Cancel timers and tasks and tear the channel down. In-flight HTTP
    /// calls complete but their results are discarded.
    pub async fn shutdown(&self) {
        if let Some(closer) = self.closer.lock().await.take() {
            closer.abort();
        }
        self.keeper.cancel_timers();
        self.close_chat().await;
        let mut state = self.state.lock().await;
        state.phase = Phase::Closed;
        self.publish(&state);
    }

    async fn handle_event(self: &Arc<Self>, event: ChannelEvent) {
        match event {
            ChannelEvent::MessageInserted(record) => self.on_message_inserted(record).await,
            ChannelEvent::HumanSession(change) => self.on_human_session(change).await,
            ChannelEvent::PresenceSync(snapshot) => {
                let view = presence::evaluate(&snapshot);
                let mut state = self.state.lock().await;
                state.ready = view.ready;
                state.agent_typing = view.agent_typing;
                if view.ready && state.phase == Phase::Connecting {
                    state.phase = Phase::Joined;
                }
                self.publish(&state);
            }
            ChannelEvent::PresenceJoin { key } => {
                debug!(key, "Presence join");
                let mut state = self.state.lock().await;
                state.ready = true;
                state.agent_typing = false;
                if state.phase == Phase::Connecting {
                    state.phase = Phase::Joined;
                }
                self.publish(&state);
            }
            ChannelEvent::PresenceLeave { key } => {
                debug!(key, "Presence leave");
                let mut state = self.state.lock().await;
                state.ready = false;
                self.publish(&state);
            }
            ChannelEvent::AgentInfo { name, avatar } => self.on_agent_info(name, avatar).await,
            ChannelEvent::ChatClosed { message, user_name } => {
                info!(user_name, "Chat closed by operator");
                {
                    let mut state = self.state.lock().await;
                    state.turn.reset();
                    state.human_session_active = false;
                    state.messages.push(ChatMessage {
                        kind: ChatRole::Human,
                        content: MessageContent::parse(&message),
                        timestamp: chrono::Utc::now(),
                    });
                    self.publish(&state);
                }
                self.schedule_degraded_close().await;
            }
            ChannelEvent::ChannelError { reason } => {
                error!(reason, "Realtime channel error");
                if ChatError::Channel(reason.clone()).is_rate_limit() {
                    error!("Realtime rate limit error detected");
                }
                // The channel is not automatically recreated.
            }
        }
    }

    async fn on_message_inserted(&self, record: StoredMessage) {
        let mut state = self.state.lock().await;
        if !state.phase.accepts_results() {
            return;
        }
        state.messages.push(format_message(&record));
        if record.role == ChatRole::Assistant {
            state.turn.note_assistant_arrival();
        }
        self.publish(&state);
    }

    async fn on_human_session(self: &Arc<Self>, change: HumanSessionChange) {
        let farewell = match change {
            HumanSessionChange::Upsert { ref status } if status == "closed" => {
                Some(AGENT_ENDED_FAREWELL)
            }
            HumanSessionChange::Delete => Some(CONVERSATION_ENDED_FAREWELL),
            HumanSessionChange::Upsert { ref status } => {
                let mut state = self.state.lock().await;
                state.human_session_active = status == "active";
                self.publish(&state);
                None
            }
        };

        if let Some(farewell) = farewell {
            {
                let mut state = self.state.lock().await;
                state.human_session_active = false;
                state.messages.push(ChatMessage {
                    kind: ChatRole::Assistant,
                    content: MessageContent::text(farewell),
                    timestamp: chrono::Utc::now(),
                });
                self.publish(&state);
            }
            self.schedule_degraded_close().await;
        }
    }

    async fn on_agent_info(&self, name: String, avatar: String) {
        // Broadcast payloads are untrusted: validate before touching config.
        let name = name.trim();
        if name.is_empty() || name.chars().count() > 80 {
            warn!("Rejected agent_info broadcast: invalid name");
            return;
        }
        if !avatar.is_empty() && !avatar.starts_with("https://") && !avatar.starts_with("http://") {
            warn!("Rejected agent_info broadcast: invalid avatar url");
            return;
        }
        let mut config = self.config.lock().await;
        config.title = name.to_string();
        config.avatar_url = avatar;
        debug!(title = %config.title, "Agent identity updated");
    }

    /// Enter Degraded and arm the grace-delay teardown, giving the visitor
    /// time to read the farewell before the channel disappears.
    async fn schedule_degraded_close(self: &Arc<Self>) {
        {
            let mut state = self.state.lock().await;
            state.phase = Phase::Degraded;
            self.publish(&state);
        }
        let controller = Arc::clone(self);
        let grace = self.runtime.close_grace_delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            controller.finalize_forced_close().await;
        });
        if let Some(previous) = self.closer.lock().await.replace(handle) {
            previous.abort();
        }
    }

    async fn finalize_forced_close(&self) {
        self.close_chat().await;
        self.keeper.close_session();
        {
            let mut config = self.config.lock().await;
            config.session_id.clear();
        }
        let mut state = self.state.lock().await;
        state.phase = Phase::Closed;
        state.ready = false;
        self.publish(&state);
        info!("Chat fully closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use livechat_services::SendOutcome;
    use livechat_session::MemoryStore;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    struct MockChannel {
        tracks: StdMutex<Vec<PresencePayload>>,
        untracked: AtomicBool,
        closed: AtomicBool,
    }

    impl MockChannel {
        fn new() -> Self {
            Self {
                tracks: StdMutex::new(Vec::new()),
                untracked: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }
        }

        fn track_count(&self) -> usize {
            self.tracks.lock().unwrap().len()
        }

        fn last_track(&self) -> PresencePayload {
            self.tracks.lock().unwrap().last().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChannelHandle for MockChannel {
        async fn track(&self, payload: PresencePayload) -> Result<(), ChatError> {
            self.tracks.lock().unwrap().push(payload);
            Ok(())
        }
        async fn untrack(&self) -> Result<(), ChatError> {
            self.untracked.store(true, Ordering::SeqCst);
            Ok(())
        }
        async fn close(&self) -> Result<(), ChatError> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockTransport {
        opened: AtomicUsize,
        channels: StdMutex<Vec<Arc<MockChannel>>>,
        senders: StdMutex<Vec<mpsc::Sender<ChannelEvent>>>,
    }

    impl MockTransport {
        fn last_channel(&self) -> Arc<MockChannel> {
            self.channels.lock().unwrap().last().unwrap().clone()
        }

        fn last_sender(&self) -> mpsc::Sender<ChannelEvent> {
            self.senders.lock().unwrap().last().unwrap().clone()
        }
    }

    #[async_trait]
    impl RealtimeTransport for MockTransport {
        async fn open_channel(
            &self,
            _params: ChannelParams,
        ) -> Result<(Arc<dyn ChannelHandle>, mpsc::Receiver<ChannelEvent>), ChatError> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            let channel = Arc::new(MockChannel::new());
            let (tx, rx) = mpsc::channel(64);
            self.channels.lock().unwrap().push(channel.clone());
            self.senders.lock().unwrap().push(tx);
            Ok((channel, rx))
        }
    }

    struct MockAgent {
        active: bool,
        response: Option<String>,
        human_session_active: bool,
        fail: bool,
        calls: AtomicUsize,
    }

    impl MockAgent {
        fn replying(response: &str) -> Self {
            Self {
                active: true,
                response: Some(response.to_string()),
                human_session_active: false,
                fail: false,
                calls: AtomicUsize::new(0),
            }
        }

        fn inactive() -> Self {
            Self { active: false, ..Self::replying("") }
        }

        fn failing() -> Self {
            Self { fail: true, ..Self::replying("") }
        }
    }

    #[async_trait]
    impl AgentApi for MockAgent {
        async fn is_agent_active(&self, _agent_id: &str, _session_id: &str) -> bool {
            self.active
        }

        async fn send_message(
            &self,
            _content: &str,
            _agent_id: &str,
            _session_id: &str,
        ) -> Result<SendOutcome, ChatError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ChatError::Send("connection reset".into()));
            }
            Ok(SendOutcome {
                response: self.response.clone(),
                human_session_active: self.human_session_active,
            })
        }
    }

    #[derive(Default)]
    struct MockBackend {
        history: Vec<StoredMessage>,
        human_active: bool,
        names: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl ChatBackend for MockBackend {
        async fn fetch_history(&self, _session_id: &str) -> Result<Vec<StoredMessage>, ChatError> {
            Ok(self.history.clone())
        }

        async fn has_active_human_session(&self, _session_id: &str) -> Result<bool, ChatError> {
            Ok(self.human_active)
        }

        async fn set_user_name(&self, _session_id: &str, name: &str) -> Result<(), ChatError> {
            self.names.lock().unwrap().push(name.to_string());
            Ok(())
        }
    }

    struct Harness {
        controller: Arc<ChatController>,
        transport: Arc<MockTransport>,
        agent: Arc<MockAgent>,
        backend: Arc<MockBackend>,
    }

    fn harness(agent: MockAgent, backend: MockBackend) -> Harness {
        let transport = Arc::new(MockTransport::default());
        let agent = Arc::new(agent);
        let backend = Arc::new(backend);
        let keeper = Arc::new(SessionKeeper::new(
            Arc::new(MemoryStore::new()),
            RuntimeConfig::default(),
        ));
        let mut config = WidgetConfig::new("agent-1");
        config.session_id = "sess-1".to_string();
        config.initial_message = "Welcome!".to_string();
        let controller = ChatController::new(
            transport.clone(),
            agent.clone(),
            backend.clone(),
            keeper,
            config,
            RuntimeConfig::default(),
        );
        Harness { controller, transport, agent, backend }
    }

    async fn push(h: &Harness, event: ChannelEvent) {
        h.transport.last_sender().send(event).await.unwrap();
        // Let the pump task drain.
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    fn user_row(content: &str) -> StoredMessage {
        StoredMessage::synthetic(ChatRole::User, content, "agent-1", "sess-1")
    }

    fn assistant_row(content: &str) -> StoredMessage {
        StoredMessage::synthetic(ChatRole::Assistant, content, "agent-1", "sess-1")
    }

    fn text_of(msg: &ChatMessage) -> &str {
        match &msg.content {
            MessageContent::Text { text } => text,
            MessageContent::System { text, .. } => text,
            other => panic!("unexpected content {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_happy_path_message_flow() {
        let h = harness(MockAgent::replying("Hi there"), MockBackend::default());
        h.controller.initialize().await.unwrap();

        let view = h.controller.view().await;
        assert_eq!(view.messages.len(), 1);
        assert_eq!(text_of(&view.messages[0]), "Welcome!");
        assert!(!view.loading);

        h.controller.send_message("Hello").await;
        let view = h.controller.view().await;
        assert!(view.loading);
        assert_eq!(view.pending_messages, 1);
        assert_eq!(view.outstanding_responses, 1);

        push(&h, ChannelEvent::MessageInserted(user_row("Hello"))).await;
        push(&h, ChannelEvent::MessageInserted(assistant_row("Hi there"))).await;

        let view = h.controller.view().await;
        let texts: Vec<&str> = view.messages.iter().map(text_of).collect();
        assert_eq!(texts, vec!["Welcome!", "Hello", "Hi there"]);
        assert!(!view.loading);
        assert_eq!(view.pending_messages, 0);
        assert_eq!(view.outstanding_responses, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_gate_rejects_rapid_sends() {
        let h = harness(MockAgent::replying("ok"), MockBackend::default());
        h.controller.initialize().await.unwrap();

        h.controller.send_message("one").await;
        h.controller.send_message("two").await;
        assert_eq!(h.agent.calls.load(Ordering::SeqCst), 1);

        let view = h.controller.view().await;
        assert_eq!(view.pending_messages, 1); // second send changed nothing
        assert!(view.loading);

        tokio::time::sleep(Duration::from_millis(2100)).await;
        h.controller.send_message("three").await;
        assert_eq!(h.agent.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_message_not_forwarded() {
        let h = harness(MockAgent::replying("ok"), MockBackend::default());
        h.controller.initialize().await.unwrap();

        h.controller.send_message("   ").await;
        assert_eq!(h.agent.calls.load(Ordering::SeqCst), 0);
        let view = h.controller.view().await;
        assert!(view.loading);
        assert_eq!(view.pending_messages, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_over_length_message_warned_not_sent() {
        let h = harness(MockAgent::replying("ok"), MockBackend::default());
        h.controller.initialize().await.unwrap();

        h.controller.send_message(&"x".repeat(600)).await;
        assert_eq!(h.agent.calls.load(Ordering::SeqCst), 0);

        let view = h.controller.view().await;
        assert_eq!(view.pending_messages, 0);
        let last = view.messages.last().unwrap();
        assert!(matches!(
            last.content,
            MessageContent::System { variant: SystemVariant::Warning, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_failure_rolls_back_optimistic_count() {
        let h = harness(MockAgent::failing(), MockBackend::default());
        h.controller.initialize().await.unwrap();

        h.controller.send_message("Hello").await;
        let view = h.controller.view().await;
        assert_eq!(view.pending_messages, 0);
        assert!(!view.loading);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unexpected_assistant_insert_never_goes_negative() {
        let h = harness(MockAgent::replying("ok"), MockBackend::default());
        h.controller.initialize().await.unwrap();

        push(&h, ChannelEvent::MessageInserted(assistant_row("stray"))).await;
        push(&h, ChannelEvent::MessageInserted(assistant_row("stray 2"))).await;

        let view = h.controller.view().await;
        assert_eq!(view.pending_messages, 0);
        assert_eq!(view.outstanding_responses, 0);
        assert!(!view.loading);
    }

    struct BrokenTransport;

    #[async_trait]
    impl RealtimeTransport for BrokenTransport {
        async fn open_channel(
            &self,
            _params: ChannelParams,
        ) -> Result<(Arc<dyn ChannelHandle>, mpsc::Receiver<ChannelEvent>), ChatError> {
            Err(ChatError::Channel("subscription refused".into()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_open_failure_leaves_disconnected() {
        let keeper = Arc::new(SessionKeeper::new(
            Arc::new(MemoryStore::new()),
            RuntimeConfig::default(),
        ));
        let mut config = WidgetConfig::new("agent-1");
        config.session_id = "sess-1".to_string();
        let controller = ChatController::new(
            Arc::new(BrokenTransport),
            Arc::new(MockAgent::replying("ok")),
            Arc::new(MockBackend::default()),
            keeper,
            config,
            RuntimeConfig::default(),
        );

        controller.initialize().await.unwrap();
        let view = controller.view().await;
        assert_eq!(view.phase, Phase::Disconnected);
        assert!(!view.ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_agent_inactive_blocks_channel() {
        let h = harness(MockAgent::inactive(), MockBackend::default());
        h.controller.initialize().await.unwrap();

        assert_eq!(h.transport.opened.load(Ordering::SeqCst), 0);
        let view = h.controller.view().await;
        assert!(!view.ready);
        assert_eq!(view.phase, Phase::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_twice_opens_one_channel() {
        let h = harness(MockAgent::replying("ok"), MockBackend::default());
        h.controller.initialize().await.unwrap();
        h.controller.initialize().await.unwrap();
        assert_eq!(h.transport.opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_loaded_after_greeting() {
        let mut backend = MockBackend::default();
        backend.history = vec![user_row("earlier question"), assistant_row("earlier answer")];
        let h = harness(MockAgent::replying("ok"), backend);
        h.controller.initialize().await.unwrap();

        let view = h.controller.view().await;
        let texts: Vec<&str> = view.messages.iter().map(text_of).collect();
        assert_eq!(texts, vec!["Welcome!", "earlier question", "earlier answer"]);
        assert!(!view.loading);
    }

    #[tokio::test(start_paused = true)]
    async fn test_presence_drives_readiness_and_typing() {
        let h = harness(MockAgent::replying("ok"), MockBackend::default());
        h.controller.initialize().await.unwrap();

        let mut snapshot = livechat_core::PresenceSnapshot::new();
        snapshot.insert("agent:op".into(), vec![PresencePayload::online(true)]);
        push(&h, ChannelEvent::PresenceSync(snapshot)).await;

        let view = h.controller.view().await;
        assert!(view.ready);
        assert!(view.agent_typing);
        assert_eq!(view.phase, Phase::Joined);

        push(&h, ChannelEvent::PresenceLeave { key: "agent:op".into() }).await;
        assert!(!h.controller.view().await.ready);

        push(&h, ChannelEvent::PresenceJoin { key: "agent:op".into() }).await;
        let view = h.controller.view().await;
        assert!(view.ready);
        assert!(!view.agent_typing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_closure_broadcast() {
        let h = harness(MockAgent::replying("ok"), MockBackend::default());
        h.controller.initialize().await.unwrap();

        push(
            &h,
            ChannelEvent::ChatClosed { message: "Bye".into(), user_name: "X".into() },
        )
        .await;

        let view = h.controller.view().await;
        assert!(!view.loading);
        assert_eq!(view.phase, Phase::Degraded);
        let last = view.messages.last().unwrap();
        assert_eq!(last.kind, ChatRole::Human);
        assert_eq!(text_of(last), "Bye");

        // After the grace delay the channel is fully torn down and the
        // session id cleared.
        tokio::time::sleep(Duration::from_millis(2200)).await;
        let channel = h.transport.last_channel();
        assert!(channel.untracked.load(Ordering::SeqCst));
        assert!(channel.closed.load(Ordering::SeqCst));
        assert!(!channel.last_track().online);

        let view = h.controller.view().await;
        assert_eq!(view.phase, Phase::Closed);
        assert!(h.controller.config().await.session_id.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_human_session_lifecycle() {
        let h = harness(MockAgent::replying("ok"), MockBackend::default());
        h.controller.initialize().await.unwrap();

        push(
            &h,
            ChannelEvent::HumanSession(HumanSessionChange::Upsert { status: "active".into() }),
        )
        .await;
        assert!(h.controller.view().await.human_session_active);

        push(
            &h,
            ChannelEvent::HumanSession(HumanSessionChange::Upsert { status: "closed".into() }),
        )
        .await;
        let view = h.controller.view().await;
        assert!(!view.human_session_active);
        assert_eq!(view.phase, Phase::Degraded);
        assert_eq!(text_of(view.messages.last().unwrap()), AGENT_ENDED_FAREWELL);

        tokio::time::sleep(Duration::from_millis(2200)).await;
        assert_eq!(h.controller.view().await.phase, Phase::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lifecycle_delete_closes_with_farewell() {
        let h = harness(MockAgent::replying("ok"), MockBackend::default());
        h.controller.initialize().await.unwrap();

        push(&h, ChannelEvent::HumanSession(HumanSessionChange::Delete)).await;
        let view = h.controller.view().await;
        assert_eq!(text_of(view.messages.last().unwrap()), CONVERSATION_ENDED_FAREWELL);
        assert_eq!(view.phase, Phase::Degraded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_session_resets_everything() {
        let h = harness(MockAgent::replying("ok"), MockBackend::default());
        h.controller.initialize().await.unwrap();
        h.controller.send_message("Hello").await;

        let new_id = h.controller.refresh_session().await;
        assert!(!new_id.is_empty());
        assert_ne!(new_id, "sess-1");

        let view = h.controller.view().await;
        assert!(view.messages.is_empty());
        assert!(!view.human_session_active);
        assert!(!view.loading);
        assert_eq!(view.pending_messages, 0);
        assert_eq!(view.phase, Phase::Disconnected);

        // Channel torn down; it re-opens only on the next initialization.
        let channel = h.transport.last_channel();
        assert!(channel.closed.load(Ordering::SeqCst));
        assert_eq!(h.controller.config().await.session_id, new_id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_name_collection_flow() {
        let h = harness(MockAgent::replying("ok"), MockBackend::default());
        h.controller.initialize().await.unwrap();
        h.controller.begin_name_collection().await;

        h.controller.send_message("A").await;
        assert_eq!(h.agent.calls.load(Ordering::SeqCst), 0);
        let view = h.controller.view().await;
        assert!(view.awaiting_name);
        assert_eq!(text_of(view.messages.last().unwrap()), NAME_RETRY_PROMPT);

        h.controller.send_message("Carlos Gómez").await;
        assert_eq!(h.agent.calls.load(Ordering::SeqCst), 0);
        let view = h.controller.view().await;
        assert!(!view.awaiting_name);
        assert_eq!(
            text_of(view.messages.last().unwrap()),
            "Thanks Carlos Gómez! How can I help you?"
        );
        assert_eq!(
            *h.backend.names.lock().unwrap(),
            vec!["Carlos Gómez".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_typing_suppressed_outside_human_session() {
        let h = harness(MockAgent::replying("ok"), MockBackend::default());
        h.controller.initialize().await.unwrap();
        let channel = h.transport.last_channel();
        let initial_tracks = channel.track_count();

        h.controller.set_typing_status(true).await;
        assert_eq!(channel.track_count(), initial_tracks);

        push(
            &h,
            ChannelEvent::HumanSession(HumanSessionChange::Upsert { status: "active".into() }),
        )
        .await;
        h.controller.set_typing_status(true).await;
        assert_eq!(channel.track_count(), initial_tracks + 1);
        let payload = channel.last_track();
        assert!(payload.online);
        assert!(payload.typing);
        assert!(h.controller.view().await.typing_self);
    }

    #[tokio::test(start_paused = true)]
    async fn test_human_session_restored_on_initialize() {
        let backend = MockBackend { human_active: true, ..Default::default() };
        let h = harness(MockAgent::replying("ok"), backend);
        h.controller.initialize().await.unwrap();
        assert!(h.controller.view().await.human_session_active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_agent_info_broadcast_validated() {
        let h = harness(MockAgent::replying("ok"), MockBackend::default());
        h.controller.initialize().await.unwrap();

        push(
            &h,
            ChannelEvent::AgentInfo {
                name: "Sofia".into(),
                avatar: "https://cdn.example.com/a.png".into(),
            },
        )
        .await;
        let config = h.controller.config().await;
        assert_eq!(config.title, "Sofia");
        assert_eq!(config.avatar_url, "https://cdn.example.com/a.png");

        // Invalid payloads are dropped whole.
        push(
            &h,
            ChannelEvent::AgentInfo { name: "  ".into(), avatar: "javascript:alert(1)".into() },
        )
        .await;
        assert_eq!(h.controller.config().await.title, "Sofia");
    }
}
