//! SessionOrchestrator - owns the chat session and every transition of it.
//!
//! All mutable state lives in one [`SessionContext`] behind a `std::sync::Mutex`.
//! The lock is only taken inside synchronous helpers, so it is never held
//! across an `.await`: concurrent calls interleave at suspension points and
//! observe each other's guards (most importantly `sending`).
//!
//! # Sending a message
//!
//! 1. Cancel speech output and stop voice capture.
//! 2. Enter `sending`, clear the error and the suggestion chips.
//! 3. Append the prompt and an empty reply placeholder together.
//! 4. On the first exchange, set a provisional title and ask for a better
//!    one in the background.
//! 5. Overwrite the placeholder with the accumulated reply after every delta.
//! 6. On failure, remove the pair again, restore the input and show an error.
//! 7. On success, derive new chips in the background and speak the reply.
//! 8. Leave `sending`.
//!
//! Background results are written back by conversation id, so a reply or a
//! title that resolves after the user switched conversations still lands
//! where it belongs, and is dropped if that conversation was deleted.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::assistant_session::AssistantSession;
use super::error::{ChatError, MISSING_API_KEY_MESSAGE};
use super::events::SessionEvent;
use super::persistence::PersistenceGateway;
use super::speech_input::{RecognitionOutcome, SpeechInputController, ToggleOutcome};
use super::speech_output::{SpeechOutputController, SpeechState};
use super::suggestion_engine::{default_suggestions, SuggestionEngine};
use crate::config::{ChatConfig, DEFAULT_SYSTEM_PROMPT};
use crate::domain::conversation::{Conversation, ConversationStore};
use crate::domain::foundation::ConversationId;
use crate::domain::settings::{choose_voice, SessionSettings, SpeechRate, Voice};
use crate::domain::user::{Mood, User};
use crate::ports::{AIProvider, BlobStore, RecognitionEvent, SpeechRecognizer, SpeechSynthesizer};

/// Result of a call to [`SessionOrchestrator::send_message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The reply streamed to completion.
    Completed {
        conversation_id: ConversationId,
        reply: String,
    },
    /// A precondition did not hold; nothing changed.
    Skipped,
}

/// Everything the orchestrator mutates.
struct SessionContext {
    user: Option<User>,
    conversations: ConversationStore,
    settings: SessionSettings,
    voices: Vec<Voice>,
    session: Option<AssistantSession>,
    speech_out: SpeechOutputController,
    speech_in: SpeechInputController,
    input: String,
    error: Option<String>,
    config_error: Option<ChatError>,
    suggestions: Vec<String>,
    /// Bumped whenever chips become stale; background results carry the
    /// generation they were requested in.
    chip_generation: u64,
    sending: bool,
    mood: Option<Mood>,
}

struct Inner {
    ctx: Mutex<SessionContext>,
    provider: Option<Arc<dyn AIProvider>>,
    suggestion_engine: Option<SuggestionEngine>,
    persistence: PersistenceGateway,
    system_prompt: String,
    title_prefix_len: usize,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<SessionEvent>>>,
    background: Mutex<Vec<JoinHandle<()>>>,
    persist_lock: tokio::sync::Mutex<()>,
}

/// Builder for [`SessionOrchestrator`].
pub struct SessionOrchestratorBuilder {
    blobs: Arc<dyn BlobStore>,
    provider: Option<Arc<dyn AIProvider>>,
    synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
    recognizer: Option<Arc<dyn SpeechRecognizer>>,
    system_prompt: String,
    chat: ChatConfig,
}

impl SessionOrchestratorBuilder {
    pub fn provider(mut self, provider: Arc<dyn AIProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn synthesizer(mut self, synthesizer: Arc<dyn SpeechSynthesizer>) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    pub fn recognizer(mut self, recognizer: Arc<dyn SpeechRecognizer>) -> Self {
        self.recognizer = Some(recognizer);
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn chat_config(mut self, chat: ChatConfig) -> Self {
        self.chat = chat;
        self
    }

    /// Builds the orchestrator. Without a provider it starts in the
    /// configuration-error state and refuses to send.
    pub fn build(self) -> SessionOrchestrator {
        let config_error = self
            .provider
            .is_none()
            .then(|| ChatError::Configuration(MISSING_API_KEY_MESSAGE.to_string()));

        let ctx = SessionContext {
            user: None,
            conversations: ConversationStore::new(self.chat.greeting.clone()),
            settings: SessionSettings::default(),
            voices: Vec::new(),
            session: None,
            speech_out: SpeechOutputController::new(self.synthesizer),
            speech_in: SpeechInputController::new(self.recognizer),
            input: String::new(),
            error: config_error.as_ref().map(ChatError::user_message),
            config_error,
            suggestions: default_suggestions(),
            chip_generation: 0,
            sending: false,
            mood: None,
        };

        SessionOrchestrator {
            inner: Arc::new(Inner {
                ctx: Mutex::new(ctx),
                suggestion_engine: self.provider.clone().map(SuggestionEngine::new),
                provider: self.provider,
                persistence: PersistenceGateway::new(self.blobs),
                system_prompt: self.system_prompt,
                title_prefix_len: self.chat.title_prefix_len,
                subscribers: Mutex::new(Vec::new()),
                background: Mutex::new(Vec::new()),
                persist_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }
}

/// Cheaply cloneable handle to one chat session.
#[derive(Clone)]
pub struct SessionOrchestrator {
    inner: Arc<Inner>,
}

impl SessionOrchestrator {
    pub fn builder(blobs: Arc<dyn BlobStore>) -> SessionOrchestratorBuilder {
        SessionOrchestratorBuilder {
            blobs,
            provider: None,
            synthesizer: None,
            recognizer: None,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            chat: ChatConfig::default(),
        }
    }

    /// Receives every [`SessionEvent`] emitted from now on.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.inner.subscribers).push(tx);
        rx
    }

    // ----- account lifecycle -----

    /// Loads persisted settings and, if a user was signed in, their conversations.
    ///
    /// Returns true if a user was restored.
    pub async fn restore(&self) -> bool {
        let settings = self.inner.persistence.load_settings().await;
        let voice_changed = {
            let mut ctx = self.ctx();
            ctx.settings = settings;
            let changed = self.resolve_voice(&mut ctx);
            self.emit(SessionEvent::SettingsChanged);
            changed
        };
        if voice_changed {
            self.persist_settings().await;
        }

        match self.inner.persistence.load_user().await {
            Some(user) => {
                tracing::info!(user = %user.email, "Restored signed-in user");
                self.set_user(user);
                self.load_conversations().await;
                true
            }
            None => false,
        }
    }

    /// Signs `user` in and opens their conversations.
    pub async fn login(&self, user: User) {
        tracing::info!(user = %user.email, "User signed in");
        self.set_user(user.clone());
        if let Err(e) = self.inner.persistence.save_user(&user).await {
            tracing::warn!(error = %e, "Failed to persist user");
        }
        self.load_conversations().await;
    }

    /// Signs out and forgets the user's conversations.
    pub async fn logout(&self) {
        {
            let mut ctx = self.ctx();
            self.cancel_speech(&mut ctx);
            ctx.speech_in.stop();
            ctx.user = None;
            ctx.conversations.clear();
            ctx.session = None;
            self.write_input(&mut ctx, String::new());
            self.clear_error(&mut ctx);
            self.reset_chips(&mut ctx);
            self.emit(SessionEvent::UserChanged);
            self.emit(SessionEvent::ConversationsChanged { active: None });
        }
        tracing::info!("User signed out");

        if let Err(e) = self.inner.persistence.remove_user().await {
            tracing::warn!(error = %e, "Failed to remove persisted user");
        }
        if let Err(e) = self.inner.persistence.remove_conversations().await {
            tracing::warn!(error = %e, "Failed to remove persisted conversations");
        }
    }

    /// Replaces the signed-in user's avatar. Returns false when signed out.
    pub async fn update_avatar(&self, avatar: impl Into<String>) -> bool {
        let user = {
            let mut ctx = self.ctx();
            let Some(user) = ctx.user.as_mut() else {
                return false;
            };
            user.avatar = Some(avatar.into());
            let user = user.clone();
            self.emit(SessionEvent::UserChanged);
            user
        };
        if let Err(e) = self.inner.persistence.save_user(&user).await {
            tracing::warn!(error = %e, "Failed to persist avatar");
        }
        true
    }

    // ----- conversation transitions -----

    /// Opens a fresh conversation and makes it active.
    pub async fn new_chat(&self) -> ConversationId {
        let id = {
            let mut ctx = self.ctx();
            self.cancel_speech(&mut ctx);
            let id = ctx.conversations.create_conversation().id();
            self.write_input(&mut ctx, String::new());
            self.clear_error(&mut ctx);
            self.reset_chips(&mut ctx);
            self.rebind_logged(&mut ctx, id);
            self.emit(SessionEvent::ConversationsChanged { active: Some(id) });
            id
        };
        tracing::debug!(conversation_id = %id, "New conversation");
        self.persist_conversations().await;
        id
    }

    /// Makes `id` active. Returns false if no such conversation exists.
    pub async fn select_chat(&self, id: ConversationId) -> bool {
        {
            let mut ctx = self.ctx();
            if ctx.conversations.active_id() == Some(id) {
                return true;
            }
            if !ctx.conversations.select(id) {
                return false;
            }
            self.reset_chips(&mut ctx);
            self.rebind_logged(&mut ctx, id);
            self.emit(SessionEvent::ConversationsChanged { active: Some(id) });
        }
        tracing::debug!(conversation_id = %id, "Conversation selected");
        self.persist_conversations().await;
        true
    }

    /// Deletes `id`, moving the active pointer if it pointed there.
    pub async fn delete_chat(&self, id: ConversationId) -> bool {
        {
            let mut ctx = self.ctx();
            let before = ctx.conversations.active_id();
            if !ctx.conversations.delete(id) {
                return false;
            }
            let after = ctx.conversations.active_id();
            if after != before {
                self.reset_chips(&mut ctx);
                if let Some(active) = after {
                    self.rebind_logged(&mut ctx, active);
                }
            }
            self.emit(SessionEvent::ConversationsChanged { active: after });
        }
        tracing::debug!(conversation_id = %id, "Conversation deleted");
        self.persist_conversations().await;
        true
    }

    /// Rebuilds the assistant binding for `conversation_id`.
    ///
    /// Called at every active-conversation transition. On failure the
    /// binding is dropped, so the next send reports `SessionNotReady`.
    pub fn rebind_session(&self, conversation_id: ConversationId) -> Result<(), ChatError> {
        let mut ctx = self.ctx();
        self.rebind(&mut ctx, conversation_id)
    }

    // ----- the turn -----

    /// Sends `prompt` in the active conversation and streams the reply.
    ///
    /// A blank prompt, a send already in flight or a missing active
    /// conversation make this a no-op ([`SendOutcome::Skipped`]).
    pub async fn send_message(&self, prompt: &str) -> Result<SendOutcome, ChatError> {
        let prompt = prompt.to_string();
        let Some(turn) = self.begin_turn(&prompt)? else {
            return Ok(SendOutcome::Skipped);
        };

        let result = self.stream_reply(&turn, &prompt).await;

        match result {
            Ok(reply) => {
                self.complete_turn(&turn, &reply);
                self.spawn_suggestions(turn.conversation_id, turn.chip_generation, reply.clone());
                self.persist_conversations().await;
                Ok(SendOutcome::Completed {
                    conversation_id: turn.conversation_id,
                    reply,
                })
            }
            Err(err) => {
                self.fail_turn(&turn, &prompt, &err);
                self.persist_conversations().await;
                Err(err)
            }
        }
    }

    /// Steps 1 to 4. Returns `None` when a precondition fails.
    fn begin_turn(&self, prompt: &str) -> Result<Option<TurnTicket>, ChatError> {
        let mut ctx = self.ctx();
        if let Some(err) = &ctx.config_error {
            return Err(err.clone());
        }
        if prompt.trim().is_empty() || ctx.sending {
            return Ok(None);
        }
        let Some(conversation_id) = ctx.conversations.active_id() else {
            return Ok(None);
        };
        let session = ctx
            .session
            .clone()
            .filter(|s| s.conversation_id() == conversation_id);
        let Some(session) = session else {
            tracing::warn!(conversation_id = %conversation_id, "Send without a bound session");
            self.write_input(&mut ctx, prompt.to_string());
            self.set_error(&mut ctx, Some(ChatError::SessionNotReady.user_message()));
            return Err(ChatError::SessionNotReady);
        };

        self.cancel_speech(&mut ctx);
        if ctx.speech_in.stop() {
            tracing::debug!("Stopped voice capture for send");
        }

        self.set_sending(&mut ctx, true);
        self.clear_error(&mut ctx);
        ctx.chip_generation += 1;
        self.set_suggestions(&mut ctx, Vec::new());

        let first_exchange = ctx
            .conversations
            .get(conversation_id)
            .is_some_and(Conversation::is_awaiting_first_exchange);
        ctx.conversations
            .update(conversation_id, |c| c.begin_turn(prompt));
        self.emit(SessionEvent::TurnStarted {
            conversation_id,
            prompt: prompt.to_string(),
        });
        self.write_input(&mut ctx, String::new());

        if first_exchange {
            let title: String = prompt.chars().take(self.inner.title_prefix_len).collect();
            ctx.conversations
                .update(conversation_id, |c| c.set_title(title.clone()));
            self.emit(SessionEvent::TitleChanged {
                conversation_id,
                title,
            });
            self.spawn_title(conversation_id, prompt.to_string());
        }

        tracing::debug!(conversation_id = %conversation_id, "Turn started");
        Ok(Some(TurnTicket {
            conversation_id,
            session,
            mood: ctx.mood,
            chip_generation: ctx.chip_generation,
        }))
    }

    /// Step 5.
    async fn stream_reply(&self, turn: &TurnTicket, prompt: &str) -> Result<String, ChatError> {
        let mut deltas = turn.session.send_stream(prompt, turn.mood).await?;

        let mut reply = String::new();
        while let Some(delta) = deltas.next().await {
            reply.push_str(&delta?);
            self.apply_partial_reply(turn.conversation_id, &reply);
        }
        if reply.is_empty() {
            return Err(ChatError::Stream("reply stream ended without text".to_string()));
        }
        Ok(reply)
    }

    fn apply_partial_reply(&self, conversation_id: ConversationId, text: &str) {
        let mut ctx = self.ctx();
        let applied = ctx
            .conversations
            .update(conversation_id, |c| {
                c.overwrite_reply(text);
            });
        if applied {
            self.emit(SessionEvent::ReplyUpdated {
                conversation_id,
                text: text.to_string(),
            });
        }
    }

    /// Steps 7 and 8 for a successful stream.
    fn complete_turn(&self, turn: &TurnTicket, reply: &str) {
        let mut ctx = self.ctx();
        self.refresh_binding(&mut ctx, turn.conversation_id);
        self.emit(SessionEvent::TurnCompleted {
            conversation_id: turn.conversation_id,
            text: reply.to_string(),
        });
        self.set_sending(&mut ctx, false);
        tracing::info!(
            conversation_id = %turn.conversation_id,
            reply_chars = reply.chars().count(),
            "Turn completed"
        );

        if ctx.conversations.active_id() == Some(turn.conversation_id) {
            self.speak_active_reply(&mut ctx);
        }
    }

    /// Steps 6 and 8 for a failed stream.
    fn fail_turn(&self, turn: &TurnTicket, prompt: &str, err: &ChatError) {
        tracing::error!(conversation_id = %turn.conversation_id, error = %err, "Reply stream failed");

        let mut ctx = self.ctx();
        if ctx
            .conversations
            .update(turn.conversation_id, Conversation::rollback_turn)
        {
            self.emit(SessionEvent::TurnRolledBack {
                conversation_id: turn.conversation_id,
            });
        }
        self.refresh_binding(&mut ctx, turn.conversation_id);
        self.set_error(&mut ctx, Some(err.user_message()));
        self.write_input(&mut ctx, prompt.to_string());
        self.reset_chips(&mut ctx);
        self.set_sending(&mut ctx, false);
    }

    // ----- background work -----

    fn spawn_title(&self, conversation_id: ConversationId, prompt: String) {
        let Some(engine) = self.inner.suggestion_engine.clone() else {
            return;
        };
        let this = self.clone();
        let handle = tokio::spawn(async move {
            match engine.derive_title(conversation_id, &prompt).await {
                Ok(title) => {
                    if this.apply_title(conversation_id, title) {
                        this.persist_conversations().await;
                    }
                }
                Err(e) => {
                    tracing::warn!(conversation_id = %conversation_id, error = %e, "Title derivation failed");
                }
            }
        });
        self.track(handle);
    }

    fn apply_title(&self, conversation_id: ConversationId, title: String) -> bool {
        let mut ctx = self.ctx();
        let applied = ctx
            .conversations
            .update(conversation_id, |c| c.set_title(title.clone()));
        if applied {
            self.emit(SessionEvent::TitleChanged {
                conversation_id,
                title,
            });
        } else {
            tracing::debug!(conversation_id = %conversation_id, "Dropping title for deleted conversation");
        }
        applied
    }

    fn spawn_suggestions(&self, conversation_id: ConversationId, generation: u64, reply: String) {
        let Some(engine) = self.inner.suggestion_engine.clone() else {
            return;
        };
        let this = self.clone();
        let handle = tokio::spawn(async move {
            let chips = match engine.derive_suggestions(conversation_id, &reply).await {
                Ok(chips) => chips,
                Err(e) => {
                    tracing::warn!(conversation_id = %conversation_id, error = %e, "Suggestion derivation failed");
                    default_suggestions()
                }
            };
            this.apply_suggestions(generation, chips);
        });
        self.track(handle);
    }

    fn apply_suggestions(&self, generation: u64, chips: Vec<String>) {
        let mut ctx = self.ctx();
        if ctx.chip_generation != generation {
            tracing::debug!("Dropping stale suggestions");
            return;
        }
        self.set_suggestions(&mut ctx, chips);
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut background = lock(&self.inner.background);
        background.retain(|h| !h.is_finished());
        background.push(handle);
    }

    /// Waits for every outstanding title and suggestion task.
    pub async fn settle(&self) {
        loop {
            let pending: Vec<JoinHandle<()>> = std::mem::take(&mut *lock(&self.inner.background));
            if pending.is_empty() {
                return;
            }
            for handle in pending {
                if let Err(e) = handle.await {
                    tracing::warn!(error = %e, "Background task panicked");
                }
            }
        }
    }

    // ----- input, speech and settings -----

    /// The user edited the input field.
    pub fn set_input(&self, text: impl Into<String>) {
        let mut ctx = self.ctx();
        self.cancel_speech(&mut ctx);
        self.write_input(&mut ctx, text.into());
        self.clear_error(&mut ctx);
    }

    /// The microphone button was pressed.
    pub fn toggle_recording(&self) -> Result<ToggleOutcome, ChatError> {
        let mut ctx = self.ctx();
        self.cancel_speech(&mut ctx);
        let outcome = ctx.speech_in.toggle()?;
        if outcome == ToggleOutcome::Started {
            self.write_input(&mut ctx, String::new());
            self.emit(SessionEvent::RecordingChanged(true));
        }
        Ok(outcome)
    }

    /// Feeds a speech-recognition event into the session.
    pub fn handle_recognition_event(&self, event: RecognitionEvent) {
        let mut ctx = self.ctx();
        match ctx.speech_in.handle_event(event) {
            RecognitionOutcome::Transcript(text) => self.write_input(&mut ctx, text),
            RecognitionOutcome::Failed(message) => {
                tracing::warn!(%message, "Speech recognition failed");
                self.set_error(&mut ctx, Some(message));
                self.emit(SessionEvent::RecordingChanged(false));
            }
            RecognitionOutcome::Ended => self.emit(SessionEvent::RecordingChanged(false)),
        }
    }

    /// The synthesizer finished the current utterance.
    pub fn utterance_finished(&self) {
        let mut ctx = self.ctx();
        if ctx.speech_out.state() == SpeechState::Speaking {
            ctx.speech_out.on_utterance_finished();
            self.emit(SessionEvent::SpeakingChanged(false));
        }
    }

    /// Mutes or unmutes reply vocalization. Not persisted.
    pub fn set_speech_enabled(&self, enabled: bool) {
        let mut ctx = self.ctx();
        let was_speaking = ctx.speech_out.state() == SpeechState::Speaking;
        ctx.speech_out.set_enabled(enabled);
        if was_speaking && ctx.speech_out.state() == SpeechState::Idle {
            self.emit(SessionEvent::SpeakingChanged(false));
        }
    }

    /// Mood hint added to subsequent prompts; `None` disables it.
    pub fn set_mood(&self, mood: Option<Mood>) {
        self.ctx().mood = mood;
    }

    /// Re-reads the synthesizer's voices and re-resolves the selected one.
    pub async fn refresh_voices(&self) {
        let changed = {
            let mut ctx = self.ctx();
            let changed = self.resolve_voice(&mut ctx);
            self.emit(SessionEvent::SettingsChanged);
            changed
        };
        if changed {
            self.persist_settings().await;
        }
    }

    /// Selects a voice. Returns false if the synthesizer does not offer it.
    pub async fn set_voice(&self, voice_id: &str) -> bool {
        {
            let mut ctx = self.ctx();
            if !ctx.voices.iter().any(|v| v.id == voice_id) {
                return false;
            }
            ctx.settings.voice_id = Some(voice_id.to_string());
            self.emit(SessionEvent::SettingsChanged);
        }
        self.persist_settings().await;
        true
    }

    /// Sets the speech rate, clamped into range.
    pub async fn set_rate(&self, rate: f32) -> SpeechRate {
        let rate = SpeechRate::clamped(rate);
        {
            let mut ctx = self.ctx();
            ctx.settings.rate = rate;
            self.emit(SessionEvent::SettingsChanged);
        }
        self.persist_settings().await;
        rate
    }

    pub async fn set_sound_enabled(&self, enabled: bool) {
        {
            let mut ctx = self.ctx();
            ctx.settings.sound_enabled = enabled;
            self.emit(SessionEvent::SettingsChanged);
        }
        self.persist_settings().await;
    }

    /// Records a fatal configuration problem. Sends are refused from now on.
    pub fn fail_configuration(&self, err: ChatError) {
        tracing::error!(error = %err, "Configuration error");
        let mut ctx = self.ctx();
        let message = err.user_message();
        ctx.config_error = Some(err);
        self.set_error(&mut ctx, Some(message));
    }

    // ----- read access -----

    pub fn user(&self) -> Option<User> {
        self.ctx().user.clone()
    }

    pub fn conversations(&self) -> Vec<Conversation> {
        self.ctx().conversations.iter().cloned().collect()
    }

    pub fn active_id(&self) -> Option<ConversationId> {
        self.ctx().conversations.active_id()
    }

    pub fn active_conversation(&self) -> Option<Conversation> {
        self.ctx().conversations.active().cloned()
    }

    pub fn conversation(&self, id: ConversationId) -> Option<Conversation> {
        self.ctx().conversations.get(id).cloned()
    }

    /// Conversation the assistant binding currently follows.
    pub fn bound_conversation(&self) -> Option<ConversationId> {
        self.ctx().session.as_ref().map(AssistantSession::conversation_id)
    }

    pub fn input(&self) -> String {
        self.ctx().input.clone()
    }

    pub fn error(&self) -> Option<String> {
        self.ctx().error.clone()
    }

    pub fn configuration_error(&self) -> Option<ChatError> {
        self.ctx().config_error.clone()
    }

    pub fn suggestions(&self) -> Vec<String> {
        self.ctx().suggestions.clone()
    }

    pub fn is_sending(&self) -> bool {
        self.ctx().sending
    }

    pub fn is_recording(&self) -> bool {
        self.ctx().speech_in.is_recording()
    }

    pub fn speech_state(&self) -> SpeechState {
        self.ctx().speech_out.state()
    }

    pub fn speech_input_available(&self) -> bool {
        self.ctx().speech_in.is_available()
    }

    pub fn settings(&self) -> SessionSettings {
        self.ctx().settings.clone()
    }

    pub fn voices(&self) -> Vec<Voice> {
        self.ctx().voices.clone()
    }

    // ----- internals -----

    fn ctx(&self) -> MutexGuard<'_, SessionContext> {
        lock(&self.inner.ctx)
    }

    fn emit(&self, event: SessionEvent) {
        let mut subscribers = lock(&self.inner.subscribers);
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn set_user(&self, user: User) {
        self.ctx().user = Some(user);
        self.emit(SessionEvent::UserChanged);
    }

    /// Opens the persisted conversations, or a fresh one if there are none.
    async fn load_conversations(&self) {
        let mut loaded = self.inner.persistence.load_conversations().await;
        // A turn saved mid-stream has no reply yet
        for conversation in &mut loaded {
            let pending = conversation.messages().len() > 1
                && conversation
                    .last_message()
                    .is_some_and(|m| m.is_from_assistant() && m.is_empty());
            if pending {
                conversation.rollback_turn();
            }
        }

        {
            let mut ctx = self.ctx();
            if loaded.is_empty() {
                ctx.conversations.clear();
                ctx.conversations.create_conversation();
            } else {
                ctx.conversations.replace_all(loaded);
            }
            let active = ctx.conversations.active_id();
            if let Some(id) = active {
                self.rebind_logged(&mut ctx, id);
            }
            self.reset_chips(&mut ctx);
            self.emit(SessionEvent::ConversationsChanged { active });
            tracing::debug!(count = ctx.conversations.len(), "Conversations loaded");
        }
        self.persist_conversations().await;
    }

    fn rebind(&self, ctx: &mut SessionContext, conversation_id: ConversationId) -> Result<(), ChatError> {
        ctx.session = None;
        let Some(provider) = self.inner.provider.clone() else {
            return Err(ctx
                .config_error
                .clone()
                .unwrap_or_else(|| ChatError::Configuration(MISSING_API_KEY_MESSAGE.to_string())));
        };
        let Some(conversation) = ctx.conversations.get(conversation_id) else {
            tracing::warn!(conversation_id = %conversation_id, "Cannot bind unknown conversation");
            return Err(ChatError::SessionNotReady);
        };
        ctx.session = Some(AssistantSession::bind(
            provider,
            self.inner.system_prompt.clone(),
            conversation,
        ));
        tracing::debug!(conversation_id = %conversation_id, "Assistant session bound");
        Ok(())
    }

    fn rebind_logged(&self, ctx: &mut SessionContext, conversation_id: ConversationId) {
        if let Err(e) = self.rebind(ctx, conversation_id) {
            tracing::warn!(conversation_id = %conversation_id, error = %e, "Assistant session unavailable");
        }
    }

    /// Rebuilds the binding from stored history if it follows `conversation_id`.
    ///
    /// A binding made while the turn was streaming holds the partial reply.
    fn refresh_binding(&self, ctx: &mut SessionContext, conversation_id: ConversationId) {
        let bound = ctx.session.as_ref().map(AssistantSession::conversation_id);
        if bound == Some(conversation_id) {
            self.rebind_logged(ctx, conversation_id);
        }
    }

    fn speak_active_reply(&self, ctx: &mut SessionContext) {
        let SessionContext {
            conversations,
            settings,
            voices,
            speech_out,
            ..
        } = ctx;
        match speech_out.speak_reply(conversations.active(), settings, voices) {
            Ok(true) => self.emit(SessionEvent::SpeakingChanged(true)),
            Ok(false) => {}
            Err(e) => tracing::warn!(error = %e, "Speech output failed"),
        }
    }

    fn cancel_speech(&self, ctx: &mut SessionContext) {
        let was_speaking = ctx.speech_out.state() == SpeechState::Speaking;
        ctx.speech_out.cancel();
        if was_speaking {
            self.emit(SessionEvent::SpeakingChanged(false));
        }
    }

    /// Re-reads voices and settles on one. Returns true if the choice changed.
    fn resolve_voice(&self, ctx: &mut SessionContext) -> bool {
        ctx.voices = ctx.speech_out.voices();
        if ctx.voices.is_empty() {
            return false;
        }
        let chosen = choose_voice(&ctx.voices, ctx.settings.voice_id.as_deref()).map(|v| v.id.clone());
        if chosen != ctx.settings.voice_id {
            ctx.settings.voice_id = chosen;
            true
        } else {
            false
        }
    }

    fn write_input(&self, ctx: &mut SessionContext, text: String) {
        if ctx.input != text {
            ctx.input = text.clone();
            self.emit(SessionEvent::InputChanged(text));
        }
    }

    fn set_error(&self, ctx: &mut SessionContext, error: Option<String>) {
        if ctx.error != error {
            ctx.error = error.clone();
            self.emit(SessionEvent::ErrorChanged(error));
        }
    }

    /// Clears the banner, except for a configuration error which stays up.
    fn clear_error(&self, ctx: &mut SessionContext) {
        let remaining = ctx.config_error.as_ref().map(ChatError::user_message);
        self.set_error(ctx, remaining);
    }

    fn set_suggestions(&self, ctx: &mut SessionContext, chips: Vec<String>) {
        if ctx.suggestions != chips {
            ctx.suggestions = chips.clone();
            self.emit(SessionEvent::SuggestionsChanged(chips));
        }
    }

    fn reset_chips(&self, ctx: &mut SessionContext) {
        ctx.chip_generation += 1;
        self.set_suggestions(ctx, default_suggestions());
    }

    fn set_sending(&self, ctx: &mut SessionContext, sending: bool) {
        if ctx.sending != sending {
            ctx.sending = sending;
            self.emit(SessionEvent::SendingChanged(sending));
        }
    }

    async fn persist_conversations(&self) {
        let _write = self.inner.persist_lock.lock().await;
        let snapshot = {
            let ctx = self.ctx();
            if ctx.user.is_none() || ctx.conversations.is_empty() {
                return;
            }
            ctx.conversations.conversations().to_vec()
        };
        if let Err(e) = self.inner.persistence.save_conversations(&snapshot).await {
            tracing::warn!(error = %e, "Failed to persist conversations");
        }
    }

    async fn persist_settings(&self) {
        let _write = self.inner.persist_lock.lock().await;
        let settings = self.ctx().settings.clone();
        if let Err(e) = self.inner.persistence.save_settings(&settings).await {
            tracing::warn!(error = %e, "Failed to persist settings");
        }
    }
}

/// What a running turn needs once the context lock is released.
struct TurnTicket {
    conversation_id: ConversationId,
    session: AssistantSession,
    mood: Option<Mood>,
    chip_generation: u64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::adapters::ai::{MockAIProvider, MockError};
    use crate::adapters::speech::{RecordingSynthesizer, ScriptedRecognizer};
    use crate::adapters::storage::InMemoryBlobStore;
    use crate::application::error::{SESSION_NOT_READY_MESSAGE, STREAM_FAILURE_MESSAGE};
    use crate::domain::conversation::{ChatMessage, NEW_CHAT_TITLE};

    struct Harness {
        orchestrator: SessionOrchestrator,
        provider: MockAIProvider,
        synth: RecordingSynthesizer,
        recognizer: ScriptedRecognizer,
        blobs: InMemoryBlobStore,
    }

    fn harness(provider: MockAIProvider) -> Harness {
        harness_with_store(provider, InMemoryBlobStore::new())
    }

    fn harness_with_store(provider: MockAIProvider, blobs: InMemoryBlobStore) -> Harness {
        let synth = RecordingSynthesizer::new()
            .with_voices(vec![Voice::new("samantha", "Samantha", "en-US")]);
        let recognizer = ScriptedRecognizer::new();
        let orchestrator = SessionOrchestrator::builder(Arc::new(blobs.clone()))
            .provider(Arc::new(provider.clone()))
            .synthesizer(Arc::new(synth.clone()))
            .recognizer(Arc::new(recognizer.clone()))
            .build();
        Harness {
            orchestrator,
            provider,
            synth,
            recognizer,
            blobs,
        }
    }

    fn ada() -> User {
        User::new("Ada", "ada@example.com").unwrap()
    }

    async fn signed_in(provider: MockAIProvider) -> Harness {
        let h = harness(provider);
        h.orchestrator.login(ada()).await;
        h
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn hello_turn_streams_titles_and_speaks() {
        let h = signed_in(
            MockAIProvider::new()
                .with_stream_chunks(["Hi", " there!"])
                .with_completion_for("concise title", "\"Friendly Greeting\"")
                .with_completion_for(
                    "follow-up suggestions",
                    r#"{"suggestions":["👋 Say more","❓ Ask a question"]}"#,
                ),
        )
        .await;
        let id = h.orchestrator.active_id().unwrap();

        let outcome = h.orchestrator.send_message("Hello").await.unwrap();

        assert_eq!(
            outcome,
            SendOutcome::Completed {
                conversation_id: id,
                reply: "Hi there!".to_string()
            }
        );
        let conversation = h.orchestrator.active_conversation().unwrap();
        assert_eq!(conversation.messages().len(), 3);
        assert_eq!(conversation.messages()[1], ChatMessage::user("Hello"));
        assert_eq!(conversation.messages()[2], ChatMessage::assistant("Hi there!"));
        assert!(!h.orchestrator.is_sending());
        assert_eq!(h.orchestrator.input(), "");

        let spoken = h.synth.utterances();
        assert_eq!(spoken.len(), 1);
        assert_eq!(spoken[0].text, "Hi there!");
        assert_eq!(spoken[0].voice_id.as_deref(), Some("samantha"));
        assert_eq!(h.orchestrator.speech_state(), SpeechState::Speaking);

        h.orchestrator.settle().await;

        assert_eq!(
            h.orchestrator.active_conversation().unwrap().title(),
            "Friendly Greeting"
        );
        assert_eq!(
            h.orchestrator.suggestions(),
            vec!["👋 Say more", "❓ Ask a question"]
        );
    }

    #[tokio::test]
    async fn events_follow_turn_order() {
        let h = signed_in(MockAIProvider::new().with_stream_chunks(["Hi", " there"])).await;
        let mut rx = h.orchestrator.subscribe();

        h.orchestrator.send_message("Hello").await.unwrap();
        let events = drain(&mut rx);

        let position = |wanted: &dyn Fn(&SessionEvent) -> bool| {
            events.iter().position(|e| wanted(e)).unwrap()
        };
        let sending_on = position(&|e| *e == SessionEvent::SendingChanged(true));
        let started = position(&|e| matches!(e, SessionEvent::TurnStarted { .. }));
        let first_delta = position(&|e| matches!(e, SessionEvent::ReplyUpdated { text, .. } if text == "Hi"));
        let second_delta =
            position(&|e| matches!(e, SessionEvent::ReplyUpdated { text, .. } if text == "Hi there"));
        let completed = position(&|e| matches!(e, SessionEvent::TurnCompleted { .. }));
        let sending_off = position(&|e| *e == SessionEvent::SendingChanged(false));

        assert!(sending_on < started);
        assert!(started < first_delta);
        assert!(first_delta < second_delta);
        assert!(second_delta < completed);
        assert!(completed < sending_off);
        assert!(events.iter().any(|e| matches!(
            e,
            SessionEvent::TitleChanged { title, .. } if title == "Hello"
        )));
        assert!(events.contains(&SessionEvent::SuggestionsChanged(Vec::new())));
    }

    #[tokio::test]
    async fn title_failure_keeps_prompt_prefix() {
        let h = signed_in(
            MockAIProvider::new()
                .with_response("Hi")
                .with_completion_error_for("concise title", MockError::AuthenticationFailed),
        )
        .await;
        let long_prompt = "Tell me everything you know about the history of the printing press";

        h.orchestrator.send_message(long_prompt).await.unwrap();
        h.orchestrator.settle().await;

        let title = h.orchestrator.active_conversation().unwrap().title().to_string();
        assert_eq!(title, long_prompt.chars().take(40).collect::<String>());
        assert_eq!(h.orchestrator.error(), None);
    }

    #[tokio::test]
    async fn title_is_only_derived_for_first_exchange() {
        let h = signed_in(
            MockAIProvider::new()
                .with_response("One")
                .with_response("Two")
                .with_completion_for("concise title", "First Title"),
        )
        .await;

        h.orchestrator.send_message("First").await.unwrap();
        h.orchestrator.settle().await;
        h.orchestrator.send_message("Second").await.unwrap();
        h.orchestrator.settle().await;

        let title_calls = h
            .provider
            .get_calls()
            .into_iter()
            .filter(|r| r.metadata.trace_id.starts_with("title-"))
            .count();
        assert_eq!(title_calls, 1);
        assert_eq!(h.orchestrator.active_conversation().unwrap().title(), "First Title");
    }

    #[tokio::test]
    async fn empty_suggestions_fall_back_to_defaults() {
        let h = signed_in(
            MockAIProvider::new()
                .with_response("Hi")
                .with_completion_for("follow-up suggestions", r#"{"suggestions":[]}"#),
        )
        .await;

        h.orchestrator.send_message("Hello").await.unwrap();
        h.orchestrator.settle().await;

        assert_eq!(h.orchestrator.suggestions(), default_suggestions());
    }

    #[tokio::test]
    async fn stale_suggestions_are_dropped() {
        let h = signed_in(
            MockAIProvider::new()
                .with_response("Hi")
                .with_completion_for("follow-up suggestions", r#"{"suggestions":["🐢 Late"]}"#)
                .with_delay(Duration::from_millis(10)),
        )
        .await;

        h.orchestrator.send_message("Hello").await.unwrap();
        h.orchestrator.new_chat().await;
        h.orchestrator.settle().await;

        assert_eq!(h.orchestrator.suggestions(), default_suggestions());
    }

    #[tokio::test]
    async fn mid_stream_failure_rolls_back_the_turn() {
        let h = signed_in(MockAIProvider::new().with_stream_failure_after(
            ["Hi"],
            MockError::Network {
                message: "connection reset".to_string(),
            },
        ))
        .await;
        let mut rx = h.orchestrator.subscribe();

        let result = h.orchestrator.send_message("Hello").await;

        assert!(matches!(result, Err(ChatError::Stream(_))));
        let conversation = h.orchestrator.active_conversation().unwrap();
        assert_eq!(conversation.messages().len(), 1);
        assert_eq!(h.orchestrator.input(), "Hello");
        assert_eq!(h.orchestrator.error().as_deref(), Some(STREAM_FAILURE_MESSAGE));
        assert_eq!(h.orchestrator.suggestions(), default_suggestions());
        assert!(!h.orchestrator.is_sending());
        assert!(h.synth.utterances().is_empty());

        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, SessionEvent::ReplyUpdated { text, .. } if text == "Hi")));
        assert!(events
            .iter()
            .any(|e| matches!(e, SessionEvent::TurnRolledBack { .. })));
    }

    #[tokio::test]
    async fn rejected_stream_rolls_back_before_any_delta() {
        let h = signed_in(MockAIProvider::new().with_stream_error(MockError::RateLimited {
            retry_after_secs: 5,
        }))
        .await;

        let result = h.orchestrator.send_message("Hello").await;

        assert!(matches!(result, Err(ChatError::Stream(_))));
        assert_eq!(h.orchestrator.active_conversation().unwrap().messages().len(), 1);
        assert_eq!(h.orchestrator.input(), "Hello");
    }

    #[tokio::test]
    async fn failed_turn_is_not_sent_as_history() {
        let h = signed_in(
            MockAIProvider::new()
                .with_stream_error(MockError::Timeout { timeout_secs: 30 })
                .with_response("Recovered"),
        )
        .await;

        let _ = h.orchestrator.send_message("Lost").await;
        h.orchestrator.send_message("Again").await.unwrap();

        let calls = h.provider.stream_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].messages.len(), 1);
        assert_eq!(calls[1].last_user_text(), Some("Again"));
    }

    #[tokio::test]
    async fn second_send_while_streaming_is_skipped() {
        let h = signed_in(
            MockAIProvider::new()
                .with_response("Slow reply")
                .with_delay(Duration::from_millis(20)),
        )
        .await;

        let (first, second) = tokio::join!(
            h.orchestrator.send_message("One"),
            h.orchestrator.send_message("Two")
        );

        assert!(matches!(first, Ok(SendOutcome::Completed { .. })));
        assert_eq!(second, Ok(SendOutcome::Skipped));
        assert_eq!(h.provider.stream_calls().len(), 1);
        assert_eq!(h.orchestrator.active_conversation().unwrap().messages().len(), 3);
    }

    #[tokio::test]
    async fn blank_prompt_is_skipped() {
        let h = signed_in(MockAIProvider::new()).await;

        assert_eq!(h.orchestrator.send_message("   ").await, Ok(SendOutcome::Skipped));
        assert_eq!(h.provider.call_count(), 0);
    }

    #[tokio::test]
    async fn send_without_conversation_is_skipped() {
        let h = harness(MockAIProvider::new());

        assert_eq!(h.orchestrator.send_message("Hi").await, Ok(SendOutcome::Skipped));
    }

    #[tokio::test]
    async fn missing_provider_blocks_sends() {
        let orchestrator = SessionOrchestrator::builder(Arc::new(InMemoryBlobStore::new())).build();
        orchestrator.login(ada()).await;

        let result = orchestrator.send_message("Hello").await;

        assert_eq!(
            result,
            Err(ChatError::Configuration(MISSING_API_KEY_MESSAGE.to_string()))
        );
        assert_eq!(orchestrator.error().as_deref(), Some(MISSING_API_KEY_MESSAGE));
        assert_eq!(orchestrator.active_conversation().unwrap().messages().len(), 1);
    }

    #[tokio::test]
    async fn configuration_error_survives_new_chat() {
        let h = signed_in(MockAIProvider::new()).await;
        h.orchestrator
            .fail_configuration(ChatError::Configuration("bad key".to_string()));

        h.orchestrator.new_chat().await;
        h.orchestrator.set_input("typing");

        assert_eq!(h.orchestrator.error().as_deref(), Some("bad key"));
        assert!(h.orchestrator.send_message("Hi").await.is_err());
    }

    #[tokio::test]
    async fn unbound_session_restores_input() {
        let h = signed_in(MockAIProvider::new()).await;
        assert_eq!(
            h.orchestrator.rebind_session(ConversationId::new()),
            Err(ChatError::SessionNotReady)
        );
        assert_eq!(h.orchestrator.bound_conversation(), None);

        let mut rx = h.orchestrator.subscribe();

        let result = h.orchestrator.send_message("Hello").await;

        assert_eq!(result, Err(ChatError::SessionNotReady));
        assert!(!drain(&mut rx).iter().any(|e| matches!(
            e,
            SessionEvent::TurnStarted { .. } | SessionEvent::TurnRolledBack { .. }
        )));
        assert_eq!(h.orchestrator.input(), "Hello");
        assert_eq!(h.orchestrator.error().as_deref(), Some(SESSION_NOT_READY_MESSAGE));
        let conversation = h.orchestrator.active_conversation().unwrap();
        assert_eq!(conversation.messages().len(), 1);
        assert_eq!(conversation.title(), NEW_CHAT_TITLE);
        assert!(!h.orchestrator.is_sending());
        assert_eq!(h.provider.call_count(), 0);
    }

    #[tokio::test]
    async fn reply_lands_in_origin_after_switch() {
        let h = signed_in(
            MockAIProvider::new()
                .with_stream_chunks(["A", "B", "C"])
                .with_chunk_delay(Duration::from_millis(10)),
        )
        .await;
        let origin = h.orchestrator.active_id().unwrap();

        let (result, fresh) = tokio::join!(h.orchestrator.send_message("Hello"), async {
            tokio::time::sleep(Duration::from_millis(15)).await;
            h.orchestrator.new_chat().await
        });

        assert!(result.is_ok());
        let origin_conversation = h.orchestrator.conversation(origin).unwrap();
        assert_eq!(origin_conversation.messages()[2], ChatMessage::assistant("ABC"));
        let fresh_conversation = h.orchestrator.conversation(fresh).unwrap();
        assert_eq!(fresh_conversation.messages().len(), 1);
        assert_eq!(h.orchestrator.active_id(), Some(fresh));
        assert_eq!(h.orchestrator.bound_conversation(), Some(fresh));
        assert!(h.synth.utterances().is_empty());
    }

    #[tokio::test]
    async fn switching_back_rebinds_with_full_history() {
        let h = signed_in(
            MockAIProvider::new()
                .with_response("First answer")
                .with_response("Second answer"),
        )
        .await;
        let origin = h.orchestrator.active_id().unwrap();
        h.orchestrator.send_message("First").await.unwrap();

        h.orchestrator.new_chat().await;
        assert!(h.orchestrator.select_chat(origin).await);
        h.orchestrator.send_message("Second").await.unwrap();

        let last = h.provider.stream_calls().pop().unwrap();
        assert_eq!(last.messages.len(), 3);
        assert_eq!(last.messages[0].content, "First");
        assert_eq!(last.messages[1].content, "First answer");
    }

    #[tokio::test]
    async fn switching_back_mid_stream_keeps_history_single() {
        let h = signed_in(
            MockAIProvider::new()
                .with_stream_chunks(["A", "B", "C"])
                .with_chunk_delay(Duration::from_millis(10))
                .with_response("D"),
        )
        .await;
        let origin = h.orchestrator.active_id().unwrap();

        let (result, _) = tokio::join!(h.orchestrator.send_message("Hello"), async {
            tokio::time::sleep(Duration::from_millis(15)).await;
            h.orchestrator.new_chat().await;
            h.orchestrator.select_chat(origin).await
        });
        assert!(result.is_ok());
        assert_eq!(h.orchestrator.bound_conversation(), Some(origin));

        h.orchestrator.send_message("Next").await.unwrap();

        let last = h.provider.stream_calls().pop().unwrap();
        let history: Vec<&str> = last.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(history, vec!["Hello", "ABC", "Next"]);
    }

    #[tokio::test]
    async fn switching_back_before_failure_drops_partial_turn() {
        let h = signed_in(
            MockAIProvider::new()
                .with_stream_failure_after(
                    ["A", "B"],
                    MockError::Network {
                        message: "reset".to_string(),
                    },
                )
                .with_chunk_delay(Duration::from_millis(20))
                .with_response("Fine"),
        )
        .await;
        let origin = h.orchestrator.active_id().unwrap();

        let (result, _) = tokio::join!(h.orchestrator.send_message("Hello"), async {
            tokio::time::sleep(Duration::from_millis(25)).await;
            h.orchestrator.new_chat().await;
            h.orchestrator.select_chat(origin).await
        });
        assert!(matches!(result, Err(ChatError::Stream(_))));

        h.orchestrator.send_message("Retry").await.unwrap();

        let last = h.provider.stream_calls().pop().unwrap();
        let history: Vec<&str> = last.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(history, vec!["Retry"]);
    }

    #[tokio::test]
    async fn empty_reply_is_a_failed_turn() {
        let h = signed_in(
            MockAIProvider::new()
                .with_stream_chunks(Vec::<&str>::new())
                .with_response("Here now"),
        )
        .await;

        let result = h.orchestrator.send_message("Hello").await;

        assert!(matches!(result, Err(ChatError::Stream(_))));
        assert_eq!(h.orchestrator.active_conversation().unwrap().messages().len(), 1);
        assert_eq!(h.orchestrator.input(), "Hello");
        assert_eq!(h.orchestrator.error().as_deref(), Some(STREAM_FAILURE_MESSAGE));
        assert!(h.synth.utterances().is_empty());

        h.orchestrator.send_message("Next").await.unwrap();
        let last = h.provider.stream_calls().pop().unwrap();
        assert_eq!(last.messages.len(), 1);
        assert_eq!(last.last_user_text(), Some("Next"));
    }

    #[tokio::test]
    async fn deleting_active_moves_to_previous_and_rebinds() {
        let h = signed_in(MockAIProvider::new()).await;
        let oldest = h.orchestrator.active_id().unwrap();
        let middle = h.orchestrator.new_chat().await;
        let newest = h.orchestrator.new_chat().await;
        assert!(h.orchestrator.select_chat(middle).await);

        assert!(h.orchestrator.delete_chat(middle).await);

        assert_eq!(h.orchestrator.active_id(), Some(newest));
        assert_eq!(h.orchestrator.bound_conversation(), Some(newest));
        let ids: Vec<_> = h.orchestrator.conversations().iter().map(|c| c.id()).collect();
        assert_eq!(ids, vec![newest, oldest]);
    }

    #[tokio::test]
    async fn deleting_last_conversation_opens_a_fresh_one() {
        let h = signed_in(MockAIProvider::new()).await;
        let only = h.orchestrator.active_id().unwrap();

        assert!(h.orchestrator.delete_chat(only).await);

        let active = h.orchestrator.active_id().unwrap();
        assert_ne!(active, only);
        assert_eq!(h.orchestrator.conversations().len(), 1);
        assert_eq!(h.orchestrator.bound_conversation(), Some(active));
    }

    #[tokio::test]
    async fn unknown_ids_are_rejected() {
        let h = signed_in(MockAIProvider::new()).await;

        assert!(!h.orchestrator.select_chat(ConversationId::new()).await);
        assert!(!h.orchestrator.delete_chat(ConversationId::new()).await);
    }

    #[tokio::test]
    async fn typing_cancels_speech_and_clears_error() {
        let h = signed_in(
            MockAIProvider::new().with_stream_error(MockError::Timeout { timeout_secs: 30 }),
        )
        .await;
        let _ = h.orchestrator.send_message("Hello").await;
        assert!(h.orchestrator.error().is_some());

        h.orchestrator.set_input("Hello again");

        assert_eq!(h.orchestrator.error(), None);
        assert_eq!(h.orchestrator.input(), "Hello again");
        assert!(h.synth.cancel_count() > 0);
    }

    #[tokio::test]
    async fn muted_speech_is_not_vocalized() {
        let h = signed_in(MockAIProvider::new().with_response("Quiet")).await;
        h.orchestrator.set_speech_enabled(false);

        h.orchestrator.send_message("Hello").await.unwrap();

        assert!(h.synth.utterances().is_empty());
        assert_eq!(h.orchestrator.speech_state(), SpeechState::Idle);
    }

    #[tokio::test]
    async fn utterance_finished_returns_to_idle() {
        let h = signed_in(MockAIProvider::new().with_response("Hi")).await;
        h.orchestrator.send_message("Hello").await.unwrap();
        assert_eq!(h.orchestrator.speech_state(), SpeechState::Speaking);

        h.orchestrator.utterance_finished();

        assert_eq!(h.orchestrator.speech_state(), SpeechState::Idle);
    }

    #[tokio::test]
    async fn recognition_fills_input_until_ended() {
        let h = signed_in(MockAIProvider::new()).await;
        h.orchestrator.set_input("old text");

        assert_eq!(h.orchestrator.toggle_recording(), Ok(ToggleOutcome::Started));
        assert!(h.orchestrator.is_recording());
        assert_eq!(h.orchestrator.input(), "");

        h.orchestrator
            .handle_recognition_event(RecognitionEvent::Transcript("what's the".into()));
        h.orchestrator
            .handle_recognition_event(RecognitionEvent::Transcript("what's the weather".into()));
        assert_eq!(h.orchestrator.input(), "what's the weather");

        assert_eq!(h.orchestrator.toggle_recording(), Ok(ToggleOutcome::Stopping));
        assert!(h.orchestrator.is_recording());
        h.orchestrator.handle_recognition_event(RecognitionEvent::Ended);
        assert!(!h.orchestrator.is_recording());
        assert_eq!(h.recognizer.stop_count(), 1);
    }

    #[tokio::test]
    async fn recognition_error_shows_banner() {
        let h = signed_in(MockAIProvider::new()).await;
        h.orchestrator.toggle_recording().unwrap();

        h.orchestrator
            .handle_recognition_event(RecognitionEvent::Error("no-speech".into()));

        assert!(!h.orchestrator.is_recording());
        assert_eq!(
            h.orchestrator.error().as_deref(),
            Some("Speech recognition error: no-speech")
        );
    }

    #[tokio::test]
    async fn refused_recognizer_reports_unavailable() {
        let h = signed_in(MockAIProvider::new()).await;
        h.recognizer.refuse_start(true);

        let result = h.orchestrator.toggle_recording();

        assert_eq!(
            result,
            Err(ChatError::CapabilityUnavailable("speech recognition"))
        );
        assert!(!h.orchestrator.is_recording());
        assert_eq!(h.orchestrator.error(), None);
    }

    #[tokio::test]
    async fn sending_stops_capture() {
        let h = signed_in(MockAIProvider::new().with_response("Hi")).await;
        h.orchestrator.toggle_recording().unwrap();

        h.orchestrator.send_message("Hello").await.unwrap();

        assert_eq!(h.recognizer.stop_count(), 1);
    }

    #[tokio::test]
    async fn conversations_survive_restart() {
        let blobs = InMemoryBlobStore::new();
        let first = harness_with_store(
            MockAIProvider::new()
                .with_response("Hi there")
                .with_completion_for("concise title", "Greeting"),
            blobs.clone(),
        );
        first.orchestrator.login(ada()).await;
        first.orchestrator.send_message("Hello").await.unwrap();
        first.orchestrator.settle().await;
        let saved = first.orchestrator.conversations();

        let second = harness_with_store(MockAIProvider::new(), blobs);
        assert!(second.orchestrator.restore().await);

        assert_eq!(second.orchestrator.user(), Some(ada()));
        assert_eq!(second.orchestrator.conversations(), saved);
        assert_eq!(second.orchestrator.active_conversation().unwrap().title(), "Greeting");
        assert_eq!(
            second.orchestrator.bound_conversation(),
            second.orchestrator.active_id()
        );
    }

    #[tokio::test]
    async fn restore_drops_unfinished_turn() {
        let mut conversation = Conversation::new("Hello!");
        conversation.begin_turn("Interrupted");
        let blobs = InMemoryBlobStore::new();
        let gateway = PersistenceGateway::new(Arc::new(blobs.clone()));
        gateway.save_user(&ada()).await.unwrap();
        gateway.save_conversations(&[conversation]).await.unwrap();

        let h = harness_with_store(MockAIProvider::new(), blobs);
        assert!(h.orchestrator.restore().await);

        assert_eq!(h.orchestrator.active_conversation().unwrap().messages().len(), 1);
    }

    #[tokio::test]
    async fn restore_without_user_stays_signed_out() {
        let h = harness(MockAIProvider::new());

        assert!(!h.orchestrator.restore().await);
        assert!(h.orchestrator.conversations().is_empty());
        assert_eq!(h.orchestrator.settings().voice_id.as_deref(), Some("samantha"));
    }

    #[tokio::test]
    async fn logout_clears_state_and_storage() {
        let h = signed_in(MockAIProvider::new().with_response("Hi")).await;
        h.orchestrator.send_message("Hello").await.unwrap();

        h.orchestrator.logout().await;

        assert_eq!(h.orchestrator.user(), None);
        assert!(h.orchestrator.conversations().is_empty());
        assert_eq!(h.orchestrator.bound_conversation(), None);
        let gateway = PersistenceGateway::new(Arc::new(h.blobs.clone()));
        assert_eq!(gateway.load_user().await, None);
        assert!(gateway.load_conversations().await.is_empty());
    }

    #[tokio::test]
    async fn settings_are_persisted() {
        let h = signed_in(MockAIProvider::new()).await;
        h.synth.set_voices(vec![
            Voice::new("samantha", "Samantha", "en-US"),
            Voice::new("daniel", "Daniel", "en-GB"),
        ]);
        h.orchestrator.refresh_voices().await;

        assert!(h.orchestrator.set_voice("daniel").await);
        assert!(!h.orchestrator.set_voice("missing").await);
        assert_eq!(h.orchestrator.set_rate(5.0).await, SpeechRate::clamped(2.0));
        h.orchestrator.set_sound_enabled(false).await;

        let saved = PersistenceGateway::new(Arc::new(h.blobs.clone()))
            .load_settings()
            .await;
        assert_eq!(saved.voice_id.as_deref(), Some("daniel"));
        assert_eq!(saved.rate, SpeechRate::clamped(2.0));
        assert!(!saved.sound_enabled);
    }

    #[tokio::test]
    async fn storage_failures_do_not_break_the_turn() {
        let h = signed_in(MockAIProvider::new().with_response("Still works")).await;
        h.blobs.set_fail_writes(true);

        let outcome = h.orchestrator.send_message("Hello").await;

        assert!(matches!(outcome, Ok(SendOutcome::Completed { .. })));
        assert_eq!(h.orchestrator.error(), None);
    }

    #[tokio::test]
    async fn avatar_update_requires_user() {
        let h = harness(MockAIProvider::new());
        assert!(!h.orchestrator.update_avatar("aGVsbG8=").await);

        h.orchestrator.login(ada()).await;
        assert!(h.orchestrator.update_avatar("aGVsbG8=").await);

        assert_eq!(
            h.orchestrator.user().unwrap().avatar.as_deref(),
            Some("aGVsbG8=")
        );
    }

    #[tokio::test]
    async fn mood_prefix_reaches_the_model() {
        let h = signed_in(MockAIProvider::new().with_response("Cheer up")).await;
        h.orchestrator.set_mood(Some(Mood::Sad));

        h.orchestrator.send_message("Hello").await.unwrap();

        let call = h.provider.stream_calls().pop().unwrap();
        assert!(call.last_user_text().unwrap().ends_with("Hello"));
        assert!(call.last_user_text().unwrap().contains("mood is sad"));
        let conversation = h.orchestrator.active_conversation().unwrap();
        assert_eq!(conversation.messages()[1], ChatMessage::user("Hello"));
    }
}
