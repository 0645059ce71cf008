//! Agent inbox session: roster polling, channel claims, and the selected
//! conversation.
//!
//! SYSTEM CONTEXT
//! ==============
//! Two poll tasks run while the inbox is open: the roster poller refreshes
//! the merged channel list and per-channel unread counts, and the message
//! poller refetches the selected channel on a faster cadence. Both hang off
//! the session's root cancellation token.
//!
//! DESIGN
//! ======
//! The server arbitrates claims. The client refuses to claim a channel that
//! is already owned or already being claimed, and treats any failed claim as
//! lost; the next roster tick re-syncs. Mark-read calls are spawned and never
//! awaited by the caller.

#[cfg(test)]
#[path = "agent_session_test.rs"]
mod agent_session_test;

use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::alerts::{AlertSink, CUSTOMER_MESSAGE_TITLE, notification_body};
use super::poller::PollTask;
use crate::config::ClientConfig;
use crate::error::ChatError;
use crate::net::api::ChatApi;
use crate::net::types::{Channel, ChannelId, ChannelStats, ChannelStatus, Message, UserId};
use crate::state::agent::{AgentChatState, ClaimPlan, SelectedUpdate};
use crate::state::auth::{AuthContext, AuthToken};

const ACTIVE_STATUSES: [ChannelStatus; 2] = [ChannelStatus::Open, ChannelStatus::Assigned];

pub struct AgentSession {
    inner: Arc<Inner>,
}

struct Inner {
    api: Arc<dyn ChatApi>,
    alerts: Arc<dyn AlertSink>,
    auth: Mutex<Option<AuthContext>>,
    agent_id: UserId,
    state: Mutex<AgentChatState>,
    view_tx: watch::Sender<AgentChatState>,
    roster_every: Duration,
    messages_every: Duration,
    root: CancellationToken,
    roster_poller: Mutex<Option<PollTask>>,
    message_poller: Mutex<Option<PollTask>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn running(slot: &Mutex<Option<PollTask>>) -> bool {
    lock(slot).as_ref().is_some_and(|p| !p.is_finished())
}

fn stop(slot: &Mutex<Option<PollTask>>) {
    if let Some(task) = lock(slot).take() {
        task.stop();
    }
}

impl AgentSession {
    /// Create a session. Credentials without the agent role are ignored, so
    /// every operation then fails with `Unauthenticated`.
    pub fn new(
        api: Arc<dyn ChatApi>,
        alerts: Arc<dyn AlertSink>,
        auth: Option<AuthContext>,
        config: &ClientConfig,
    ) -> Self {
        let auth = auth.filter(|a| {
            if !a.is_agent() {
                tracing::warn!(user_id = a.user_id(), role = ?a.role(), "agent inbox requires the agent role");
            }
            a.is_agent()
        });
        let agent_id = auth.as_ref().map_or(0, AuthContext::user_id);
        let state = AgentChatState::new(agent_id);
        let (view_tx, _) = watch::channel(state.clone());
        alerts.request_permission();
        Self {
            inner: Arc::new(Inner {
                api,
                alerts,
                auth: Mutex::new(auth),
                agent_id,
                state: Mutex::new(state),
                view_tx,
                roster_every: config.poll.roster,
                messages_every: config.poll.messages,
                root: CancellationToken::new(),
                roster_poller: Mutex::new(None),
                message_poller: Mutex::new(None),
            }),
        }
    }

    /// Open the inbox and start roster polling with an immediate first tick.
    ///
    /// # Errors
    ///
    /// `Unauthenticated` without agent credentials.
    pub fn open_inbox(&self) -> Result<(), ChatError> {
        self.inner.require_token()?;
        self.inner.update(|s| s.inbox_open = true);
        self.inner.start_roster_polling();
        Ok(())
    }

    /// Close the inbox and cancel both pollers.
    pub fn close_inbox(&self) {
        stop(&self.inner.roster_poller);
        stop(&self.inner.message_poller);
        self.inner.update(|s| s.inbox_open = false);
    }

    /// Refetch the roster and per-channel unread state once.
    ///
    /// # Errors
    ///
    /// Errors from the two roster endpoints. Per-channel check failures are
    /// logged and skipped.
    pub async fn refresh_roster(&self) -> Result<(), ChatError> {
        self.inner.refresh_roster().await
    }

    /// Select a channel. Unassigned channels are claimed first.
    ///
    /// # Errors
    ///
    /// `UnknownChannel` for ids not on the roster, claim errors for
    /// unassigned channels, and errors from the initial message fetch.
    pub async fn select_channel(&self, channel_id: ChannelId) -> Result<(), ChatError> {
        self.inner.select_channel(channel_id).await
    }

    /// Claim an unassigned channel and select it.
    ///
    /// # Errors
    ///
    /// `AlreadyClaimed` when another agent holds it (locally known or lost
    /// race), `Busy` when a claim is already in flight, or the API error.
    pub async fn assign_channel(&self, channel_id: ChannelId) -> Result<(), ChatError> {
        self.inner.assign_channel(channel_id).await
    }

    /// Refetch the selected channel once.
    pub async fn poll_selected(&self) -> ControlFlow<()> {
        self.inner.poll_selected().await
    }

    /// # Errors
    ///
    /// `NoChannel` without a selection, `ChannelClosed` for a closed one, or the API error.
    pub async fn send_message(&self, text: &str) -> Result<Message, ChatError> {
        self.inner.send_message(text).await
    }

    /// Close the selected channel for good.
    ///
    /// # Errors
    ///
    /// `NoChannel` without a selection, or the API error.
    pub async fn close_channel(&self) -> Result<(), ChatError> {
        self.inner.close_channel().await
    }

    /// # Errors
    ///
    /// `Unauthenticated` without agent credentials, or the API error.
    pub async fn stats(&self) -> Result<ChannelStats, ChatError> {
        let token = self.inner.require_token()?;
        self.inner.api.channel_stats(&token).await.map_err(|e| self.inner.fail(e))
    }

    pub fn set_draft(&self, draft: &str) {
        self.inner.update(|s| s.draft = draft.to_owned());
    }

    #[must_use]
    pub fn total_unread(&self) -> usize {
        self.inner.state().total_unread()
    }

    #[must_use]
    pub fn snapshot(&self) -> AgentChatState {
        self.inner.state().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AgentChatState> {
        self.inner.view_tx.subscribe()
    }

    #[must_use]
    pub fn is_roster_polling(&self) -> bool {
        running(&self.inner.roster_poller)
    }

    #[must_use]
    pub fn is_message_polling(&self) -> bool {
        running(&self.inner.message_poller)
    }

    pub fn sign_out(&self) {
        self.close_inbox();
        *lock(&self.inner.auth) = None;
        let agent_id = self.inner.agent_id;
        self.inner.update(|s| *s = AgentChatState::new(agent_id));
        tracing::info!(agent_id, "agent session signed out");
    }

    /// Cancel all background work and wait for it to exit.
    pub async fn shutdown(&self) {
        self.inner.root.cancel();
        let roster = lock(&self.inner.roster_poller).take();
        let messages = lock(&self.inner.message_poller).take();
        for task in [roster, messages].into_iter().flatten() {
            task.shutdown().await;
        }
    }
}

impl Drop for AgentSession {
    fn drop(&mut self) {
        self.inner.root.cancel();
    }
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, AgentChatState> {
        lock(&self.state)
    }

    fn update<R>(&self, f: impl FnOnce(&mut AgentChatState) -> R) -> R {
        let (result, snapshot) = {
            let mut state = self.state();
            let result = f(&mut state);
            (result, state.clone())
        };
        self.view_tx.send_replace(snapshot);
        result
    }

    fn require_token(&self) -> Result<AuthToken, ChatError> {
        lock(&self.auth).as_ref().map(|a| a.token.clone()).ok_or_else(|| self.reject(ChatError::Unauthenticated))
    }

    fn reject(&self, err: ChatError) -> ChatError {
        self.update(|s| s.last_error = Some(err.clone()));
        err
    }

    /// Surface an API error, ending the session on 401.
    fn fail(&self, err: ChatError) -> ChatError {
        if err == ChatError::Unauthenticated {
            self.auth_lost();
        }
        self.reject(err)
    }

    fn auth_lost(&self) {
        tracing::warn!(agent_id = self.agent_id, "agent session lost authentication");
        *lock(&self.auth) = None;
        stop(&self.roster_poller);
        stop(&self.message_poller);
        self.update(|s| s.inbox_open = false);
    }

    // =========================================================================
    // ROSTER
    // =========================================================================

    async fn refresh_roster(self: &Arc<Self>) -> Result<(), ChatError> {
        let token = self.require_token()?;
        let generation = self.state().begin_roster_fetch();
        let available = self.api.available_channels(&token).await.map_err(|e| self.fail(e))?;
        let assigned = self.api.agent_channels(&token, &ACTIVE_STATUSES).await.map_err(|e| self.fail(e))?;
        let applied = self.update(|s| s.is_current_roster(generation).then(|| s.apply_roster(available, assigned)));
        let Some(auto_select) = applied else {
            tracing::debug!(generation, "discarding roster from an overlapped fetch");
            return Ok(());
        };

        if let Some(channel_id) = auto_select {
            tracing::info!(channel_id, "auto-selecting assigned channel");
            if let Err(e) = self.select_assigned(&token, channel_id).await {
                tracing::warn!(channel_id, error = %e, "auto-select failed");
            }
        }

        let to_check = self.state().channels_to_check();
        for channel_id in to_check {
            let detail = match self.api.agent_channel(&token, channel_id).await {
                Ok(detail) => detail,
                Err(ChatError::Unauthenticated) => return Err(self.fail(ChatError::Unauthenticated)),
                Err(e) => {
                    tracing::warn!(channel_id, error = %e, "channel check failed");
                    continue;
                }
            };
            let observation = self.update(|s| s.apply_channel_check(channel_id, &detail.messages));
            let Some(first) = observation.as_ref().and_then(|o| o.fresh.first()) else {
                continue;
            };
            tracing::debug!(channel_id, unread = observation.as_ref().map_or(0, |o| o.unread), "new customer messages");
            self.alerts.play_sound();
            self.alerts.notify(CUSTOMER_MESSAGE_TITLE, &notification_body(&first.text));
        }
        Ok(())
    }

    async fn poll_roster(self: &Arc<Self>) -> ControlFlow<()> {
        match self.refresh_roster().await {
            Ok(()) => ControlFlow::Continue(()),
            Err(ChatError::Unauthenticated) => ControlFlow::Break(()),
            Err(e) => {
                tracing::warn!(error = %e, "roster poll failed");
                ControlFlow::Continue(())
            }
        }
    }

    fn start_roster_polling(self: &Arc<Self>) {
        let mut slot = lock(&self.roster_poller);
        if slot.as_ref().is_some_and(|p| !p.is_finished()) {
            return;
        }
        let weak = Arc::downgrade(self);
        *slot = Some(PollTask::spawn("agent-roster", self.roster_every, self.root.child_token(), move || {
            let weak = weak.clone();
            async move {
                match weak.upgrade() {
                    Some(inner) => inner.poll_roster().await,
                    None => ControlFlow::Break(()),
                }
            }
        }));
    }

    // =========================================================================
    // SELECTION
    // =========================================================================

    async fn select_channel(self: &Arc<Self>, channel_id: ChannelId) -> Result<(), ChatError> {
        let token = self.require_token()?;
        let listed = self.state().channel(channel_id).map(Channel::is_unassigned);
        let Some(unassigned) = listed else {
            return Err(self.reject(ChatError::UnknownChannel(channel_id)));
        };
        if unassigned {
            return self.assign_channel(channel_id).await;
        }
        self.select_assigned(&token, channel_id).await
    }

    /// Select, fetch once, and restart the message poller.
    ///
    /// A failed first fetch is surfaced, but the poller still starts so the
    /// next tick retries it.
    async fn select_assigned(self: &Arc<Self>, token: &AuthToken, channel_id: ChannelId) -> Result<(), ChatError> {
        stop(&self.message_poller);
        let epoch = self.update(|s| s.select(channel_id));
        tracing::debug!(channel_id, epoch, "channel selected");

        let fetched = self.fetch_selected(token, channel_id, epoch).await;
        if matches!(fetched, Err(ChatError::Unauthenticated)) {
            return Err(self.fail(ChatError::Unauthenticated));
        }
        let keep_polling = {
            let state = self.state();
            state.is_current(channel_id, epoch) && !state.selected_is_closed()
        };
        if keep_polling {
            self.start_message_polling();
        }
        match fetched {
            Ok(_) => Ok(()),
            Err(e) => {
                tracing::warn!(channel_id, error = %e, "initial fetch of selected channel failed");
                Err(self.fail(e))
            }
        }
    }

    /// Fetch the selected channel and apply it if still current. Issues a
    /// mark-read when the message list changed.
    async fn fetch_selected(
        &self,
        token: &AuthToken,
        channel_id: ChannelId,
        epoch: u64,
    ) -> Result<Option<SelectedUpdate>, ChatError> {
        let detail = self.api.agent_channel(token, channel_id).await?;
        let Some(update) = self.update(|s| s.apply_selected_detail(channel_id, epoch, detail)) else {
            tracing::debug!(channel_id, epoch, "discarding fetch for superseded selection");
            return Ok(None);
        };
        if update.changed {
            self.spawn_mark_read(token.clone(), channel_id);
        }
        if update.closed {
            tracing::info!(channel_id, "selected channel closed");
            stop(&self.message_poller);
        }
        Ok(Some(update))
    }

    fn spawn_mark_read(&self, token: AuthToken, channel_id: ChannelId) {
        let api = self.api.clone();
        tokio::spawn(async move {
            if let Err(e) = api.mark_read(&token, channel_id).await {
                tracing::warn!(channel_id, error = %e, "mark read failed");
            }
        });
    }

    async fn poll_selected(&self) -> ControlFlow<()> {
        let token = lock(&self.auth).as_ref().map(|a| a.token.clone());
        let current = {
            let state = self.state();
            state.selected.map(|id| (id, state.selection_epoch))
        };
        let (Some(token), Some((channel_id, epoch))) = (token, current) else {
            return ControlFlow::Break(());
        };

        match self.fetch_selected(&token, channel_id, epoch).await {
            Ok(Some(update)) if update.closed => ControlFlow::Break(()),
            Ok(_) => ControlFlow::Continue(()),
            Err(ChatError::Unauthenticated) => {
                self.fail(ChatError::Unauthenticated);
                ControlFlow::Break(())
            }
            Err(e) => {
                tracing::warn!(channel_id, error = %e, "message poll failed");
                ControlFlow::Continue(())
            }
        }
    }

    fn start_message_polling(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let task = PollTask::spawn_delayed("agent-messages", self.messages_every, self.root.child_token(), move || {
            let weak = weak.clone();
            async move {
                match weak.upgrade() {
                    Some(inner) => inner.poll_selected().await,
                    None => ControlFlow::Break(()),
                }
            }
        });
        if let Some(previous) = lock(&self.message_poller).replace(task) {
            previous.stop();
        }
    }

    // =========================================================================
    // CLAIMS
    // =========================================================================

    async fn assign_channel(self: &Arc<Self>, channel_id: ChannelId) -> Result<(), ChatError> {
        let token = self.require_token()?;
        let plan = self.update(|s| s.plan_claim(channel_id)).map_err(|e| self.reject(e))?;
        if plan == ClaimPlan::AlreadyMine {
            return self.select_assigned(&token, channel_id).await;
        }

        let result = self.api.assign_channel(&token, channel_id).await;
        self.update(|s| s.finish_claim(channel_id));
        let assignment = match result {
            Ok(assignment) => assignment,
            Err(e) => {
                tracing::warn!(channel_id, error = %e, "claim failed");
                return Err(self.fail(e));
            }
        };
        if assignment.assigned_agent_id != self.agent_id {
            tracing::warn!(channel_id, winner = assignment.assigned_agent_id, "claim lost to another agent");
            return Err(self.reject(ChatError::AlreadyClaimed(channel_id)));
        }

        tracing::info!(channel_id, agent_id = self.agent_id, "channel claimed");
        // Selected before the refresh so it cannot auto-select another channel.
        self.update(|s| {
            s.apply_claim(channel_id, assignment.status);
            s.select(channel_id)
        });
        if let Err(e) = self.refresh_roster().await {
            tracing::warn!(channel_id, error = %e, "roster refresh after claim failed");
        }
        self.select_assigned(&token, channel_id).await
    }

    // =========================================================================
    // COMPOSE
    // =========================================================================

    async fn send_message(&self, text: &str) -> Result<Message, ChatError> {
        let token = self.require_token()?;
        let text = text.trim();
        if text.is_empty() {
            return Err(self.reject(ChatError::Validation("Message cannot be empty.".to_owned())));
        }
        let target = self.update(|s| {
            let id = s.selected.ok_or(ChatError::NoChannel)?;
            if s.selected_is_closed() {
                return Err(ChatError::ChannelClosed(id));
            }
            if std::mem::replace(&mut s.sending, true) {
                return Err(ChatError::Busy);
            }
            Ok(id)
        });
        let channel_id = target.map_err(|e| self.reject(e))?;

        let result = self.api.send_agent_message(&token, channel_id, text).await;
        self.update(|s| s.sending = false);
        match result {
            Ok(message) => {
                self.update(|s| s.append_sent(message.clone()));
                tracing::debug!(channel_id, message_id = message.id, "agent message sent");
                Ok(message)
            }
            Err(e) => {
                tracing::warn!(channel_id, error = %e, "send message failed");
                Err(self.fail(e))
            }
        }
    }

    async fn close_channel(&self) -> Result<(), ChatError> {
        let token = self.require_token()?;
        let selected = self.state().selected;
        let channel_id = selected.ok_or(ChatError::NoChannel).map_err(|e| self.reject(e))?;
        self.api.close_channel(&token, channel_id).await.map_err(|e| self.fail(e))?;
        stop(&self.message_poller);
        self.update(|s| s.mark_closed(channel_id));
        tracing::info!(channel_id, "channel closed by agent");
        Ok(())
    }
}
