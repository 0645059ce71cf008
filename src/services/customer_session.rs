//! Customer chat session: drives [`CustomerChatState`] against the API.
//!
//! DESIGN
//! ======
//! The session owns the state behind a mutex and republishes a snapshot on a
//! `watch` channel after every change. The lock is never held across an
//! API call: each operation reads what it needs, awaits the response, then
//! re-locks to apply it. The poller holds only a weak reference, so dropping
//! the session releases everything and cancels the poll task.
//!
//! ERROR HANDLING
//! ==============
//! Poll failures are logged and retried on the next tick. A 401 anywhere
//! ends the session's authentication and stops polling. Send failures leave
//! the conversation untouched and are both returned and stored in
//! `last_error` for the view.

#[cfg(test)]
#[path = "customer_session_test.rs"]
mod customer_session_test;

use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::alerts::{AGENT_MESSAGE_TITLE, AlertSink, notification_body};
use super::poller::PollTask;
use crate::config::ClientConfig;
use crate::error::ChatError;
use crate::net::api::ChatApi;
use crate::net::types::{ChannelId, ChannelStatus, Message};
use crate::state::auth::{AuthContext, AuthToken};
use crate::state::customer::{CustomerChatState, CustomerPhase};

const ACTIVE_STATUSES: [ChannelStatus; 2] = [ChannelStatus::Open, ChannelStatus::Assigned];

pub struct CustomerSession {
    inner: Arc<Inner>,
}

struct Inner {
    api: Arc<dyn ChatApi>,
    alerts: Arc<dyn AlertSink>,
    auth: Mutex<Option<AuthContext>>,
    state: Mutex<CustomerChatState>,
    view_tx: watch::Sender<CustomerChatState>,
    poll_every: Duration,
    tenant_id: u64,
    root: CancellationToken,
    poller: Mutex<Option<PollTask>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CustomerSession {
    /// Create a session. Asks the alert sink for permission once.
    pub fn new(
        api: Arc<dyn ChatApi>,
        alerts: Arc<dyn AlertSink>,
        auth: Option<AuthContext>,
        config: &ClientConfig,
    ) -> Self {
        let state = CustomerChatState::new(auth.is_some(), auth.as_ref().map_or(0, AuthContext::user_id));
        let (view_tx, _) = watch::channel(state.clone());
        alerts.request_permission();
        Self {
            inner: Arc::new(Inner {
                api,
                alerts,
                auth: Mutex::new(auth),
                state: Mutex::new(state),
                view_tx,
                poll_every: config.poll.customer,
                tenant_id: config.tenant_id,
                root: CancellationToken::new(),
                poller: Mutex::new(None),
            }),
        }
    }

    /// Recover an open or assigned channel left over from an earlier run.
    ///
    /// Without credentials this is a no-op and makes no API call.
    ///
    /// # Errors
    ///
    /// Any API error from channel discovery or hydration.
    pub async fn mount(&self) -> Result<(), ChatError> {
        self.inner.mount().await
    }

    /// Send-button dispatch: the first message creates the channel.
    ///
    /// # Errors
    ///
    /// `Unauthenticated` without credentials (the caller redirects to
    /// [`crate::error::LOGIN_PATH`]), `Validation` for blank text, otherwise
    /// whatever the underlying send returns.
    pub async fn submit(&self, text: &str) -> Result<(), ChatError> {
        self.inner.check_ready(text)?;
        if self.inner.state().channel.is_none() {
            self.inner.send_first_message(text).await.map(|_| ())
        } else {
            self.inner.send_message(text).await.map(|_| ())
        }
    }

    /// Create a channel carrying `text` as its first message.
    ///
    /// # Errors
    ///
    /// Returns the API error; the session stays in `NoChannel` so the user can retry.
    pub async fn send_first_message(&self, text: &str) -> Result<ChannelId, ChatError> {
        self.inner.check_ready(text)?;
        self.inner.send_first_message(text).await
    }

    /// Send `text` on the current channel.
    ///
    /// # Errors
    ///
    /// `NoChannel` or `ChannelClosed` when composing is not possible, or the API error.
    pub async fn send_message(&self, text: &str) -> Result<Message, ChatError> {
        self.inner.check_ready(text)?;
        self.inner.send_message(text).await
    }

    /// Run one poll tick now.
    pub async fn poll_once(&self) -> ControlFlow<()> {
        self.inner.poll_once().await
    }

    pub fn open_view(&self) {
        self.inner.update(CustomerChatState::open_view);
    }

    pub fn close_view(&self) {
        self.inner.update(CustomerChatState::close_view);
    }

    pub fn set_draft(&self, draft: &str) {
        self.inner.update(|s| s.draft = draft.to_owned());
    }

    #[must_use]
    pub fn snapshot(&self) -> CustomerChatState {
        self.inner.state().clone()
    }

    #[must_use]
    pub fn phase(&self) -> CustomerPhase {
        self.inner.state().phase()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<CustomerChatState> {
        self.inner.view_tx.subscribe()
    }

    #[must_use]
    pub fn is_polling(&self) -> bool {
        lock(&self.inner.poller).as_ref().is_some_and(|p| !p.is_finished())
    }

    /// Forget credentials and conversation, and stop polling.
    pub fn sign_out(&self) {
        self.inner.stop_polling();
        *lock(&self.inner.auth) = None;
        self.inner.update(CustomerChatState::sign_out);
        tracing::info!("customer session signed out");
    }

    /// Cancel all background work and wait for it to exit.
    pub async fn shutdown(&self) {
        self.inner.root.cancel();
        let task = lock(&self.inner.poller).take();
        if let Some(task) = task {
            task.shutdown().await;
        }
    }
}

impl Drop for CustomerSession {
    fn drop(&mut self) {
        self.inner.root.cancel();
    }
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, CustomerChatState> {
        lock(&self.state)
    }

    /// Mutate state and publish the result.
    fn update<R>(&self, f: impl FnOnce(&mut CustomerChatState) -> R) -> R {
        let (result, snapshot) = {
            let mut state = self.state();
            let result = f(&mut state);
            (result, state.clone())
        };
        self.view_tx.send_replace(snapshot);
        result
    }

    fn token(&self) -> Option<AuthToken> {
        lock(&self.auth).as_ref().map(|a| a.token.clone())
    }

    fn require_token(&self) -> Result<AuthToken, ChatError> {
        self.token().ok_or_else(|| self.reject(ChatError::Unauthenticated))
    }

    /// Store `err` for the view and hand it back.
    fn reject(&self, err: ChatError) -> ChatError {
        self.update(|s| s.last_error = Some(err.clone()));
        err
    }

    fn check_ready(&self, text: &str) -> Result<(), ChatError> {
        self.require_token()?;
        if text.trim().is_empty() {
            return Err(self.reject(ChatError::Validation("Message cannot be empty.".to_owned())));
        }
        Ok(())
    }

    fn begin_send(&self) -> Result<(), ChatError> {
        let busy = self.update(|s| std::mem::replace(&mut s.sending, true));
        if busy { Err(ChatError::Busy) } else { Ok(()) }
    }

    fn fail_send(&self, err: ChatError) -> ChatError {
        self.update(|s| {
            s.sending = false;
            s.last_error = Some(err.clone());
        });
        if err == ChatError::Unauthenticated {
            self.auth_lost();
        }
        err
    }

    fn auth_lost(&self) {
        tracing::warn!("customer session lost authentication");
        *lock(&self.auth) = None;
        self.stop_polling();
        self.update(|s| {
            s.authenticated = false;
            s.last_error = Some(ChatError::Unauthenticated);
        });
    }

    async fn mount(self: &Arc<Self>) -> Result<(), ChatError> {
        let Some(token) = self.token() else {
            return Ok(());
        };
        let channels = match self.api.customer_channels(&token, &ACTIVE_STATUSES).await {
            Ok(channels) => channels,
            Err(e) => return Err(self.fail_mount(e)),
        };
        let Some(existing) = channels.into_iter().next() else {
            tracing::debug!("no active channel to recover");
            return Ok(());
        };
        let detail = match self.api.customer_channel(&token, existing.id).await {
            Ok(detail) => detail,
            Err(e) => return Err(self.fail_mount(e)),
        };
        let channel_id = existing.id;
        self.update(|s| s.hydrate(existing, detail));
        tracing::info!(channel_id, "recovered customer channel");
        self.sync_polling();
        Ok(())
    }

    fn fail_mount(&self, err: ChatError) -> ChatError {
        tracing::warn!(error = %err, "channel recovery failed");
        if err == ChatError::Unauthenticated {
            self.auth_lost();
            return err;
        }
        self.reject(err)
    }

    async fn send_first_message(self: &Arc<Self>, text: &str) -> Result<ChannelId, ChatError> {
        let token = self.require_token()?;
        if self.state().channel.is_some() {
            return self.send_message(text).await.map(|m| m.channel_id);
        }
        self.begin_send()?;
        let text = text.trim();
        match self.api.create_channel(&token, self.tenant_id, text).await {
            Ok(created) => {
                self.update(|s| {
                    s.sending = false;
                    s.seed_created_channel(created, text, OffsetDateTime::now_utc());
                });
                tracing::info!(channel_id = created.channel_id, "customer channel created");
                self.sync_polling();
                Ok(created.channel_id)
            }
            Err(e) => {
                tracing::warn!(error = %e, "create channel failed");
                Err(self.fail_send(e))
            }
        }
    }

    async fn send_message(&self, text: &str) -> Result<Message, ChatError> {
        let token = self.require_token()?;
        let channel_id = {
            let state = self.state();
            match &state.channel {
                None => None,
                Some(ch) if ch.is_closed() => Some(Err(ChatError::ChannelClosed(ch.id))),
                Some(ch) => Some(Ok(ch.id)),
            }
        };
        let channel_id = match channel_id {
            None => return Err(self.reject(ChatError::NoChannel)),
            Some(Err(e)) => return Err(self.reject(e)),
            Some(Ok(id)) => id,
        };

        self.begin_send()?;
        match self.api.send_customer_message(&token, channel_id, text.trim()).await {
            Ok(message) => {
                self.update(|s| {
                    s.sending = false;
                    if s.channel_id() == Some(channel_id) {
                        s.append_sent(message.clone());
                    }
                });
                tracing::debug!(channel_id, message_id = message.id, "customer message sent");
                Ok(message)
            }
            Err(e) => {
                tracing::warn!(channel_id, error = %e, "send message failed");
                Err(self.fail_send(e))
            }
        }
    }

    async fn poll_once(&self) -> ControlFlow<()> {
        let (Some(token), Some(channel_id)) = (self.token(), self.state().channel_id()) else {
            return ControlFlow::Break(());
        };

        let detail = match self.api.customer_channel(&token, channel_id).await {
            Ok(detail) => detail,
            Err(ChatError::Unauthenticated) => {
                self.auth_lost();
                return ControlFlow::Break(());
            }
            Err(e) => {
                tracing::warn!(channel_id, error = %e, "customer poll failed");
                return ControlFlow::Continue(());
            }
        };

        let Some(delta) = self.update(|s| s.apply_poll(channel_id, detail)) else {
            tracing::debug!(channel_id, "discarding poll for superseded channel");
            return ControlFlow::Continue(());
        };
        if let Some(body) = &delta.alert {
            self.alerts.play_sound();
            self.alerts.notify(AGENT_MESSAGE_TITLE, &notification_body(body));
        }
        if !delta.appended.is_empty() {
            tracing::debug!(channel_id, new = delta.appended.len(), from_agent = delta.agent_messages, "new messages");
        }
        if delta.channel_closed {
            tracing::info!(channel_id, "customer channel closed");
            self.stop_polling();
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    }

    /// Start or stop the poller to match the current phase.
    fn sync_polling(self: &Arc<Self>) {
        if !self.state().wants_polling() {
            self.stop_polling();
            return;
        }
        let mut slot = lock(&self.poller);
        if slot.as_ref().is_some_and(|p| !p.is_finished()) {
            return;
        }
        let weak = Arc::downgrade(self);
        *slot = Some(PollTask::spawn_delayed("customer-channel", self.poll_every, self.root.child_token(), move || {
            let weak = weak.clone();
            async move {
                match weak.upgrade() {
                    Some(inner) => inner.poll_once().await,
                    None => ControlFlow::Break(()),
                }
            }
        }));
    }

    fn stop_polling(&self) {
        if let Some(task) = lock(&self.poller).take() {
            task.stop();
        }
    }
}
