//! Drives a [`RoomSession`] against a [`RoomServer`] on a tokio task.
//!
//! One task owns the session, the sync coordinator and every timer. Network
//! calls run as child tasks in a [`JoinSet`] and report back into the same
//! loop, so state is only ever touched from one place. Dropping or leaving
//! the [`RoomHandle`] tears all of it down.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, interval_at, sleep_until, timeout, Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::crypto::{CryptoCodec, Opened};
use crate::grouping::{group_within, Groupable, Grouped};
use crate::messages::{ChatMessage, PushEvent, Redirect};
use crate::names::DisplayNameProvider;
use crate::server::{PushStream, RoomServer, ServerError};
use crate::session::{PollTicket, RoomSession, SessionAction};
use crate::side_channel::KeyTransport;
use crate::sync::{SyncCoordinator, SyncSignal};

#[derive(Error, Debug)]
pub enum JoinError {
    #[error("Redirect: {0}")]
    Redirect(Redirect),
    #[error(transparent)]
    Server(#[from] ServerError),
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Room session has ended")]
pub struct SessionEnded;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    Readable(String),
    /// Wrong key, tampered or malformed.
    Unreadable,
    /// No key held; shown as a neutral placeholder.
    Locked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedMessage {
    pub id: String,
    pub sender: String,
    pub body: MessageBody,
    pub timestamp: i64,
}

impl Groupable for OpenedMessage {
    fn sender(&self) -> &str {
        &self.sender
    }

    fn timestamp_ms(&self) -> i64 {
        self.timestamp
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomUpdate {
    /// Countdown changed, from a poll or a local tick.
    Ttl(Option<u64>),
    Messages {
        messages: Vec<Grouped<OpenedMessage>>,
        /// Ids absent from the previous fetch.
        new_ids: Vec<String>,
    },
    SendFailed(String),
    /// The session is over. Always the last update.
    Redirect(Redirect),
}

enum Command {
    Send(String),
    Destroy,
}

enum Completion {
    Ttl(PollTicket, Result<u64, ServerError>),
    Fetched(Result<Vec<ChatMessage>, ServerError>),
    Posted(Result<ChatMessage, ServerError>),
}

pub struct RoomHandle {
    room_id: String,
    display_name: String,
    commands: mpsc::UnboundedSender<Command>,
    updates: mpsc::UnboundedReceiver<RoomUpdate>,
    task: JoinHandle<()>,
}

impl RoomHandle {
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn send(&self, text: impl Into<String>) -> Result<(), SessionEnded> {
        self.commands
            .send(Command::Send(text.into()))
            .map_err(|_| SessionEnded)
    }

    /// Destroy the room for everyone.
    pub fn destroy(&self) -> Result<(), SessionEnded> {
        self.commands.send(Command::Destroy).map_err(|_| SessionEnded)
    }

    /// `None` once the session has ended and every update was read.
    pub async fn next_update(&mut self) -> Option<RoomUpdate> {
        self.updates.recv().await
    }

    /// Stop the session. Once this returns no timer fires and no request
    /// completes on its behalf.
    pub async fn leave(self) {
        self.task.abort();
        if let Err(e) = self.task.await {
            if !e.is_cancelled() {
                error!("Room {} session task failed: {}", self.room_id, e);
            }
        }
        info!("Left room {}", self.room_id);
    }
}

pub struct RoomClient<S: ?Sized> {
    server: Arc<S>,
    codec: CryptoCodec,
    config: SessionConfig,
}

impl<S: RoomServer + ?Sized + 'static> RoomClient<S> {
    pub fn new(server: Arc<S>) -> Self {
        Self {
            server,
            codec: CryptoCodec::default(),
            config: SessionConfig::default(),
        }
    }

    #[must_use]
    pub fn with_codec(mut self, codec: CryptoCodec) -> Self {
        self.codec = codec;
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Acquire the key from `transport`, pass admission and start the
    /// session task. Terminal outcomes come back as
    /// [`JoinError::Redirect`].
    pub async fn join<T: KeyTransport>(
        &self,
        room_id: &str,
        transport: &T,
        names: &dyn DisplayNameProvider,
    ) -> Result<RoomHandle, JoinError> {
        let mut session = RoomSession::new(room_id);
        if let Some(redirect) = redirect_in(&session.acquire_key(transport)) {
            return Err(JoinError::Redirect(redirect));
        }

        let token = Uuid::new_v4().to_string();
        let admitted = match self.server.join(room_id, &token).await {
            Ok(()) => self.server.subscribe(room_id).await,
            Err(e) => Err(e),
        };
        let push = match admitted {
            Ok(push) => push,
            Err(e) => {
                return Err(match e.rejection() {
                    Some(rejection) => {
                        let actions = session.on_admission_rejected(rejection);
                        JoinError::Redirect(redirect_in(&actions).unwrap_or(rejection.into()))
                    }
                    None => JoinError::Server(e),
                });
            }
        };

        let display_name = names.display_name();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();

        let worker = Worker {
            server: Arc::clone(&self.server),
            codec: self.codec.clone(),
            config: self.config.clone(),
            sync: SyncCoordinator::new(self.config.debounce_window()),
            session,
            display_name: display_name.clone(),
            updates: updates_tx,
            inflight: JoinSet::new(),
            published_ttl: None,
        };
        let task = tokio::spawn(worker.run(commands_rx, push));

        Ok(RoomHandle {
            room_id: room_id.to_string(),
            display_name,
            commands: commands_tx,
            updates: updates_rx,
            task,
        })
    }
}

/// Turn a server call that outlives `limit` into a transport error.
async fn bounded<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, ServerError>>,
) -> Result<T, ServerError> {
    timeout(limit, call)
        .await
        .unwrap_or_else(|_| Err(ServerError::Transport(format!("no response within {limit:?}"))))
}

fn redirect_in(actions: &[SessionAction]) -> Option<Redirect> {
    actions.iter().find_map(|action| match action {
        SessionAction::Redirect(redirect) => Some(*redirect),
        _ => None,
    })
}

struct Worker<S: ?Sized> {
    server: Arc<S>,
    codec: CryptoCodec,
    config: SessionConfig,
    sync: SyncCoordinator,
    session: RoomSession,
    display_name: String,
    updates: mpsc::UnboundedSender<RoomUpdate>,
    inflight: JoinSet<Completion>,
    published_ttl: Option<u64>,
}

impl<S: RoomServer + ?Sized + 'static> Worker<S> {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut push: PushStream,
    ) {
        let tick_every = self.config.tick_interval();
        let mut countdown = interval_at(Instant::now() + tick_every, tick_every);
        countdown.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut polls = interval(self.config.poll_interval());
        polls.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut push_open = true;

        self.sync.request_now(Instant::now());

        while self.session.is_active() {
            let deadline = self.sync.deadline();

            tokio::select! {
                _ = countdown.tick() => {
                    let actions = self.session.on_tick();
                    self.apply(actions);
                    self.publish_ttl();
                }
                _ = polls.tick() => self.start_poll(),
                event = push.recv(), if push_open => match event {
                    Some(event) => self.on_push(&event),
                    None => {
                        warn!("Room {}: push channel closed", self.session.room_id());
                        push_open = false;
                    }
                },
                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if self.sync.take_due(Instant::now()) {
                        self.start_fetch();
                    }
                }
                command = commands.recv() => match command {
                    Some(Command::Send(text)) => self.start_send(&text),
                    Some(Command::Destroy) => {
                        let actions = self.session.on_destroy_requested();
                        self.apply(actions);
                    }
                    None => {
                        debug!("Room {}: handle dropped", self.session.room_id());
                        break;
                    }
                },
                Some(done) = self.inflight.join_next(), if !self.inflight.is_empty() => match done {
                    Ok(completion) => self.on_completion(completion),
                    Err(e) if e.is_cancelled() => {}
                    Err(e) => error!("Room {}: request task failed: {}", self.session.room_id(), e),
                },
            }
        }

        debug!("Room {}: session loop finished in {:?}", self.session.room_id(), self.session.phase());
    }

    fn apply(&mut self, actions: Vec<SessionAction>) {
        for action in actions {
            match action {
                SessionAction::DeleteRoom => {
                    // detached so the request outlives this session
                    let server = Arc::clone(&self.server);
                    let room_id = self.session.room_id().to_string();
                    let limit = self.config.request_timeout();
                    tokio::spawn(async move {
                        if let Err(e) = bounded(limit, server.delete_room(&room_id)).await {
                            warn!("Room {}: delete request failed: {}", room_id, e);
                        }
                    });
                }
                SessionAction::CancelTimers => {
                    self.sync.cancel();
                    self.inflight.abort_all();
                }
                SessionAction::Redirect(redirect) => {
                    let _ = self.updates.send(RoomUpdate::Redirect(redirect));
                }
            }
        }
    }

    fn publish_ttl(&mut self) {
        let ttl = self.session.ttl();
        if ttl != self.published_ttl && self.session.is_active() {
            self.published_ttl = ttl;
            let _ = self.updates.send(RoomUpdate::Ttl(ttl));
        }
    }

    fn on_push(&mut self, event: &PushEvent) {
        if event.room_id() != self.session.room_id() {
            debug!("Ignoring push for room {}", event.room_id());
            return;
        }

        if let Some(SyncSignal::Destroy) = self.sync.on_push_event(event, Instant::now()) {
            let actions = self.session.on_push_event(event);
            self.apply(actions);
        }
    }

    fn start_poll(&mut self) {
        let Some(ticket) = self.session.begin_poll() else {
            return;
        };
        let server = Arc::clone(&self.server);
        let room_id = self.session.room_id().to_string();
        let limit = self.config.request_timeout();
        self.inflight.spawn(async move {
            Completion::Ttl(ticket, bounded(limit, server.ttl(&room_id)).await)
        });
    }

    fn start_fetch(&mut self) {
        let server = Arc::clone(&self.server);
        let room_id = self.session.room_id().to_string();
        let limit = self.config.request_timeout();
        self.inflight.spawn(async move {
            Completion::Fetched(bounded(limit, server.messages(&room_id)).await)
        });
    }

    fn start_send(&mut self, text: &str) {
        let wire = match self.codec.outgoing(text, self.session.key()) {
            Ok(wire) => wire,
            Err(e) => {
                error!("Room {}: could not seal message: {}", self.session.room_id(), e);
                let _ = self.updates.send(RoomUpdate::SendFailed(e.to_string()));
                return;
            }
        };

        let server = Arc::clone(&self.server);
        let room_id = self.session.room_id().to_string();
        let sender = self.display_name.clone();
        let limit = self.config.request_timeout();
        self.inflight.spawn(async move {
            let posted = bounded(limit, server.post_message(&room_id, &sender, &wire)).await;
            Completion::Posted(posted)
        });
    }

    fn on_completion(&mut self, completion: Completion) {
        let now = Instant::now();
        match completion {
            Completion::Ttl(ticket, result) => {
                let actions = self.session.on_poll_result(ticket, result);
                self.apply(actions);
                self.publish_ttl();
            }
            Completion::Fetched(Ok(messages)) => {
                let new_ids = self
                    .sync
                    .on_fetched(messages.iter().map(|m| m.id.as_str()), now);
                let opened = messages.into_iter().map(|m| self.open(m)).collect();
                let messages = group_within(opened, self.config.grouping_window());
                let _ = self.updates.send(RoomUpdate::Messages { messages, new_ids });
            }
            Completion::Fetched(Err(e)) => {
                warn!("Room {}: message fetch failed: {}", self.session.room_id(), e);
                self.sync.on_fetch_failed(now, self.config.poll_interval());
            }
            Completion::Posted(Ok(message)) => {
                debug!("Room {}: posted {}", self.session.room_id(), message.id);
                self.sync.request_now(now);
            }
            Completion::Posted(Err(e)) => {
                warn!("Room {}: send failed: {}", self.session.room_id(), e);
                let _ = self.updates.send(RoomUpdate::SendFailed(e.to_string()));
            }
        }
    }

    fn open(&self, message: ChatMessage) -> OpenedMessage {
        let body = match self.codec.open(&message.text, self.session.key()) {
            Opened::Plaintext(text) => MessageBody::Readable(text),
            Opened::DecryptionFailed => MessageBody::Unreadable,
            Opened::KeyAbsent => MessageBody::Locked,
        };
        OpenedMessage {
            id: message.id,
            sender: message.sender,
            body,
            timestamp: message.timestamp,
        }
    }
}
