//! The moderation pipeline.
//!
//! `submit` runs on the update consumer's path and never waits: it applies
//! inbound admission, takes a place in line on the update's serializer keys
//! and spawns the processing task. Processing loads the group session, runs
//! the update against it, and writes back whatever changed before the keys
//! are released.

use std::{sync::Arc, time::Duration};

use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    admission::AdmissionLimiter,
    commands::{CommandHandler, CommandOutcome, CommandRequest},
    domain::{ChatId, UserId},
    formatting,
    moderation::{evaluate, ModerationEvent, Verdict, ViolationReason},
    platform::{
        types::{role_of, SendOptions},
        PlatformPort,
    },
    punishment::{PunishmentReport, Punisher},
    serializer::KeySerializer,
    session::GroupSession,
    store::Sessions,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Update {
    Moderation(ModerationEvent),
    Command(CommandRequest),
}

impl Update {
    pub fn chat(&self) -> ChatId {
        match self {
            Update::Moderation(e) => e.group,
            Update::Command(c) => c.chat,
        }
    }

    pub fn actor(&self) -> UserId {
        match self {
            Update::Moderation(e) => e.actor.id,
            Update::Command(c) => c.actor.id,
        }
    }

    /// Serializer keys: the chat's session and the actor being acted on.
    ///
    /// Operator commands also hold the target's keys, so a remote ban cannot
    /// interleave with moderation of the same actor in that group.
    pub fn keys(&self) -> Vec<String> {
        let mut keys = vec![
            format!("chat:{}", self.chat()),
            format!("user:{}", self.actor()),
        ];
        if let Update::Command(req) = self {
            if let Some((group, actor)) = req.operator_target() {
                keys.push(format!("chat:{group}"));
                keys.push(format!("user:{actor}"));
            }
        }
        keys
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Submission {
    Accepted,
    /// The actor is over the inbound limit; the update was discarded.
    Dropped,
    ShuttingDown,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Clean,
    Punished {
        reason: ViolationReason,
        report: PunishmentReport,
    },
    Command(CommandOutcome),
    /// Processing stopped early (session load or admin lookup failed).
    Abandoned,
}

/// Collaborators the pipeline is built from.
pub struct PipelineDeps {
    /// Already wrapped with throttling and retry.
    pub platform: Arc<dyn PlatformPort>,
    pub sessions: Sessions,
    pub admission: AdmissionLimiter,
    /// Where first-contact announcements for new groups go.
    pub announce_to: Option<ChatId>,
    /// Operator allowed to run `/ban`, `/kick`, `/mute` against any chat.
    pub owner: Option<UserId>,
}

struct Inner {
    platform: Arc<dyn PlatformPort>,
    sessions: Sessions,
    admission: AdmissionLimiter,
    serializer: KeySerializer,
    punisher: Punisher,
    commands: CommandHandler,
    announce_to: Option<ChatId>,
    stop: CancellationToken,
    tasks: TaskTracker,
}

#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<Inner>,
}

impl Pipeline {
    pub fn new(deps: PipelineDeps) -> Self {
        let PipelineDeps {
            platform,
            sessions,
            admission,
            announce_to,
            owner,
        } = deps;
        Self {
            inner: Arc::new(Inner {
                punisher: Punisher::new(platform.clone()),
                commands: CommandHandler::new(platform.clone(), sessions.clone(), owner),
                platform,
                sessions,
                admission,
                serializer: KeySerializer::new(),
                announce_to,
                stop: CancellationToken::new(),
                tasks: TaskTracker::new(),
            }),
        }
    }

    /// Hand an update to the pipeline without waiting for it to be processed.
    ///
    /// Updates sharing a serializer key are processed in submission order.
    pub fn submit(&self, update: Update) -> Submission {
        let inner = &self.inner;
        if inner.stop.is_cancelled() {
            return Submission::ShuttingDown;
        }
        if !inner.admission.admit(update.actor()) {
            tracing::debug!(chat = %update.chat(), actor = %update.actor(), "inbound limit hit; update dropped");
            return Submission::Dropped;
        }

        let reservation = inner.serializer.enqueue(update.keys());
        let this = self.clone();
        inner.tasks.spawn(async move {
            let _keys = reservation.acquire().await;
            this.process(update).await;
        });
        Submission::Accepted
    }

    /// Process one update now, waiting for its keys. Skips inbound admission.
    pub async fn handle(&self, update: Update) -> Outcome {
        let _keys = self.inner.serializer.acquire(update.keys()).await;
        self.process(update).await
    }

    /// Stop admitting updates and wait up to `grace` for in-flight ones.
    ///
    /// Returns `false` if work was still running when the grace period ended.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        let inner = &self.inner;
        inner.stop.cancel();
        inner.tasks.close();
        tracing::info!(in_flight = inner.tasks.len(), "pipeline draining");
        match tokio::time::timeout(grace, inner.tasks.wait()).await {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!(
                    in_flight = inner.tasks.len(),
                    "shutdown grace period elapsed with updates still in flight"
                );
                false
            }
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.stop.is_cancelled()
    }

    pub fn in_flight(&self) -> usize {
        self.inner.tasks.len()
    }

    pub fn sessions(&self) -> &Sessions {
        &self.inner.sessions
    }

    /// Caller must hold the update's serializer keys.
    async fn process(&self, update: Update) -> Outcome {
        let chat = update.chat();
        let before = match self.inner.sessions.load(chat).await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(chat = %chat, error = %e, "session load failed; update abandoned");
                return Outcome::Abandoned;
            }
        };
        let mut session = before.clone();

        let outcome = match update {
            Update::Moderation(mut event) => self.moderate(&mut event, &mut session).await,
            Update::Command(req) => {
                Outcome::Command(self.inner.commands.handle(&req, &mut session).await)
            }
        };

        if let Err(e) = self.inner.sessions.save_changes(&before, &session).await {
            tracing::error!(
                chat = %chat,
                error = %e,
                "session save failed; change kept in memory"
            );
        }
        outcome
    }

    async fn moderate(&self, event: &mut ModerationEvent, session: &mut GroupSession) -> Outcome {
        let group = event.group;
        let actor = event.actor_id();
        if !group.is_group() {
            return Outcome::Clean;
        }
        if event.kind.is_membership() {
            self.announce_join(session).await;
        }
        if session.users.is_exempt(actor) {
            return Outcome::Clean;
        }

        let admins = match self.inner.platform.fetch_administrators(group).await {
            Ok(admins) => admins,
            Err(e) => {
                tracing::warn!(group = %group, actor = %actor, error = %e, "admin lookup failed; moderation skipped");
                return Outcome::Abandoned;
            }
        };
        event.actor_is_admin_or_owner = role_of(&admins, actor).is_privileged();

        if !event.actor_is_admin_or_owner {
            event.actor_bio = match self.inner.platform.fetch_actor_profile(actor).await {
                Ok(profile) => profile.bio,
                Err(e) => {
                    tracing::warn!(actor = %actor, error = %e, "profile lookup failed; checking without bio");
                    None
                }
            };
        }

        match evaluate(event, &session.users) {
            Verdict::Clean => Outcome::Clean,
            Verdict::Violation(reason) => {
                let report = self
                    .inner
                    .punisher
                    .execute(
                        event,
                        reason,
                        session.config.punishment,
                        session.users.log_destination(),
                    )
                    .await;
                Outcome::Punished { reason, report }
            }
        }
    }

    async fn announce_join(&self, session: &mut GroupSession) {
        if session.config.has_announced_join {
            return;
        }
        session.config.has_announced_join = true;
        let Some(dest) = self.inner.announce_to else {
            return;
        };

        let group = session.group;
        let info = match self.inner.platform.get_chat_info(group).await {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!(group = %group, error = %e, "chat lookup failed; join not announced");
                return;
            }
        };
        let text = formatting::join_announcement(&info);
        if let Err(e) = self
            .inner
            .platform
            .send_message(dest, &text, SendOptions::markdown())
            .await
        {
            tracing::warn!(group = %group, error = %e, "join announcement failed");
        }
    }
}
