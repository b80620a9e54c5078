//! Group admin commands.
//!
//! Commands run inside the pipeline like any other update, so the session
//! they mutate is the lock-scoped working copy; the pipeline persists it.

use std::sync::Arc;

use crate::{
    domain::{Actor, ChatId, MessageId, UserId},
    formatting,
    platform::{
        types::{role_of, ChatInfo, MemberRole, SendOptions},
        PlatformPort,
    },
    punishment::{PunishmentReport, Punisher},
    session::{GroupSession, PunishmentPolicy},
    store::Sessions,
};

/// Split `/cmd@botname args` into a lowercase command name and trimmed args.
pub fn parse_command(text: &str) -> (String, String) {
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandKind {
    Start,
    Help,
    SetPunish,
    SetLog,
    SetFree,
    SetUnfree,
    Stats,
    /// Operator-only `/ban`, `/kick`, `/mute <chat> <actor>`.
    Operator(PunishmentPolicy),
}

impl CommandKind {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "start" => Self::Start,
            "help" => Self::Help,
            "setpunish" => Self::SetPunish,
            "setlog" => Self::SetLog,
            "setfree" => Self::SetFree,
            "setunfree" => Self::SetUnfree,
            "stats" => Self::Stats,
            "ban" => Self::Operator(PunishmentPolicy::Ban),
            "kick" => Self::Operator(PunishmentPolicy::Kick),
            "mute" => Self::Operator(PunishmentPolicy::Mute),
            _ => return None,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandRequest {
    pub chat: ChatId,
    pub actor: Actor,
    pub message_id: Option<MessageId>,
    pub kind: CommandKind,
    pub args: String,
}

impl CommandRequest {
    /// `None` for text that is not one of our commands.
    pub fn parse(
        chat: ChatId,
        actor: Actor,
        message_id: Option<MessageId>,
        text: &str,
    ) -> Option<Self> {
        if !text.trim_start().starts_with('/') {
            return None;
        }
        let (name, args) = parse_command(text);
        let kind = CommandKind::from_name(&name)?;
        Some(Self {
            chat,
            actor,
            message_id,
            kind,
            args,
        })
    }

    /// `(group, actor)` named by an operator command's `<chat> <actor>` args.
    pub fn operator_target(&self) -> Option<(ChatId, UserId)> {
        if !matches!(self.kind, CommandKind::Operator(_)) {
            return None;
        }
        let mut parts = self.args.split_whitespace();
        let group = parts.next().and_then(ChatId::from_operator_input)?;
        let actor = parts.next().and_then(|s| s.parse::<i64>().ok()).map(UserId)?;
        Some((group, actor))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The command ran (session possibly changed).
    Done,
    Unauthorized,
    InvalidArgs,
    /// Not for this caller or this chat; nothing was sent.
    Ignored,
    /// A required lookup failed; nothing was changed.
    Abandoned,
    Operator(PunishmentReport),
}

#[derive(Clone)]
pub struct CommandHandler {
    platform: Arc<dyn PlatformPort>,
    sessions: Sessions,
    punisher: Punisher,
    owner: Option<UserId>,
}

impl CommandHandler {
    pub fn new(platform: Arc<dyn PlatformPort>, sessions: Sessions, owner: Option<UserId>) -> Self {
        Self {
            punisher: Punisher::new(platform.clone()),
            platform,
            sessions,
            owner,
        }
    }

    pub async fn handle(&self, req: &CommandRequest, session: &mut GroupSession) -> CommandOutcome {
        tracing::info!(
            chat = %req.chat,
            actor = %req.actor.id,
            command = ?req.kind,
            "command"
        );
        match req.kind {
            CommandKind::Start => {
                self.reply(req, &formatting::INTRO_LINES.join("\n")).await;
                CommandOutcome::Done
            }
            CommandKind::Help => {
                self.reply(req, &formatting::HELP_LINES.join("\n")).await;
                CommandOutcome::Done
            }
            CommandKind::Stats => self.stats(req).await,
            CommandKind::Operator(policy) => self.operator_action(req, policy).await,
            CommandKind::SetPunish => {
                let role = match self.caller_role(req).await {
                    Ok(role) => role,
                    Err(outcome) => return outcome,
                };
                if !role.can_configure() {
                    self.reply(req, formatting::NEED_ADMIN_RIGHTS).await;
                    return CommandOutcome::Unauthorized;
                }
                self.set_punish(req, session).await
            }
            CommandKind::SetLog => {
                let role = match self.caller_role(req).await {
                    Ok(role) => role,
                    Err(outcome) => return outcome,
                };
                if !role.can_configure() {
                    self.reply(req, formatting::NEED_ADMIN_RIGHTS).await;
                    return CommandOutcome::Unauthorized;
                }
                self.set_log(req, session).await
            }
            CommandKind::SetFree | CommandKind::SetUnfree => {
                let role = match self.caller_role(req).await {
                    Ok(role) => role,
                    Err(outcome) => return outcome,
                };
                if !role.is_privileged() {
                    self.reply(req, formatting::NEED_ADMIN_RIGHTS).await;
                    return CommandOutcome::Unauthorized;
                }
                self.set_exemption(req, session).await
            }
        }
    }

    async fn caller_role(&self, req: &CommandRequest) -> Result<MemberRole, CommandOutcome> {
        if !req.chat.is_group() {
            self.reply(req, "Use this command in your group.").await;
            return Err(CommandOutcome::Ignored);
        }
        match self.platform.fetch_administrators(req.chat).await {
            Ok(admins) => Ok(role_of(&admins, req.actor.id)),
            Err(e) => {
                tracing::warn!(chat = %req.chat, error = %e, "admin lookup failed; command dropped");
                Err(CommandOutcome::Abandoned)
            }
        }
    }

    async fn set_punish(&self, req: &CommandRequest, session: &mut GroupSession) -> CommandOutcome {
        let policy = match req.args.parse::<PunishmentPolicy>() {
            Ok(p) => p,
            Err(_) => {
                self.reply(
                    req,
                    "Invalid Punishment. Punishment can be none, warn, mute, kick or ban.",
                )
                .await;
                return CommandOutcome::InvalidArgs;
            }
        };
        session.config.punishment = policy;

        if let Some(dest) = session.users.log_destination() {
            let info = self.chat_info(req.chat).await;
            self.send(dest, &formatting::punishment_set_log(&info, policy), SendOptions::markdown())
                .await;
        }
        self.reply(req, &format!("Punishment set for the group is {policy}"))
            .await;
        CommandOutcome::Done
    }

    async fn set_log(&self, req: &CommandRequest, session: &mut GroupSession) -> CommandOutcome {
        let arg = req.args.trim();
        let dest = if arg.eq_ignore_ascii_case("off") {
            Some(ChatId(0))
        } else {
            ChatId::from_operator_input(arg)
        };
        let Some(dest) = dest else {
            self.reply(
                req,
                &format!("Invalid Log Group ID or {}", formatting::NEED_ADMIN_RIGHTS),
            )
            .await;
            return CommandOutcome::InvalidArgs;
        };

        session.users.log_destination = Some(dest).filter(|c| c.0 != 0);
        match session.users.log_destination() {
            Some(dest) => {
                let info = self.chat_info(req.chat).await;
                self.send(dest, &formatting::logs_redirected_log(&info), SendOptions::markdown())
                    .await;
                self.reply(req, "Logs are now redirected to the logger group.")
                    .await;
            }
            None => self.reply(req, "Logs are now disabled.").await,
        }
        CommandOutcome::Done
    }

    async fn set_exemption(&self, req: &CommandRequest, session: &mut GroupSession) -> CommandOutcome {
        let Ok(id) = req.args.trim().parse::<i64>() else {
            self.reply(req, "Invalid user ID.").await;
            return CommandOutcome::InvalidArgs;
        };
        let target = UserId(id);
        if req.kind == CommandKind::SetFree {
            session.users.exempt(target);
            self.reply(
                req,
                "User is added to the whitelist and is now free from the bot actions.",
            )
            .await;
        } else {
            session.users.unexempt(target);
            self.reply(
                req,
                "User is removed from the whitelist and now bot is monitoring the user.",
            )
            .await;
        }
        CommandOutcome::Done
    }

    async fn stats(&self, req: &CommandRequest) -> CommandOutcome {
        let groups = match self.sessions.groups().await {
            Ok(groups) => groups,
            Err(e) => {
                tracing::warn!(error = %e, "listing groups failed");
                return CommandOutcome::Abandoned;
            }
        };
        let total = groups.iter().filter(|g| g.is_group()).count();
        self.reply(
            req,
            &format!("📊 Bot Statistics\n\n\t✅ Total groups: {total}"),
        )
        .await;
        CommandOutcome::Done
    }

    async fn operator_action(&self, req: &CommandRequest, policy: PunishmentPolicy) -> CommandOutcome {
        if self.owner != Some(req.actor.id) {
            return CommandOutcome::Ignored;
        }
        let Some((group, actor)) = req.operator_target() else {
            return CommandOutcome::InvalidArgs;
        };

        let mut report = PunishmentReport::default();
        self.punisher.dispatch(group, actor, policy, &mut report).await;
        CommandOutcome::Operator(report)
    }

    async fn chat_info(&self, chat: ChatId) -> ChatInfo {
        self.platform.get_chat_info(chat).await.unwrap_or_else(|e| {
            tracing::warn!(chat = %chat, error = %e, "chat lookup failed");
            ChatInfo::unknown(chat)
        })
    }

    async fn reply(&self, req: &CommandRequest, text: &str) {
        let options = match req.message_id {
            Some(id) => SendOptions::plain().reply_to(id),
            None => SendOptions::plain(),
        };
        self.send(req.chat, text, options).await;
    }

    async fn send(&self, to: ChatId, text: &str, options: SendOptions) {
        if let Err(e) = self.platform.send_message(to, text, options).await {
            tracing::warn!(chat = %to, error = %e, "send failed");
        }
    }
}
