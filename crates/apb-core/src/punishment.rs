//! Punishment dispatch for confirmed violations.
//!
//! Every step is best-effort: a failed call is logged and recorded in the
//! report, and the remaining steps still run. Retrying already happened in
//! the platform decorators.

use std::sync::Arc;

use crate::{
    domain::{ChatId, UserId},
    formatting,
    moderation::{EventKind, ModerationEvent, ViolationReason},
    platform::{
        types::{ChatInfo, Permissions, SendOptions},
        PlatformPort,
    },
    session::PunishmentPolicy,
    Result,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    DeleteMessage,
    Audit,
    Ban,
    Unban,
    Restrict,
    Notify,
}

/// What a punishment run attempted, in order, and whether each call succeeded.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PunishmentReport {
    pub steps: Vec<(Step, bool)>,
}

impl PunishmentReport {
    pub fn attempted(&self) -> Vec<Step> {
        self.steps.iter().map(|(s, _)| *s).collect()
    }

    pub fn failed(&self) -> Vec<Step> {
        self.steps
            .iter()
            .filter(|(_, ok)| !ok)
            .map(|(s, _)| *s)
            .collect()
    }

    fn record(&mut self, step: Step, group: ChatId, actor: UserId, res: Result<()>) {
        if let Err(e) = &res {
            tracing::warn!(
                group = %group,
                actor = %actor,
                step = ?step,
                error = %e,
                "punishment step failed"
            );
        }
        self.steps.push((step, res.is_ok()));
    }
}

#[derive(Clone)]
pub struct Punisher {
    platform: Arc<dyn PlatformPort>,
}

impl Punisher {
    pub fn new(platform: Arc<dyn PlatformPort>) -> Self {
        Self { platform }
    }

    /// Delete, audit, act, notify.
    pub async fn execute(
        &self,
        event: &ModerationEvent,
        reason: ViolationReason,
        policy: PunishmentPolicy,
        log_destination: Option<ChatId>,
    ) -> PunishmentReport {
        let group = event.group;
        let actor = event.actor_id();
        let mut report = PunishmentReport::default();

        tracing::info!(
            group = %group,
            actor = %actor,
            reason = %reason,
            action = %policy,
            "violation"
        );

        if event.kind == EventKind::Message {
            if let Some(message) = event.message_id {
                let res = self.platform.delete_message(group, message).await;
                report.record(Step::DeleteMessage, group, actor, res);
            }
        }

        if let Some(dest) = log_destination {
            let info = self.chat_info(group).await;
            let text = formatting::audit_entry(&event.actor, &info, policy);
            let res = self
                .platform
                .send_message(dest, &text, SendOptions::markdown())
                .await
                .map(|_| ());
            report.record(Step::Audit, group, actor, res);
        }

        self.dispatch(group, actor, policy, &mut report).await;

        let text = formatting::violation_notice(&event.actor, reason);
        let res = self
            .platform
            .send_message(group, &text, SendOptions::plain())
            .await
            .map(|_| ());
        report.record(Step::Notify, group, actor, res);

        report
    }

    /// Platform-level action for `policy`; `warn` and `none` do nothing here.
    pub async fn dispatch(
        &self,
        group: ChatId,
        actor: UserId,
        policy: PunishmentPolicy,
        report: &mut PunishmentReport,
    ) {
        match policy {
            PunishmentPolicy::None | PunishmentPolicy::Warn => {}
            PunishmentPolicy::Kick => {
                let res = self.platform.ban_actor(group, actor).await;
                report.record(Step::Ban, group, actor, res);
                let res = self.platform.unban_actor(group, actor).await;
                report.record(Step::Unban, group, actor, res);
            }
            PunishmentPolicy::Ban => {
                let res = self.platform.ban_actor(group, actor).await;
                report.record(Step::Ban, group, actor, res);
            }
            PunishmentPolicy::Mute => {
                let res = self
                    .platform
                    .restrict_actor(group, actor, Permissions::muted())
                    .await;
                report.record(Step::Restrict, group, actor, res);
            }
        }
    }

    async fn chat_info(&self, group: ChatId) -> ChatInfo {
        match self.platform.get_chat_info(group).await {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!(group = %group, error = %e, "chat lookup failed; audit without group details");
                ChatInfo::unknown(group)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Actor, MessageId};
    use crate::platform::fake::{Call, FakePlatform};

    const GROUP: ChatId = ChatId(-1001);
    const LOGS: ChatId = ChatId(-1009);

    fn spam_message() -> ModerationEvent {
        ModerationEvent::message(
            GROUP,
            Actor::new(UserId(5), "Mallory"),
            MessageId(77),
            Some("http://spam".to_string()),
        )
    }

    #[tokio::test]
    async fn kick_bans_then_unbans_the_same_actor() {
        let fake = Arc::new(FakePlatform::default());
        let p = Punisher::new(fake.clone());

        let report = p
            .execute(&spam_message(), ViolationReason::Text, PunishmentPolicy::Kick, None)
            .await;

        assert_eq!(
            report.attempted(),
            vec![Step::DeleteMessage, Step::Ban, Step::Unban, Step::Notify]
        );
        let actions = fake.actions();
        assert_eq!(
            actions[1..3],
            [
                Call::Ban {
                    group: GROUP,
                    actor: UserId(5)
                },
                Call::Unban {
                    group: GROUP,
                    actor: UserId(5)
                }
            ]
        );
    }

    #[tokio::test]
    async fn audit_goes_to_log_destination_before_the_action() {
        let fake = Arc::new(FakePlatform::default().with_title(GROUP, "Rustaceans"));
        let p = Punisher::new(fake.clone());

        p.execute(
            &spam_message(),
            ViolationReason::Text,
            PunishmentPolicy::Ban,
            Some(LOGS),
        )
        .await;

        let audit = fake.sent_to(LOGS);
        assert_eq!(audit.len(), 1);
        assert!(audit[0].contains("Group Name\\: Rustaceans"));
        assert!(audit[0].contains("Action\\: BAN"));

        let steps: Vec<_> = fake.actions();
        let audit_pos = steps
            .iter()
            .position(|c| matches!(c, Call::Send { to, .. } if *to == LOGS))
            .unwrap();
        let ban_pos = steps.iter().position(|c| matches!(c, Call::Ban { .. })).unwrap();
        assert!(audit_pos < ban_pos);
    }

    #[tokio::test]
    async fn mute_restricts_with_no_permissions() {
        let fake = Arc::new(FakePlatform::default());
        let p = Punisher::new(fake.clone());

        p.execute(&spam_message(), ViolationReason::Text, PunishmentPolicy::Mute, None)
            .await;

        assert!(fake.actions().contains(&Call::Restrict {
            group: GROUP,
            actor: UserId(5),
            permissions: Permissions::muted(),
        }));
    }

    #[tokio::test]
    async fn warn_and_none_only_notify() {
        let fake = Arc::new(FakePlatform::default());
        let p = Punisher::new(fake.clone());
        let joined = ModerationEvent::membership(
            GROUP,
            Actor::new(UserId(5), "Mallory"),
            EventKind::NewMember,
        );

        let warn = p
            .execute(&joined, ViolationReason::Bio, PunishmentPolicy::Warn, None)
            .await;
        assert_eq!(warn.attempted(), vec![Step::Notify]);
        assert!(fake.sent_to(GROUP)[0].contains("remove link from your bio"));

        let none = p
            .execute(&joined, ViolationReason::Bio, PunishmentPolicy::None, None)
            .await;
        assert_eq!(none.attempted(), vec![Step::Notify]);
        assert_eq!(fake.sent_to(GROUP).len(), 2);
        assert!(fake
            .actions()
            .iter()
            .all(|c| matches!(c, Call::Send { .. })));
    }

    #[tokio::test]
    async fn failed_steps_do_not_stop_the_rest() {
        let fake = Arc::new(FakePlatform::default());
        fake.break_op("delete_message");
        fake.break_op("ban_actor");
        let p = Punisher::new(fake.clone());

        let report = p
            .execute(&spam_message(), ViolationReason::Text, PunishmentPolicy::Kick, None)
            .await;

        assert_eq!(report.failed(), vec![Step::DeleteMessage, Step::Ban]);
        assert!(report.attempted().contains(&Step::Unban));
        assert!(report.attempted().contains(&Step::Notify));
    }

    #[tokio::test]
    async fn audit_survives_chat_lookup_failure() {
        let fake = Arc::new(FakePlatform::default());
        fake.break_op("get_chat_info");
        let p = Punisher::new(fake.clone());

        let report = p
            .execute(
                &spam_message(),
                ViolationReason::Text,
                PunishmentPolicy::Warn,
                Some(LOGS),
            )
            .await;

        assert!(report.failed().is_empty());
        assert_eq!(fake.sent_to(LOGS).len(), 1);
    }
}
