//! Message texts and Telegram MarkdownV2 helpers.

use crate::{
    domain::Actor,
    moderation::ViolationReason,
    platform::types::ChatInfo,
    session::PunishmentPolicy,
};

/// Characters MarkdownV2 treats as markup outside of code spans.
const MARKDOWN_V2_SPECIAL: &[char] = &[
    '\\', '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!',
];

pub const INTRO_LINES: [&str; 6] = [
    "-This is anti promotion bot which helps you to take actions against members who promote links of other groups or channels either through bio or by posting in your group.",
    "-You can set auto actions like warn, mute, kick or ban.",
    "-Admins are free from the bot actions. Also you can add members to the whitelist to free them from the bot actions.",
    "-You can also enable logs and see those logs in your logger group.",
    "-To know more about commands type /help",
    "-Add this bot to your group to fight against spammers or promoters of the other groups.",
];

pub const HELP_LINES: [&str; 5] = [
    "-/setpunish <action>: to set punishment use this command in your group. Action - none/warn/mute/kick/ban. If any member violates then bot will automatically take the action which was set using this command.",
    "-/setlog <groupID>: to send logs of the bot actions from your group to a logger group. Create a logger group, copy its ID, then use this command in your group. Use 0 or off to disable logs.",
    "-/setfree <userID>: to set members free from bot actions. Admins of the group are always free from bot actions.",
    "-/setunfree <userID>: to remove user from whitelist.",
    "-/stats: to know the bot stats.",
];

pub const NEED_ADMIN_RIGHTS: &str = "You need admins rights with \"Change group info rights\", \"Add admin rights\", \"Ban Rights\" to perform this action.";

/// Escape text for MarkdownV2 parse mode.
pub fn escape_markdown_v2(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    for ch in text.chars() {
        if MARKDOWN_V2_SPECIAL.contains(&ch) {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Inline mention that opens the actor's profile.
pub fn name_link(actor: &Actor) -> String {
    format!(
        "[{}](tg://user?id={})",
        escape_markdown_v2(&actor.display_name()),
        actor.id
    )
}

fn at_username(username: Option<&str>) -> String {
    username
        .filter(|u| !u.is_empty())
        .map(|u| format!("@{u}"))
        .unwrap_or_default()
}

/// Audit entry posted to a group's log destination (MarkdownV2).
pub fn audit_entry(actor: &Actor, group: &ChatInfo, policy: PunishmentPolicy) -> String {
    [
        format!("Name\\: {}", escape_markdown_v2(&actor.first_name)),
        format!(
            "Username\\: {}",
            escape_markdown_v2(&at_username(actor.username.as_deref()))
        ),
        format!("User ID\\: {}", escape_markdown_v2(&actor.id.to_string())),
        format!("User\\: {}", name_link(actor)),
        format!("Group Name\\: {}", escape_markdown_v2(group.title_or_empty())),
        format!(
            "Group Link\\: {}",
            escape_markdown_v2(group.invite_link.as_deref().unwrap_or(""))
        ),
        format!(
            "Group Username\\: {}",
            escape_markdown_v2(&at_username(group.username.as_deref()))
        ),
        format!("Action\\: {}", policy.as_str().to_uppercase()),
    ]
    .join("\n")
}

/// First-contact announcement for a group the bot was added to (MarkdownV2).
pub fn join_announcement(group: &ChatInfo) -> String {
    [
        format!("Group Name\\: {}", escape_markdown_v2(group.title_or_empty())),
        format!("Group ID\\: {}", escape_markdown_v2(&group.id.to_string())),
        format!("Group Type\\: {}", group.kind.as_str()),
        format!(
            "Group Username\\: {}",
            escape_markdown_v2(&at_username(group.username.as_deref()))
        ),
        format!(
            "Group Link\\: {}",
            escape_markdown_v2(group.invite_link.as_deref().unwrap_or(""))
        ),
        format!("Group join by request\\: {}", group.join_by_request),
    ]
    .join("\n")
}

/// Reply posted in the group after a violation (plain text).
pub fn violation_notice(actor: &Actor, reason: ViolationReason) -> String {
    let who = format!("{}[{}]", actor.display_name(), actor.id);
    match reason {
        ViolationReason::Bio => format!(
            "{who}, remove link from your bio to enable chat! or contact admins to get into exception list."
        ),
        ViolationReason::Text => {
            format!("{who}, do not post links! or contact admins to get into exception list.")
        }
    }
}

pub fn punishment_set_log(group: &ChatInfo, policy: PunishmentPolicy) -> String {
    format!(
        "Punishment set for the group {} is {}",
        escape_markdown_v2(group.title_or_empty()),
        policy
    )
}

pub fn logs_redirected_log(group: &ChatInfo) -> String {
    format!(
        "Logs redirected for the group {}",
        escape_markdown_v2(group.title_or_empty())
    )
}
