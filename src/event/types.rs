//! Typed payload shapes shared by many events

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Member rank inside a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Permission {
    /// Group owner
    Owner,
    /// Group administrator
    Administrator,
    /// Ordinary member
    Member,
}

/// A friend of the bot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Friend {
    /// Account
    pub id: i64,
    /// Nickname
    #[serde(default)]
    pub nickname: String,
    /// Remark the bot gave this friend
    #[serde(default)]
    pub remark: String,
}

/// A group, with the bot's rank in it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupInfo {
    /// Group id
    pub id: i64,
    /// Group name
    #[serde(default)]
    pub name: String,
    /// The bot's rank
    pub permission: Option<Permission>,
}

/// A member of a group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMember {
    /// Account
    pub id: i64,
    /// Name card inside the group
    #[serde(default)]
    pub member_name: String,
    /// Rank
    pub permission: Option<Permission>,
    /// Special title
    #[serde(default)]
    pub special_title: String,
    /// Group the member belongs to
    pub group: GroupInfo,
}

/// Sender of a chat message
///
/// Friend senders carry `nickname`/`remark`; group and temp senders carry
/// `member_name`, `permission` and `group`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sender {
    /// Account
    pub id: i64,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub remark: Option<String>,
    #[serde(default)]
    pub member_name: Option<String>,
    #[serde(default)]
    pub permission: Option<Permission>,
    #[serde(default)]
    pub group: Option<GroupInfo>,
}

impl Sender {
    /// Best display name available
    pub fn display_name(&self) -> &str {
        self.member_name
            .as_deref()
            .or(self.remark.as_deref().filter(|remark| !remark.is_empty()))
            .or(self.nickname.as_deref())
            .unwrap_or_default()
    }
}

/// Body shared by the three request events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPayload {
    /// Request id, echoed back in the answer
    pub event_id: i64,
    /// Requesting (or inviting) account
    pub from_id: i64,
    /// Group involved, 0 when none
    #[serde(default)]
    pub group_id: i64,
    /// Requester nickname
    #[serde(default)]
    pub nick: String,
    /// Message attached to the request
    #[serde(default)]
    pub message: String,
    /// Group name, for group requests
    #[serde(default)]
    pub group_name: Option<String>,
}

/// Body of `GroupRecallEvent` and `FriendRecallEvent`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecallPayload {
    /// Author of the recalled message
    pub author_id: i64,
    /// Recalled message id
    pub message_id: i64,
    /// Original send time
    #[serde(default)]
    pub time: i64,
    /// Group, for group recalls
    #[serde(default)]
    pub group: Option<GroupInfo>,
    /// Who recalled it: a member object in groups, an account for friends
    #[serde(default)]
    pub operator: Value,
}

/// Body of the mute events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutePayload {
    /// Mute length; absent on unmute events
    #[serde(default)]
    pub duration_seconds: i64,
    /// Muted member; absent when the bot itself is muted
    #[serde(default)]
    pub member: Option<GroupMember>,
    /// Who did it
    #[serde(default)]
    pub operator: Option<GroupMember>,
}

/// Where a nudge happened
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NudgeSubject {
    /// Friend account or group id
    pub id: i64,
    /// `Friend` or `Group`
    pub kind: String,
}

/// Body of `NudgeEvent`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NudgePayload {
    /// Who nudged
    pub from_id: i64,
    /// Conversation
    pub subject: NudgeSubject,
    /// Action text
    #[serde(default)]
    pub action: String,
    /// Suffix text
    #[serde(default)]
    pub suffix: String,
    /// Who was nudged
    pub target: i64,
}
