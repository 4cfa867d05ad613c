//! Closed catalog of inbound payload kinds

use std::fmt;

macro_rules! event_kinds {
    ($($variant:ident => $wire:literal,)+) => {
        /// Domain events the gateway pushes, keyed by their wire tag
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum EventKind {
            $(
                #[doc = concat!("`", $wire, "`")]
                $variant,
            )+
        }

        impl EventKind {
            /// Every kind in the catalog
            pub const ALL: &'static [EventKind] = &[$(EventKind::$variant),+];

            /// Look up a wire tag
            pub fn from_wire(tag: &str) -> Option<Self> {
                match tag {
                    $($wire => Some(EventKind::$variant),)+
                    _ => None,
                }
            }

            /// Wire tag of this kind
            pub fn wire_name(&self) -> &'static str {
                match self {
                    $(EventKind::$variant => $wire,)+
                }
            }
        }
    };
}

event_kinds! {
    BotOnline => "BotOnlineEvent",
    BotOfflineActive => "BotOfflineEventActive",
    BotOfflineForce => "BotOfflineEventForce",
    BotOfflineDropped => "BotOfflineEventDropped",
    BotRelogin => "BotReloginEvent",
    BotGroupPermissionChange => "BotGroupPermissionChangeEvent",
    BotMute => "BotMuteEvent",
    BotUnmute => "BotUnmuteEvent",
    BotLeaveActive => "BotLeaveEventActive",
    BotLeaveKick => "BotLeaveEventKick",
    BotJoinGroup => "BotJoinGroupEvent",
    BotInvitedJoinGroupRequest => "BotInvitedJoinGroupRequestEvent",
    GroupNameChange => "GroupNameChangeEvent",
    GroupEntranceAnnouncementChange => "GroupEntranceAnnouncementChangeEvent",
    GroupMuteAll => "GroupMuteAllEvent",
    GroupAllowAnonymousChat => "GroupAllowAnonymousChatEvent",
    GroupAllowConfessTalk => "GroupAllowConfessTalkEvent",
    GroupAllowMemberInvite => "GroupAllowMemberInviteEvent",
    GroupRecall => "GroupRecallEvent",
    FriendRecall => "FriendRecallEvent",
    FriendNickChanged => "FriendNickChangedEvent",
    FriendInputStatusChanged => "FriendInputStatusChangedEvent",
    MemberJoin => "MemberJoinEvent",
    MemberLeaveKick => "MemberLeaveEventKick",
    MemberLeaveQuit => "MemberLeaveEventQuit",
    MemberCardChange => "MemberCardChangeEvent",
    MemberSpecialTitleChange => "MemberSpecialTitleChangeEvent",
    MemberPermissionChange => "MemberPermissionChangeEvent",
    MemberMute => "MemberMuteEvent",
    MemberUnmute => "MemberUnmuteEvent",
    MemberHonorChange => "MemberHonorChangeEvent",
    MemberJoinRequest => "MemberJoinRequestEvent",
    NewFriendRequest => "NewFriendRequestEvent",
    Nudge => "NudgeEvent",
    OtherClientOnline => "OtherClientOnlineEvent",
    OtherClientOffline => "OtherClientOfflineEvent",
    CommandExecuted => "CommandExecutedEvent",
}

impl EventKind {
    /// Whether the event expects an answer through a `resp/` call
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            EventKind::NewFriendRequest
                | EventKind::MemberJoinRequest
                | EventKind::BotInvitedJoinGroupRequest
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Chat message categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// `FriendMessage`
    Friend,
    /// `GroupMessage`
    Group,
    /// `TempMessage`
    Temp,
}

impl MessageKind {
    /// Look up a wire tag
    pub fn from_wire(tag: &str) -> Option<Self> {
        match tag {
            "FriendMessage" => Some(MessageKind::Friend),
            "GroupMessage" => Some(MessageKind::Group),
            "TempMessage" => Some(MessageKind::Temp),
            _ => None,
        }
    }

    /// Wire tag of this kind
    pub fn wire_name(&self) -> &'static str {
        match self {
            MessageKind::Friend => "FriendMessage",
            MessageKind::Group => "GroupMessage",
            MessageKind::Temp => "TempMessage",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}
