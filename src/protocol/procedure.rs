//! Catalog of wire procedures
//!
//! Every call the protocol core issues has one HTTP route and one push
//! channel command. The routes of the session calls moved between protocol
//! major versions, so paths are resolved against a [`ProtocolVersion`].

use std::fmt;

use super::schema::ProtocolVersion;

/// HTTP verb used by the poll transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    /// Parameters travel in the query string
    Get,
    /// Parameters travel as a JSON body
    Post,
}

/// A wire procedure
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Procedure {
    /// Exchange the verify key for a session token
    Authenticate,
    /// Bind the session token to the bot account
    Verify,
    /// Invalidate the session token
    Release,
    /// Drain queued inbound events
    FetchMessage,
    /// Send to a friend
    SendFriendMessage,
    /// Send to a group
    SendGroupMessage,
    /// Send to a group member through a temporary session
    SendTempMessage,
    /// Recall a sent or received message
    Recall,
    /// Answer a `NewFriendRequestEvent`
    RespondNewFriendRequest,
    /// Answer a `MemberJoinRequestEvent`
    RespondMemberJoinRequest,
    /// Answer a `BotInvitedJoinGroupRequestEvent`
    RespondBotInvitedJoinGroupRequest,
    /// Gateway build information
    About,
    /// Any other call, issued by collaborators through the same primitive
    Custom {
        /// HTTP route, relative to the endpoint
        path: String,
        /// Push channel command
        command: String,
        /// Push channel sub-command
        sub_command: Option<String>,
        /// HTTP verb
        method: HttpMethod,
    },
}

impl Procedure {
    /// Build a collaborator call whose push command equals its route name
    pub fn custom(path: impl Into<String>, method: HttpMethod) -> Self {
        let path = path.into();
        let command = path.trim_start_matches('/').replace('/', "_");
        Procedure::Custom {
            path,
            command,
            sub_command: None,
            method,
        }
    }

    /// HTTP verb for the poll transport
    pub fn method(&self) -> HttpMethod {
        match self {
            Procedure::FetchMessage | Procedure::About => HttpMethod::Get,
            Procedure::Custom { method, .. } => *method,
            _ => HttpMethod::Post,
        }
    }

    /// HTTP route for the given protocol version
    pub fn http_path(&self, version: &ProtocolVersion) -> String {
        let path = match self {
            Procedure::Authenticate if version.is_legacy() => "/auth",
            Procedure::Authenticate => "/verify",
            Procedure::Verify if version.is_legacy() => "/verify",
            Procedure::Verify => "/bind",
            Procedure::Release => "/release",
            Procedure::FetchMessage => "/fetchMessage",
            Procedure::SendFriendMessage => "/sendFriendMessage",
            Procedure::SendGroupMessage => "/sendGroupMessage",
            Procedure::SendTempMessage => "/sendTempMessage",
            Procedure::Recall => "/recall",
            Procedure::RespondNewFriendRequest => "/resp/newFriendRequestEvent",
            Procedure::RespondMemberJoinRequest => "/resp/memberJoinRequestEvent",
            Procedure::RespondBotInvitedJoinGroupRequest => {
                "/resp/botInvitedJoinGroupRequestEvent"
            }
            Procedure::About => "/about",
            Procedure::Custom { path, .. } => return path.clone(),
        };
        path.to_string()
    }

    /// Push channel `command` and `subCommand`
    pub fn command(&self) -> (String, Option<String>) {
        let command = match self {
            Procedure::Authenticate => "verify",
            Procedure::Verify => "bind",
            Procedure::Release => "release",
            Procedure::FetchMessage => "fetchMessage",
            Procedure::SendFriendMessage => "sendFriendMessage",
            Procedure::SendGroupMessage => "sendGroupMessage",
            Procedure::SendTempMessage => "sendTempMessage",
            Procedure::Recall => "recall",
            Procedure::RespondNewFriendRequest => "resp_newFriendRequestEvent",
            Procedure::RespondMemberJoinRequest => "resp_memberJoinRequestEvent",
            Procedure::RespondBotInvitedJoinGroupRequest => "resp_botInvitedJoinGroupRequestEvent",
            Procedure::About => "about",
            Procedure::Custom {
                command,
                sub_command,
                ..
            } => return (command.clone(), sub_command.clone()),
        };
        (command.to_string(), None)
    }
}

impl fmt::Display for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (command, sub_command) = self.command();
        match sub_command {
            Some(sub) => write!(f, "{}.{}", command, sub),
            None => write!(f, "{}", command),
        }
    }
}
