//! Inbound values handed to listeners, with their response affordances

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::kind::{EventKind, MessageKind};
use super::types::{RequestPayload, Sender};
use crate::error::{Error, Result};
use crate::message::MessageChain;
use crate::outbound::{Outbound, SentMessage, Target};
use crate::protocol::{ApiReply, Procedure};

/// A chat message, bound to the conversation it arrived in
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    /// Category
    pub kind: MessageKind,
    /// Content, `Source` first
    pub chain: MessageChain,
    /// Who sent it
    pub sender: Sender,
    /// The untouched payload
    pub raw: Value,
    target: Target,
    outbound: Outbound,
}

impl IncomingMessage {
    /// Parse a chat payload
    pub(crate) fn parse(kind: MessageKind, raw: Value, outbound: Outbound) -> Result<Self> {
        let sender: Sender = serde_json::from_value(raw.get("sender").cloned().unwrap_or_default())?;
        let chain: MessageChain = match raw.get("messageChain") {
            Some(chain) => serde_json::from_value(chain.clone())?,
            None => MessageChain::new(),
        };
        let target = match kind {
            MessageKind::Friend => Target::Friend(sender.id),
            MessageKind::Group | MessageKind::Temp => {
                let group = sender
                    .group
                    .as_ref()
                    .map(|group| group.id)
                    .ok_or_else(|| Error::Json(serde::de::Error::missing_field("group")))?;
                if kind == MessageKind::Group {
                    Target::Group(group)
                } else {
                    Target::Temp {
                        group,
                        qq: sender.id,
                    }
                }
            }
        };
        Ok(IncomingMessage {
            kind,
            chain,
            sender,
            raw,
            target,
            outbound,
        })
    }

    /// Conversation to answer into
    pub fn target(&self) -> Target {
        self.target
    }

    /// Id from the `Source` segment
    pub fn message_id(&self) -> Option<i64> {
        self.chain.source_id()
    }

    /// Concatenated plain text
    pub fn text(&self) -> String {
        self.chain.plain_text()
    }

    /// Answer in the same conversation
    pub async fn reply(&self, chain: impl Into<MessageChain>) -> Result<ApiReply<SentMessage>> {
        self.outbound.send(self.target, chain, None).await
    }

    /// Answer quoting this message
    pub async fn quote_reply(
        &self,
        chain: impl Into<MessageChain>,
    ) -> Result<ApiReply<SentMessage>> {
        self.outbound
            .send_quoted(self.target, chain, &self.chain)
            .await
    }

    /// Recall this message
    pub async fn recall(&self) -> Result<ApiReply<Value>> {
        let message_id = self
            .message_id()
            .ok_or_else(|| Error::InvalidState("message has no source id".into()))?;
        self.outbound.recall(self.target, message_id).await
    }
}

/// One domain event from the catalog
#[derive(Debug, Clone)]
pub struct DomainEvent {
    /// Which event
    pub kind: EventKind,
    /// The untouched payload
    pub raw: Value,
    outbound: Outbound,
}

impl DomainEvent {
    pub(crate) fn new(kind: EventKind, raw: Value, outbound: Outbound) -> Self {
        DomainEvent {
            kind,
            raw,
            outbound,
        }
    }

    /// Deserialize the payload into any shape
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.raw.clone())?)
    }

    /// Responder for a `NewFriendRequestEvent`
    pub fn friend_request(&self) -> Option<FriendRequest> {
        self.request(EventKind::NewFriendRequest)
            .map(|(request, outbound)| FriendRequest { request, outbound })
    }

    /// Responder for a `MemberJoinRequestEvent`
    pub fn member_join_request(&self) -> Option<MemberJoinRequest> {
        self.request(EventKind::MemberJoinRequest)
            .map(|(request, outbound)| MemberJoinRequest { request, outbound })
    }

    /// Responder for a `BotInvitedJoinGroupRequestEvent`
    pub fn group_invitation(&self) -> Option<GroupInvitation> {
        self.request(EventKind::BotInvitedJoinGroupRequest)
            .map(|(request, outbound)| GroupInvitation { request, outbound })
    }

    fn request(&self, kind: EventKind) -> Option<(RequestPayload, Outbound)> {
        if self.kind != kind {
            return None;
        }
        let request = self.payload().ok()?;
        Some((request, self.outbound.clone()))
    }
}

/// Someone asked to become the bot's friend
#[derive(Debug, Clone)]
pub struct FriendRequest {
    /// Request body
    pub request: RequestPayload,
    outbound: Outbound,
}

impl FriendRequest {
    /// Accept the request
    pub async fn accept(&self, message: &str) -> Result<ApiReply<Value>> {
        self.answer(0, message).await
    }

    /// Reject the request
    pub async fn reject(&self, message: &str) -> Result<ApiReply<Value>> {
        self.answer(1, message).await
    }

    /// Reject and block the requester
    pub async fn reject_and_block(&self, message: &str) -> Result<ApiReply<Value>> {
        self.answer(2, message).await
    }

    async fn answer(&self, operate: i64, message: &str) -> Result<ApiReply<Value>> {
        self.outbound
            .respond(Procedure::RespondNewFriendRequest, &self.request, operate, message)
            .await
    }
}

/// Someone asked to join a group the bot administers
#[derive(Debug, Clone)]
pub struct MemberJoinRequest {
    /// Request body
    pub request: RequestPayload,
    outbound: Outbound,
}

impl MemberJoinRequest {
    /// Let them in
    pub async fn accept(&self, message: &str) -> Result<ApiReply<Value>> {
        self.answer(0, message).await
    }

    /// Turn them away
    pub async fn reject(&self, message: &str) -> Result<ApiReply<Value>> {
        self.answer(1, message).await
    }

    /// Leave the request for another administrator
    pub async fn ignore(&self, message: &str) -> Result<ApiReply<Value>> {
        self.answer(2, message).await
    }

    /// Turn them away and block further requests
    pub async fn reject_and_block(&self, message: &str) -> Result<ApiReply<Value>> {
        self.answer(3, message).await
    }

    /// Ignore and block further requests
    pub async fn ignore_and_block(&self, message: &str) -> Result<ApiReply<Value>> {
        self.answer(4, message).await
    }

    async fn answer(&self, operate: i64, message: &str) -> Result<ApiReply<Value>> {
        self.outbound
            .respond(Procedure::RespondMemberJoinRequest, &self.request, operate, message)
            .await
    }
}

/// The bot was invited into a group
#[derive(Debug, Clone)]
pub struct GroupInvitation {
    /// Request body
    pub request: RequestPayload,
    outbound: Outbound,
}

impl GroupInvitation {
    /// Join the group
    pub async fn accept(&self, message: &str) -> Result<ApiReply<Value>> {
        self.answer(0, message).await
    }

    /// Decline
    pub async fn reject(&self, message: &str) -> Result<ApiReply<Value>> {
        self.answer(1, message).await
    }

    async fn answer(&self, operate: i64, message: &str) -> Result<ApiReply<Value>> {
        self.outbound
            .respond(
                Procedure::RespondBotInvitedJoinGroupRequest,
                &self.request,
                operate,
                message,
            )
            .await
    }
}
