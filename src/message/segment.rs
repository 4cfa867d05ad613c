//! Message segments and chains
//!
//! A [`MessageChain`] is the ordered list of segments making up one chat
//! message. Segments are a tagged union keyed by the wire `type` field.

use std::ops::Deref;

use chrono::{DateTime, Utc};
use serde::de::Deserializer;
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// One node of a forwarded-message bundle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardNode {
    /// Original sender
    pub sender_id: i64,
    /// Original send time (unix seconds)
    pub time: i64,
    /// Display name shown in the bundle
    pub sender_name: String,
    /// Forwarded content
    #[serde(default)]
    pub message_chain: MessageChain,
    /// Id of the original message, when forwarding by reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<i64>,
}

/// A single message segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum MessageSegment {
    /// Message id and send time; first element of received chains
    Source { id: i64, time: i64 },
    /// Quotation of an earlier message
    Quote {
        id: i64,
        #[serde(default)]
        group_id: i64,
        #[serde(default)]
        sender_id: i64,
        #[serde(default)]
        target_id: i64,
        #[serde(default)]
        origin: MessageChain,
    },
    /// Plain text
    Plain { text: String },
    /// Mention of one member
    At {
        target: i64,
        #[serde(default)]
        display: String,
    },
    /// Mention of everybody
    AtAll,
    /// Built-in emoticon
    Face {
        face_id: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    /// Picture
    Image {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        image_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
    /// Picture that disappears after viewing
    FlashImage {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        image_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
    /// Voice clip
    Voice {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        voice_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
    /// XML rich message
    Xml { xml: String },
    /// JSON rich message
    Json { json: String },
    /// Light app card
    App { content: String },
    /// Poke
    Poke { name: String },
    /// Dice roll
    Dice { value: i64 },
    /// Store sticker
    MarketFace { id: i64, name: String },
    /// Music card
    MusicShare {
        kind: String,
        title: String,
        summary: String,
        jump_url: String,
        picture_url: String,
        music_url: String,
        brief: String,
    },
    /// Forwarded bundle
    Forward {
        #[serde(default)]
        node_list: Vec<ForwardNode>,
    },
    /// Group file
    File { id: String, name: String, size: i64 },
    /// Raw mirai code to be parsed by the gateway
    MiraiCode { code: String },
    /// A segment this library does not model; kept verbatim
    #[serde(skip)]
    Unsupported { kind: String, raw: Value },
}

impl MessageSegment {
    /// Plain text segment
    pub fn plain(text: impl Into<String>) -> Self {
        MessageSegment::Plain { text: text.into() }
    }

    /// Mention segment
    pub fn at(target: i64) -> Self {
        MessageSegment::At {
            target,
            display: String::new(),
        }
    }

    /// Emoticon segment
    pub fn face(face_id: i64) -> Self {
        MessageSegment::Face {
            face_id,
            name: None,
        }
    }

    /// Picture segment referencing an uploaded image id
    pub fn image(image_id: impl Into<String>) -> Self {
        MessageSegment::Image {
            image_id: Some(image_id.into()),
            url: None,
        }
    }

    /// Picture segment the gateway downloads from a URL
    pub fn image_url(url: impl Into<String>) -> Self {
        MessageSegment::Image {
            image_id: None,
            url: Some(url.into()),
        }
    }

    /// Quote segment
    pub fn quote(id: i64) -> Self {
        MessageSegment::Quote {
            id,
            group_id: 0,
            sender_id: 0,
            target_id: 0,
            origin: MessageChain::new(),
        }
    }

    /// The wire `type` tag
    pub fn kind(&self) -> &str {
        match self {
            MessageSegment::Source { .. } => "Source",
            MessageSegment::Quote { .. } => "Quote",
            MessageSegment::Plain { .. } => "Plain",
            MessageSegment::At { .. } => "At",
            MessageSegment::AtAll => "AtAll",
            MessageSegment::Face { .. } => "Face",
            MessageSegment::Image { .. } => "Image",
            MessageSegment::FlashImage { .. } => "FlashImage",
            MessageSegment::Voice { .. } => "Voice",
            MessageSegment::Xml { .. } => "Xml",
            MessageSegment::Json { .. } => "Json",
            MessageSegment::App { .. } => "App",
            MessageSegment::Poke { .. } => "Poke",
            MessageSegment::Dice { .. } => "Dice",
            MessageSegment::MarketFace { .. } => "MarketFace",
            MessageSegment::MusicShare { .. } => "MusicShare",
            MessageSegment::Forward { .. } => "Forward",
            MessageSegment::File { .. } => "File",
            MessageSegment::MiraiCode { .. } => "MiraiCode",
            MessageSegment::Unsupported { kind, .. } => kind,
        }
    }

    /// The text of a `Plain` segment
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageSegment::Plain { text } => Some(text),
            _ => None,
        }
    }

    /// JSON form of the segment; unsupported segments yield their raw object
    pub fn to_value(&self) -> serde_json::Result<Value> {
        match self {
            MessageSegment::Unsupported { raw, .. } => Ok(raw.clone()),
            other => serde_json::to_value(other),
        }
    }

    /// Parse one wire object; anything unrecognized becomes `Unsupported`
    pub fn from_value(value: Value) -> Self {
        match serde_json::from_value::<MessageSegment>(value.clone()) {
            Ok(segment) => segment,
            Err(err) => {
                let kind = value
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                debug!(kind = %kind, error = %err, "keeping unrecognized segment verbatim");
                MessageSegment::Unsupported { kind, raw: value }
            }
        }
    }
}

/// Ordered sequence of segments forming one message
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageChain(Vec<MessageSegment>);

impl MessageChain {
    /// Create an empty chain
    pub fn new() -> Self {
        MessageChain(Vec::new())
    }

    /// Chain holding a single plain-text segment
    pub fn text(text: impl Into<String>) -> Self {
        MessageChain(vec![MessageSegment::plain(text)])
    }

    /// Append a segment
    pub fn push(&mut self, segment: MessageSegment) {
        self.0.push(segment);
    }

    /// Builder-style append
    pub fn with(mut self, segment: MessageSegment) -> Self {
        self.0.push(segment);
        self
    }

    /// Segments of the chain
    pub fn segments(&self) -> &[MessageSegment] {
        &self.0
    }

    /// Take the segments out
    pub fn into_inner(self) -> Vec<MessageSegment> {
        self.0
    }

    /// Id of the message, read from the leading `Source` segment
    pub fn source_id(&self) -> Option<i64> {
        match self.0.first() {
            Some(MessageSegment::Source { id, .. }) => Some(*id),
            _ => None,
        }
    }

    /// Send time, read from the leading `Source` segment
    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        match self.0.first() {
            Some(MessageSegment::Source { time, .. }) => DateTime::from_timestamp(*time, 0),
            _ => None,
        }
    }

    /// Concatenated text of every `Plain` segment
    pub fn plain_text(&self) -> String {
        self.0.iter().filter_map(MessageSegment::as_text).collect()
    }

    /// Copy of the chain without its `Source` segment
    pub fn without_source(&self) -> MessageChain {
        self.0
            .iter()
            .filter(|segment| !matches!(segment, MessageSegment::Source { .. }))
            .cloned()
            .collect()
    }

    /// Encode as mirai code
    pub fn to_mirai_code(&self) -> String {
        super::code::encode(self)
    }

    /// Decode mirai code
    pub fn from_mirai_code(code: &str) -> crate::Result<Self> {
        super::code::decode(code)
    }
}

impl Deref for MessageChain {
    type Target = [MessageSegment];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Vec<MessageSegment>> for MessageChain {
    fn from(segments: Vec<MessageSegment>) -> Self {
        MessageChain(segments)
    }
}

impl From<MessageSegment> for MessageChain {
    fn from(segment: MessageSegment) -> Self {
        MessageChain(vec![segment])
    }
}

impl From<&str> for MessageChain {
    fn from(text: &str) -> Self {
        MessageChain::text(text)
    }
}

impl From<String> for MessageChain {
    fn from(text: String) -> Self {
        MessageChain::text(text)
    }
}

impl FromIterator<MessageSegment> for MessageChain {
    fn from_iter<I: IntoIterator<Item = MessageSegment>>(iter: I) -> Self {
        MessageChain(iter.into_iter().collect())
    }
}

impl IntoIterator for MessageChain {
    type Item = MessageSegment;
    type IntoIter = std::vec::IntoIter<MessageSegment>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a MessageChain {
    type Item = &'a MessageSegment;
    type IntoIter = std::slice::Iter<'a, MessageSegment>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl Serialize for MessageChain {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.0.len()))?;
        for segment in &self.0 {
            match segment {
                MessageSegment::Unsupported { raw, .. } => seq.serialize_element(raw)?,
                other => seq.serialize_element(other)?,
            }
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for MessageChain {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let values = Vec::<Value>::deserialize(deserializer)?;
        Ok(values.into_iter().map(MessageSegment::from_value).collect())
    }
}
