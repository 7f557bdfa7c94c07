//! Inbound and outbound chat message types.
//!
//! Only the fields needed to route commands are modelled; everything else in
//! the remote service's message payload is ignored during deserialization.

use serde::{Deserialize, Serialize};

use crate::Jid;

/// Kind of a message batch delivered by the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertKind {
    /// Live notification of newly received messages
    Notify,
    /// History-sync backfill
    Append,
}

/// Key identifying a message within a chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageKey {
    /// Chat the message belongs to
    pub remote_jid: Jid,
    /// Whether the message was sent by this session's own account
    #[serde(default)]
    pub from_me: bool,
    /// Message identifier
    pub id: String,
    /// Sender within a group chat
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant: Option<Jid>,
}

/// Context attached to an extended text message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextInfo {
    /// Identities @-mentioned in the message
    #[serde(default)]
    pub mentioned_jid: Vec<Jid>,
}

/// Extended (quoted, linked, or mention-carrying) text message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtendedText {
    /// Text body
    #[serde(default)]
    pub text: Option<String>,
    /// Mention/quote context
    #[serde(default)]
    pub context_info: Option<ContextInfo>,
}

/// Image or video message; only the caption matters here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaCaption {
    /// Caption text
    #[serde(default)]
    pub caption: Option<String>,
}

/// Message payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageContent {
    /// Plain text body
    #[serde(default)]
    pub conversation: Option<String>,
    /// Extended text body
    #[serde(default)]
    pub extended_text: Option<ExtendedText>,
    /// Image message
    #[serde(default)]
    pub image: Option<MediaCaption>,
    /// Video message
    #[serde(default)]
    pub video: Option<MediaCaption>,
}

/// A message received on a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Message key
    pub key: MessageKey,
    /// Payload (absent for protocol/stub messages)
    #[serde(default)]
    pub message: Option<MessageContent>,
}

impl InboundMessage {
    /// Chat the message arrived in.
    pub fn chat(&self) -> &Jid {
        &self.key.remote_jid
    }

    /// Whether the message arrived in a group chat.
    pub fn is_group(&self) -> bool {
        self.key.remote_jid.is_group()
    }

    /// Plain-text body: the first non-empty of conversation text, extended
    /// text, image caption, video caption. Empty when none is present.
    pub fn text_body(&self) -> &str {
        let Some(content) = &self.message else {
            return "";
        };
        [
            content.conversation.as_deref(),
            content.extended_text.as_ref().and_then(|t| t.text.as_deref()),
            content.image.as_ref().and_then(|m| m.caption.as_deref()),
            content.video.as_ref().and_then(|m| m.caption.as_deref()),
        ]
        .into_iter()
        .flatten()
        .find(|s| !s.is_empty())
        .unwrap_or("")
    }

    /// First identity @-mentioned in the message, if any.
    pub fn first_mention(&self) -> Option<&Jid> {
        self.message
            .as_ref()?
            .extended_text
            .as_ref()?
            .context_info
            .as_ref()?
            .mentioned_jid
            .first()
    }
}

/// Presence announced to the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    /// Online
    Available,
    /// Offline
    Unavailable,
}

/// A message sent from a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Plain text
    Text {
        /// Body
        text: String,
    },
    /// Image with optional caption
    Image {
        /// Encoded image bytes
        data: Vec<u8>,
        /// Caption
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
    },
    /// Emoji reaction to an existing message
    Reaction {
        /// Emoji
        emoji: String,
        /// Message being reacted to
        key: MessageKey,
    },
}

impl OutboundMessage {
    /// Build a text message.
    pub fn text(text: impl Into<String>) -> Self {
        OutboundMessage::Text { text: text.into() }
    }

    /// Text body, if this is a text message.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            OutboundMessage::Text { text } => Some(text),
            _ => None,
        }
    }
}
