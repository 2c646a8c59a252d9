//! Formatting of incoming agent messages for the session.

use serde::{Deserialize, Serialize};

/// Upper bound on messages of one kind (direct or channel) per bundle.
pub const MAX_MESSAGES_PER_KIND: usize = 20;

/// A message addressed to a goal's supervisor by another agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboxMessage {
    pub from: String,
    /// Set for messages posted to a channel rather than sent directly.
    #[serde(default)]
    pub channel: Option<String>,
    pub body: String,
}

/// Render messages as a single system turn. Returns `None` when there is
/// nothing to say.
pub fn render_notifications(messages: &[InboxMessage]) -> Option<String> {
    if messages.is_empty() {
        return None;
    }
    let mut buf = String::from("[INCOMING AGENT MESSAGES]\n\n");
    for message in messages {
        match &message.channel {
            Some(channel) => buf.push_str(&format!(
                "Channel #{channel} from {}: \"{}\"\n",
                message.from, message.body
            )),
            None => buf.push_str(&format!(
                "Direct from {}: \"{}\"\n",
                message.from, message.body
            )),
        }
    }
    buf.push_str("\nPlease review and respond to these messages.\n");
    Some(buf)
}

/// Keep direct messages ahead of channel messages, each capped at
/// [`MAX_MESSAGES_PER_KIND`]. Returns the kept items and the overflow.
///
/// `message` projects each item onto its message so callers can carry
/// extra data (such as the file a message came from) through the split.
pub fn split_bundle<T>(items: Vec<T>, message: impl Fn(&T) -> &InboxMessage) -> (Vec<T>, Vec<T>) {
    let (direct, channel): (Vec<_>, Vec<_>) = items
        .into_iter()
        .partition(|item| message(item).channel.is_none());
    let mut kept = Vec::new();
    let mut overflow = Vec::new();
    for group in [direct, channel] {
        for (i, item) in group.into_iter().enumerate() {
            if i < MAX_MESSAGES_PER_KIND {
                kept.push(item);
            } else {
                overflow.push(item);
            }
        }
    }
    (kept, overflow)
}
