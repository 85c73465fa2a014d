use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::election::Rank;
use crate::error::ElectionError;

/// Control message exchanged between nodes. Carries no payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    /// External stimulus that makes a node start the algorithm
    Wakeup,
    /// Sent to every higher rank when a node starts an election
    Election,
    /// Reply to ELECTION: the sender is alive and takes over
    Alive,
    /// Authoritative leader announcement
    Victory,
}

impl Message {
    pub const ALL: [Message; 4] = [
        Message::Wakeup,
        Message::Election,
        Message::Alive,
        Message::Victory,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Message::Wakeup => "WAKEUP",
            Message::Election => "ELECTION",
            Message::Alive => "ALIVE",
            Message::Victory => "VICTORY",
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Message {
    type Err = ElectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = s.trim();
        Message::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(tag))
            .ok_or_else(|| ElectionError::UnrecognizedMessageType(tag.to_string()))
    }
}

/// A mailbox entry: who sent it and what it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope {
    pub from: Rank,
    pub message: Message,
}

impl Envelope {
    pub fn new(from: Rank, message: Message) -> Self {
        Self { from, message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_uses_wire_tags() {
        assert_eq!(Message::Wakeup.to_string(), "WAKEUP");
        assert_eq!(Message::Election.to_string(), "ELECTION");
        assert_eq!(Message::Alive.to_string(), "ALIVE");
        assert_eq!(Message::Victory.to_string(), "VICTORY");
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!("victory".parse::<Message>().unwrap(), Message::Victory);
        assert_eq!(" Alive ".parse::<Message>().unwrap(), Message::Alive);
        assert_eq!("ELECTION".parse::<Message>().unwrap(), Message::Election);
    }

    #[test]
    fn test_parse_rejects_unknown_tag() {
        let err = "COORDINATOR".parse::<Message>().unwrap_err();
        assert_eq!(
            err,
            ElectionError::UnrecognizedMessageType("COORDINATOR".to_string())
        );
    }

    #[test]
    fn test_serializes_as_tag() {
        let json = serde_json::to_string(&Message::Victory).unwrap();
        assert_eq!(json, "\"VICTORY\"");
    }
}
