use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of entity taking part in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ParticipantType {
    User,
    Company,
}

impl ParticipantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantType::User => "USER",
            ParticipantType::Company => "COMPANY",
        }
    }
}

impl fmt::Display for ParticipantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ParticipantType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "USER" => Ok(ParticipantType::User),
            "COMPANY" => Ok(ParticipantType::Company),
            other => Err(format!("unknown participant type: {}", other)),
        }
    }
}

/// Identity of one side of a conversation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParticipantRef {
    pub id: String,
    #[serde(rename = "type")]
    pub participant_type: ParticipantType,
}

impl ParticipantRef {
    pub fn new(id: impl Into<String>, participant_type: ParticipantType) -> Self {
        Self {
            id: id.into(),
            participant_type,
        }
    }
}

/// Cached projection of a user or company profile.
///
/// The profile itself is owned by the user/company service; the chat layer
/// only keeps what it needs to render a conversation row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantProfile {
    pub id: String,
    #[serde(rename = "type")]
    pub participant_type: ParticipantType,
    pub name: String,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub is_online: bool,
}
