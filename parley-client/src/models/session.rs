use std::fmt;

use super::ParticipantType;

/// Authenticated identity supplied by the auth provider.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
    pub participant_type: ParticipantType,
    pub token: String,
}

impl Session {
    pub fn new(
        user_id: impl Into<String>,
        participant_type: ParticipantType,
        token: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            participant_type,
            token: token.into(),
        }
    }
}

// Token stays out of logs
impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("participant_type", &self.participant_type)
            .field("token", &"<redacted>")
            .finish()
    }
}
