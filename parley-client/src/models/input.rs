//! Input DTOs with garde validation for coordinator commands.
//!
//! These structs validate caller data before anything reaches the wire.

use garde::Validate;

use crate::error::Result;

/// Validation constants
pub const MAX_CONVERSATION_ID_LENGTH: usize = 256;
pub const MAX_MESSAGE_LENGTH: usize = 10000;

fn validate_not_blank(value: &str, _ctx: &()) -> garde::Result {
    if value.trim().is_empty() {
        return Err(garde::Error::new("must not be blank"));
    }
    Ok(())
}

fn validate_no_control_chars(value: &str, _ctx: &()) -> garde::Result {
    if value.chars().any(|c| c.is_control()) {
        return Err(garde::Error::new("contains invalid characters"));
    }
    Ok(())
}

/// Input for sending a message into a conversation
#[derive(Debug, Validate)]
#[garde(context(()))]
pub struct SendMessageInput {
    #[garde(length(min = 1, max = MAX_CONVERSATION_ID_LENGTH), custom(validate_no_control_chars))]
    pub conversation_id: String,
    #[garde(length(min = 1, max = MAX_MESSAGE_LENGTH), custom(validate_not_blank))]
    pub content: String,
}

/// Input for any command addressed to a single conversation
#[derive(Debug, Validate)]
#[garde(context(()))]
pub struct ConversationIdInput {
    #[garde(length(min = 1, max = MAX_CONVERSATION_ID_LENGTH), custom(validate_no_control_chars))]
    pub conversation_id: String,
}

impl ConversationIdInput {
    pub fn new(conversation_id: &str) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
        }
    }
}

/// Helper trait to turn garde reports into `ChatError::Validation`
pub trait ValidateExt {
    fn validate_input(&self) -> Result<()>;
}

impl<T: Validate<Context = ()>> ValidateExt for T {
    fn validate_input(&self) -> Result<()> {
        self.validate()?;
        Ok(())
    }
}
