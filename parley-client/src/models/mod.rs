mod conversation;
pub mod input;
mod paging;
mod participant;
mod session;

pub use conversation::{Conversation, ConversationView, MessageSummary};
pub use paging::PagingResponse;
pub use participant::{ParticipantProfile, ParticipantRef, ParticipantType};
pub use session::Session;
