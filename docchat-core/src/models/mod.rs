pub mod conversation;
pub mod document;
pub mod search;

pub use conversation::{ConversationTurn, TurnRole};
pub use document::{DocumentMetadata, DocumentRecord, MetadataTextPolicy};
pub use search::MatchResult;
