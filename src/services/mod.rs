pub mod access;
pub mod chat;
pub mod encryption;
pub mod file;
pub mod invitations;
pub mod retention;

pub use access::AccessOracle;
pub use chat::{sanitize_message, ChatRateLimiter, ChatService, RateLimitPermit};
pub use encryption::EncryptionService;
pub use file::{FileContent, FileService};
pub use invitations::InvitationService;
pub use retention::ChatRetention;
