pub mod chat_repository;
pub mod collaborator_repository;
pub mod file_repository;
pub mod invitation_repository;
pub mod project_repository;
pub mod user_repository;

pub use chat_repository::*;
pub use collaborator_repository::*;
pub use file_repository::*;
pub use invitation_repository::*;
pub use project_repository::*;
pub use user_repository::*;
