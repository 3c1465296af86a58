pub mod chat;
pub mod file;
pub mod invitation;
pub mod project;
pub mod user;

pub use chat::*;
pub use file::*;
pub use invitation::*;
pub use project::*;
pub use user::*;
