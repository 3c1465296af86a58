pub mod hub;
pub mod presence;
pub mod protocol;
pub mod relay;
pub mod socket;

pub use hub::{ConnectionId, Hub};
pub use presence::PresenceRegistry;
pub use protocol::{ClientEvent, CursorPosition, ServerEvent};
pub use relay::{ConnectionContext, Relay};
