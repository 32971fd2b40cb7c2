//! Notification hub pushing task and file updates to live subscribers

mod protocol;
mod registry;

pub use protocol::{handle_frame, parse_command, ClientCommand, ServerMessage};
pub use registry::{ConnectionId, NotificationHub, SubscriptionKey};
