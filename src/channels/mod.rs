pub mod dispatch;
pub mod telegram;
pub mod traits;

pub use dispatch::{Command, Dispatcher, user_facing_message};
pub use telegram::TelegramChannel;
pub use traits::{Channel, ChannelMessage, InboundTurn, MediaAttachment};
