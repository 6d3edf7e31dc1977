//! Outbound channel plumbing and the inbound-facing collaborators the drip
//! engine reads from.
//!
//! Sending: a `ChannelSender` per channel behind a `ChannelRouter`.
//! Reading: `MessageHistory` for replies and opens, `TemplateStore` for
//! stored message templates.

pub mod history;
pub mod router;
pub mod sender;
pub mod templates;

pub use history::{HistoryError, InMemoryHistory, Interaction, InteractionKind, MessageHistory};
pub use router::ChannelRouter;
pub use sender::{CaptureSender, ChannelSender, LogSender, OutboundMessage, SendError, SendReceipt};
pub use templates::{InMemoryTemplates, TemplateStore};
