//! The messaging plane: durable read-receipted mail, persistent chat
//! sessions with send-and-wait semantics, and the notification dispatcher
//! that drains the outbox into mail.

pub mod chat;
pub mod dispatcher;
pub mod mail;
mod render;

pub use chat::{ChatPlane, ReleaseSummary, SendOutcome, StartOutcome, WaitMode};
pub use dispatcher::{DispatcherConfig, NotificationDispatcher};
pub use mail::MailPlane;
