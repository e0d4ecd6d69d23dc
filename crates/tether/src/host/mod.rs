//! Privileged side of the bridge: command dispatch, notifications, and the
//! workspace the commands act on.

pub mod dispatcher;
pub mod emitter;
pub mod prompt;
pub mod workspace;

pub use dispatcher::HostDispatcher;
pub use emitter::NotificationEmitter;
pub use prompt::{StaticPrompt, UserPrompt};
pub use workspace::Workspace;
