//! tether: correlated request/notification bridge between a sandboxed UI
//! surface and a privileged host.

mod version;

pub mod bridge;
pub mod client;
pub mod config;
pub mod error;
pub mod host;

pub use bridge::protocol::{
    CancelNotice, Command, CorrelationId, CreateFile, DeleteFile, Envelope, FileChange,
    FileContent, FileNode, FileUpdated, GetFileContent, GetInitialData, HostCommand, Identity,
    InitialData, NotificationSchema, RepoDescriptor, TreeChangeReason, TreeChanged,
    UpdateFileContent,
};
pub use bridge::transport::{Endpoint, duplex, framed, framed_with_writer, stdio};
pub use client::{ClientBridge, Subscription};
pub use config::{BridgeConfig, HostConfig};
pub use error::{BridgeError, ErrorKind, HostError};
pub use host::{HostDispatcher, NotificationEmitter, StaticPrompt, UserPrompt, Workspace};
pub use version::{PROTOCOL_VERSION, TETHER_VERSION, VersionInfo};
