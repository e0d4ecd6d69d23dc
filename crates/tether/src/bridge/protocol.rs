//! Wire protocol shared by the client bridge and the host dispatcher.
//!
//! One envelope type travels in both directions, distinguished by its fields:
//! - **Request** (UI -> host): `{command, payload, requestId}`
//! - **Response** (host -> UI): `{requestId, payload, error?}`
//! - **Notification** (either way, uncorrelated): `{command, payload}`
//!
//! Payloads are JSON on the wire. The typed schemas below ([`HostCommand`],
//! [`NotificationSchema`]) are checked at both ends of the channel.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::HostError;
use crate::version::VersionInfo;

/// Correlates a response with the request that caused it.
///
/// Assigned from a strictly monotonic per-bridge counter, so two requests from
/// the same bridge never share an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(u64);

impl CorrelationId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The single message type carried by the channel transport.
///
/// There is no discriminator field on the wire. The variant is told apart by
/// which fields are present: `command` plus `requestId` is a Request,
/// `requestId` alone a Response, `command` alone a Notification. Variant
/// order matters for decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged, rename_all_fields = "camelCase")]
pub enum Envelope {
    Request {
        command: String,
        #[serde(default)]
        payload: Value,
        request_id: CorrelationId,
    },

    Response {
        request_id: CorrelationId,
        #[serde(default)]
        payload: Value,
        /// Host failure text. Present means the request failed.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    Notification {
        command: String,
        #[serde(default)]
        payload: Value,
    },
}

impl Envelope {
    pub fn request(command: impl Into<String>, payload: Value, request_id: CorrelationId) -> Self {
        Self::Request {
            command: command.into(),
            payload,
            request_id,
        }
    }

    pub fn success(request_id: CorrelationId, payload: Value) -> Self {
        Self::Response {
            request_id,
            payload,
            error: None,
        }
    }

    pub fn failure(request_id: CorrelationId, error: impl Into<String>) -> Self {
        Self::Response {
            request_id,
            payload: Value::Null,
            error: Some(error.into()),
        }
    }

    pub fn notification(command: impl Into<String>, payload: Value) -> Self {
        Self::Notification {
            command: command.into(),
            payload,
        }
    }

    /// Encode a typed notification.
    pub fn notify<N: NotificationSchema>(notification: &N) -> Result<Self, serde_json::Error> {
        Ok(Self::notification(N::NAME, serde_json::to_value(notification)?))
    }

    pub fn request_id(&self) -> Option<CorrelationId> {
        match self {
            Self::Request { request_id, .. } | Self::Response { request_id, .. } => {
                Some(*request_id)
            }
            Self::Notification { .. } => None,
        }
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Request { .. } => "request",
            Self::Response { .. } => "response",
            Self::Notification { .. } => "notification",
        }
    }
}

/// A named host operation with a checked payload and result schema.
pub trait HostCommand: Serialize + DeserializeOwned + Send + 'static {
    const NAME: &'static str;
    type Output: Serialize + DeserializeOwned + Send + 'static;
}

/// A named, uncorrelated push message with a checked payload schema.
pub trait NotificationSchema: Serialize + DeserializeOwned + Send + 'static {
    const NAME: &'static str;
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetInitialData {}

impl HostCommand for GetInitialData {
    const NAME: &'static str = "getInitialData";
    type Output = InitialData;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetFileContent {
    pub path: String,
}

impl HostCommand for GetFileContent {
    const NAME: &'static str = "getFileContent";
    type Output = FileContent;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateFileContent {
    pub path: String,
    pub new_content: String,
}

impl HostCommand for UpdateFileContent {
    const NAME: &'static str = "updateFileContent";
    type Output = FileUpdated;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteFile {
    pub path: String,
}

impl HostCommand for DeleteFile {
    const NAME: &'static str = "deleteFile";
    type Output = FileChange;
}

/// Create an empty file at a path chosen interactively on the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateFile {}

impl HostCommand for CreateFile {
    const NAME: &'static str = "createFile";
    type Output = FileChange;
}

/// Host-side view of a decoded request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    GetInitialData(GetInitialData),
    GetFileContent(GetFileContent),
    UpdateFileContent(UpdateFileContent),
    DeleteFile(DeleteFile),
    CreateFile(CreateFile),
}

impl Command {
    /// Every command name the host answers.
    pub const NAMES: [&'static str; 5] = [
        GetInitialData::NAME,
        GetFileContent::NAME,
        UpdateFileContent::NAME,
        DeleteFile::NAME,
        CreateFile::NAME,
    ];

    /// Validate an incoming `(command, payload)` pair against its schema.
    pub fn decode(command: &str, payload: Value) -> Result<Self, HostError> {
        // Payload-less commands may arrive with `null` instead of `{}`.
        let payload = match payload {
            Value::Null => Value::Object(serde_json::Map::new()),
            other => other,
        };

        match command {
            GetInitialData::NAME => decode_payload(command, payload).map(Self::GetInitialData),
            GetFileContent::NAME => decode_payload(command, payload).map(Self::GetFileContent),
            UpdateFileContent::NAME => {
                decode_payload(command, payload).map(Self::UpdateFileContent)
            }
            DeleteFile::NAME => decode_payload(command, payload).map(Self::DeleteFile),
            CreateFile::NAME => decode_payload(command, payload).map(Self::CreateFile),
            other => Err(HostError::UnknownCommand(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::GetInitialData(_) => GetInitialData::NAME,
            Self::GetFileContent(_) => GetFileContent::NAME,
            Self::UpdateFileContent(_) => UpdateFileContent::NAME,
            Self::DeleteFile(_) => DeleteFile::NAME,
            Self::CreateFile(_) => CreateFile::NAME,
        }
    }
}

fn decode_payload<T: DeserializeOwned>(command: &str, payload: Value) -> Result<T, HostError> {
    serde_json::from_value(payload).map_err(|e| HostError::InvalidPayload {
        command: command.to_string(),
        message: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Who is operating the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Describes the repository checked out at the workspace root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoDescriptor {
    /// Directory name of the workspace root.
    pub name: String,
    /// Absolute, canonical workspace root.
    pub root: String,
    /// Current git branch, when the root is a git checkout on a branch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileNode {
    /// Path relative to the workspace root, `/`-separated.
    pub path: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialData {
    pub identity: Identity,
    pub repo_descriptor: RepoDescriptor,
    pub file_tree: Vec<FileNode>,
    pub host_version: VersionInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileContent {
    pub content: String,
    pub revision_tag: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileUpdated {
    pub new_revision_tag: String,
}

/// Result of an interactive file mutation (create or delete).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub success: bool,
    pub path: String,
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeChangeReason {
    Created,
    Deleted,
}

/// The workspace file tree changed; subscribers re-fetch the full tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeChanged {
    pub reason: TreeChangeReason,
    pub path: String,
}

impl NotificationSchema for TreeChanged {
    const NAME: &'static str = "treeChanged";
}

/// Best-effort notice from the UI that it stopped waiting for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelNotice {
    pub request_id: CorrelationId,
}

impl NotificationSchema for CancelNotice {
    const NAME: &'static str = "$/cancel";
}
