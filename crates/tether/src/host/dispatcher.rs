//! Host command dispatcher - runs on the privileged side.
//!
//! Reads Request envelopes off the channel, runs each command on its own task
//! and answers with exactly one Response carrying the request's id. Handlers
//! run concurrently, so a command parked on a user prompt never holds up the
//! rest and responses go out in completion order, not arrival order.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::bridge::protocol::{
    CancelNotice, Command, CorrelationId, CreateFile, DeleteFile, Envelope, FileChange,
    GetFileContent, HostCommand, Identity, InitialData, NotificationSchema, TreeChangeReason,
    TreeChanged, UpdateFileContent,
};
use crate::bridge::transport::Endpoint;
use crate::config::HostConfig;
use crate::error::{ErrorKind, HostError};
use crate::host::emitter::NotificationEmitter;
use crate::host::prompt::UserPrompt;
use crate::host::workspace::Workspace;
use crate::version::VersionInfo;

struct HostState {
    workspace: Option<Workspace>,
    identity: Identity,
    version: VersionInfo,
    prompt: Arc<dyn UserPrompt>,
}

/// Cheap to clone; clones share the workspace and prompt.
#[derive(Clone)]
pub struct HostDispatcher {
    state: Arc<HostState>,
}

impl HostDispatcher {
    /// Build a dispatcher. `workspace` is `None` when the host has no folder open.
    pub fn new(
        workspace: Option<Workspace>,
        identity: Identity,
        version: VersionInfo,
        prompt: Arc<dyn UserPrompt>,
    ) -> Self {
        Self {
            state: Arc::new(HostState {
                workspace,
                identity,
                version,
                prompt,
            }),
        }
    }

    /// Open the configured workspace (if any) and build a dispatcher for it.
    pub async fn from_config(
        config: HostConfig,
        prompt: Arc<dyn UserPrompt>,
    ) -> Result<Self, HostError> {
        let workspace = match &config.workspace_root {
            Some(root) => Some(Workspace::open(root, &config.ignore_patterns).await?),
            None => {
                tracing::info!("Starting without a workspace");
                None
            }
        };
        let version = match config.host_label {
            Some(label) => VersionInfo::new().with_host(label),
            None => VersionInfo::new(),
        };
        Ok(Self::new(workspace, config.identity, version, prompt))
    }

    /// The open workspace, if any.
    pub fn workspace(&self) -> Option<&Workspace> {
        self.state.workspace.as_ref()
    }

    /// Serve requests from `endpoint` until its inbound side closes.
    ///
    /// Handlers still running at that point are awaited; their responses are
    /// sent if the outbound side is still open.
    pub async fn run(&self, endpoint: Endpoint) {
        let (tx, mut rx) = endpoint.into_parts();
        let emitter = NotificationEmitter::new(tx.clone());
        let mut in_flight: JoinSet<()> = JoinSet::new();
        let mut owners: HashMap<tokio::task::Id, (CorrelationId, String)> = HashMap::new();

        tracing::info!(
            workspace = ?self.workspace().map(Workspace::root),
            commands = ?Command::NAMES,
            "Host dispatcher started"
        );

        loop {
            tokio::select! {
                envelope = rx.recv() => {
                    match envelope {
                        Some(Envelope::Request { command, payload, request_id }) => {
                            let this = self.clone();
                            let tx = tx.clone();
                            let emitter = emitter.clone();
                            let name = command.clone();
                            let task = in_flight.spawn(async move {
                                let response = this
                                    .handle_request(&command, payload, request_id, &emitter)
                                    .await;
                                if tx.send(response).is_err() {
                                    tracing::debug!(%request_id, command = %command, "UI gone, response dropped");
                                }
                            });
                            owners.insert(task.id(), (request_id, name));
                        }
                        Some(Envelope::Notification { command, payload }) if command == CancelNotice::NAME => {
                            match serde_json::from_value::<CancelNotice>(payload) {
                                Ok(notice) => {
                                    let running = owners.values().any(|(id, _)| *id == notice.request_id);
                                    tracing::debug!(request_id = %notice.request_id, running, "UI stopped waiting for request");
                                }
                                Err(e) => tracing::warn!(error = %e, "Malformed cancel notice"),
                            }
                        }
                        Some(other) => {
                            tracing::warn!(kind = other.kind(), "Dropping unexpected envelope sent to the host");
                        }
                        None => {
                            tracing::info!(in_flight = in_flight.len(), "UI link closed, draining handlers");
                            break;
                        }
                    }
                }
                Some(joined) = in_flight.join_next_with_id(), if !in_flight.is_empty() => {
                    reap(joined, &mut owners, &tx);
                }
            }
        }

        while let Some(joined) = in_flight.join_next_with_id().await {
            reap(joined, &mut owners, &tx);
        }
        tracing::info!("Host dispatcher stopped");
    }

    /// Decode, execute and answer one request.
    pub async fn handle_request(
        &self,
        command: &str,
        payload: Value,
        request_id: CorrelationId,
        emitter: &NotificationEmitter,
    ) -> Envelope {
        tracing::debug!(%request_id, command, "Dispatching request");

        let result = match Command::decode(command, payload) {
            Ok(decoded) => self.execute(decoded, emitter).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(value) => {
                tracing::debug!(%request_id, command, "Request succeeded");
                Envelope::success(request_id, value)
            }
            Err(e) => {
                if e.kind() == ErrorKind::UserCancelled {
                    tracing::info!(%request_id, command, "Request cancelled by user");
                } else {
                    tracing::warn!(%request_id, command, error = %e, "Request failed");
                }
                Envelope::failure(request_id, e.to_string())
            }
        }
    }

    /// Run an already-decoded command and encode its result payload.
    pub async fn execute(
        &self,
        command: Command,
        emitter: &NotificationEmitter,
    ) -> Result<Value, HostError> {
        let name = command.name();
        match command {
            Command::GetInitialData(_) => encode(&self.initial_data().await?),
            Command::GetFileContent(GetFileContent { path }) => {
                let workspace = self.require_workspace(name)?;
                encode(&workspace.read_file(&path).await?)
            }
            Command::UpdateFileContent(UpdateFileContent { path, new_content }) => {
                let workspace = self.require_workspace(name)?;
                encode(&workspace.write_file(&path, &new_content).await?)
            }
            Command::DeleteFile(DeleteFile { path }) => {
                encode(&self.delete_file(path, emitter).await?)
            }
            Command::CreateFile(_) => encode(&self.create_file(emitter).await?),
        }
    }

    fn require_workspace(&self, command: &str) -> Result<&Workspace, HostError> {
        self.state.workspace.as_ref().ok_or_else(|| {
            HostError::PreconditionFailed(format!("'{command}' requires an open workspace"))
        })
    }

    async fn initial_data(&self) -> Result<InitialData, HostError> {
        let workspace = self.state.workspace.as_ref().ok_or(HostError::NoWorkspace)?;
        Ok(InitialData {
            identity: self.state.identity.clone(),
            repo_descriptor: workspace.repo_descriptor().await,
            file_tree: workspace.file_tree().await?,
            host_version: self.state.version.clone(),
        })
    }

    async fn delete_file(
        &self,
        path: String,
        emitter: &NotificationEmitter,
    ) -> Result<FileChange, HostError> {
        let workspace = self.require_workspace(DeleteFile::NAME)?;
        // Bad paths fail before the user is asked anything.
        workspace
            .resolve_entry(&path)
            .await
            .map_err(|e| HostError::operation(format!("failed to delete '{path}': {e}")))?;

        let question = format!("Delete '{path}'? This cannot be undone.");
        if !self.state.prompt.confirm(&question).await {
            return Err(HostError::cancelled(format!("deletion of '{path}' was declined")));
        }

        workspace.delete_file(&path).await?;
        emitter.emit(&TreeChanged {
            reason: TreeChangeReason::Deleted,
            path: path.clone(),
        });
        Ok(FileChange {
            success: true,
            path,
        })
    }

    async fn create_file(&self, emitter: &NotificationEmitter) -> Result<FileChange, HostError> {
        let workspace = self.require_workspace(CreateFile::NAME)?;

        let answer = self
            .state
            .prompt
            .input_path("Path of the new file, relative to the workspace root")
            .await;
        let path = match answer.as_deref().map(str::trim) {
            Some(path) if !path.is_empty() => path.to_string(),
            _ => return Err(HostError::cancelled("no file path was given")),
        };

        let created = workspace.create_file(&path).await?;
        emitter.emit(&TreeChanged {
            reason: TreeChangeReason::Created,
            path: created.clone(),
        });
        Ok(FileChange {
            success: true,
            path: created,
        })
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Value, HostError> {
    serde_json::to_value(value)
        .map_err(|e| HostError::operation(format!("failed to encode result: {e}")))
}

/// Forget a finished handler. A handler that panicked still owes its caller
/// a response, so one is sent on its behalf.
fn reap(
    joined: Result<(tokio::task::Id, ()), tokio::task::JoinError>,
    owners: &mut HashMap<tokio::task::Id, (CorrelationId, String)>,
    tx: &mpsc::UnboundedSender<Envelope>,
) {
    let (task_id, failure) = match joined {
        Ok((task_id, ())) => (task_id, None),
        Err(e) => (e.id(), Some(e)),
    };
    let Some((request_id, command)) = owners.remove(&task_id) else {
        return;
    };
    let Some(e) = failure else {
        return;
    };

    tracing::error!(%request_id, command = %command, error = %e, "Handler did not complete");
    let err = HostError::operation(format!("handler for '{command}' did not complete"));
    let _ = tx.send(Envelope::failure(request_id, err.to_string()));
}
