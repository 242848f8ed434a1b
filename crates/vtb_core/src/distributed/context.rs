//! Process context: identity, device binding and group membership.

use super::backend::{CoordinationBackend, GroupHandle};
use super::error::ContextError;
use super::identity::{DetectedIdentity, WorkerIdentity};
use super::rendezvous::ENV_METHOD;

/// Backend name announced when joining the group.
pub const DEFAULT_BACKEND_NAME: &str = "tcp";

/// Scoped worker context.
///
/// The coordination group, if one was formed, is dissolved by `teardown`
/// or, failing that, when the context is dropped.
pub struct ProcessContext {
    identity: WorkerIdentity,
    distributed: bool,
    group: Option<GroupHandle>,
    torn_down: bool,
}

impl ProcessContext {
    /// Establish the context for a detected identity.
    ///
    /// The device is always bound first. In distributed mode the call then
    /// blocks until every worker has joined the group.
    pub fn establish(
        backend: &mut dyn CoordinationBackend,
        detected: DetectedIdentity,
    ) -> Result<Self, ContextError> {
        let identity = detected.identity;
        backend.bind_device(identity.device_index)?;

        if !detected.is_distributed() {
            tracing::info!("Distributed environment not detected, running in single-process mode");
            return Ok(Self {
                identity,
                distributed: false,
                group: None,
                torn_down: false,
            });
        }

        let group = backend.join_group(&identity, DEFAULT_BACKEND_NAME, ENV_METHOD)?;

        Ok(Self {
            identity,
            distributed: true,
            group: Some(group),
            torn_down: false,
        })
    }

    pub fn identity(&self) -> &WorkerIdentity {
        &self.identity
    }

    /// Whether this worker joined a coordination group.
    pub fn is_distributed(&self) -> bool {
        self.distributed
    }

    /// Dissolve the group if one was formed. Safe to call repeatedly.
    pub fn teardown(&mut self) -> Result<(), ContextError> {
        if self.torn_down {
            return Ok(());
        }
        self.torn_down = true;

        match self.group.take() {
            Some(mut group) => {
                group.dissolve()?;
                tracing::debug!("Left coordination group");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Drop for ProcessContext {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            tracing::warn!("Teardown failed for {}: {}", self.identity, e);
        }
    }
}
