//! Coordination backend seam.
//!
//! A backend binds the process to its device and forms the coordination
//! group. Membership is represented by a `GroupHandle` that leaves the
//! group when dissolved or dropped.

use super::error::ContextError;
use super::identity::WorkerIdentity;

/// Something that can place a worker into a coordination group.
pub trait CoordinationBackend {
    /// Bind the process to a compute device. Called before models load.
    fn bind_device(&mut self, device_index: usize) -> Result<(), ContextError>;

    /// Block until every worker has joined the group.
    fn join_group(
        &mut self,
        identity: &WorkerIdentity,
        backend_name: &str,
        method: &str,
    ) -> Result<GroupHandle, ContextError>;
}

/// Backend-specific part of a group membership.
pub trait GroupMembership: Send {
    /// Leave the group. Called at most once.
    fn leave(&mut self) -> Result<(), ContextError>;
}

/// Membership for a group with no peers.
pub struct SoloMembership;

impl GroupMembership for SoloMembership {
    fn leave(&mut self) -> Result<(), ContextError> {
        Ok(())
    }
}

/// Handle to a formed coordination group.
pub struct GroupHandle {
    backend_name: String,
    identity: WorkerIdentity,
    membership: Option<Box<dyn GroupMembership>>,
}

impl GroupHandle {
    pub fn new(
        backend_name: impl Into<String>,
        identity: WorkerIdentity,
        membership: Box<dyn GroupMembership>,
    ) -> Self {
        Self {
            backend_name: backend_name.into(),
            identity,
            membership: Some(membership),
        }
    }

    /// Whether the group has not been dissolved yet.
    pub fn is_active(&self) -> bool {
        self.membership.is_some()
    }

    /// Leave the group. Later calls are no-ops.
    pub fn dissolve(&mut self) -> Result<(), ContextError> {
        match self.membership.take() {
            Some(mut membership) => {
                tracing::debug!(
                    "Dissolving {} group for {}",
                    self.backend_name,
                    self.identity
                );
                membership.leave()
            }
            None => Ok(()),
        }
    }
}

impl Drop for GroupHandle {
    fn drop(&mut self) {
        if !self.is_active() {
            return;
        }
        tracing::debug!("{} group dropped without explicit dissolve", self.backend_name);
        if let Err(e) = self.dissolve() {
            tracing::warn!("Failed to dissolve coordination group: {}", e);
        }
    }
}
