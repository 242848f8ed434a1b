//! Worker identity and coordination group management.
//!
//! This module provides:
//! - `WorkerIdentity`: (index, total workers, device index) of this process
//! - `CoordinationBackend`: seam for device binding and group formation
//! - `TcpRendezvous`: `env://` backend built on a TCP star around worker 0
//! - `ProcessContext`: scoped context that always leaves the group

mod backend;
mod context;
mod error;
mod identity;
mod rendezvous;

pub use backend::{CoordinationBackend, GroupHandle, GroupMembership, SoloMembership};
pub use context::{ProcessContext, DEFAULT_BACKEND_NAME};
pub use error::{ContextError, RendezvousError};
pub use identity::{
    detect_identity, detect_identity_with, DetectedIdentity, IdentitySource, WorkerIdentity,
    LOCAL_RANK_VAR, RANK_VAR, WORLD_SIZE_VAR,
};
pub use rendezvous::{
    TcpRendezvous, DEVICE_VAR, ENV_METHOD, HANDSHAKE_TIMEOUT_VAR, MASTER_ADDR_VAR, MASTER_PORT_VAR,
    TIMEOUT_VAR,
};
