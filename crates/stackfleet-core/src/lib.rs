//! Stackfleet Core Library
//!
//! Multi-region stack deployment engine: manifest and values loading, the
//! per-stack state machine, the changeset diff protocol and the bounded
//! region/stack worker pools, all against the control plane contracts in
//! [`remote`].

pub mod config;
pub mod fs;
pub mod init;
pub mod manifest;
pub mod pool;
pub mod remote;
pub mod retry;
pub mod run;
pub mod stack;
pub mod template;
pub mod values;

/// Re-exports of commonly used types
pub mod prelude {
    // Configuration
    pub use crate::config::{ConfigStore, PollingSettings, Settings};

    // Manifest and values
    pub use crate::manifest::{Manifest, Region, StackAction, StackSpec};
    pub use crate::values::ValuesStore;

    // Control plane
    pub use crate::remote::{
        ArtifactStore, Backend, RegionSession, RemoteError, RemoteResult, StackClient,
    };

    // Engine
    pub use crate::retry::Cadence;
    pub use crate::run::{DiffDocument, Orchestrator, RunError, RunOptions, RunReport};
    pub use crate::stack::{ChangeSetResult, StackOutcome};
}
