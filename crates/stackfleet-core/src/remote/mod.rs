//! Contracts for the remote stack-orchestration control plane.
//!
//! The engine only talks to the control plane through the traits in
//! [`client`]. Concrete adapters live outside this crate; [`fake`] provides
//! an in-memory implementation that records every call.

pub mod client;
pub mod error;
pub mod fake;

pub use client::{
    ArtifactStore, Backend, Capability, ChangeSetDescription, ChangeSetKind, ChangeSetRequest,
    Parameter, RegionSession, ResourceChange, StackClient, StackRequest, StackState,
    TemplateSource,
};
pub use error::{RemoteError, RemoteResult};
