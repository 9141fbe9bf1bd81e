//! # Kiln
//!
//! Kiln turns versioned source assets (meshes, animation graphs, materials)
//! into runtime-ready compiled resources, on demand, for a fleet of
//! heterogeneous clients: an interactive editor, a file watcher reacting to
//! on-disk edits, and a batch packaging step.
//!
//! The flow begins by building a `Config` and handing it to a
//! `ResourceServer`. The server owns the request queue, the worker pool and
//! all request state; clients submit resources and get back read-only
//! `RequestHandle`s they can poll for status and logs.

pub(crate) mod checker;
pub(crate) mod compiler;
pub(crate) mod config;
pub(crate) mod deps;
pub mod events;
pub(crate) mod model;
pub(crate) mod server;
pub(crate) mod sync;
pub(crate) mod worker;

pub use checker::{StaleReason, UpToDateVerdict};
pub use compiler::CompilerVerdict;
pub use config::*;
pub use deps::{DependencyMap, DependencyMapError};
pub use model::{CompilationRequest, CompilationStatus, Origin, RequestId, ResourceId};
pub use server::{
    ChangeKind, FileChange, ListenerKey, Notification, NullRuntimeHooks, RequestHandle,
    ResourceServer, ResourceServerError, RuntimeHooks,
};

#[macro_use]
extern crate derive_builder;

#[cfg(test)]
#[macro_use]
extern crate assert_matches;

#[cfg(test)]
extern crate quickcheck;
#[cfg(test)]
#[macro_use(quickcheck)]
extern crate quickcheck_macros;
