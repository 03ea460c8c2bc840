//! The agentregistry control plane: catalog reconcilers, the multi-cluster
//! discovery plane, the deployment translator with its managed-lifecycle
//! engine, and the master-agent lifecycle.
//!
//! Reconciliation logic is written against the [`store::ObjectStore`] seam
//! so the cores run identically against the cluster and against the
//! in-memory store the tests use; the binary in `main.rs` wires the cores
//! into `kube::runtime` controllers.

pub mod cache;
pub mod catalog;
pub mod deploy;
pub mod discovery;
pub mod error;
pub mod index;
pub mod masteragent;
pub mod retry;
pub mod shadow;
pub mod store;

pub use error::{Error, Result};
