//! Materialization engine for berth
//!
//! The [`Orchestrator`] turns catalog templates into live, owned resources in
//! tenant namespaces. It reaches the cluster only through [`ClusterClient`]
//! and records grants in an [`OwnershipLedger`].

#![deny(missing_docs)]

pub mod catalog_crd;
pub mod cluster;
pub mod ledger;
pub mod orchestrator;
pub mod prefix;
pub mod provision;
pub mod reservation;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use catalog_crd::ClusterCatalog;
pub use cluster::{ClusterClient, KubeClusterClient};
pub use ledger::{FileLedger, MemoryLedger, OwnershipLedger, OwnershipRecord};
pub use orchestrator::{
    ExecResult, ExecTarget, Materialized, Orchestrator, ResourceKind, ResourceSummary,
};
pub use provision::{Provisioner, Tenant, TenantState};
pub use reservation::Reservations;
