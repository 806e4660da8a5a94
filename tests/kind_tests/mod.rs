//! Live-cluster stories for berth
//!
//! - `crd_operations`: installing the ServiceTemplate CRD and reading
//!   templates back through the cluster catalog
//! - `service_lifecycle`: a tenant creating, listing and deleting a service,
//!   then being removed

mod crd_operations;
mod helpers;
mod service_lifecycle;
