//! stretch: provision cluster hosts.
//!
//! Creates a server on a cloud provider from a fleet-ready image, installs
//! the cluster-membership key, points fleet at etcd and restarts it.

pub mod backend;
pub mod bootstrap;
pub mod cli;
pub mod core;
pub mod transport;
