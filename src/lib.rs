//! Ephemeral GPU verification workloads for Kubernetes clusters.
//!
//! The crate is made of two cooperating halves:
//!
//! - [`wait`] turns one-shot cluster queries ([`wait::Condition`]s) into
//!   bounded, fixed-interval readiness checks.
//! - [`workloads`] describes runnable verification units (gpu-burn,
//!   vectorAdd) and drives them through submit, wait and log validation with
//!   [`workloads::WorkloadBuilder`].
//!
//! Everything the core needs from the outside world goes through the
//! [`cluster::Cluster`] and [`cluster::PodLogs`] traits.

#[macro_use]
extern crate tracing;

pub mod cluster;
pub mod config;
pub mod dra;
pub mod driver;
pub mod params;
pub mod trace;
pub mod wait;
pub mod workloads;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_util;

pub use cluster::{Cluster, KubeCluster, PodLogs, QueryError};
pub use wait::{Condition, Observation, PollError, poll_until};
pub use workloads::{Workload, WorkloadBuilder, WorkloadError};
