//! Cluster membership on top of the consensus engine: idempotent join and one-time bootstrap.
mod coordinator;

pub use coordinator::MembershipCoordinator;
