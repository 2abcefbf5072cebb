//! Leader election and catch-up for replicated-log clusters.
//!
//! The crate centers on [`election::Election`], a single-threaded state
//! machine that takes a member of a fixed cluster from startup or leader
//! failure through canvass, nomination, ballots, log replay and catch-up,
//! until the cluster has converged on one leader and every follower is in
//! lock-step with it. The host drives the machine by calling
//! `do_work(agent, now_ns)` from its work loop; messages from other members
//! arrive through the [`cluster::Cluster`] transport seam and all side
//! effects on the host flow through the [`agent::ConsensusAgent`]
//! capability trait.

pub mod agent;
pub mod catchup;
pub mod channel_uri;
pub mod cluster;
pub mod config;
pub mod counter;
pub mod election;
pub mod error;
pub mod mark_file;
pub mod member;
pub mod message;
pub mod recording;

/// Sentinel for an unknown term or other identifier.
pub const NULL_VALUE: i64 = -1;

/// Sentinel for an unknown or unset log position.
pub const NULL_POSITION: i64 = -1;

/// Sentinel for a log publication session that has not been assigned.
pub const NULL_SESSION_ID: i32 = -1;
