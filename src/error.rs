use crate::member::MemberId;
use std::io;
use thiserror::Error;

/// Errors raised by the election state machine and its collaborators.
///
/// Only [`ElectionError::Termination`] escapes `Election::do_work`; every
/// other error is reported to the host through the agent and the machine
/// restarts from `INIT`.
#[derive(Debug, Error)]
pub enum ElectionError {
    /// The cluster node is shutting down.
    #[error("cluster termination requested")]
    Termination,

    /// Configuration rejected at construction time.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A channel URI could not be parsed or derived.
    #[error("invalid channel: {0}")]
    Channel(String),

    /// The host agent failed an operation the election requested.
    #[error("agent: {0}")]
    Agent(String),

    /// The election found its own bookkeeping inconsistent, such as a
    /// follower phase with no leader recorded. Recovered by restarting
    /// from `INIT`.
    #[error("inconsistent election state: {0}")]
    State(String),

    /// A leadership term was looked up in the recording log but is not
    /// recorded there.
    #[error("unknown leadership term {0}")]
    UnknownTerm(i64),

    /// Mark file or recording log I/O failure.
    #[error("storage: {0}")]
    Storage(#[from] io::Error),

    /// A `newLeadershipTerm` for a divergent log was dropped because the
    /// sender did not qualify as a leader for this node. Reported through
    /// the agent for observability, never fatal.
    #[error("dropped newLeadershipTerm for term {leadership_term_id} from member {leader_id}")]
    DroppedLeadershipTerm {
        leadership_term_id: i64,
        leader_id: MemberId,
    },
}

impl ElectionError {
    /// True for the fatal termination signal that must propagate to the
    /// host loop unchanged.
    pub fn is_termination(&self) -> bool {
        matches!(self, ElectionError::Termination)
    }
}
