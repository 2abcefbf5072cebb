use crate::error::ElectionError;
use crate::member::MemberId;
use std::sync::{Arc, Mutex};

/// Non-blocking replay of a span of the local log, polled once per tick
/// while present.
pub trait LogReplay {
    /// Advance the replay. Returns the amount of work done this tick.
    fn do_work(&mut self, now_ns: u64) -> usize;

    /// True once everything up to the end position has been delivered.
    fn is_done(&self) -> bool;
}

/// Follower-side subscription to the leader's log stream, created in
/// multi-destination manual control mode so the election can attach the
/// archive replay and live destinations independently.
pub trait LogSubscription {
    fn add_destination(&mut self, channel: &str) -> Result<(), ElectionError>;

    fn remove_destination(&mut self, channel: &str) -> Result<(), ElectionError>;
}

/// Subscriptions are created and ultimately owned by the agent; the
/// election only holds a reference, which it drops before `CLOSED` so the
/// live log keeps flowing through the agent's copy.
pub type SharedLogSubscription = Arc<Mutex<dyn LogSubscription>>;

/// Capabilities the election borrows from the consensus agent that hosts
/// it. The agent drives `Election::do_work` from its run loop and the
/// election calls back through this handle, which keeps the two from
/// owning each other.
pub trait ConsensusAgent {
    /// Stop appending under the old leadership and report the position the
    /// local log ends at. Called on every entry to `INIT`.
    fn prepare_for_new_leadership(
        &mut self,
        log_position: i64,
        now_ns: u64,
    ) -> Result<i64, ElectionError>;

    /// Truncate the local log back to `log_truncate_position` because its
    /// tail diverges from the new leader's history. Returns the refreshed
    /// append position.
    fn truncate_log(
        &mut self,
        log_leadership_term_id: i64,
        log_truncate_position: i64,
    ) -> Result<i64, ElectionError>;

    /// Allocate the log publication for the term this member is about to
    /// lead. Returns the assigned session id.
    fn add_log_publication(&mut self) -> Result<i32, ElectionError>;

    /// Build a replay of the local log over `[from_position, to_position)`.
    fn create_log_replay(
        &mut self,
        from_position: i64,
        to_position: i64,
    ) -> Result<Box<dyn LogReplay>, ElectionError>;

    /// Create the follower log subscription on the given channel. The
    /// agent retains its own reference.
    fn create_log_subscription(
        &mut self,
        channel: &str,
    ) -> Result<SharedLogSubscription, ElectionError>;

    /// Subscription tags to stamp on the follower log channel, or empty
    /// when the transport does not use tags.
    fn log_subscription_tags(&self) -> String;

    /// Recording id of the local log in the archive.
    fn log_recording_id(&self) -> i64;

    /// Take the leader role for the given term.
    fn become_leader(
        &mut self,
        leadership_term_id: i64,
        log_position: i64,
        log_session_id: i32,
        is_startup: bool,
    ) -> Result<(), ElectionError>;

    /// Take the follower role for the given term. Returns `false` while
    /// the clustered services are still joining the log; the election
    /// calls again on later ticks until it returns `true`.
    fn become_follower(
        &mut self,
        leadership_term_id: i64,
        leader_id: MemberId,
        log_session_id: i32,
    ) -> Result<bool, ElectionError>;

    /// A catch-up request was successfully sent to the leader.
    fn catchup_initiated(&mut self, now_ns: u64);

    /// Poll catch-up progress on the follower log subscription up to
    /// `limit_position`. Returns the amount of work done.
    fn catchup_poll(
        &mut self,
        subscription: &SharedLogSubscription,
        log_session_id: i32,
        limit_position: i64,
        now_ns: u64,
    ) -> Result<usize, ElectionError>;

    /// True once the catch-up replay has drawn close enough to the live
    /// stream for the live destination to be attached.
    fn is_catchup_near_live(&self) -> bool;

    /// A follower asked the leader to replay the archive to it from the
    /// given position. The replay toward the follower's transfer endpoint
    /// is the agent's resource.
    fn on_catchup_request(
        &mut self,
        follower_id: MemberId,
        leadership_term_id: i64,
        from_position: i64,
    );

    /// Leader-side bookkeeping for a follower's append progress, used to
    /// stop completed catch-up replays.
    fn on_follower_append_position(&mut self, follower_id: MemberId, log_position: i64);

    /// Current value of the commit-position counter.
    fn commit_position(&self) -> i64;

    /// True once the agent has finished its side of the election for the
    /// current role, such as service acknowledgements.
    fn election_complete(&mut self, now_ns: u64) -> bool;

    /// Publish the final member details for the elected configuration.
    fn update_member_details(&mut self, leader_id: MemberId);

    /// Report a recoverable fault to the host error handler.
    fn on_error(&mut self, error: &ElectionError);
}
