use crate::member::MemberId;

// Message describes the election messages members exchange over the
// cluster control stream to converge on a single leader and bring lagging
// followers into lock-step with it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    // CanvassPosition is broadcast while a member canvasses the cluster for
    // its peers' terms and log positions to decide whether it is a viable
    // candidate.
    CanvassPosition {
        leadership_term_id: i64,
        log_position: i64,
        follower_id: MemberId,
    },
    // RequestVote is sent by a candidate to solicit a vote for the given
    // candidate term. The term and position describe the candidate's local
    // log so voters can refuse candidates with stale logs.
    RequestVote {
        log_leadership_term_id: i64,
        log_position: i64,
        candidate_term_id: i64,
        candidate_id: MemberId,
    },
    // Vote answers a RequestVote. The term and position describe the
    // voter's local log so the candidate learns follower positions as a
    // side effect of the ballot.
    Vote {
        candidate_term_id: i64,
        log_leadership_term_id: i64,
        log_position: i64,
        candidate_id: MemberId,
        follower_id: MemberId,
        vote_granted: bool,
    },
    // NewLeadershipTerm announces an elected leader. Followers whose log
    // extends past log_truncate_position with the same history must
    // truncate back to it before replaying.
    NewLeadershipTerm {
        log_leadership_term_id: i64,
        log_truncate_position: i64,
        leadership_term_id: i64,
        log_position: i64,
        timestamp_ns: i64,
        leader_id: MemberId,
        log_session_id: i32,
        is_startup: bool,
    },
    // AppendPosition reports a follower's local append progress to the
    // leader.
    AppendPosition {
        leadership_term_id: i64,
        log_position: i64,
        follower_id: MemberId,
    },
    // CatchupPosition asks the leader to replay its archive to the
    // follower starting from log_position.
    CatchupPosition {
        leadership_term_id: i64,
        log_position: i64,
        follower_id: MemberId,
    },
    // CommitPosition carries the leader's committed position so a catching
    // up follower can extend its target.
    CommitPosition {
        leadership_term_id: i64,
        log_position: i64,
        leader_id: MemberId,
    },
}
