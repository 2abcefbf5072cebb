use crate::agent::{ConsensusAgent, LogReplay};
use crate::catchup::FollowerLog;
use crate::cluster::Cluster;
use crate::config::ElectionConfig;
use crate::counter::{ElectionCounter, ElectionState};
use crate::error::ElectionError;
use crate::mark_file::ClusterMarkFile;
use crate::member::{compare_log, Ballot, MemberId, MemberTable};
use crate::message::Message;
use crate::recording::RecordingLog;
use crate::{NULL_POSITION, NULL_SESSION_ID};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cmp;
use std::cmp::Ordering;
use tracing::{debug, info, warn};

/// Upper bound on inbound messages drained per tick, so one noisy peer
/// cannot starve the state handlers.
const POLL_LIMIT: usize = 10;

// Per-state data. Timers that belong to exactly one state live in its
// variant; shared context stays on the Election itself.
enum State {
    Init,
    Canvass,
    Nominate { nomination_deadline_ns: u64 },
    CandidateBallot { ballot_deadline_ns: u64 },
    FollowerBallot { ballot_deadline_ns: u64 },
    LeaderReplay { replay: Option<Box<dyn LogReplay>> },
    LeaderTransition,
    LeaderReady,
    FollowerReplay { replay: Option<Box<dyn LogReplay>> },
    FollowerCatchupTransition,
    FollowerCatchup,
    FollowerTransition,
    FollowerReady,
    Closed,
}

impl State {
    fn label(&self) -> ElectionState {
        match self {
            State::Init => ElectionState::Init,
            State::Canvass => ElectionState::Canvass,
            State::Nominate { .. } => ElectionState::Nominate,
            State::CandidateBallot { .. } => ElectionState::CandidateBallot,
            State::FollowerBallot { .. } => ElectionState::FollowerBallot,
            State::LeaderReplay { .. } => ElectionState::LeaderReplay,
            State::LeaderTransition => ElectionState::LeaderTransition,
            State::LeaderReady => ElectionState::LeaderReady,
            State::FollowerReplay { .. } => ElectionState::FollowerReplay,
            State::FollowerCatchupTransition => ElectionState::FollowerCatchupTransition,
            State::FollowerCatchup => ElectionState::FollowerCatchup,
            State::FollowerTransition => ElectionState::FollowerTransition,
            State::FollowerReady => ElectionState::FollowerReady,
            State::Closed => ElectionState::Closed,
        }
    }
}

/// Election drives one member of a fixed cluster from startup or leader
/// failure to an agreed leadership term, then brings it into lock-step
/// with that leader before closing.
///
/// The host agent owns the run loop and calls `do_work` with a monotonic
/// nanosecond clock; the election polls the [`Cluster`] transport for
/// inbound messages, dispatches on its current state, and calls back into
/// the agent for every side effect on the wider node. It terminates in
/// `CLOSED`, after which the host discards it and resumes normal
/// replication.
pub struct Election<C>
where
    C: Cluster,
{
    config: ElectionConfig,
    election_timeout_ns: u64,
    startup_canvass_timeout_ns: u64,
    status_interval_ns: u64,
    heartbeat_interval_ns: u64,
    heartbeat_timeout_ns: u64,

    cluster: C,
    members: MemberTable,
    recording_log: Box<dyn RecordingLog>,
    mark_file: Box<dyn ClusterMarkFile>,
    counter: ElectionCounter,
    rng: StdRng,

    state: State,

    /// The term this member currently believes is active.
    leadership_term_id: i64,

    /// Term of the last entry in the local log.
    log_leadership_term_id: i64,

    /// The term this member has voted in, for itself or another. Persisted
    /// to the mark file before any vote in the term is emitted.
    candidate_term_id: i64,

    /// Committed prefix confirmed locally.
    log_position: i64,

    /// End of the local log; never behind `log_position`.
    append_position: i64,

    /// Position to reach before becoming a steady-state follower, or
    /// `NULL_POSITION` when no catch-up is required.
    catchup_position: i64,

    leader_id: Option<MemberId>,
    log_session_id: i32,

    is_node_startup: bool,
    is_leader_startup: bool,
    is_extended_canvass: bool,

    follower_log: FollowerLog,

    time_of_last_state_change_ns: u64,
    time_of_last_update_ns: u64,
}

impl<C> Election<C>
where
    C: Cluster,
{
    /// Create an election from the persisted position of the local log.
    ///
    /// `is_node_startup` widens the first canvass window so a cluster
    /// coming up together does not splinter into single-member ballots.
    pub fn new(
        config: ElectionConfig,
        cluster: C,
        recording_log: Box<dyn RecordingLog>,
        mark_file: Box<dyn ClusterMarkFile>,
        is_node_startup: bool,
        leadership_term_id: i64,
        log_position: i64,
        append_position: i64,
    ) -> Result<Election<C>, ElectionError> {
        config.validate()?;
        if append_position < log_position {
            return Err(ElectionError::Config(format!(
                "append position {} behind log position {}",
                append_position, log_position
            )));
        }

        let members = MemberTable::new(&config.members, config.this_member_id);
        let rng = match config.random_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let election_timeout_ns = config.election_timeout.as_nanos() as u64;
        let startup_canvass_timeout_ns = config.startup_canvass_timeout.as_nanos() as u64;
        let status_interval_ns = config.election_status_interval.as_nanos() as u64;
        let heartbeat_interval_ns = config.leader_heartbeat_interval.as_nanos() as u64;
        let heartbeat_timeout_ns = config.leader_heartbeat_timeout.as_nanos() as u64;

        Ok(Election {
            config,
            election_timeout_ns,
            startup_canvass_timeout_ns,
            status_interval_ns,
            heartbeat_interval_ns,
            heartbeat_timeout_ns,
            cluster,
            members,
            recording_log,
            mark_file,
            counter: ElectionCounter::new(),
            rng,
            state: State::Init,
            leadership_term_id,
            log_leadership_term_id: leadership_term_id,
            candidate_term_id: leadership_term_id,
            log_position,
            append_position,
            catchup_position: NULL_POSITION,
            leader_id: None,
            log_session_id: NULL_SESSION_ID,
            is_node_startup,
            is_leader_startup: false,
            is_extended_canvass: is_node_startup,
            follower_log: FollowerLog::new(),
            time_of_last_state_change_ns: 0,
            time_of_last_update_ns: 0,
        })
    }

    /// Handle to the process-visible state counter.
    pub fn counter(&self) -> ElectionCounter {
        self.counter.clone()
    }

    pub fn state(&self) -> ElectionState {
        self.state.label()
    }

    pub fn leadership_term_id(&self) -> i64 {
        self.leadership_term_id
    }

    pub fn candidate_term_id(&self) -> i64 {
        self.candidate_term_id
    }

    pub fn log_position(&self) -> i64 {
        self.log_position
    }

    pub fn append_position(&self) -> i64 {
        self.append_position
    }

    pub fn catchup_position(&self) -> i64 {
        self.catchup_position
    }

    pub fn leader_id(&self) -> Option<MemberId> {
        self.leader_id
    }

    pub fn log_session_id(&self) -> i32 {
        self.log_session_id
    }

    pub fn is_leader_startup(&self) -> bool {
        self.is_leader_startup
    }

    /// Advance the election by one tick: drain inbound messages, then run
    /// the handler for the current state.
    ///
    /// Any error other than [`ElectionError::Termination`] is reported to
    /// the agent's error handler and the election restarts from `INIT`
    /// with `log_position` refreshed from the commit-position counter.
    pub fn do_work(
        &mut self,
        agent: &mut dyn ConsensusAgent,
        now_ns: u64,
    ) -> Result<usize, ElectionError> {
        match self.work(agent, now_ns) {
            Ok(work_count) => Ok(work_count),
            Err(error) if error.is_termination() => Err(error),
            Err(error) => {
                warn!(error = %error, "election fault, restarting from INIT");
                agent.on_error(&error);
                self.log_position = agent.commit_position();
                if self.append_position < self.log_position {
                    self.append_position = self.log_position;
                }
                self.catchup_position = NULL_POSITION;
                self.follower_log.reset();
                self.transition(State::Init, now_ns);
                Ok(1)
            }
        }
    }

    fn work(
        &mut self,
        agent: &mut dyn ConsensusAgent,
        now_ns: u64,
    ) -> Result<usize, ElectionError> {
        if let State::Closed = self.state {
            return Ok(0);
        }

        let mut work_count = 0;

        let batch = self.cluster.poll(POLL_LIMIT);
        for message in batch {
            work_count += 1;
            self.on_message(agent, message, now_ns)?;
        }

        work_count += match self.state.label() {
            ElectionState::Init => self.init(agent, now_ns)?,
            ElectionState::Canvass => self.canvass(now_ns),
            ElectionState::Nominate => self.nominate(now_ns)?,
            ElectionState::CandidateBallot => self.candidate_ballot(agent, now_ns)?,
            ElectionState::FollowerBallot => self.follower_ballot(now_ns),
            ElectionState::LeaderReplay => self.leader_replay(now_ns),
            ElectionState::LeaderTransition => self.leader_transition(agent, now_ns)?,
            ElectionState::LeaderReady => self.leader_ready(agent, now_ns),
            ElectionState::FollowerReplay => self.follower_replay(now_ns),
            ElectionState::FollowerCatchupTransition => {
                self.follower_catchup_transition(agent, now_ns)?
            }
            ElectionState::FollowerCatchup => self.follower_catchup(agent, now_ns)?,
            ElectionState::FollowerTransition => self.follower_transition(agent, now_ns)?,
            ElectionState::FollowerReady => self.follower_ready(agent, now_ns),
            ElectionState::Closed => 0,
        };

        Ok(work_count)
    }

    fn init(
        &mut self,
        agent: &mut dyn ConsensusAgent,
        now_ns: u64,
    ) -> Result<usize, ElectionError> {
        self.catchup_position = NULL_POSITION;
        self.leader_id = None;
        self.follower_log.reset();
        self.members.reset_canvass();

        self.append_position = agent.prepare_for_new_leadership(self.log_position, now_ns)?;
        self.candidate_term_id =
            cmp::max(self.mark_file.candidate_term_id(), self.leadership_term_id);

        if self.members.len() == 1 {
            // A single-member cluster is its own quorum.
            self.candidate_term_id =
                cmp::max(self.leadership_term_id + 1, self.candidate_term_id + 1);
            self.leadership_term_id = self.candidate_term_id;
            self.leader_id = Some(self.members.this().id);
            self.mark_file.update_candidate_term_id(self.candidate_term_id)?;
            self.mark_file.force(self.config.fsync_level)?;
            self.enter_leader_replay(agent, now_ns)?;
        } else {
            self.transition(State::Canvass, now_ns);
        }

        Ok(1)
    }

    fn canvass(&mut self, now_ns: u64) -> usize {
        let mut work_count = 0;

        if self.interval_expired(now_ns, self.status_interval_ns) {
            let message = Message::CanvassPosition {
                leadership_term_id: self.leadership_term_id,
                log_position: self.append_position,
                follower_id: self.members.this().id,
            };
            self.broadcast(message);
            self.time_of_last_update_ns = now_ns;
            work_count += 1;
        }

        if self.members.this().is_passive {
            return work_count;
        }
        if let Some(appointed) = self.config.appointed_leader_id {
            if appointed != self.members.this().id {
                return work_count;
            }
        }

        let canvass_deadline_ns = self.time_of_last_state_change_ns
            + if self.is_extended_canvass {
                self.startup_canvass_timeout_ns
            } else {
                self.election_timeout_ns
            };

        if self
            .members
            .is_unanimous_candidate(self.leadership_term_id, self.append_position)
            || (self
                .members
                .is_quorum_candidate(self.leadership_term_id, self.append_position)
                && now_ns >= canvass_deadline_ns)
        {
            let jitter_ns = self
                .rng
                .gen_range(0..cmp::max(1, self.election_timeout_ns / 2));
            self.transition(
                State::Nominate {
                    nomination_deadline_ns: now_ns + jitter_ns,
                },
                now_ns,
            );
            work_count += 1;
        }

        work_count
    }

    fn nominate(&mut self, now_ns: u64) -> Result<usize, ElectionError> {
        let deadline_ns = match &self.state {
            State::Nominate {
                nomination_deadline_ns,
            } => *nomination_deadline_ns,
            _ => unreachable!(),
        };

        if now_ns < deadline_ns {
            return Ok(0);
        }

        self.candidate_term_id =
            cmp::max(self.leadership_term_id + 1, self.candidate_term_id + 1);
        let candidate_id = self.members.this().id;
        self.members
            .become_candidate(self.candidate_term_id, candidate_id);
        self.mark_file.update_candidate_term_id(self.candidate_term_id)?;
        self.mark_file.force(self.config.fsync_level)?;

        info!(
            candidate_term_id = self.candidate_term_id,
            "nominating self as candidate"
        );
        self.transition(
            State::CandidateBallot {
                ballot_deadline_ns: now_ns + self.election_timeout_ns,
            },
            now_ns,
        );
        Ok(1)
    }

    fn candidate_ballot(
        &mut self,
        agent: &mut dyn ConsensusAgent,
        now_ns: u64,
    ) -> Result<usize, ElectionError> {
        let deadline_ns = match &self.state {
            State::CandidateBallot { ballot_deadline_ns } => *ballot_deadline_ns,
            _ => unreachable!(),
        };

        if self.members.has_won_vote_on_full_count(self.candidate_term_id)
            || self
                .members
                .has_majority_vote_with_canvass_members(self.candidate_term_id)
        {
            return self.become_leader_elect(agent, now_ns);
        }

        if now_ns >= deadline_ns {
            if self.members.has_majority_vote(self.candidate_term_id) {
                return self.become_leader_elect(agent, now_ns);
            }
            info!(
                candidate_term_id = self.candidate_term_id,
                "ballot timed out without a majority"
            );
            self.transition(State::Canvass, now_ns);
            return Ok(1);
        }

        // Keep trying peers the request-vote has not reached yet.
        let mut work_count = 0;
        let log_leadership_term_id = self.log_leadership_term_id;
        let log_position = self.append_position;
        let candidate_term_id = self.candidate_term_id;
        let Self {
            members, cluster, ..
        } = self;
        let candidate_id = members.this().id;
        for member in members.iter_mut() {
            if member.id == candidate_id || member.is_passive || member.is_ballot_sent {
                continue;
            }
            member.is_ballot_sent = cluster.try_send(
                member.id,
                Message::RequestVote {
                    log_leadership_term_id,
                    log_position,
                    candidate_term_id,
                    candidate_id,
                },
            );
            if member.is_ballot_sent {
                work_count += 1;
            }
        }

        Ok(work_count)
    }

    fn become_leader_elect(
        &mut self,
        agent: &mut dyn ConsensusAgent,
        now_ns: u64,
    ) -> Result<usize, ElectionError> {
        info!(
            leadership_term_id = self.candidate_term_id,
            "won leadership ballot"
        );
        self.leader_id = Some(self.members.this().id);
        self.leadership_term_id = self.candidate_term_id;
        self.enter_leader_replay(agent, now_ns)?;
        Ok(1)
    }

    fn follower_ballot(&mut self, now_ns: u64) -> usize {
        let deadline_ns = match &self.state {
            State::FollowerBallot { ballot_deadline_ns } => *ballot_deadline_ns,
            _ => unreachable!(),
        };

        if now_ns >= deadline_ns {
            // The candidate we voted for never announced a term.
            self.transition(State::Canvass, now_ns);
            return 1;
        }
        0
    }

    fn enter_leader_replay(
        &mut self,
        agent: &mut dyn ConsensusAgent,
        now_ns: u64,
    ) -> Result<(), ElectionError> {
        self.log_session_id = agent.add_log_publication()?;
        self.members.reset_log_positions(NULL_POSITION);
        let replay = if self.log_position < self.append_position {
            Some(agent.create_log_replay(self.log_position, self.append_position)?)
        } else {
            None
        };
        self.transition(State::LeaderReplay { replay }, now_ns);
        Ok(())
    }

    fn leader_replay(&mut self, now_ns: u64) -> usize {
        let mut work_count = 0;
        let mut replay_done = true;
        if let State::LeaderReplay { replay } = &mut self.state {
            if let Some(replay) = replay {
                work_count += replay.do_work(now_ns);
                replay_done = replay.is_done();
            }
        }

        if replay_done {
            self.log_position = self.append_position;
            self.transition(State::LeaderTransition, now_ns);
            return work_count + 1;
        }

        if self.interval_expired(now_ns, self.heartbeat_interval_ns) {
            self.publish_new_leadership_term(now_ns);
            self.time_of_last_update_ns = now_ns;
            work_count += 1;
        }

        work_count
    }

    fn leader_transition(
        &mut self,
        agent: &mut dyn ConsensusAgent,
        now_ns: u64,
    ) -> Result<usize, ElectionError> {
        self.is_leader_startup = self.is_node_startup;
        agent.become_leader(
            self.leadership_term_id,
            self.log_position,
            self.log_session_id,
            self.is_leader_startup,
        )?;

        let recording_id = agent.log_recording_id();
        for term_id in self.log_leadership_term_id + 1..=self.leadership_term_id {
            if self.recording_log.is_unknown(term_id) {
                self.recording_log
                    .append_term(recording_id, term_id, self.log_position, now_ns as i64);
            }
        }
        self.recording_log.force(self.config.fsync_level)?;
        // The log now carries the new term.
        self.log_leadership_term_id = self.leadership_term_id;

        // The leader counts toward its own quorum of reached voters.
        {
            let this = self.members.this_mut();
            this.leadership_term_id = self.leadership_term_id;
            this.log_position = self.log_position;
        }

        self.transition(State::LeaderReady, now_ns);
        Ok(1)
    }

    fn leader_ready(&mut self, agent: &mut dyn ConsensusAgent, now_ns: u64) -> usize {
        let mut work_count = 0;

        if self.interval_expired(now_ns, self.heartbeat_interval_ns) {
            self.publish_new_leadership_term(now_ns);
            self.time_of_last_update_ns = now_ns;
            work_count += 1;
        }

        if self
            .members
            .have_voters_reached_position(self.log_position, self.leadership_term_id)
            && agent.election_complete(now_ns)
        {
            let this_id = self.members.this().id;
            agent.update_member_details(this_id);
            info!(
                leadership_term_id = self.leadership_term_id,
                "election complete, this member leads"
            );
            self.transition(State::Closed, now_ns);
            work_count += 1;
        }

        work_count
    }

    fn enter_follower_replay(
        &mut self,
        agent: &mut dyn ConsensusAgent,
        now_ns: u64,
    ) -> Result<(), ElectionError> {
        let replay = if self.log_position < self.append_position {
            Some(agent.create_log_replay(self.log_position, self.append_position)?)
        } else {
            None
        };
        self.transition(State::FollowerReplay { replay }, now_ns);
        Ok(())
    }

    fn follower_replay(&mut self, now_ns: u64) -> usize {
        let mut work_count = 0;
        let mut replay_done = true;
        if let State::FollowerReplay { replay } = &mut self.state {
            if let Some(replay) = replay {
                work_count += replay.do_work(now_ns);
                replay_done = replay.is_done();
            }
        }

        if replay_done {
            self.log_position = self.append_position;
            if self.catchup_position != NULL_POSITION {
                self.transition(State::FollowerCatchupTransition, now_ns);
            } else {
                self.transition(State::FollowerTransition, now_ns);
            }
            work_count += 1;
        }

        work_count
    }

    fn follower_catchup_transition(
        &mut self,
        agent: &mut dyn ConsensusAgent,
        now_ns: u64,
    ) -> Result<usize, ElectionError> {
        if !self.follower_log.is_connected() {
            let this = self.members.this().clone();
            self.follower_log.connect_for_replay(
                agent,
                &self.config.log_channel,
                self.log_session_id,
                &this,
            )?;
        }

        let leader_id = self.require_leader()?;
        let sent = self.cluster.try_send(
            leader_id,
            Message::CatchupPosition {
                leadership_term_id: self.leadership_term_id,
                log_position: self.log_position,
                follower_id: self.members.this().id,
            },
        );
        if sent {
            agent.catchup_initiated(now_ns);
            self.transition(State::FollowerCatchup, now_ns);
            return Ok(1);
        }

        Ok(0)
    }

    fn follower_catchup(
        &mut self,
        agent: &mut dyn ConsensusAgent,
        now_ns: u64,
    ) -> Result<usize, ElectionError> {
        let subscription = self
            .follower_log
            .subscription()
            .cloned()
            .ok_or_else(|| ElectionError::State("catch-up without a log subscription".to_string()))?;

        let mut work_count =
            agent.catchup_poll(&subscription, self.log_session_id, self.catchup_position, now_ns)?;

        if agent.is_catchup_near_live() && !self.follower_log.has_live_destination() {
            let this = self.members.this().clone();
            self.follower_log
                .add_live_destination(&self.config.log_channel, &this)?;
            info!("catch-up near live stream, live log destination added");
            work_count += 1;
        }

        if agent.commit_position() >= self.catchup_position {
            self.log_position = self.catchup_position;
            self.append_position = self.catchup_position;
            self.transition(State::FollowerTransition, now_ns);
            return Ok(work_count + 1);
        }

        if now_ns >= self.last_activity_ns() + self.heartbeat_interval_ns
            && self.follower_log.is_replay_active()
        {
            let leader_id = self.require_leader()?;
            let sent = self.cluster.try_send(
                leader_id,
                Message::CatchupPosition {
                    leadership_term_id: self.leadership_term_id,
                    log_position: self.log_position,
                    follower_id: self.members.this().id,
                },
            );
            if sent {
                self.time_of_last_update_ns = now_ns;
                work_count += 1;
            }
        }

        Ok(work_count)
    }

    fn follower_transition(
        &mut self,
        agent: &mut dyn ConsensusAgent,
        now_ns: u64,
    ) -> Result<usize, ElectionError> {
        let this = self.members.this().clone();
        if !self.follower_log.is_connected() {
            self.follower_log.connect_live(
                agent,
                &self.config.log_channel,
                self.log_session_id,
                &this,
            )?;
        } else {
            self.follower_log
                .add_live_destination(&self.config.log_channel, &this)?;
            self.follower_log.stop_replay()?;
        }

        let leader_id = self.require_leader()?;
        if !agent.become_follower(self.leadership_term_id, leader_id, self.log_session_id)? {
            // Services are still joining the log.
            return Ok(0);
        }

        let recording_id = agent.log_recording_id();
        for term_id in self.log_leadership_term_id + 1..=self.leadership_term_id {
            if self.recording_log.is_unknown(term_id) {
                self.recording_log
                    .append_term(recording_id, term_id, self.log_position, now_ns as i64);
            }
        }
        self.recording_log.force(self.config.fsync_level)?;
        // The log now carries the new term.
        self.log_leadership_term_id = self.leadership_term_id;

        self.transition(State::FollowerReady, now_ns);
        Ok(1)
    }

    fn follower_ready(&mut self, agent: &mut dyn ConsensusAgent, now_ns: u64) -> usize {
        let leader_id = match self.leader_id {
            Some(leader_id) => leader_id,
            None => {
                self.transition(State::Canvass, now_ns);
                return 1;
            }
        };

        let sent = self.cluster.try_send(
            leader_id,
            Message::AppendPosition {
                leadership_term_id: self.leadership_term_id,
                log_position: self.append_position,
                follower_id: self.members.this().id,
            },
        );

        if sent {
            self.time_of_last_update_ns = now_ns;
            if agent.election_complete(now_ns) {
                agent.update_member_details(leader_id);
                info!(
                    leadership_term_id = self.leadership_term_id,
                    leader_id, "election complete, following leader"
                );
                self.transition(State::Closed, now_ns);
            }
            return 1;
        }

        if now_ns >= self.last_activity_ns() + self.heartbeat_timeout_ns {
            warn!(leader_id, "no contact with leader, canvassing");
            if let Err(error) = self.follower_log.remove_live_destination() {
                warn!(error = %error, "failed to remove live log destination");
            }
            self.transition(State::Canvass, now_ns);
            return 1;
        }

        0
    }

    fn on_message(
        &mut self,
        agent: &mut dyn ConsensusAgent,
        message: Message,
        now_ns: u64,
    ) -> Result<(), ElectionError> {
        match message {
            Message::CanvassPosition {
                leadership_term_id,
                log_position,
                follower_id,
            } => self.on_canvass_position(leadership_term_id, log_position, follower_id, now_ns),
            Message::RequestVote {
                log_leadership_term_id,
                log_position,
                candidate_term_id,
                candidate_id,
            } => self.on_request_vote(
                log_leadership_term_id,
                log_position,
                candidate_term_id,
                candidate_id,
                now_ns,
            ),
            Message::Vote {
                candidate_term_id,
                log_leadership_term_id,
                log_position,
                candidate_id,
                follower_id,
                vote_granted,
            } => {
                self.on_vote(
                    candidate_term_id,
                    log_leadership_term_id,
                    log_position,
                    candidate_id,
                    follower_id,
                    vote_granted,
                );
                Ok(())
            }
            Message::NewLeadershipTerm {
                log_leadership_term_id,
                log_truncate_position,
                leadership_term_id,
                log_position,
                timestamp_ns: _,
                leader_id,
                log_session_id,
                is_startup,
            } => self.on_new_leadership_term(
                agent,
                log_leadership_term_id,
                log_truncate_position,
                leadership_term_id,
                log_position,
                leader_id,
                log_session_id,
                is_startup,
                now_ns,
            ),
            Message::AppendPosition {
                leadership_term_id,
                log_position,
                follower_id,
            } => {
                self.on_append_position(agent, leadership_term_id, log_position, follower_id, now_ns);
                Ok(())
            }
            Message::CatchupPosition {
                leadership_term_id,
                log_position,
                follower_id,
            } => {
                if self.is_leader() {
                    agent.on_catchup_request(follower_id, leadership_term_id, log_position);
                }
                Ok(())
            }
            Message::CommitPosition {
                leadership_term_id,
                log_position,
                leader_id,
            } => {
                self.on_commit_position(leadership_term_id, log_position, leader_id, now_ns);
                Ok(())
            }
        }
    }

    fn on_canvass_position(
        &mut self,
        leadership_term_id: i64,
        log_position: i64,
        follower_id: MemberId,
        now_ns: u64,
    ) -> Result<(), ElectionError> {
        if follower_id == self.members.this().id {
            return Ok(());
        }
        match self.members.get_mut(follower_id) {
            Some(member) => {
                member.leadership_term_id = leadership_term_id;
                member.log_position = log_position;
            }
            None => return Ok(()),
        }

        match self.state.label() {
            ElectionState::LeaderReady if leadership_term_id < self.leadership_term_id => {
                let timestamp_ns = self
                    .recording_log
                    .get_term_timestamp(self.leadership_term_id)?;
                self.send_new_leadership_term_to(follower_id, timestamp_ns);
            }
            ElectionState::LeaderReplay | ElectionState::LeaderTransition
                if leadership_term_id < self.leadership_term_id =>
            {
                // Not yet committed to the recording log; answer from the
                // best information available.
                let timestamp_ns = self
                    .recording_log
                    .find_term_entry(self.leadership_term_id)
                    .map(|entry| entry.timestamp_ns)
                    .unwrap_or(now_ns as i64);
                self.send_new_leadership_term_to(follower_id, timestamp_ns);
            }
            state if leadership_term_id > self.leadership_term_id => {
                if state != ElectionState::Canvass {
                    info!(
                        from = follower_id,
                        leadership_term_id, "newer term canvassed, reverting to canvass"
                    );
                    self.transition(State::Canvass, now_ns);
                }
            }
            _ => {}
        }

        Ok(())
    }

    fn on_request_vote(
        &mut self,
        log_leadership_term_id: i64,
        log_position: i64,
        candidate_term_id: i64,
        candidate_id: MemberId,
        now_ns: u64,
    ) -> Result<(), ElectionError> {
        if self.members.this().is_passive || candidate_id == self.members.this().id {
            return Ok(());
        }

        if candidate_term_id <= self.leadership_term_id
            || candidate_term_id <= self.candidate_term_id
        {
            self.place_vote(candidate_term_id, candidate_id, false);
            return Ok(());
        }

        if compare_log(
            self.log_leadership_term_id,
            self.append_position,
            log_leadership_term_id,
            log_position,
        ) == Ordering::Greater
        {
            // Candidate's log is behind ours; adopt the term so we cannot
            // vote twice in it, then contest the election ourselves.
            self.propose_candidate_term(candidate_term_id)?;
            info!(
                candidate_id,
                candidate_term_id, "denying vote, local log is more current"
            );
            if self.state.label() != ElectionState::Canvass {
                self.transition(State::Canvass, now_ns);
            }
            self.place_vote(candidate_term_id, candidate_id, false);
        } else {
            self.propose_candidate_term(candidate_term_id)?;
            self.transition(
                State::FollowerBallot {
                    ballot_deadline_ns: now_ns + self.election_timeout_ns,
                },
                now_ns,
            );
            self.place_vote(candidate_term_id, candidate_id, true);
        }

        Ok(())
    }

    fn on_vote(
        &mut self,
        candidate_term_id: i64,
        log_leadership_term_id: i64,
        log_position: i64,
        candidate_id: MemberId,
        follower_id: MemberId,
        vote_granted: bool,
    ) {
        if self.state.label() != ElectionState::CandidateBallot
            || candidate_term_id != self.candidate_term_id
            || candidate_id != self.members.this().id
        {
            return;
        }

        if let Some(member) = self.members.get_mut(follower_id) {
            member.candidate_term_id = candidate_term_id;
            member.leadership_term_id = log_leadership_term_id;
            member.log_position = log_position;
            member.ballot = if vote_granted {
                Ballot::Granted
            } else {
                Ballot::Denied
            };
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn on_new_leadership_term(
        &mut self,
        agent: &mut dyn ConsensusAgent,
        log_leadership_term_id: i64,
        log_truncate_position: i64,
        leadership_term_id: i64,
        log_position: i64,
        leader_id: MemberId,
        log_session_id: i32,
        is_startup: bool,
        now_ns: u64,
    ) -> Result<(), ElectionError> {
        if leader_id == self.members.this().id || self.members.get(leader_id).is_none() {
            return Ok(());
        }

        // A repeat announcement of the term this member is already
        // executing under the same leader.
        if leadership_term_id == self.leadership_term_id
            && Some(leader_id) == self.leader_id
            && !matches!(
                self.state,
                State::FollowerBallot { .. } | State::CandidateBallot { .. } | State::Canvass
            )
        {
            return Ok(());
        }

        // Same history, higher term, and our uncommitted tail extends past
        // the leader's truncate point: cut the tail, then catch up.
        if leadership_term_id > self.leadership_term_id
            && log_leadership_term_id == self.log_leadership_term_id
            && log_truncate_position < self.append_position
        {
            info!(
                leader_id,
                leadership_term_id, log_truncate_position, "truncating divergent log tail"
            );
            self.append_position =
                agent.truncate_log(self.log_leadership_term_id, log_truncate_position)?;
            if self.log_position > self.append_position {
                self.log_position = self.append_position;
            }
            self.adopt_leader(leader_id, leadership_term_id, log_session_id, is_startup)?;
            self.catchup_position = log_position;
            self.enter_follower_replay(agent, now_ns)?;
            return Ok(());
        }

        // The ballot or canvass we are in resolved to this leader.
        if log_leadership_term_id == self.log_leadership_term_id
            && leadership_term_id == self.candidate_term_id
            && matches!(
                self.state,
                State::FollowerBallot { .. } | State::CandidateBallot { .. } | State::Canvass
            )
        {
            self.adopt_leader(leader_id, leadership_term_id, log_session_id, is_startup)?;
            self.catchup_position = if log_position > self.append_position {
                log_position
            } else {
                NULL_POSITION
            };
            self.enter_follower_replay(agent, now_ns)?;
            return Ok(());
        }

        // Divergent history with no catch-up in progress.
        if log_leadership_term_id != self.log_leadership_term_id
            && self.catchup_position == NULL_POSITION
        {
            if log_position >= self.append_position && leadership_term_id >= self.candidate_term_id
            {
                self.adopt_leader(leader_id, leadership_term_id, log_session_id, is_startup)?;
                self.catchup_position = if log_position > self.append_position {
                    log_position
                } else {
                    NULL_POSITION
                };
                self.enter_follower_replay(agent, now_ns)?;
            } else {
                // Dropping this silently can starve a follower whose log
                // ran ahead; surface it instead.
                let error = ElectionError::DroppedLeadershipTerm {
                    leadership_term_id,
                    leader_id,
                };
                warn!(error = %error, "unusable newLeadershipTerm");
                agent.on_error(&error);
            }
        }

        Ok(())
    }

    fn on_append_position(
        &mut self,
        agent: &mut dyn ConsensusAgent,
        leadership_term_id: i64,
        log_position: i64,
        follower_id: MemberId,
        now_ns: u64,
    ) {
        if leadership_term_id != self.leadership_term_id || !self.is_leader() {
            return;
        }

        if let Some(member) = self.members.get_mut(follower_id) {
            member.leadership_term_id = leadership_term_id;
            member.log_position = log_position;
            member.time_of_last_append_position_ns = now_ns;
            agent.on_follower_append_position(follower_id, log_position);
        }
    }

    fn on_commit_position(
        &mut self,
        leadership_term_id: i64,
        log_position: i64,
        leader_id: MemberId,
        now_ns: u64,
    ) {
        if self.state.label() == ElectionState::FollowerCatchup
            && Some(leader_id) == self.leader_id
            && leadership_term_id == self.leadership_term_id
        {
            if log_position > self.catchup_position {
                self.catchup_position = log_position;
            }
        } else if leadership_term_id > self.leadership_term_id {
            info!(
                leader_id,
                leadership_term_id, "newer committed term observed, restarting election"
            );
            self.transition(State::Init, now_ns);
        }
    }

    /// Term boundaries observed while replaying the leader's log during
    /// catch-up. Ensures every intermediate term is present in the local
    /// recording log before the live stream takes over.
    pub fn on_replay_new_leadership_term_event(
        &mut self,
        recording_id: i64,
        leadership_term_id: i64,
        log_position: i64,
        timestamp_ns: i64,
        term_base_log_position: i64,
    ) -> Result<(), ElectionError> {
        if self.state.label() != ElectionState::FollowerCatchup {
            return Ok(());
        }

        if self.recording_log.is_unknown(leadership_term_id) {
            self.recording_log.append_term(
                recording_id,
                leadership_term_id,
                term_base_log_position,
                timestamp_ns,
            );
        } else {
            self.recording_log
                .commit_log_position(leadership_term_id, term_base_log_position);
        }
        self.recording_log.force(self.config.fsync_level)?;

        self.log_leadership_term_id = leadership_term_id;
        self.log_position = log_position;
        if self.append_position < log_position {
            self.append_position = log_position;
        }

        Ok(())
    }

    fn adopt_leader(
        &mut self,
        leader_id: MemberId,
        leadership_term_id: i64,
        log_session_id: i32,
        is_startup: bool,
    ) -> Result<(), ElectionError> {
        if log_session_id != self.log_session_id {
            // A subscription from an earlier term is pinned to the old
            // session and cannot carry the new one.
            self.follower_log.reset();
        }
        self.leader_id = Some(leader_id);
        self.leadership_term_id = leadership_term_id;
        self.log_session_id = log_session_id;
        self.is_leader_startup = is_startup;
        self.propose_candidate_term(leadership_term_id)?;
        if let Some(member) = self.members.get_mut(leader_id) {
            member.leadership_term_id = leadership_term_id;
        }
        Ok(())
    }

    /// Adopt a higher candidate term and make it durable. The mark file is
    /// forced before any vote in the term can be emitted, so a crash
    /// between the two cannot leak a second vote.
    fn propose_candidate_term(&mut self, candidate_term_id: i64) -> Result<(), ElectionError> {
        if candidate_term_id > self.candidate_term_id {
            self.candidate_term_id = candidate_term_id;
            self.mark_file.update_candidate_term_id(candidate_term_id)?;
            self.mark_file.force(self.config.fsync_level)?;
        }
        Ok(())
    }

    fn place_vote(&mut self, candidate_term_id: i64, candidate_id: MemberId, vote_granted: bool) {
        let message = Message::Vote {
            candidate_term_id,
            log_leadership_term_id: self.log_leadership_term_id,
            log_position: self.append_position,
            candidate_id,
            follower_id: self.members.this().id,
            vote_granted,
        };
        self.cluster.try_send(candidate_id, message);
    }

    fn publish_new_leadership_term(&mut self, now_ns: u64) {
        let message = Message::NewLeadershipTerm {
            log_leadership_term_id: self.log_leadership_term_id,
            log_truncate_position: self.append_position,
            leadership_term_id: self.leadership_term_id,
            log_position: self.append_position,
            timestamp_ns: now_ns as i64,
            leader_id: self.members.this().id,
            log_session_id: self.log_session_id,
            is_startup: self.is_node_startup,
        };
        self.broadcast(message);
    }

    fn send_new_leadership_term_to(&mut self, to: MemberId, timestamp_ns: i64) {
        let message = Message::NewLeadershipTerm {
            log_leadership_term_id: self.log_leadership_term_id,
            log_truncate_position: self.append_position,
            leadership_term_id: self.leadership_term_id,
            log_position: self.append_position,
            timestamp_ns,
            leader_id: self.members.this().id,
            log_session_id: self.log_session_id,
            is_startup: self.is_node_startup,
        };
        self.cluster.try_send(to, message);
    }

    fn broadcast(&mut self, message: Message) {
        let Self {
            members, cluster, ..
        } = self;
        let this_id = members.this().id;
        for member in members.iter() {
            if member.id != this_id {
                cluster.try_send(member.id, message.clone());
            }
        }
    }

    fn transition(&mut self, next: State, now_ns: u64) {
        if let State::Canvass = self.state {
            // The extended window applies to the first canvass only.
            self.is_extended_canvass = false;
        }

        let from = self.state.label();
        let to = next.label();
        debug!(?from, ?to, "election state change");

        self.state = next;
        self.time_of_last_state_change_ns = now_ns;
        self.time_of_last_update_ns = 0;
        self.counter.set_ordered(to);

        if to == ElectionState::Closed {
            // The agent's references keep live resources alive; ours go.
            self.follower_log.reset();
        }
    }

    fn is_leader(&self) -> bool {
        self.leader_id == Some(self.members.this().id)
    }

    fn require_leader(&self) -> Result<MemberId, ElectionError> {
        self.leader_id
            .ok_or_else(|| ElectionError::State("follower phase with no leader".to_string()))
    }

    fn interval_expired(&self, now_ns: u64, interval_ns: u64) -> bool {
        self.time_of_last_update_ns == 0 || now_ns >= self.time_of_last_update_ns + interval_ns
    }

    fn last_activity_ns(&self) -> u64 {
        cmp::max(self.time_of_last_state_change_ns, self.time_of_last_update_ns)
    }
}
