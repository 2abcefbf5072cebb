use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counter type id under which the election state is registered with the
/// host's counter registry.
pub const ELECTION_STATE_TYPE_ID: i32 = 207;

/// Phase of the election as published through the state counter.
///
/// The discriminants are the wire codes; they are stable and observers
/// decode them with [`ElectionState::from_code`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ElectionState {
    Init = 0,
    Canvass = 1,
    Nominate = 2,
    CandidateBallot = 3,
    FollowerBallot = 4,
    LeaderReplay = 5,
    LeaderTransition = 6,
    LeaderReady = 7,
    FollowerReplay = 8,
    FollowerCatchupTransition = 9,
    FollowerCatchup = 10,
    FollowerTransition = 11,
    FollowerReady = 12,
    Closed = 13,
}

impl ElectionState {
    pub fn code(self) -> u64 {
        self as u64
    }

    /// Decode a counter value. An out-of-range code means the counter was
    /// corrupted or written by incompatible code; fail fast.
    pub fn from_code(code: u64) -> ElectionState {
        match code {
            0 => ElectionState::Init,
            1 => ElectionState::Canvass,
            2 => ElectionState::Nominate,
            3 => ElectionState::CandidateBallot,
            4 => ElectionState::FollowerBallot,
            5 => ElectionState::LeaderReplay,
            6 => ElectionState::LeaderTransition,
            7 => ElectionState::LeaderReady,
            8 => ElectionState::FollowerReplay,
            9 => ElectionState::FollowerCatchupTransition,
            10 => ElectionState::FollowerCatchup,
            11 => ElectionState::FollowerTransition,
            12 => ElectionState::FollowerReady,
            13 => ElectionState::Closed,
            other => panic!("invalid election state code {}", other),
        }
    }
}

/// Process-visible election state counter. The election stores the new
/// state code with release ordering on every transition so observers on
/// other threads see at most one transition per tick.
#[derive(Clone)]
pub struct ElectionCounter {
    value: Arc<AtomicU64>,
}

impl ElectionCounter {
    pub fn new() -> ElectionCounter {
        ElectionCounter {
            value: Arc::new(AtomicU64::new(ElectionState::Init.code())),
        }
    }

    pub fn set_ordered(&self, state: ElectionState) {
        self.value.store(state.code(), Ordering::Release);
    }

    pub fn get(&self) -> ElectionState {
        ElectionState::from_code(self.value.load(Ordering::Acquire))
    }
}

impl Default for ElectionCounter {
    fn default() -> ElectionCounter {
        ElectionCounter::new()
    }
}
