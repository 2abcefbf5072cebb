use crate::config::MemberEndpoints;
use crate::{NULL_POSITION, NULL_VALUE};
use std::cmp::Ordering;
use std::collections::HashMap;

/// MemberId is a type alias used to identify cluster members.
pub type MemberId = usize;

/// Outcome of a ballot as recorded per member.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ballot {
    Unset,
    Granted,
    Denied,
}

/// Total order on `(leadership term, log position)` pairs. Terms dominate;
/// positions break ties within a term.
pub fn compare_log(
    lhs_term_id: i64,
    lhs_position: i64,
    rhs_term_id: i64,
    rhs_position: i64,
) -> Ordering {
    match lhs_term_id.cmp(&rhs_term_id) {
        Ordering::Equal => lhs_position.cmp(&rhs_position),
        ordering => ordering,
    }
}

/// Per-member mutable election state, one entry per configured member
/// including the local one.
#[derive(Clone, Debug)]
pub struct ClusterMember {
    /// Stable identity of the member.
    pub id: MemberId,

    /// Highest leadership term the member has reported.
    pub leadership_term_id: i64,

    /// The member's last known append position within its current term.
    pub log_position: i64,

    /// Term in which the member last cast a vote.
    pub candidate_term_id: i64,

    /// The member's recorded vote in the current ballot.
    pub ballot: Ballot,

    /// Whether a request-vote was successfully sent to the member in the
    /// current ballot.
    pub is_ballot_sent: bool,

    /// Passive members follow the log but never vote or nominate.
    pub is_passive: bool,

    /// Time of the last append-position received from the member. Leader
    /// bookkeeping only.
    pub time_of_last_append_position_ns: u64,

    /// Endpoint the member receives live log traffic on.
    pub log_endpoint: String,

    /// Endpoint archive replay is directed at while the member catches up.
    pub transfer_endpoint: String,
}

impl ClusterMember {
    fn new(endpoints: &MemberEndpoints) -> ClusterMember {
        ClusterMember {
            id: endpoints.id,
            leadership_term_id: NULL_VALUE,
            log_position: NULL_POSITION,
            candidate_term_id: NULL_VALUE,
            ballot: Ballot::Unset,
            is_ballot_sent: false,
            is_passive: endpoints.is_passive,
            time_of_last_append_position_ns: 0,
            log_endpoint: endpoints.log_endpoint.clone(),
            transfer_endpoint: endpoints.transfer_endpoint.clone(),
        }
    }

    /// Whether the member has reported anything at all since the election
    /// began. Members start at the sentinel term, so a non-sentinel term
    /// means at least one canvass response or vote arrived.
    pub fn has_canvassed(&self) -> bool {
        self.leadership_term_id != NULL_VALUE
    }
}

/// Dense member table with an auxiliary id to slot map, so the quorum
/// predicates iterate a flat array while message handlers still look
/// members up by id.
pub struct MemberTable {
    members: Vec<ClusterMember>,
    slots: HashMap<MemberId, usize>,
    this_slot: usize,
}

impl MemberTable {
    /// Build the table from the configured membership. The caller has
    /// already validated that `this_member_id` is present and ids are
    /// unique.
    pub fn new(endpoints: &[MemberEndpoints], this_member_id: MemberId) -> MemberTable {
        let members: Vec<ClusterMember> = endpoints.iter().map(ClusterMember::new).collect();
        let slots = members
            .iter()
            .enumerate()
            .map(|(slot, member)| (member.id, slot))
            .collect::<HashMap<_, _>>();
        let this_slot = slots[&this_member_id];

        MemberTable {
            members,
            slots,
            this_slot,
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn this(&self) -> &ClusterMember {
        &self.members[self.this_slot]
    }

    pub fn this_mut(&mut self) -> &mut ClusterMember {
        &mut self.members[self.this_slot]
    }

    pub fn get(&self, id: MemberId) -> Option<&ClusterMember> {
        self.slots.get(&id).map(|&slot| &self.members[slot])
    }

    pub fn get_mut(&mut self, id: MemberId) -> Option<&mut ClusterMember> {
        let members = &mut self.members;
        self.slots.get(&id).map(move |&slot| &mut members[slot])
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClusterMember> {
        self.members.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ClusterMember> {
        self.members.iter_mut()
    }

    /// Ids of every member other than the local one, in table order.
    pub fn other_ids(&self) -> Vec<MemberId> {
        let this_id = self.this().id;
        self.members
            .iter()
            .filter(|member| member.id != this_id)
            .map(|member| member.id)
            .collect()
    }

    /// Number of voting members. Passive members never count toward a
    /// quorum.
    pub fn active_len(&self) -> usize {
        self.members.iter().filter(|member| !member.is_passive).count()
    }

    /// Votes required for a majority of the voting members.
    pub fn quorum_threshold(&self) -> usize {
        self.active_len() / 2 + 1
    }

    /// Reset per-ballot and canvass bookkeeping when a fresh election
    /// round begins.
    pub fn reset_canvass(&mut self) {
        for member in &mut self.members {
            member.leadership_term_id = NULL_VALUE;
            member.log_position = NULL_POSITION;
            member.candidate_term_id = NULL_VALUE;
            member.ballot = Ballot::Unset;
            member.is_ballot_sent = false;
        }
    }

    /// Mark every member's bookkeeping for a ballot in which the local
    /// member runs as candidate. The candidate votes for itself and never
    /// needs a request-vote sent to it.
    pub fn become_candidate(&mut self, candidate_term_id: i64, candidate_id: MemberId) {
        for member in &mut self.members {
            member.candidate_term_id = candidate_term_id;
            if member.id == candidate_id {
                member.ballot = Ballot::Granted;
                member.is_ballot_sent = true;
            } else {
                member.ballot = Ballot::Unset;
                member.is_ballot_sent = false;
            }
        }
    }

    /// Forget peers' log positions, typically when a new leader starts a
    /// term and expects fresh append-position reports.
    pub fn reset_log_positions(&mut self, position: i64) {
        for member in &mut self.members {
            member.log_position = position;
        }
    }

    /// Every other voting member has responded to canvass and none has a
    /// newer term or a longer log than the candidate.
    pub fn is_unanimous_candidate(&self, leadership_term_id: i64, append_position: i64) -> bool {
        let this_id = self.this().id;
        self.members
            .iter()
            .filter(|member| !member.is_passive && member.id != this_id)
            .all(|member| {
                member.has_canvassed()
                    && member.leadership_term_id <= leadership_term_id
                    && member.log_position <= append_position
            })
    }

    /// A majority of the voting members, the candidate included, have
    /// responded to canvass with terms and positions no greater than the
    /// candidate's.
    pub fn is_quorum_candidate(&self, leadership_term_id: i64, append_position: i64) -> bool {
        let this_id = self.this().id;
        let responded = self
            .members
            .iter()
            .filter(|member| !member.is_passive && member.id != this_id)
            .filter(|member| {
                member.has_canvassed()
                    && member.leadership_term_id <= leadership_term_id
                    && member.log_position <= append_position
            })
            .count();

        responded + 1 >= self.quorum_threshold()
    }

    /// A majority of the voting members have granted their vote in the
    /// given candidate term.
    pub fn has_majority_vote(&self, candidate_term_id: i64) -> bool {
        let granted = self
            .members
            .iter()
            .filter(|member| !member.is_passive)
            .filter(|member| {
                member.candidate_term_id == candidate_term_id && member.ballot == Ballot::Granted
            })
            .count();

        granted >= self.quorum_threshold()
    }

    /// Every voting member has a recorded vote in the given candidate term
    /// and a majority granted.
    pub fn has_won_vote_on_full_count(&self, candidate_term_id: i64) -> bool {
        let all_counted = self
            .members
            .iter()
            .filter(|member| !member.is_passive)
            .all(|member| {
                member.candidate_term_id == candidate_term_id && member.ballot != Ballot::Unset
            });

        all_counted && self.has_majority_vote(candidate_term_id)
    }

    /// Majority vote computed over only the members that responded to
    /// canvass, so a ballot can conclude early when the unreachable rest
    /// of the cluster cannot change the outcome.
    pub fn has_majority_vote_with_canvass_members(&self, candidate_term_id: i64) -> bool {
        let this_id = self.this().id;
        let mut subset = 0;
        let mut granted = 0;
        for member in self.members.iter().filter(|member| !member.is_passive) {
            if member.id != this_id && !member.has_canvassed() {
                continue;
            }
            subset += 1;
            if member.candidate_term_id == candidate_term_id && member.ballot == Ballot::Granted {
                granted += 1;
            }
        }

        granted >= subset / 2 + 1
    }

    /// Every voting member has confirmed the given term and reached the
    /// given position.
    pub fn have_voters_reached_position(&self, position: i64, leadership_term_id: i64) -> bool {
        self.members
            .iter()
            .filter(|member| !member.is_passive)
            .all(|member| {
                member.leadership_term_id >= leadership_term_id && member.log_position >= position
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemberEndpoints;

    fn table(count: usize, this_member_id: MemberId) -> MemberTable {
        let endpoints: Vec<MemberEndpoints> = (0..count)
            .map(|id| {
                MemberEndpoints::new(
                    id,
                    &format!("node{}:20000", id),
                    &format!("node{}:20001", id),
                )
            })
            .collect();
        MemberTable::new(&endpoints, this_member_id)
    }

    #[test]
    fn comparator_orders_terms_before_positions() {
        assert_eq!(compare_log(1, 0, 0, 100), Ordering::Greater);
        assert_eq!(compare_log(2, 50, 2, 100), Ordering::Less);
        assert_eq!(compare_log(3, 10, 3, 10), Ordering::Equal);
    }

    #[test]
    fn fresh_members_have_not_canvassed() {
        let table = table(3, 0);
        assert!(table.iter().all(|member| !member.has_canvassed()));
        assert!(!table.is_unanimous_candidate(0, 0));
    }

    #[test]
    fn unanimous_candidate_requires_all_others() {
        let mut table = table(3, 0);
        {
            let member = table.get_mut(1).unwrap();
            member.leadership_term_id = 0;
            member.log_position = 0;
        }
        assert!(!table.is_unanimous_candidate(0, 0));

        {
            let member = table.get_mut(2).unwrap();
            member.leadership_term_id = 0;
            member.log_position = 0;
        }
        assert!(table.is_unanimous_candidate(0, 0));

        // A longer log on any peer disqualifies the candidate.
        table.get_mut(2).unwrap().log_position = 10;
        assert!(!table.is_unanimous_candidate(0, 0));
    }

    #[test]
    fn quorum_candidate_counts_self() {
        let mut table = table(5, 0);
        assert!(!table.is_quorum_candidate(0, 0));

        for id in 1..3 {
            let member = table.get_mut(id).unwrap();
            member.leadership_term_id = 0;
            member.log_position = 0;
        }
        assert!(table.is_quorum_candidate(0, 0));
    }

    #[test]
    fn majority_vote_needs_quorum_of_grants() {
        let mut table = table(3, 0);
        table.become_candidate(5, 0);
        assert!(!table.has_majority_vote(5));

        table.get_mut(1).unwrap().ballot = Ballot::Granted;
        assert!(table.has_majority_vote(5));
        assert!(!table.has_won_vote_on_full_count(5));

        table.get_mut(2).unwrap().ballot = Ballot::Denied;
        assert!(table.has_won_vote_on_full_count(5));
    }

    #[test]
    fn full_count_loss_is_not_a_win() {
        let mut table = table(3, 0);
        table.become_candidate(2, 0);
        table.get_mut(1).unwrap().ballot = Ballot::Denied;
        table.get_mut(2).unwrap().ballot = Ballot::Denied;
        assert!(!table.has_won_vote_on_full_count(2));
        assert!(!table.has_majority_vote(2));
    }

    #[test]
    fn canvass_members_majority_ignores_silent_peers() {
        let mut table = table(5, 0);
        table.become_candidate(3, 0);
        for id in 1..3 {
            let member = table.get_mut(id).unwrap();
            member.leadership_term_id = 2;
            member.log_position = 0;
            member.ballot = Ballot::Granted;
            member.candidate_term_id = 3;
        }

        // Three of the five voted (self included) and all three granted.
        assert!(table.has_majority_vote_with_canvass_members(3));
        assert!(table.has_majority_vote(3));
    }

    #[test]
    fn passive_members_do_not_count() {
        let endpoints = vec![
            MemberEndpoints::new(0, "node0:20000", "node0:20001"),
            MemberEndpoints::new(1, "node1:20000", "node1:20001"),
            MemberEndpoints::new(2, "node2:20000", "node2:20001").passive(),
        ];
        let mut table = MemberTable::new(&endpoints, 0);
        assert_eq!(table.active_len(), 2);
        assert_eq!(table.quorum_threshold(), 2);

        table.become_candidate(1, 0);
        table.get_mut(1).unwrap().ballot = Ballot::Granted;
        table.get_mut(1).unwrap().candidate_term_id = 1;
        assert!(table.has_won_vote_on_full_count(1));
    }

    #[test]
    fn voters_reached_position_requires_everyone() {
        let mut table = table(3, 0);
        for id in 0..3 {
            let member = table.get_mut(id).unwrap();
            member.leadership_term_id = 4;
            member.log_position = 100;
        }
        assert!(table.have_voters_reached_position(100, 4));

        table.get_mut(2).unwrap().log_position = 99;
        assert!(!table.have_voters_reached_position(100, 4));
    }
}
