use crate::channel_uri::ChannelUri;
use crate::error::ElectionError;
use crate::member::MemberId;
use std::collections::HashSet;
use std::time::Duration;

/// How aggressively persistent state is flushed to storage after a
/// mutation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FsyncLevel {
    /// Leave flushing to the operating system.
    None,
    /// Flush file data on every mutation.
    Data,
    /// Flush file data and metadata on every mutation.
    All,
}

/// Static description of one configured cluster member.
#[derive(Clone, Debug)]
pub struct MemberEndpoints {
    /// Stable identity of the member within the cluster.
    pub id: MemberId,
    /// Endpoint the member receives live log traffic on.
    pub log_endpoint: String,
    /// Endpoint archive replay is directed at while the member catches up.
    pub transfer_endpoint: String,
    /// Passive members follow the log but never vote or nominate.
    pub is_passive: bool,
}

impl MemberEndpoints {
    pub fn new(id: MemberId, log_endpoint: &str, transfer_endpoint: &str) -> MemberEndpoints {
        MemberEndpoints {
            id,
            log_endpoint: log_endpoint.to_string(),
            transfer_endpoint: transfer_endpoint.to_string(),
            is_passive: false,
        }
    }

    pub fn passive(mut self) -> MemberEndpoints {
        self.is_passive = true;
        self
    }
}

/// Tunables for one election.
///
/// Durations are converted to the host's monotonic nanosecond clock once,
/// at construction of the election.
#[derive(Clone, Debug)]
pub struct ElectionConfig {
    /// Identity of the local member; must appear in `members`.
    pub this_member_id: MemberId,
    /// The fixed membership for the duration of the election.
    pub members: Vec<MemberEndpoints>,
    /// When set, only the appointed member will nominate itself.
    pub appointed_leader_id: Option<MemberId>,
    /// How long a ballot or canvass may run before falling back.
    pub election_timeout: Duration,
    /// Extended canvass window applied once on node startup.
    pub startup_canvass_timeout: Duration,
    /// How often canvass positions are broadcast.
    pub election_status_interval: Duration,
    /// How often an elected leader re-announces its term.
    pub leader_heartbeat_interval: Duration,
    /// How long a ready follower tolerates no contact with the leader.
    pub leader_heartbeat_timeout: Duration,
    /// Channel URI template the log subscription and destinations derive
    /// from.
    pub log_channel: String,
    /// Durability applied to the mark file and recording log.
    pub fsync_level: FsyncLevel,
    /// Seed for the nomination jitter. Fixed seeds make multi-member tests
    /// deterministic; `None` seeds from entropy.
    pub random_seed: Option<u64>,
}

impl ElectionConfig {
    pub fn new(this_member_id: MemberId, members: Vec<MemberEndpoints>) -> ElectionConfig {
        ElectionConfig {
            this_member_id,
            members,
            appointed_leader_id: None,
            election_timeout: Duration::from_secs(1),
            startup_canvass_timeout: Duration::from_secs(5),
            election_status_interval: Duration::from_millis(100),
            leader_heartbeat_interval: Duration::from_millis(200),
            leader_heartbeat_timeout: Duration::from_secs(10),
            log_channel: "aeron:udp?term-length=64k".to_string(),
            fsync_level: FsyncLevel::Data,
            random_seed: None,
        }
    }

    pub fn validate(&self) -> Result<(), ElectionError> {
        if self.members.is_empty() {
            return Err(ElectionError::Config("no members configured".to_string()));
        }

        let mut ids = HashSet::new();
        for member in &self.members {
            if !ids.insert(member.id) {
                return Err(ElectionError::Config(format!(
                    "duplicate member id {}",
                    member.id
                )));
            }
        }

        if !ids.contains(&self.this_member_id) {
            return Err(ElectionError::Config(format!(
                "member id {} is not in the configured membership",
                self.this_member_id
            )));
        }

        if let Some(appointed) = self.appointed_leader_id {
            if !ids.contains(&appointed) {
                return Err(ElectionError::Config(format!(
                    "appointed leader {} is not in the configured membership",
                    appointed
                )));
            }
        }

        if self.election_timeout.as_nanos() == 0
            || self.election_status_interval.as_nanos() == 0
            || self.leader_heartbeat_interval.as_nanos() == 0
            || self.leader_heartbeat_timeout.as_nanos() == 0
        {
            return Err(ElectionError::Config(
                "timeouts and intervals must be non-zero".to_string(),
            ));
        }

        ChannelUri::parse(&self.log_channel)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_members() -> Vec<MemberEndpoints> {
        vec![
            MemberEndpoints::new(0, "node0:20000", "node0:20001"),
            MemberEndpoints::new(1, "node1:20000", "node1:20001"),
            MemberEndpoints::new(2, "node2:20000", "node2:20001"),
        ]
    }

    #[test]
    fn accepts_well_formed_configuration() {
        assert!(ElectionConfig::new(1, three_members()).validate().is_ok());
    }

    #[test]
    fn rejects_unknown_self_id() {
        let config = ElectionConfig::new(9, three_members());
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_duplicate_member_ids() {
        let mut members = three_members();
        members.push(MemberEndpoints::new(2, "dup:20000", "dup:20001"));
        assert!(ElectionConfig::new(0, members).validate().is_err());
    }

    #[test]
    fn rejects_unknown_appointed_leader() {
        let mut config = ElectionConfig::new(0, three_members());
        config.appointed_leader_id = Some(7);
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_malformed_log_channel() {
        let mut config = ElectionConfig::new(0, three_members());
        config.log_channel = "udp://not-a-channel".to_string();
        assert!(config.validate().is_err());
    }
}
