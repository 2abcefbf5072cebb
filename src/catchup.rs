use crate::agent::{ConsensusAgent, SharedLogSubscription};
use crate::channel_uri;
use crate::error::ElectionError;
use crate::member::ClusterMember;

/// Follower-side coordinator for the log subscription and its
/// destinations.
///
/// The subscription is created in manual control mode so the archive
/// replay destination (catch-up) and the live log destination can be
/// attached and removed independently as the follower converges on the
/// leader's stream. The agent owns the subscription; this holds only a
/// reference, dropped when the election closes.
#[derive(Default)]
pub struct FollowerLog {
    subscription: Option<SharedLogSubscription>,
    replay_destination: Option<String>,
    live_destination: Option<String>,
}

impl FollowerLog {
    pub fn new() -> FollowerLog {
        FollowerLog::default()
    }

    pub fn is_connected(&self) -> bool {
        self.subscription.is_some()
    }

    pub fn subscription(&self) -> Option<&SharedLogSubscription> {
        self.subscription.as_ref()
    }

    /// Create the subscription and attach the archive replay destination
    /// for the member's transfer endpoint.
    pub fn connect_for_replay(
        &mut self,
        agent: &mut dyn ConsensusAgent,
        log_channel: &str,
        log_session_id: i32,
        member: &ClusterMember,
    ) -> Result<(), ElectionError> {
        let subscription = self.connect(agent, log_channel, log_session_id)?;
        let destination = channel_uri::replay_destination(&member.transfer_endpoint);
        subscription.lock().unwrap().add_destination(&destination)?;
        self.replay_destination = Some(destination);
        Ok(())
    }

    /// Create the subscription with only the live destination attached,
    /// for followers that need no catch-up.
    pub fn connect_live(
        &mut self,
        agent: &mut dyn ConsensusAgent,
        log_channel: &str,
        log_session_id: i32,
        member: &ClusterMember,
    ) -> Result<(), ElectionError> {
        self.connect(agent, log_channel, log_session_id)?;
        self.add_live_destination(log_channel, member)
    }

    fn connect(
        &mut self,
        agent: &mut dyn ConsensusAgent,
        log_channel: &str,
        log_session_id: i32,
    ) -> Result<SharedLogSubscription, ElectionError> {
        let channel = channel_uri::log_subscription_channel(
            log_channel,
            log_session_id,
            &agent.log_subscription_tags(),
        )?;
        let subscription = agent.create_log_subscription(&channel)?;
        self.subscription = Some(subscription.clone());
        Ok(subscription)
    }

    pub fn has_live_destination(&self) -> bool {
        self.live_destination.is_some()
    }

    /// Attach the live log destination. A no-op once attached.
    pub fn add_live_destination(
        &mut self,
        log_channel: &str,
        member: &ClusterMember,
    ) -> Result<(), ElectionError> {
        if self.live_destination.is_some() {
            return Ok(());
        }
        let subscription = self
            .subscription
            .as_ref()
            .ok_or_else(|| ElectionError::Agent("no log subscription to attach to".to_string()))?;
        let destination = channel_uri::live_destination(log_channel, &member.log_endpoint)?;
        subscription.lock().unwrap().add_destination(&destination)?;
        self.live_destination = Some(destination);
        Ok(())
    }

    /// Whether the archive replay destination is still attached.
    pub fn is_replay_active(&self) -> bool {
        self.replay_destination.is_some()
    }

    /// Detach the archive replay destination once the catch-up stream is
    /// finished with.
    pub fn stop_replay(&mut self) -> Result<(), ElectionError> {
        if let (Some(subscription), Some(destination)) =
            (self.subscription.as_ref(), self.replay_destination.take())
        {
            subscription.lock().unwrap().remove_destination(&destination)?;
        }
        Ok(())
    }

    /// Detach the live destination when falling back to canvass after
    /// losing contact with the leader.
    pub fn remove_live_destination(&mut self) -> Result<(), ElectionError> {
        if let (Some(subscription), Some(destination)) =
            (self.subscription.as_ref(), self.live_destination.take())
        {
            subscription.lock().unwrap().remove_destination(&destination)?;
        }
        Ok(())
    }

    /// Drop the subscription reference and destination bookkeeping. The
    /// agent's own reference keeps an established live log flowing.
    pub fn reset(&mut self) {
        self.subscription = None;
        self.replay_destination = None;
        self.live_destination = None;
    }
}
