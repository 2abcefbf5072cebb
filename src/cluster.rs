use crate::member::MemberId;
use crate::message::Message;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::HashMap;

/// Interface a member uses to exchange election messages with the rest of
/// the cluster, be it over the network or pigeon post.
///
/// Sends are non-blocking with try semantics; a refused send is retried by
/// the owning state handler on a later tick. Inbound messages are drained
/// in bounded batches once per tick so the state machine stays purely
/// input-driven.
pub trait Cluster {
    /// Attempt to send a message to the given member. Returns `false`
    /// when the transport has no space or no route.
    fn try_send(&mut self, to: MemberId, message: Message) -> bool;

    /// Drain up to `max_messages` inbound messages.
    fn poll(&mut self, max_messages: usize) -> Vec<Message>;
}

/// In-process cluster wiring members over unbounded channels. Useful for
/// tests and single-process demos; real deployments implement [`Cluster`]
/// over their messaging transport.
pub struct ChannelCluster {
    rx: Receiver<Message>,
    peers: HashMap<MemberId, Sender<Message>>,
}

impl ChannelCluster {
    /// Create one connected endpoint per member id.
    pub fn connect(ids: &[MemberId]) -> Vec<(MemberId, ChannelCluster)> {
        let channels: HashMap<MemberId, (Sender<Message>, Receiver<Message>)> =
            ids.iter().map(|&id| (id, unbounded())).collect();

        ids.iter()
            .map(|&id| {
                let peers = channels
                    .iter()
                    .filter(|(&peer_id, _)| peer_id != id)
                    .map(|(&peer_id, (tx, _))| (peer_id, tx.clone()))
                    .collect();
                let cluster = ChannelCluster {
                    rx: channels[&id].1.clone(),
                    peers,
                };
                (id, cluster)
            })
            .collect()
    }
}

impl Cluster for ChannelCluster {
    fn try_send(&mut self, to: MemberId, message: Message) -> bool {
        match self.peers.get(&to) {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        }
    }

    fn poll(&mut self, max_messages: usize) -> Vec<Message> {
        let mut messages = Vec::new();
        while messages.len() < max_messages {
            match self.rx.try_recv() {
                Ok(message) => messages.push(message),
                Err(_) => break,
            }
        }
        messages
    }
}
