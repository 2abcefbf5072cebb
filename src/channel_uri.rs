use crate::error::ElectionError;
use std::collections::BTreeMap;
use std::fmt;

/// Scheme prefix every channel URI carries.
pub const AERON_PREFIX: &str = "aeron:";

const ENDPOINT_PARAM: &str = "endpoint";
const INTERFACE_PARAM: &str = "interface";
const CONTROL_MODE_PARAM: &str = "control-mode";
const GROUP_PARAM: &str = "group";
const SESSION_ID_PARAM: &str = "session-id";
const TAGS_PARAM: &str = "tags";
const ALIAS_PARAM: &str = "alias";

/// Parsed `aeron:<media>?key=value|key=value` channel URI.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelUri {
    media: String,
    params: BTreeMap<String, String>,
}

impl ChannelUri {
    pub fn parse(channel: &str) -> Result<ChannelUri, ElectionError> {
        let rest = channel.strip_prefix(AERON_PREFIX).ok_or_else(|| {
            ElectionError::Channel(format!("URI must begin with '{}': {}", AERON_PREFIX, channel))
        })?;

        let (media, query) = match rest.find('?') {
            Some(index) => (&rest[..index], &rest[index + 1..]),
            None => (rest, ""),
        };

        if media.is_empty() {
            return Err(ElectionError::Channel(format!("empty media: {}", channel)));
        }

        let mut params = BTreeMap::new();
        if !query.is_empty() {
            for pair in query.split('|') {
                let mut split = pair.splitn(2, '=');
                let key = split.next().unwrap_or("");
                let value = split.next();
                match value {
                    Some(value) if !key.is_empty() => {
                        params.insert(key.to_string(), value.to_string());
                    }
                    _ => {
                        return Err(ElectionError::Channel(format!(
                            "malformed parameter '{}' in {}",
                            pair, channel
                        )));
                    }
                }
            }
        }

        Ok(ChannelUri {
            media: media.to_string(),
            params,
        })
    }

    pub fn media(&self) -> &str {
        &self.media
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn put(&mut self, key: &str, value: &str) {
        self.params.insert(key.to_string(), value.to_string());
    }

    pub fn remove(&mut self, key: &str) {
        self.params.remove(key);
    }
}

impl fmt::Display for ChannelUri {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}{}", AERON_PREFIX, self.media)?;
        let mut separator = '?';
        for (key, value) in &self.params {
            write!(f, "{}{}={}", separator, key, value)?;
            separator = '|';
        }
        Ok(())
    }
}

/// Channel the follower subscribes to the log on: multi-destination in
/// manual control mode, pinned to the leader's log session, aliased for
/// observability. The endpoint is stripped because destinations are added
/// explicitly.
pub fn log_subscription_channel(
    log_channel: &str,
    log_session_id: i32,
    tags: &str,
) -> Result<String, ElectionError> {
    let mut uri = ChannelUri::parse(log_channel)?;
    uri.remove(ENDPOINT_PARAM);
    uri.put(CONTROL_MODE_PARAM, "manual");
    uri.put(GROUP_PARAM, "true");
    uri.put(SESSION_ID_PARAM, &log_session_id.to_string());
    if !tags.is_empty() {
        uri.put(TAGS_PARAM, tags);
    }
    uri.put(ALIAS_PARAM, "log");
    Ok(uri.to_string())
}

/// Destination the archive replays into while the follower catches up.
pub fn replay_destination(transfer_endpoint: &str) -> String {
    format!("{}udp?{}={}", AERON_PREFIX, ENDPOINT_PARAM, transfer_endpoint)
}

/// Destination the live log arrives on, derived from the configured log
/// channel with the member's own log endpoint.
pub fn live_destination(log_channel: &str, log_endpoint: &str) -> Result<String, ElectionError> {
    let uri = ChannelUri::parse(log_channel)?;
    let mut destination = ChannelUri {
        media: uri.media().to_string(),
        params: BTreeMap::new(),
    };
    if let Some(interface) = uri.get(INTERFACE_PARAM) {
        destination.put(INTERFACE_PARAM, interface);
    }
    destination.put(ENDPOINT_PARAM, log_endpoint);
    Ok(destination.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_media_and_params() {
        let uri = ChannelUri::parse("aeron:udp?endpoint=host:9000|term-length=64k").unwrap();
        assert_eq!(uri.media(), "udp");
        assert_eq!(uri.get("endpoint"), Some("host:9000"));
        assert_eq!(uri.get("term-length"), Some("64k"));
    }

    #[test]
    fn rejects_foreign_scheme_and_bare_params() {
        assert!(ChannelUri::parse("udp://host:9000").is_err());
        assert!(ChannelUri::parse("aeron:udp?endpoint").is_err());
        assert!(ChannelUri::parse("aeron:?endpoint=host:9000").is_err());
    }

    #[test]
    fn display_round_trips() {
        let channel = "aeron:udp?alias=log|endpoint=host:9000";
        let uri = ChannelUri::parse(channel).unwrap();
        assert_eq!(uri.to_string(), channel);
        assert_eq!(ChannelUri::parse(&uri.to_string()).unwrap(), uri);
    }

    #[test]
    fn subscription_channel_is_manual_and_sessioned() {
        let channel =
            log_subscription_channel("aeron:udp?endpoint=host:9000|term-length=64k", 77, "1,2")
                .unwrap();
        let uri = ChannelUri::parse(&channel).unwrap();
        assert_eq!(uri.get("endpoint"), None);
        assert_eq!(uri.get("control-mode"), Some("manual"));
        assert_eq!(uri.get("group"), Some("true"));
        assert_eq!(uri.get("session-id"), Some("77"));
        assert_eq!(uri.get("tags"), Some("1,2"));
        assert_eq!(uri.get("alias"), Some("log"));
        assert_eq!(uri.get("term-length"), Some("64k"));
    }

    #[test]
    fn subscription_channel_omits_empty_tags() {
        let channel = log_subscription_channel("aeron:udp?endpoint=host:9000", 5, "").unwrap();
        assert_eq!(ChannelUri::parse(&channel).unwrap().get("tags"), None);
    }

    #[test]
    fn replay_destination_targets_transfer_endpoint() {
        assert_eq!(
            replay_destination("node1:20001"),
            "aeron:udp?endpoint=node1:20001"
        );
    }

    #[test]
    fn live_destination_keeps_interface_only() {
        let destination = live_destination(
            "aeron:udp?endpoint=ignored:0|interface=192.168.0.1|term-length=64k",
            "node1:20000",
        )
        .unwrap();
        let uri = ChannelUri::parse(&destination).unwrap();
        assert_eq!(uri.get("endpoint"), Some("node1:20000"));
        assert_eq!(uri.get("interface"), Some("192.168.0.1"));
        assert_eq!(uri.get("term-length"), None);
    }
}
