//! Topic conventions. All topics live under `watchdog/{wallId}/`.

/// Topic builder scoped to one wall id.
#[derive(Debug, Clone)]
pub struct TopicSet {
    root: String,
}

/// Classified inbound topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundTopic {
    /// `command/{clientId}`
    Command { client_id: String },
    Lease,
    /// Legacy control channel.
    Control,
    WebrtcJoin,
    WebrtcAnswer,
    WebrtcIce,
    WebrtcLeave,
}

impl TopicSet {
    pub fn new(wall_id: &str) -> Self {
        Self { root: format!("watchdog/{}", wall_id) }
    }

    pub fn telemetry(&self) -> String {
        format!("{}/telemetry", self.root)
    }

    pub fn health(&self) -> String {
        format!("{}/health", self.root)
    }

    pub fn status(&self) -> String {
        format!("{}/status", self.root)
    }

    pub fn config(&self) -> String {
        format!("{}/config", self.root)
    }

    pub fn event(&self) -> String {
        format!("{}/event", self.root)
    }

    /// Outbound realtime echo of accepted commands.
    pub fn commands(&self) -> String {
        format!("{}/commands", self.root)
    }

    /// Legacy inbound control channel.
    pub fn control(&self) -> String {
        format!("{}/control", self.root)
    }

    pub fn command(&self, client_id: &str) -> String {
        format!("{}/command/{}", self.root, client_id)
    }

    /// Subscription filter matching every client's command topic.
    pub fn command_wildcard(&self) -> String {
        format!("{}/command/+", self.root)
    }

    pub fn ack(&self, client_id: &str) -> String {
        format!("{}/ack/{}", self.root, client_id)
    }

    pub fn lease(&self) -> String {
        format!("{}/lease", self.root)
    }

    pub fn stream_status(&self) -> String {
        format!("{}/stream/status", self.root)
    }

    pub fn webrtc_offer(&self) -> String {
        format!("{}/webrtc/offer", self.root)
    }

    pub fn webrtc_answer(&self) -> String {
        format!("{}/webrtc/answer", self.root)
    }

    pub fn webrtc_ice(&self) -> String {
        format!("{}/webrtc/ice", self.root)
    }

    pub fn webrtc_join(&self) -> String {
        format!("{}/webrtc/join", self.root)
    }

    pub fn webrtc_leave(&self) -> String {
        format!("{}/webrtc/leave", self.root)
    }

    /// Classify an inbound topic string. Topics outside this wall's tree or
    /// outside the subscribed set return `None`.
    pub fn parse(&self, topic: &str) -> Option<InboundTopic> {
        let suffix = topic.strip_prefix(&self.root)?.strip_prefix('/')?;
        if let Some(client_id) = suffix.strip_prefix("command/") {
            if client_id.is_empty() || client_id.contains('/') {
                return None;
            }
            return Some(InboundTopic::Command { client_id: client_id.to_string() });
        }
        match suffix {
            "lease" => Some(InboundTopic::Lease),
            "control" => Some(InboundTopic::Control),
            "webrtc/join" => Some(InboundTopic::WebrtcJoin),
            "webrtc/answer" => Some(InboundTopic::WebrtcAnswer),
            "webrtc/ice" => Some(InboundTopic::WebrtcIce),
            "webrtc/leave" => Some(InboundTopic::WebrtcLeave),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_shapes() {
        let topics = TopicSet::new("wall-7");
        assert_eq!(topics.telemetry(), "watchdog/wall-7/telemetry");
        assert_eq!(topics.command("ops-1"), "watchdog/wall-7/command/ops-1");
        assert_eq!(topics.command_wildcard(), "watchdog/wall-7/command/+");
        assert_eq!(topics.ack("ops-1"), "watchdog/wall-7/ack/ops-1");
        assert_eq!(topics.webrtc_offer(), "watchdog/wall-7/webrtc/offer");
        assert_eq!(topics.stream_status(), "watchdog/wall-7/stream/status");
    }

    #[test]
    fn test_parse_command_topic() {
        let topics = TopicSet::new("wall-7");
        assert_eq!(
            topics.parse("watchdog/wall-7/command/ops-42"),
            Some(InboundTopic::Command { client_id: "ops-42".to_string() })
        );
        // Nested segments are not a client id.
        assert_eq!(topics.parse("watchdog/wall-7/command/a/b"), None);
        assert_eq!(topics.parse("watchdog/wall-7/command/"), None);
    }

    #[test]
    fn test_parse_other_topics() {
        let topics = TopicSet::new("wall-7");
        assert_eq!(topics.parse("watchdog/wall-7/lease"), Some(InboundTopic::Lease));
        assert_eq!(topics.parse("watchdog/wall-7/control"), Some(InboundTopic::Control));
        assert_eq!(topics.parse("watchdog/wall-7/webrtc/join"), Some(InboundTopic::WebrtcJoin));
        // Our own outbound topics are not inbound.
        assert_eq!(topics.parse("watchdog/wall-7/telemetry"), None);
        // Foreign wall.
        assert_eq!(topics.parse("watchdog/wall-8/lease"), None);
    }
}
