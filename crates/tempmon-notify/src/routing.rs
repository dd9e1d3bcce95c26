use tempmon_common::types::{ChannelMatrix, Severity};

const ALL_SEVERITIES: [Severity; 3] = [Severity::Info, Severity::Medium, Severity::High];

pub struct ChannelRoute {
    pub channel: String,
    pub min_severity: Severity,
}

impl ChannelRoute {
    pub fn should_send(&self, event_severity: Severity) -> bool {
        event_severity >= self.min_severity
    }
}

/// Expands per-channel severity floors into an explicit severity-to-channel
/// matrix. Severities below `notify_floor` are routed nowhere.
pub fn build_matrix(routes: &[ChannelRoute], notify_floor: Severity) -> ChannelMatrix {
    let mut matrix = ChannelMatrix::default();
    for severity in ALL_SEVERITIES {
        if severity < notify_floor {
            continue;
        }
        for route in routes.iter().filter(|r| r.should_send(severity)) {
            matrix.route(severity, &route.channel);
        }
    }
    matrix
}
