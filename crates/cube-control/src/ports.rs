use serial_link::PortInfo;
use std::time::{Duration, Instant};

/// Default enumeration period. Loss of a connected port is noticed at most this late.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Result of feeding one enumeration snapshot to the registry.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PortPoll {
    pub ports: Vec<PortInfo>,
    pub appeared: Vec<String>,
    pub vanished: Vec<String>,
    /// Set on the first snapshot in which the owned port is missing, and only then.
    pub lost: Option<String>,
}

/// Tracks the OS-visible ports across polls and detects loss of the owned port.
#[derive(Debug, Default)]
pub struct PortRegistry {
    last: Vec<PortInfo>,
    lost_reported: Option<String>,
    polls: u64,
}

impl PortRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest snapshot, in enumeration order.
    pub fn ports(&self) -> &[PortInfo] {
        &self.last
    }

    pub fn contains(&self, name: &str) -> bool {
        self.last.iter().any(|p| p.name == name)
    }

    pub fn polls(&self) -> u64 {
        self.polls
    }

    /// Forget a previously reported loss. Called when a new connection starts so
    /// that losing the same port again is reported again.
    pub fn rearm(&mut self) {
        self.lost_reported = None;
    }

    /// Record a fresh snapshot. `owned` is the port held by a connected session.
    pub fn observe(&mut self, snapshot: Vec<PortInfo>, owned: Option<&str>) -> PortPoll {
        self.polls += 1;
        let appeared: Vec<String> = snapshot
            .iter()
            .filter(|p| !self.contains(&p.name))
            .map(|p| p.name.clone())
            .collect();
        let vanished: Vec<String> = self
            .last
            .iter()
            .filter(|old| !snapshot.iter().any(|p| p.name == old.name))
            .map(|p| p.name.clone())
            .collect();
        self.last = snapshot;

        let lost = match owned {
            Some(port) if !self.contains(port) => {
                if self.lost_reported.as_deref() == Some(port) {
                    None
                } else {
                    tracing::warn!(port, "connected port vanished from enumeration");
                    self.lost_reported = Some(port.to_string());
                    Some(port.to_string())
                }
            }
            _ => {
                self.lost_reported = None;
                None
            }
        };

        if !appeared.is_empty() || !vanished.is_empty() {
            tracing::debug!(?appeared, ?vanished, "serial ports changed");
        }
        PortPoll {
            ports: self.last.clone(),
            appeared,
            vanished,
            lost,
        }
    }
}

/// Fixed-period timer for the cooperative control loop.
#[derive(Debug, Clone)]
pub struct PollTimer {
    period: Duration,
    next_due: Instant,
}

impl PollTimer {
    /// The first `due` check fires immediately.
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            next_due: Instant::now(),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// True once per elapsed period; missed periods are not replayed.
    pub fn due(&mut self, now: Instant) -> bool {
        if now < self.next_due {
            return false;
        }
        self.next_due = now + self.period;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(names: &[&str]) -> Vec<PortInfo> {
        names.iter().map(|n| PortInfo::new(*n, "mock")).collect()
    }

    #[test]
    fn test_appeared_and_vanished() {
        let mut reg = PortRegistry::new();
        let first = reg.observe(snapshot(&["a", "b"]), None);
        assert_eq!(first.appeared, vec!["a".to_string(), "b".to_string()]);
        let second = reg.observe(snapshot(&["b", "c"]), None);
        assert_eq!(second.appeared, vec!["c".to_string()]);
        assert_eq!(second.vanished, vec!["a".to_string()]);
        assert_eq!(reg.polls(), 2);
    }

    #[test]
    fn test_loss_is_edge_triggered() {
        let mut reg = PortRegistry::new();
        assert_eq!(reg.observe(snapshot(&["tty0"]), Some("tty0")).lost, None);
        assert_eq!(
            reg.observe(snapshot(&[]), Some("tty0")).lost,
            Some("tty0".to_string())
        );
        assert_eq!(reg.observe(snapshot(&[]), Some("tty0")).lost, None);
        assert_eq!(reg.observe(snapshot(&[]), Some("tty0")).lost, None);
    }

    #[test]
    fn test_loss_rearms_after_port_returns() {
        let mut reg = PortRegistry::new();
        assert!(reg.observe(snapshot(&[]), Some("tty0")).lost.is_some());
        assert!(reg.observe(snapshot(&["tty0"]), Some("tty0")).lost.is_none());
        assert!(reg.observe(snapshot(&[]), Some("tty0")).lost.is_some());
    }

    #[test]
    fn test_rearm_reports_repeat_loss() {
        let mut reg = PortRegistry::new();
        assert!(reg.observe(snapshot(&[]), Some("tty0")).lost.is_some());
        reg.rearm();
        assert_eq!(
            reg.observe(snapshot(&[]), Some("tty0")).lost,
            Some("tty0".to_string())
        );
    }

    #[test]
    fn test_no_loss_without_owner() {
        let mut reg = PortRegistry::new();
        assert!(reg.observe(snapshot(&[]), None).lost.is_none());
    }

    #[test]
    fn test_poll_timer() {
        let mut timer = PollTimer::new(Duration::from_millis(1000));
        let start = Instant::now();
        assert!(timer.due(start));
        assert!(!timer.due(start + Duration::from_millis(500)));
        assert!(timer.due(start + Duration::from_millis(1000)));
        assert!(!timer.due(start + Duration::from_millis(1500)));
    }
}
