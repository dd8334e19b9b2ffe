use prometheus::{Encoder, IntCounter, Registry, TextEncoder};

/// Link counters. Cheap to clone; clones share the same underlying counters.
#[derive(Clone)]
pub struct SessionMetrics {
    pub lines_tx: IntCounter,
    pub lines_rx: IntCounter,
    pub lines_dropped: IntCounter,
    pub connects: IntCounter,
    pub connection_lost: IntCounter,
}

#[derive(Clone)]
pub struct MetricsHub {
    pub registry: Registry,
    pub session: SessionMetrics,
}

impl MetricsHub {
    pub fn new() -> Result<Self, String> {
        let counter = |name: &str, help: &str| {
            IntCounter::new(name, help).map_err(|e| format!("metrics init error: {e}"))
        };
        let session = SessionMetrics {
            lines_tx: counter("cube_lines_tx", "Total command lines written")?,
            lines_rx: counter("cube_lines_rx", "Total inbound lines decoded")?,
            lines_dropped: counter("cube_lines_dropped", "Inbound lines dropped as undecodable")?,
            connects: counter("cube_connects", "Successful connections")?,
            connection_lost: counter(
                "cube_connection_lost",
                "Connections closed because the port vanished",
            )?,
        };
        let registry = Registry::new();
        for c in [
            &session.lines_tx,
            &session.lines_rx,
            &session.lines_dropped,
            &session.connects,
            &session.connection_lost,
        ] {
            let _ = registry.register(Box::new(c.clone()));
        }
        Ok(Self { registry, session })
    }

    pub fn encode_text(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            return format!("error encoding metrics: {e}");
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_render() -> Result<(), String> {
        let hub = MetricsHub::new()?;
        hub.session.lines_tx.inc_by(3);
        let text = hub.encode_text();
        assert!(text.contains("cube_lines_tx 3"));
        assert!(text.contains("cube_connection_lost 0"));
        Ok(())
    }
}
