use crate::{
    LinkError, LinkPair, LinkReader, LinkSettings, LinkWriter, PortInfo, ReadOutcome, Result,
    SerialBackend,
};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// Counters kept by the mock so tests can check how links were used.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct MockStats {
    pub opened: usize,
    pub reader_closed: usize,
    pub writer_released: usize,
    pub reads: usize,
    /// Reads performed on a link whose writer half was already released.
    pub reads_after_release: usize,
}

struct LinkState {
    port: String,
    inbound: VecDeque<Vec<u8>>,
    released: bool,
    reader_open: bool,
    hung_up: bool,
}

impl LinkState {
    fn active(&self) -> bool {
        !self.released || self.reader_open
    }
}

#[derive(Default)]
struct MockState {
    ports: Vec<PortInfo>,
    fail_next_open: Option<LinkError>,
    links: Vec<LinkState>,
    written: Vec<String>,
    stats: MockStats,
}

#[derive(Default)]
struct Shared {
    state: Mutex<MockState>,
    inbound_ready: Condvar,
}

impl Shared {
    fn lock(&self) -> Result<MutexGuard<'_, MockState>> {
        self.state
            .lock()
            .map_err(|_| LinkError::Io("mock state poisoned".to_string()))
    }
}

/// A scriptable in-process backend. Clones share the same simulated hardware.
#[derive(Clone)]
pub struct MockBackend {
    shared: Arc<Shared>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    /// A backend exposing a single port named `mock0`.
    pub fn new() -> Self {
        Self::with_ports(&["mock0"])
    }

    pub fn with_ports(names: &[&str]) -> Self {
        let backend = Self {
            shared: Arc::new(Shared::default()),
        };
        for name in names {
            backend.add_port(name);
        }
        backend
    }

    pub fn add_port(&self, name: &str) {
        if let Ok(mut state) = self.shared.lock() {
            if !state.ports.iter().any(|p| p.name == name) {
                state.ports.push(PortInfo::new(name, "mock"));
            }
        }
    }

    /// Make a port vanish from enumeration. Open links stay usable, as with a
    /// driver that keeps the descriptor alive until it is closed.
    pub fn remove_port(&self, name: &str) {
        if let Ok(mut state) = self.shared.lock() {
            state.ports.retain(|p| p.name != name);
        }
    }

    pub fn fail_next_open(&self, err: LinkError) {
        if let Ok(mut state) = self.shared.lock() {
            state.fail_next_open = Some(err);
        }
    }

    /// Queue one inbound line (terminator appended) on the most recent open link.
    pub fn push_line(&self, text: &str) {
        let mut bytes = text.as_bytes().to_vec();
        bytes.push(b'\n');
        self.push_bytes(bytes);
    }

    /// Queue raw inbound bytes as one line on the most recent open link.
    pub fn push_bytes(&self, bytes: Vec<u8>) {
        if let Ok(mut state) = self.shared.lock() {
            if let Some(link) = state.links.iter_mut().rev().find(|l| l.active()) {
                link.inbound.push_back(bytes);
            }
        }
        self.shared.inbound_ready.notify_all();
    }

    /// Simulate the device closing its end of the most recent open link.
    pub fn hang_up(&self) {
        if let Ok(mut state) = self.shared.lock() {
            if let Some(link) = state.links.iter_mut().rev().find(|l| l.active()) {
                link.hung_up = true;
            }
        }
        self.shared.inbound_ready.notify_all();
    }

    /// Every line written so far, across all links, in order.
    pub fn written(&self) -> Vec<String> {
        self.shared
            .lock()
            .map(|s| s.written.clone())
            .unwrap_or_default()
    }

    pub fn clear_written(&self) {
        if let Ok(mut state) = self.shared.lock() {
            state.written.clear();
        }
    }

    pub fn stats(&self) -> MockStats {
        self.shared.lock().map(|s| s.stats).unwrap_or_default()
    }
}

impl SerialBackend for MockBackend {
    fn list(&self) -> Result<Vec<PortInfo>> {
        Ok(self.shared.lock()?.ports.clone())
    }

    fn open(&self, port: &str, settings: &LinkSettings) -> Result<LinkPair> {
        let mut state = self.shared.lock()?;
        if let Some(err) = state.fail_next_open.take() {
            return Err(err);
        }
        if !state.ports.iter().any(|p| p.name == port) {
            return Err(LinkError::PortNotFound(port.to_string()));
        }
        if state.links.iter().any(|l| l.port == port && l.active()) {
            return Err(LinkError::PortBusy(port.to_string()));
        }
        let index = state.links.len();
        state.links.push(LinkState {
            port: port.to_string(),
            inbound: VecDeque::new(),
            released: false,
            reader_open: true,
            hung_up: false,
        });
        state.stats.opened += 1;
        Ok(LinkPair {
            reader: Box::new(MockReader {
                shared: Arc::clone(&self.shared),
                index,
                timeout: settings.read_timeout,
            }),
            writer: Box::new(MockWriter {
                shared: Arc::clone(&self.shared),
                index,
            }),
        })
    }
}

struct MockReader {
    shared: Arc<Shared>,
    index: usize,
    timeout: Duration,
}

impl LinkReader for MockReader {
    fn read_line(&mut self) -> Result<ReadOutcome> {
        let mut state = self.shared.lock()?;
        state.stats.reads += 1;
        if state.links.get(self.index).is_some_and(|l| l.released) {
            state.stats.reads_after_release += 1;
        }
        let mut waited = false;
        loop {
            let link = state.links.get_mut(self.index).ok_or(LinkError::Closed)?;
            if link.hung_up {
                return Ok(ReadOutcome::Closed);
            }
            if let Some(line) = link.inbound.pop_front() {
                return Ok(ReadOutcome::Line(line));
            }
            if waited {
                return Ok(ReadOutcome::Idle);
            }
            let (guard, _) = self
                .shared
                .inbound_ready
                .wait_timeout(state, self.timeout)
                .map_err(|_| LinkError::Io("mock state poisoned".to_string()))?;
            state = guard;
            waited = true;
        }
    }
}

impl Drop for MockReader {
    fn drop(&mut self) {
        if let Ok(mut state) = self.shared.lock() {
            if let Some(link) = state.links.get_mut(self.index) {
                link.reader_open = false;
            }
            state.stats.reader_closed += 1;
        }
    }
}

struct MockWriter {
    shared: Arc<Shared>,
    index: usize,
}

impl LinkWriter for MockWriter {
    fn write_line(&mut self, line: &[u8]) -> Result<()> {
        let mut state = self.shared.lock()?;
        if state.links.get(self.index).map_or(true, |l| l.hung_up) {
            return Err(LinkError::Closed);
        }
        state.written.push(String::from_utf8_lossy(line).into_owned());
        Ok(())
    }
}

impl Drop for MockWriter {
    fn drop(&mut self) {
        if let Ok(mut state) = self.shared.lock() {
            if let Some(link) = state.links.get_mut(self.index) {
                link.released = true;
            }
            state.stats.writer_released += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> LinkSettings {
        LinkSettings {
            baud: 9600,
            read_timeout: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_open_unknown_port_fails() {
        let backend = MockBackend::new();
        let err = backend.open("ttyNOPE", &settings()).err();
        assert_eq!(err, Some(LinkError::PortNotFound("ttyNOPE".to_string())));
    }

    #[test]
    fn test_open_twice_is_busy() -> anyhow::Result<()> {
        let backend = MockBackend::new();
        let _pair = backend.open("mock0", &settings())?;
        let err = backend.open("mock0", &settings()).err();
        assert_eq!(err, Some(LinkError::PortBusy("mock0".to_string())));
        Ok(())
    }

    #[test]
    fn test_lines_flow_through_link() -> anyhow::Result<()> {
        let backend = MockBackend::new();
        let mut pair = backend.open("mock0", &settings())?;
        assert_eq!(pair.reader.read_line()?, ReadOutcome::Idle);
        backend.push_line("hello");
        assert_eq!(
            pair.reader.read_line()?,
            ReadOutcome::Line(b"hello\n".to_vec())
        );
        pair.writer.write_line(b"M0\n")?;
        assert_eq!(backend.written(), vec!["M0\n".to_string()]);
        backend.hang_up();
        assert_eq!(pair.reader.read_line()?, ReadOutcome::Closed);
        Ok(())
    }

    #[test]
    fn test_drop_counts_and_port_reuse() -> anyhow::Result<()> {
        let backend = MockBackend::new();
        let pair = backend.open("mock0", &settings())?;
        drop(pair);
        let stats = backend.stats();
        assert_eq!(stats.reader_closed, 1);
        assert_eq!(stats.writer_released, 1);
        assert!(backend.open("mock0", &settings()).is_ok());
        Ok(())
    }

    #[test]
    fn test_read_after_release_is_counted() -> anyhow::Result<()> {
        let backend = MockBackend::new();
        let LinkPair { mut reader, writer } = backend.open("mock0", &settings())?;
        drop(writer);
        let _ = reader.read_line()?;
        assert_eq!(backend.stats().reads_after_release, 1);
        Ok(())
    }
}
