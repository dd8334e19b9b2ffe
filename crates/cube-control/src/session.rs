use crate::config::ConfigStore;
use crate::console::{Console, EntryKind};
use crate::decode::TelemetryEvent;
use crate::encode::{build_command, Command, MachineCommand};
use crate::error::{Result, SessionError};
use crate::metrics::SessionMetrics;
use crate::ports::{PortPoll, PortRegistry};
use crate::reader::{ReaderHandle, ReaderMessage, StopOutcome};
use crate::types::{DeviceStatus, SessionState};
use serial_link::{LinkSettings, LinkWriter, PortInfo, SerialBackend};
use std::time::Duration;

/// Slack added on top of the read timeout when waiting for the reader to stop.
pub const CLOSE_MARGIN: Duration = Duration::from_millis(500);

/// Floor for the per-read timeout; a zero timeout would spin the reader loop.
pub const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

#[derive(Clone, Debug, PartialEq)]
pub struct SessionSettings {
    pub baud: u32,
    pub read_timeout: Duration,
    /// Bounded wait for the reader on close; raised to cover one read timeout.
    pub close_timeout: Duration,
    /// Sent in order right after every successful open.
    pub handshake: Vec<MachineCommand>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        let read_timeout = Duration::from_millis(100);
        Self {
            baud: 115_200,
            read_timeout,
            close_timeout: read_timeout + CLOSE_MARGIN,
            handshake: vec![
                MachineCommand::Reset,
                MachineCommand::RelativePositioning,
                MachineCommand::ReportInterval { ms: 500 },
            ],
        }
    }
}

/// What a control loop should react to after a tick.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    Telemetry(TelemetryEvent),
    LinkClosed { port: String, reason: String },
}

/// The single connection to the machine controller and everything hanging off it.
///
/// All methods run on the control thread. The only other thread is the reader
/// loop, which exists exactly while the session is `Connected` and talks back
/// through a channel drained by [`DeviceSession::tick`].
pub struct DeviceSession<B: SerialBackend> {
    backend: B,
    settings: SessionSettings,
    state: SessionState,
    port: Option<String>,
    link: LinkSettings,
    writer: Option<Box<dyn LinkWriter>>,
    reader: Option<ReaderHandle>,
    console: Console,
    config: ConfigStore,
    status: DeviceStatus,
    registry: PortRegistry,
    metrics: Option<SessionMetrics>,
}

impl<B: SerialBackend> DeviceSession<B> {
    pub fn new(backend: B, settings: SessionSettings) -> Self {
        let link = LinkSettings {
            baud: settings.baud,
            read_timeout: settings.read_timeout,
        };
        Self {
            backend,
            settings,
            state: SessionState::Disconnected,
            port: None,
            link,
            writer: None,
            reader: None,
            console: Console::new(),
            config: ConfigStore::new(),
            status: DeviceStatus::default(),
            registry: PortRegistry::new(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: SessionMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_config(mut self, config: ConfigStore) -> Self {
        self.config = config;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == SessionState::Connected
    }

    pub fn current_port(&self) -> Option<&str> {
        self.port.as_deref()
    }

    pub fn baud(&self) -> Option<u32> {
        self.is_open().then_some(self.link.baud)
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn console(&self) -> &Console {
        &self.console
    }

    pub fn console_mut(&mut self) -> &mut Console {
        &mut self.console
    }

    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut ConfigStore {
        &mut self.config
    }

    pub fn status(&self) -> &DeviceStatus {
        &self.status
    }

    pub fn registry(&self) -> &PortRegistry {
        &self.registry
    }

    /// Whether the reader still holds an open read half. False when disconnected.
    pub fn reader_alive(&self) -> bool {
        self.reader.as_ref().is_some_and(ReaderHandle::is_link_open)
    }

    /// One-off enumeration that does not touch loss detection.
    pub fn list_ports(&self) -> Result<Vec<PortInfo>> {
        self.backend.list().map_err(SessionError::Enumerate)
    }

    /// Open with the configured baud rate and read timeout.
    pub fn connect(&mut self, port: &str) -> Result<()> {
        self.open(port, self.settings.baud, self.settings.read_timeout)
    }

    /// Open `port`, start the reader loop and send the handshake.
    pub fn open(&mut self, port: &str, baud: u32, timeout: Duration) -> Result<()> {
        if self.state != SessionState::Disconnected {
            return Err(SessionError::AlreadyConnected(
                self.port.clone().unwrap_or_default(),
            ));
        }
        self.state = SessionState::Connecting;
        let link = LinkSettings {
            baud,
            read_timeout: timeout.max(MIN_READ_TIMEOUT),
        };
        let pair = match self.backend.open(port, &link) {
            Ok(pair) => pair,
            Err(source) => {
                self.state = SessionState::Disconnected;
                tracing::warn!(port, %source, "open failed");
                return Err(SessionError::PortOpen {
                    port: port.to_string(),
                    source,
                });
            }
        };
        let reader = match ReaderHandle::spawn(pair.reader, port, self.metrics.clone()) {
            Ok(reader) => reader,
            Err(e) => {
                self.state = SessionState::Disconnected;
                return Err(e);
            }
        };
        self.reader = Some(reader);
        self.writer = Some(pair.writer);
        self.port = Some(port.to_string());
        self.link = link;
        self.registry.rearm();
        self.state = SessionState::Connected;
        if let Some(m) = &self.metrics {
            m.connects.inc();
        }
        tracing::info!(port, baud, "connected");
        self.console.append(
            format!("Connected to {port} @ baudrate {baud}"),
            EntryKind::Info,
        );

        for cmd in self.settings.handshake.clone() {
            if let Err(e) = self.send(cmd) {
                tracing::warn!(port, error = %e, "handshake failed; closing");
                self.shutdown();
                return Err(e);
            }
        }
        Ok(())
    }

    /// Encode and write one vocabulary command with the current parameters.
    pub fn send(&mut self, cmd: MachineCommand) -> Result<String> {
        let command = build_command(cmd, &self.config);
        self.write_command(command)
    }

    /// Write a free-form command typed by the operator.
    pub fn send_raw(&mut self, body: &str, comment: Option<&str>) -> Result<String> {
        if body.trim().is_empty() {
            return Err(SessionError::EmptyCommand);
        }
        let mut command = Command::new(body);
        command.comment = comment.map(str::to_string);
        self.write_command(command)
    }

    fn write_command(&mut self, command: Command) -> Result<String> {
        let (Some(writer), Some(port), SessionState::Connected) =
            (self.writer.as_mut(), self.port.as_deref(), self.state)
        else {
            self.console
                .append("Serial port not connected.", EntryKind::Info);
            return Err(SessionError::NotConnected);
        };
        let wire = command.encode();
        writer
            .write_line(wire.as_bytes())
            .map_err(|source| SessionError::Write {
                port: port.to_string(),
                source,
            })?;
        tracing::debug!(port, line = %wire.trim_end(), "tx");
        if let Some(m) = &self.metrics {
            m.lines_tx.inc();
        }
        self.console.append(wire.clone(), EntryKind::Sent);
        Ok(wire)
    }

    /// User-initiated disconnect.
    pub fn close(&mut self) -> Result<()> {
        if self.state != SessionState::Connected {
            return Err(SessionError::NotConnected);
        }
        if let Some(port) = self.shutdown() {
            tracing::info!(%port, "disconnected");
            self.console
                .append(format!("Disconnected from {port}"), EntryKind::Info);
        }
        Ok(())
    }

    /// Stop the reader (bounded join), then release the write half.
    fn shutdown(&mut self) -> Option<String> {
        self.state = SessionState::Closing;
        if let Some(reader) = self.reader.take() {
            let wait = self.close_wait();
            if reader.stop(wait) == StopOutcome::TimedOut {
                tracing::warn!(port = ?self.port, ?wait, "reader left running after close");
            }
        }
        self.writer = None;
        self.state = SessionState::Disconnected;
        self.port.take()
    }

    fn close_wait(&self) -> Duration {
        self.settings
            .close_timeout
            .max(self.link.read_timeout + CLOSE_MARGIN)
    }

    /// Drain the reader channel once. Raw lines go to the console, structured
    /// telemetry to the status model.
    pub fn tick(&mut self) -> Vec<SessionEvent> {
        let Some(reader) = self.reader.as_ref() else {
            return Vec::new();
        };
        let messages = reader.drain();
        let mut out = Vec::with_capacity(messages.len());
        let mut closed = None;
        for msg in messages {
            match msg {
                ReaderMessage::Event(event) => {
                    if let TelemetryEvent::RawLine { text } = &event {
                        self.console.append(text.clone(), EntryKind::Received);
                    } else {
                        self.status.apply(&event);
                    }
                    out.push(SessionEvent::Telemetry(event));
                }
                ReaderMessage::Closed { reason } => closed = Some(reason),
            }
        }
        if let Some(reason) = closed {
            if let Some(port) = self.shutdown() {
                self.console.append(
                    format!("Connection to {port} closed: {reason}"),
                    EntryKind::Info,
                );
                out.push(SessionEvent::LinkClosed { port, reason });
            }
        }
        out
    }

    /// Enumerate ports and run loss detection. Meant to be called on a fixed
    /// period from the control loop.
    pub fn poll_ports(&mut self) -> Result<PortPoll> {
        let snapshot = self.list_ports()?;
        let owned = if self.is_open() {
            self.port.as_deref()
        } else {
            None
        };
        let poll = self.registry.observe(snapshot, owned);
        let Some(lost) = poll.lost.clone() else {
            return Ok(poll);
        };
        if self.is_open() && self.port.as_deref() == Some(lost.as_str()) {
            self.shutdown();
            if let Some(m) = &self.metrics {
                m.connection_lost.inc();
            }
            tracing::error!(port = %lost, "connection to device lost");
            self.console
                .append("Connection to device lost!", EntryKind::Error);
        }
        Err(SessionError::LostConnection(lost))
    }
}

impl<B: SerialBackend> Drop for DeviceSession<B> {
    fn drop(&mut self) {
        if self.state == SessionState::Connected {
            self.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_link::MockBackend;

    fn quick_settings() -> SessionSettings {
        SessionSettings {
            read_timeout: Duration::from_millis(20),
            close_timeout: Duration::from_millis(200),
            ..SessionSettings::default()
        }
    }

    #[test]
    fn test_open_sends_handshake_in_order() -> anyhow::Result<()> {
        let backend = MockBackend::new();
        let mut session = DeviceSession::new(backend.clone(), quick_settings());
        session.connect("mock0")?;
        assert!(session.is_open());
        assert_eq!(session.current_port(), Some("mock0"));
        assert_eq!(
            backend.written(),
            vec![
                "M0 ;restart device\n".to_string(),
                "G91 ;relative positioning\n".to_string(),
                "M1 500 ;set report interval to 500ms\n".to_string(),
            ]
        );
        let kinds: Vec<EntryKind> = session.console().entries().iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EntryKind::Info,
                EntryKind::Sent,
                EntryKind::Sent,
                EntryKind::Sent
            ]
        );
        session.close()?;
        assert_eq!(session.state(), SessionState::Disconnected);
        Ok(())
    }

    #[test]
    fn test_handshake_without_relative_mode() -> anyhow::Result<()> {
        let backend = MockBackend::new();
        let settings = SessionSettings {
            handshake: vec![MachineCommand::Reset, MachineCommand::ReportInterval { ms: 250 }],
            ..quick_settings()
        };
        let mut session = DeviceSession::new(backend.clone(), settings);
        session.open("mock0", 9600, Duration::from_millis(20))?;
        assert_eq!(session.baud(), Some(9600));
        assert_eq!(backend.written().len(), 2);
        assert!(backend.written()[1].starts_with("M1 250"));
        Ok(())
    }

    #[test]
    fn test_open_failure_stays_disconnected() {
        let backend = MockBackend::new();
        let mut session = DeviceSession::new(backend, quick_settings());
        let err = session.connect("nope");
        assert!(matches!(err, Err(SessionError::PortOpen { .. })));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(session.current_port(), None);
    }

    #[test]
    fn test_second_open_is_rejected() -> anyhow::Result<()> {
        let backend = MockBackend::with_ports(&["a", "b"]);
        let mut session = DeviceSession::new(backend, quick_settings());
        session.connect("a")?;
        assert!(matches!(
            session.connect("b"),
            Err(SessionError::AlreadyConnected(p)) if p == "a"
        ));
        assert_eq!(session.current_port(), Some("a"));
        Ok(())
    }

    #[test]
    fn test_send_while_disconnected() {
        let backend = MockBackend::new();
        let mut session = DeviceSession::new(backend.clone(), quick_settings());
        assert!(matches!(
            session.send(MachineCommand::Home),
            Err(SessionError::NotConnected)
        ));
        assert!(backend.written().is_empty());
        assert_eq!(
            session.console().entries()[0].text,
            "Serial port not connected."
        );
    }

    #[test]
    fn test_close_requires_connection() {
        let mut session = DeviceSession::new(MockBackend::new(), quick_settings());
        assert!(matches!(session.close(), Err(SessionError::NotConnected)));
    }

    #[test]
    fn test_send_raw_rejects_empty() -> anyhow::Result<()> {
        let mut session = DeviceSession::new(MockBackend::new(), quick_settings());
        session.connect("mock0")?;
        assert!(matches!(
            session.send_raw("  \n", None),
            Err(SessionError::EmptyCommand)
        ));
        assert_eq!(session.send_raw("G28\n", Some("home"))?, "G28 ;home\n");
        Ok(())
    }

    struct StuckReader;

    impl serial_link::LinkReader for StuckReader {
        fn read_line(&mut self) -> serial_link::Result<serial_link::ReadOutcome> {
            std::thread::sleep(Duration::from_secs(1));
            Ok(serial_link::ReadOutcome::Idle)
        }
    }

    struct NullWriter;

    impl LinkWriter for NullWriter {
        fn write_line(&mut self, _line: &[u8]) -> serial_link::Result<()> {
            Ok(())
        }
    }

    /// A port whose reads ignore cancellation for longer than the close wait.
    struct StuckBackend;

    impl SerialBackend for StuckBackend {
        fn list(&self) -> serial_link::Result<Vec<PortInfo>> {
            Ok(vec![PortInfo::new("stuck0", "mock")])
        }

        fn open(
            &self,
            _port: &str,
            _settings: &LinkSettings,
        ) -> serial_link::Result<serial_link::LinkPair> {
            Ok(serial_link::LinkPair {
                reader: Box::new(StuckReader),
                writer: Box::new(NullWriter),
            })
        }
    }

    #[test]
    fn test_close_completes_when_reader_overruns_wait() -> anyhow::Result<()> {
        let settings = SessionSettings {
            read_timeout: Duration::from_millis(20),
            close_timeout: Duration::from_millis(20),
            handshake: Vec::new(),
            ..SessionSettings::default()
        };
        let mut session = DeviceSession::new(StuckBackend, settings);
        session.connect("stuck0")?;
        let started = std::time::Instant::now();
        session.close()?;
        assert!(started.elapsed() < Duration::from_millis(900));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(session.current_port(), None);
        assert!(!session.reader_alive());
        assert!(session
            .console()
            .entries()
            .iter()
            .any(|e| e.text == "Disconnected from stuck0"));
        Ok(())
    }
}
