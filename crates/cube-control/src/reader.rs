use crate::decode::{parse_line, TelemetryEvent};
use crate::error::{Result, SessionError};
use crate::metrics::SessionMetrics;
use serial_link::{LinkReader, ReadOutcome};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Messages from the reader thread to the control thread.
#[derive(Clone, Debug, PartialEq)]
pub enum ReaderMessage {
    Event(TelemetryEvent),
    /// The loop stopped on its own because the link closed or failed.
    Closed { reason: String },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StopOutcome {
    Joined,
    /// The loop did not acknowledge cancellation in time and was left detached.
    /// It still owns its read half, so nothing it touches is freed under it.
    TimedOut,
}

/// Background loop owning the read half of one connection.
struct ReaderLoop {
    reader: Box<dyn LinkReader>,
    port: String,
    cancel: Arc<AtomicBool>,
    link_open: Arc<AtomicBool>,
    events: Sender<ReaderMessage>,
    done: Sender<()>,
    metrics: Option<SessionMetrics>,
}

impl ReaderLoop {
    fn run(self) {
        let ReaderLoop {
            mut reader,
            port,
            cancel,
            link_open,
            events,
            done,
            metrics,
        } = self;
        tracing::debug!(%port, "reader loop started");

        let mut closed_reason = None;
        while !cancel.load(Ordering::Acquire) {
            match reader.read_line() {
                Ok(ReadOutcome::Idle) => {}
                Ok(ReadOutcome::Line(bytes)) => {
                    let Ok(line) = String::from_utf8(bytes) else {
                        tracing::trace!(%port, "dropped undecodable line");
                        if let Some(m) = &metrics {
                            m.lines_dropped.inc();
                        }
                        continue;
                    };
                    if let Some(m) = &metrics {
                        m.lines_rx.inc();
                    }
                    tracing::trace!(%port, line = %line.trim_end(), "rx");
                    let event = parse_line(&line);
                    if events.send(ReaderMessage::Event(event)).is_err() {
                        // Control side is gone; nobody is left to read for.
                        break;
                    }
                }
                Ok(ReadOutcome::Closed) => {
                    closed_reason = Some("device closed the link".to_string());
                    break;
                }
                Err(e) => {
                    closed_reason = Some(e.to_string());
                    break;
                }
            }
        }

        drop(reader);
        link_open.store(false, Ordering::Release);
        if let Some(reason) = closed_reason {
            tracing::info!(%port, %reason, "reader loop exited: link closed");
            let _ = events.send(ReaderMessage::Closed { reason });
        } else {
            tracing::debug!(%port, "reader loop exited: cancelled");
        }
        let _ = done.send(());
    }
}

/// Control-thread side of a running reader loop.
pub struct ReaderHandle {
    cancel: Arc<AtomicBool>,
    link_open: Arc<AtomicBool>,
    events: Receiver<ReaderMessage>,
    done: Receiver<()>,
    thread: Option<JoinHandle<()>>,
}

impl ReaderHandle {
    pub fn spawn(
        reader: Box<dyn LinkReader>,
        port: &str,
        metrics: Option<SessionMetrics>,
    ) -> Result<Self> {
        let cancel = Arc::new(AtomicBool::new(false));
        let link_open = Arc::new(AtomicBool::new(true));
        let (events_tx, events_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();
        let body = ReaderLoop {
            reader,
            port: port.to_string(),
            cancel: Arc::clone(&cancel),
            link_open: Arc::clone(&link_open),
            events: events_tx,
            done: done_tx,
            metrics,
        };
        let thread = thread::Builder::new()
            .name(format!("cube-reader:{port}"))
            .spawn(move || body.run())
            .map_err(|e| SessionError::Spawn(e.to_string()))?;
        Ok(Self {
            cancel,
            link_open,
            events: events_rx,
            done: done_rx,
            thread: Some(thread),
        })
    }

    /// Everything the loop has produced since the last drain, without blocking.
    pub fn drain(&self) -> Vec<ReaderMessage> {
        self.events.try_iter().collect()
    }

    /// False once the loop has closed its read half.
    pub fn is_link_open(&self) -> bool {
        self.link_open.load(Ordering::Acquire)
    }

    /// Raise the cancellation flag and wait up to `wait` for the loop to exit.
    pub fn stop(mut self, wait: Duration) -> StopOutcome {
        self.cancel.store(true, Ordering::Release);
        match self.done.recv_timeout(wait) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(thread) = self.thread.take() {
                    if thread.join().is_err() {
                        tracing::error!("reader thread panicked");
                    }
                }
                StopOutcome::Joined
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(?wait, "reader loop did not stop in time; detaching");
                StopOutcome::TimedOut
            }
        }
    }
}

impl Drop for ReaderHandle {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_link::{LinkSettings, MockBackend, SerialBackend};
    use std::time::Instant;

    fn settings() -> LinkSettings {
        LinkSettings {
            baud: 115_200,
            read_timeout: Duration::from_millis(20),
        }
    }

    fn drain_until(handle: &ReaderHandle, want: usize) -> Vec<ReaderMessage> {
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut out = Vec::new();
        while out.len() < want && Instant::now() < deadline {
            out.extend(handle.drain());
            thread::sleep(Duration::from_millis(5));
        }
        out
    }

    #[test]
    fn test_lines_are_parsed_and_forwarded() -> anyhow::Result<()> {
        let backend = MockBackend::new();
        let pair = backend.open("mock0", &settings())?;
        let handle = ReaderHandle::spawn(pair.reader, "mock0", None)?;
        backend.push_line("<ADC> raw:1 calc:1.5000V");
        backend.push_bytes(vec![0xff, 0xfe, b'\n']);
        backend.push_line("hello");
        let msgs = drain_until(&handle, 2);
        assert_eq!(
            msgs,
            vec![
                ReaderMessage::Event(TelemetryEvent::AdcReading { voltage: 1.5 }),
                ReaderMessage::Event(TelemetryEvent::RawLine {
                    text: "hello\n".to_string()
                }),
            ]
        );
        assert_eq!(handle.stop(Duration::from_millis(500)), StopOutcome::Joined);
        drop(pair.writer);
        assert_eq!(backend.stats().reader_closed, 1);
        Ok(())
    }

    #[test]
    fn test_hang_up_reports_closed() -> anyhow::Result<()> {
        let backend = MockBackend::new();
        let pair = backend.open("mock0", &settings())?;
        let handle = ReaderHandle::spawn(pair.reader, "mock0", None)?;
        backend.hang_up();
        let msgs = drain_until(&handle, 1);
        assert!(matches!(msgs.as_slice(), [ReaderMessage::Closed { .. }]));
        assert!(!handle.is_link_open());
        assert_eq!(handle.stop(Duration::from_millis(500)), StopOutcome::Joined);
        Ok(())
    }

    #[test]
    fn test_dropped_lines_are_counted() -> anyhow::Result<()> {
        let hub = crate::metrics::MetricsHub::new().map_err(anyhow::Error::msg)?;
        let backend = MockBackend::new();
        let pair = backend.open("mock0", &settings())?;
        let handle = ReaderHandle::spawn(pair.reader, "mock0", Some(hub.session.clone()))?;
        backend.push_bytes(vec![0xc3, 0x28, b'\n']);
        backend.push_line("ok");
        let _ = drain_until(&handle, 1);
        assert_eq!(handle.stop(Duration::from_millis(500)), StopOutcome::Joined);
        assert_eq!(hub.session.lines_dropped.get(), 1);
        assert_eq!(hub.session.lines_rx.get(), 1);
        Ok(())
    }

    /// Blocks far longer than any close wait and ignores cancellation meanwhile.
    struct StuckReader {
        block: Duration,
        released: Arc<AtomicBool>,
    }

    impl LinkReader for StuckReader {
        fn read_line(&mut self) -> serial_link::Result<ReadOutcome> {
            thread::sleep(self.block);
            Ok(ReadOutcome::Idle)
        }
    }

    impl Drop for StuckReader {
        fn drop(&mut self) {
            self.released.store(true, Ordering::Release);
        }
    }

    #[test]
    fn test_stop_times_out_and_detaches() -> anyhow::Result<()> {
        let released = Arc::new(AtomicBool::new(false));
        let reader = StuckReader {
            block: Duration::from_millis(300),
            released: Arc::clone(&released),
        };
        let handle = ReaderHandle::spawn(Box::new(reader), "stuck0", None)?;
        thread::sleep(Duration::from_millis(20));

        let started = Instant::now();
        assert_eq!(handle.stop(Duration::from_millis(30)), StopOutcome::TimedOut);
        assert!(started.elapsed() < Duration::from_millis(250));

        // The detached loop still sees the flag once its read returns.
        let deadline = Instant::now() + Duration::from_secs(2);
        while !released.load(Ordering::Acquire) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(released.load(Ordering::Acquire));
        Ok(())
    }
}
