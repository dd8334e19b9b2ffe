use crate::{
    LineBuffer, LinkError, LinkPair, LinkReader, LinkSettings, LinkWriter, PortInfo,
    ReadOutcome, Result, SerialBackend,
};
use serialport::{SerialPort, SerialPortType};
use std::io::{self, Read, Write};

/// Operating-system serial ports through the `serialport` crate.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemSerial;

impl SerialBackend for SystemSerial {
    fn list(&self) -> Result<Vec<PortInfo>> {
        let ports = serialport::available_ports().map_err(|e| LinkError::Io(e.to_string()))?;
        Ok(ports
            .into_iter()
            .map(|p| {
                let kind = match p.port_type {
                    SerialPortType::UsbPort(_) => "usb",
                    SerialPortType::PciPort => "pci",
                    SerialPortType::BluetoothPort => "bluetooth",
                    SerialPortType::Unknown => "serial",
                };
                PortInfo::new(p.port_name, kind)
            })
            .collect())
    }

    fn open(&self, port: &str, settings: &LinkSettings) -> Result<LinkPair> {
        let handle = serialport::new(port, settings.baud)
            .timeout(settings.read_timeout)
            .open()
            .map_err(|e| map_open_error(port, &e))?;
        // Second handle on the same descriptor so reads and writes never share a lock.
        let write_half = handle.try_clone().map_err(|e| map_open_error(port, &e))?;
        tracing::debug!(port, baud = settings.baud, "serial port opened");
        Ok(LinkPair {
            reader: Box::new(SerialReader {
                port: handle,
                lines: LineBuffer::new(),
            }),
            writer: Box::new(SerialWriter { port: write_half }),
        })
    }
}

fn map_open_error(port: &str, err: &serialport::Error) -> LinkError {
    match err.kind() {
        serialport::ErrorKind::NoDevice => {
            if err.description.to_ascii_lowercase().contains("busy") {
                LinkError::PortBusy(port.to_string())
            } else {
                LinkError::PortNotFound(port.to_string())
            }
        }
        serialport::ErrorKind::Io(io::ErrorKind::NotFound) => {
            LinkError::PortNotFound(port.to_string())
        }
        serialport::ErrorKind::Io(io::ErrorKind::PermissionDenied) => {
            LinkError::PermissionDenied(port.to_string())
        }
        _ => {
            let msg = err.to_string();
            if msg.to_ascii_lowercase().contains("busy") {
                LinkError::PortBusy(port.to_string())
            } else {
                LinkError::Io(format!("{port}: {msg}"))
            }
        }
    }
}

struct SerialReader {
    port: Box<dyn SerialPort>,
    lines: LineBuffer,
}

impl LinkReader for SerialReader {
    fn read_line(&mut self) -> Result<ReadOutcome> {
        if let Some(line) = self.lines.take_line() {
            return Ok(ReadOutcome::Line(line));
        }
        let mut buf = [0u8; 256];
        match self.port.read(&mut buf) {
            Ok(0) => Ok(ReadOutcome::Idle),
            Ok(n) => {
                self.lines.extend(buf.get(..n).unwrap_or_default());
                Ok(self
                    .lines
                    .take_line()
                    .map_or(ReadOutcome::Idle, ReadOutcome::Line))
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(ReadOutcome::Idle)
            }
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(ReadOutcome::Closed),
            Err(e) => Err(LinkError::Io(e.to_string())),
        }
    }
}

struct SerialWriter {
    port: Box<dyn SerialPort>,
}

impl LinkWriter for SerialWriter {
    fn write_line(&mut self, line: &[u8]) -> Result<()> {
        self.port
            .write_all(line)
            .and_then(|()| self.port.flush())
            .map_err(|e| LinkError::Io(e.to_string()))
    }
}
