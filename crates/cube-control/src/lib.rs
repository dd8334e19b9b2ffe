//! cube-control: device-communication engine for the CUBE EDM machine controller
//!
//! Connection lifecycle over a serial line, a background reader loop, the line-oriented
//! telemetry parser, the outbound command encoder, port-enumeration loss detection and a
//! filtered console log. [`DeviceSession`] ties them together.

mod types;
pub use types::{DeviceStatus, SessionState};

mod error;
pub use error::{Result, SessionError};

mod config;
pub use config::{
    ConfigError, ConfigStore, Param, ParamKind, ParamValue, Validation, PARAM_MAX,
    PARAM_MIN_EXCLUSIVE,
};

mod encode;
pub use encode::{
    build_command, encode_command, format_line, Command, Direction, MachineCommand, StepSize,
    STEP_TABLE_UM,
};

mod decode;
pub use decode::{parse_line, TelemetryEvent, ADC_PATTERN, POS_PATTERN};

mod console;
pub use console::{Appended, Console, ConsoleEntry, EntryKind};

mod ports;
pub use ports::{PollTimer, PortPoll, PortRegistry, DEFAULT_POLL_INTERVAL};

mod metrics;
pub use metrics::{MetricsHub, SessionMetrics};

mod reader;
pub use reader::{ReaderHandle, ReaderMessage, StopOutcome};

mod session;
pub use session::{DeviceSession, SessionEvent, SessionSettings, CLOSE_MARGIN, MIN_READ_TIMEOUT};

mod profile;
pub use profile::{load_profile_file, parse_profile, SessionProfile};

pub use serial_link::{LinkError, PortInfo, SerialBackend};
