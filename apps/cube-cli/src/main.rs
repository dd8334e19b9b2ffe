use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::io::BufRead;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};
use time::format_description::well_known::Rfc3339;
use tracing::{error, info, warn};

use cube_control as cube;
use cube_control::{
    ConfigStore, DeviceSession, EntryKind, MachineCommand, SerialBackend, SessionError,
    SessionEvent, SessionProfile, TelemetryEvent, Validation,
};
use serial_link::{MockBackend, SystemSerial};

mod intent;
use intent::{parse_intent, Intent};

/// Control loop period; the reader channel is drained once per tick.
const TICK: Duration = Duration::from_millis(50);

#[derive(Parser, Debug)]
#[command(
    name = "cube",
    version,
    about = "CUBE EDM machine controller CLI",
    disable_help_subcommand = true
)]
struct Cli {
    /// Use the in-process mock backend instead of OS serial ports
    #[arg(long, action = ArgAction::SetTrue, global = true)]
    mock: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List serial ports visible to the OS
    Ports,
    /// Classify one inbound line and print the telemetry event as JSON
    Parse {
        /// Line as received from the controller
        line: String,
    },
    /// Show the generator/ADC/auto-mode parameters
    Config {
        /// Override as name=value (validated; rejected values keep the default)
        #[arg(long = "set", value_name = "NAME=VALUE")]
        set: Vec<String>,
    },
    /// Print the wire text of a vocabulary command
    Encode {
        #[arg(value_enum)]
        command: CommandKind,
        /// Step size for `move-up`/`move-down` (e.g. 2.5um, 1mm)
        #[arg(long, default_value = "0.5µm")]
        step: String,
        /// Report interval in milliseconds for `report-interval`
        #[arg(long, default_value_t = 500u32)]
        ms: u32,
        /// Output state for `t1`/`t2`
        #[arg(long, action = ArgAction::SetTrue)]
        on: bool,
        /// Parameter override as name=value
        #[arg(long = "set", value_name = "NAME=VALUE")]
        set: Vec<String>,
    },
    /// Connect and run an interactive console (stdin lines are sent to the device)
    Monitor {
        /// Port to open (e.g. /dev/ttyUSB0, COM3, mock0)
        #[arg(long)]
        port: String,
        /// Session profile YAML
        #[arg(long)]
        profile: Option<String>,
        /// Baud rate (overrides profile)
        #[arg(long)]
        baud: Option<u32>,
        /// Do not filter device-internal chatter
        #[arg(long, action = ArgAction::SetTrue)]
        show_all: bool,
        /// Stop after this many seconds (default: until EOF or `:quit`)
        #[arg(long)]
        duration_s: Option<u64>,
        /// Prefix console lines with RFC 3339 timestamps
        #[arg(long, action = ArgAction::SetTrue)]
        timestamps: bool,
        /// Print Prometheus counters on exit
        #[arg(long, action = ArgAction::SetTrue)]
        metrics: bool,
    },
    /// Connect, send one command, print replies for a while, disconnect
    Send {
        #[arg(long)]
        port: String,
        /// Command body (e.g. G28)
        body: String,
        /// Optional comment appended as ` ;comment`
        #[arg(long)]
        comment: Option<String>,
        /// Milliseconds to listen for replies
        #[arg(long, default_value_t = 1000u64)]
        listen_ms: u64,
        /// Session profile YAML
        #[arg(long)]
        profile: Option<String>,
        /// Baud rate (overrides profile)
        #[arg(long)]
        baud: Option<u32>,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CommandKind {
    Reset,
    Relative,
    Absolute,
    ReportInterval,
    Report,
    GeneratorOn,
    GeneratorOff,
    AutoOn,
    AutoOff,
    Home,
    MoveUp,
    MoveDown,
    Touch,
    StepperOn,
    StepperOff,
    T1,
    T2,
}

impl CommandKind {
    fn into_command(self, step: &str, ms: u32, on: bool) -> Result<MachineCommand> {
        let parse_step = || -> Result<cube::StepSize> { step.parse().map_err(anyhow::Error::msg) };
        Ok(match self {
            CommandKind::Reset => MachineCommand::Reset,
            CommandKind::Relative => MachineCommand::RelativePositioning,
            CommandKind::Absolute => MachineCommand::AbsolutePositioning,
            CommandKind::ReportInterval => MachineCommand::ReportInterval { ms },
            CommandKind::Report => MachineCommand::RequestReport,
            CommandKind::GeneratorOn => MachineCommand::GeneratorOn,
            CommandKind::GeneratorOff => MachineCommand::GeneratorOff,
            CommandKind::AutoOn => MachineCommand::AutoOn,
            CommandKind::AutoOff => MachineCommand::AutoOff,
            CommandKind::Home => MachineCommand::Home,
            CommandKind::MoveUp => MachineCommand::Move {
                step: parse_step()?,
                direction: cube::Direction::Up,
            },
            CommandKind::MoveDown => MachineCommand::Move {
                step: parse_step()?,
                direction: cube::Direction::Down,
            },
            CommandKind::Touch => MachineCommand::TouchMode,
            CommandKind::StepperOn => MachineCommand::StepperEnable,
            CommandKind::StepperOff => MachineCommand::StepperDisable,
            CommandKind::T1 => MachineCommand::MosfetT1(on),
            CommandKind::T2 => MachineCommand::MosfetT2(on),
        })
    }
}

fn main() -> Result<()> {
    setup_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Ports => {
            if cli.mock {
                list_ports(&MockBackend::new())
            } else {
                list_ports(&SystemSerial)
            }
        }
        Commands::Parse { line } => parse_cmd(&line),
        Commands::Config { set } => config_show(&set),
        Commands::Encode {
            command,
            step,
            ms,
            on,
            set,
        } => encode_cmd(command, &step, ms, on, &set),
        Commands::Monitor {
            port,
            profile,
            baud,
            show_all,
            duration_s,
            timestamps,
            metrics,
        } => {
            let mut profile = load_profile(profile.as_deref(), baud)?;
            profile.show_all |= show_all;
            let opts = MonitorOpts {
                duration: duration_s.map(Duration::from_secs),
                timestamps,
                metrics,
            };
            if cli.mock {
                monitor(MockBackend::with_ports(&[port.as_str()]), &port, &profile, &opts)
            } else {
                monitor(SystemSerial, &port, &profile, &opts)
            }
        }
        Commands::Send {
            port,
            body,
            comment,
            listen_ms,
            profile,
            baud,
        } => {
            let profile = load_profile(profile.as_deref(), baud)?;
            let listen = Duration::from_millis(listen_ms);
            if cli.mock {
                let backend = MockBackend::with_ports(&[port.as_str()]);
                send_once(backend, &port, &body, comment.as_deref(), listen, &profile)
            } else {
                send_once(SystemSerial, &port, &body, comment.as_deref(), listen, &profile)
            }
        }
    }
}

fn setup_tracing() {
    // Best-effort; avoid panics if already set
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_profile(path: Option<&str>, baud: Option<u32>) -> Result<SessionProfile> {
    let mut profile = match path {
        Some(p) => cube::load_profile_file(p)?,
        None => SessionProfile::default(),
    };
    if let Some(b) = baud {
        profile.baud = b;
    }
    Ok(profile)
}

fn list_ports(backend: &impl SerialBackend) -> Result<()> {
    for port in backend.list()? {
        println!("{}\t{}", port.name, port.kind);
    }
    Ok(())
}

fn parse_cmd(line: &str) -> Result<()> {
    let event = cube::parse_line(line);
    println!("{}", serde_json::to_string(&event)?);
    Ok(())
}

fn config_with_overrides(set: &[String]) -> Result<ConfigStore> {
    let mut config = ConfigStore::new();
    for item in set {
        let (name, value) = item
            .split_once('=')
            .with_context(|| format!("expected NAME=VALUE, got {item}"))?;
        report_validation(name, &config.validate(name, value));
    }
    Ok(config)
}

fn report_validation(name: &str, result: &Validation) {
    match result {
        Validation::Accepted(v) => info!(name, %v, "parameter set"),
        Validation::Rejected { reason, current } => match current {
            Some(c) => eprintln!("rejected {name}: {reason} (keeping {c})"),
            None => eprintln!("rejected {name}: {reason}"),
        },
    }
}

fn config_show(set: &[String]) -> Result<()> {
    let config = config_with_overrides(set)?;
    for (param, value) in config.entries() {
        println!(
            "{}\t{}\t{}\t{}",
            param.group(),
            param.name(),
            param.label(),
            value
        );
    }
    Ok(())
}

fn encode_cmd(kind: CommandKind, step: &str, ms: u32, on: bool, set: &[String]) -> Result<()> {
    let config = config_with_overrides(set)?;
    let cmd = kind.into_command(step, ms, on)?;
    print!("{}", cube::encode_command(cmd, &config));
    Ok(())
}

struct MonitorOpts {
    duration: Option<Duration>,
    timestamps: bool,
    metrics: bool,
}

fn new_session<B: SerialBackend>(
    backend: B,
    profile: &SessionProfile,
) -> DeviceSession<B> {
    let mut config = ConfigStore::new();
    for (name, result) in profile.apply_params(&mut config) {
        report_validation(&name, &result);
    }
    let mut session = DeviceSession::new(backend, profile.settings()).with_config(config);
    session.console_mut().set_show_all(profile.show_all);
    session.console_mut().set_auto_scroll(profile.auto_scroll);
    session
}

/// Prints console entries recorded since the last call. With auto-scroll off,
/// new entries are held back until the operator asks for them.
struct ConsolePrinter {
    next: u64,
    timestamps: bool,
}

impl ConsolePrinter {
    fn new(timestamps: bool) -> Self {
        Self {
            next: 0,
            timestamps,
        }
    }

    /// Lines to print now, advancing past them. `force` ignores auto-scroll.
    fn take_lines(&mut self, console: &cube::Console, force: bool) -> Vec<(EntryKind, String)> {
        if !force && !console.auto_scroll() {
            return Vec::new();
        }
        let mut out = Vec::new();
        for entry in console.since(self.next) {
            let line = entry.display_line();
            let line = if self.timestamps {
                let ts = entry.at.format(&Rfc3339).unwrap_or_default();
                format!("{ts} {line}")
            } else {
                line
            };
            out.push((entry.kind, line));
            self.next = entry.sequence + 1;
        }
        out
    }

    /// Entries recorded but not yet shown.
    fn held(&self, console: &cube::Console) -> usize {
        console.since(self.next).len()
    }

    fn flush<B: SerialBackend>(&mut self, session: &DeviceSession<B>) {
        self.print(session, false);
    }

    fn print<B: SerialBackend>(&mut self, session: &DeviceSession<B>, force: bool) {
        for (kind, line) in self.take_lines(session.console(), force) {
            match kind {
                EntryKind::Error => eprintln!("{line}"),
                _ => println!("{line}"),
            }
        }
    }
}

fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn print_status<B: SerialBackend>(session: &DeviceSession<B>) {
    let status = session.status();
    println!(
        "[status] {} | {} | {} | {}",
        status.voltage_label(),
        status.position_label(),
        status.steps_label(),
        status.homed_label()
    );
}

fn monitor<B: SerialBackend>(
    backend: B,
    port: &str,
    profile: &SessionProfile,
    opts: &MonitorOpts,
) -> Result<()> {
    let hub = cube::MetricsHub::new().map_err(anyhow::Error::msg)?;
    let mut session = new_session(backend, profile).with_metrics(hub.session.clone());
    let mut printer = ConsolePrinter::new(opts.timestamps);
    let mut poll_timer = cube::PollTimer::new(profile.poll_interval());

    session.poll_ports()?;
    session.connect(port)?;
    printer.flush(&session);

    let input = spawn_stdin_reader();
    let started = Instant::now();
    let outcome = loop {
        if opts.duration.is_some_and(|d| started.elapsed() >= d) {
            break Ok(());
        }

        match input.try_recv() {
            Ok(line) => match parse_intent(&line) {
                Ok(Some(Intent::Quit)) => break Ok(()),
                Ok(Some(Intent::ShowLog)) => printer.print(&session, true),
                Ok(Some(intent)) => apply_intent(&mut session, intent),
                Ok(None) => {}
                Err(msg) => eprintln!("{msg}"),
            },
            Err(TryRecvError::Disconnected) if opts.duration.is_none() => break Ok(()),
            Err(_) => {}
        }

        let mut status_changed = false;
        for event in session.tick() {
            match event {
                SessionEvent::Telemetry(TelemetryEvent::RawLine { .. }) => {}
                SessionEvent::Telemetry(_) => status_changed = true,
                SessionEvent::LinkClosed { port, reason } => {
                    warn!(%port, %reason, "link closed by device");
                }
            }
        }
        if status_changed {
            print_status(&session);
        }

        if poll_timer.due(Instant::now()) {
            match session.poll_ports() {
                Ok(_) => {}
                Err(SessionError::LostConnection(p)) => {
                    printer.flush(&session);
                    break Err(anyhow::anyhow!("connection to {p} lost"));
                }
                Err(e) => warn!(error = %e, "port poll failed"),
            }
        }

        printer.flush(&session);
        if !session.is_open() {
            break Ok(());
        }
        thread::sleep(TICK);
    };

    if session.is_open() {
        session.close()?;
    }
    let held = printer.held(session.console());
    if held > 0 {
        info!(held, "printing entries held while auto-scroll was off");
    }
    printer.print(&session, true);
    if opts.metrics {
        print!("{}", hub.encode_text());
    }
    if let Err(e) = &outcome {
        error!(error = %e, "monitor stopped");
    }
    outcome
}

fn apply_intent<B: SerialBackend>(session: &mut DeviceSession<B>, intent: Intent) {
    let result = match intent {
        Intent::Raw(body) => session.send_raw(&body, None).map(drop),
        Intent::Command(cmd) => session.send(cmd).map(drop),
        Intent::Set { name, value } => {
            let result = session.config_mut().validate(&name, &value);
            report_validation(&name, &result);
            Ok(())
        }
        Intent::ShowAll(on) => {
            session.console_mut().set_show_all(on);
            Ok(())
        }
        Intent::AutoScroll(on) => {
            session.console_mut().set_auto_scroll(on);
            Ok(())
        }
        Intent::Clear => {
            session.console_mut().clear();
            Ok(())
        }
        Intent::Status => {
            print_status(session);
            Ok(())
        }
        Intent::Quit | Intent::ShowLog => Ok(()),
    };
    if let Err(e) = result {
        eprintln!("{e}");
    }
}

fn send_once<B: SerialBackend>(
    backend: B,
    port: &str,
    body: &str,
    comment: Option<&str>,
    listen: Duration,
    profile: &SessionProfile,
) -> Result<()> {
    let mut session = new_session(backend, profile);
    let mut printer = ConsolePrinter::new(false);
    session.connect(port)?;
    session.send_raw(body, comment)?;
    let deadline = Instant::now() + listen;
    while Instant::now() < deadline && session.is_open() {
        session.tick();
        printer.flush(&session);
        thread::sleep(TICK);
    }
    if session.is_open() {
        session.close()?;
    }
    printer.flush(&session);
    Ok(())
}
