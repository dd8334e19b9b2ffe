use crate::config::{ConfigStore, Param};
use std::fmt;
use std::str::FromStr;

/// Relative move distances offered to the operator, in micrometers.
pub const STEP_TABLE_UM: [f64; 8] = [0.5, 1.0, 2.5, 5.0, 10.0, 100.0, 1000.0, 5000.0];

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum StepSize {
    Um0_5,
    Um1,
    Um2_5,
    Um5,
    Um10,
    Um100,
    Mm1,
    Mm5,
}

impl StepSize {
    pub const ALL: [StepSize; 8] = [
        StepSize::Um0_5,
        StepSize::Um1,
        StepSize::Um2_5,
        StepSize::Um5,
        StepSize::Um10,
        StepSize::Um100,
        StepSize::Mm1,
        StepSize::Mm5,
    ];

    pub fn micrometers(self) -> f64 {
        STEP_TABLE_UM[self.index()]
    }

    pub fn label(self) -> &'static str {
        match self {
            StepSize::Um0_5 => "0.5µm",
            StepSize::Um1 => "1µm",
            StepSize::Um2_5 => "2.5µm",
            StepSize::Um5 => "5µm",
            StepSize::Um10 => "10µm",
            StepSize::Um100 => "100µm",
            StepSize::Mm1 => "1mm",
            StepSize::Mm5 => "5mm",
        }
    }

    fn index(self) -> usize {
        match self {
            StepSize::Um0_5 => 0,
            StepSize::Um1 => 1,
            StepSize::Um2_5 => 2,
            StepSize::Um5 => 3,
            StepSize::Um10 => 4,
            StepSize::Um100 => 5,
            StepSize::Mm1 => 6,
            StepSize::Mm5 => 7,
        }
    }
}

impl FromStr for StepSize {
    type Err = String;

    /// Accepts a table label (`2.5µm`, `1mm`), its ASCII spelling (`2.5um`) or a
    /// bare micrometer value (`2.5`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim();
        let ascii = t.replace("um", "µm");
        if let Some(step) = Self::ALL
            .into_iter()
            .find(|st| st.label() == t || st.label() == ascii)
        {
            return Ok(step);
        }
        let um = t
            .parse::<f64>()
            .map_err(|_| format!("unknown step size: {s}"))?;
        Self::ALL
            .into_iter()
            .find(|st| (st.micrometers() - um).abs() < f64::EPSILON)
            .ok_or_else(|| format!("step size not in table: {s}"))
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Direction {
    /// Away from the workpiece (negative Z).
    Up,
    /// Towards the workpiece (positive Z).
    Down,
}

/// The controller's command vocabulary.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MachineCommand {
    Reset,
    RelativePositioning,
    AbsolutePositioning,
    ReportInterval { ms: u32 },
    RequestReport,
    GeneratorOn,
    GeneratorOff,
    AutoOn,
    AutoOff,
    Home,
    Move { step: StepSize, direction: Direction },
    TouchMode,
    StepperEnable,
    StepperDisable,
    MosfetT1(bool),
    MosfetT2(bool),
}

/// One outbound command before encoding.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Command {
    pub body: String,
    pub comment: Option<String>,
}

impl Command {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            comment: None,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Consume the command into its wire text.
    pub fn encode(self) -> String {
        format_line(&self.body, self.comment.as_deref())
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(format_line(&self.body, self.comment.as_deref()).trim_end())
    }
}

/// Wire text for `body` plus optional `comment`, ending in exactly one `\n`.
pub fn format_line(body: &str, comment: Option<&str>) -> String {
    let body = body.trim_end();
    let comment = comment
        .map(|c| c.trim_end_matches(|ch| ch == '\r' || ch == '\n'))
        .filter(|c| !c.is_empty());
    match comment {
        Some(c) => format!("{body} ;{c}\n"),
        None => format!("{body}\n"),
    }
}

/// Build the command for `cmd`, reading any parameters from `config` now.
pub fn build_command(cmd: MachineCommand, config: &ConfigStore) -> Command {
    let p = |param: Param| config.value(param);
    match cmd {
        MachineCommand::Reset => Command::new("M0").with_comment("restart device"),
        MachineCommand::RelativePositioning => {
            Command::new("G91").with_comment("relative positioning")
        }
        MachineCommand::AbsolutePositioning => {
            Command::new("G90").with_comment("absolute positioning")
        }
        MachineCommand::ReportInterval { ms } => {
            Command::new(format!("M1 {ms}")).with_comment(format!("set report interval to {ms}ms"))
        }
        MachineCommand::RequestReport => Command::new("M1").with_comment("report"),
        MachineCommand::GeneratorOn => Command::new(format!(
            "M100 {} {}",
            p(Param::OnTime),
            p(Param::OffTime)
        ))
        .with_comment("enable generator"),
        MachineCommand::GeneratorOff => Command::new("M101").with_comment("disable generator"),
        MachineCommand::AutoOn => Command::new(format!(
            "M103 {} {} {}",
            p(Param::LowerThr),
            p(Param::UpperThr),
            p(Param::AutoSens)
        ))
        .with_comment("auto mode"),
        MachineCommand::AutoOff => Command::new("M104").with_comment("auto off"),
        MachineCommand::Home => Command::new("G28").with_comment("home"),
        MachineCommand::Move { step, direction } => {
            let um = step.micrometers();
            match direction {
                Direction::Up => Command::new(format!("G1 Z-{um}"))
                    .with_comment(format!("move up {}", step.label())),
                Direction::Down => Command::new(format!("G1 Z{um}"))
                    .with_comment(format!("move down {}", step.label())),
            }
        }
        MachineCommand::TouchMode => Command::new(format!(
            "M102 {} {}",
            p(Param::LowerThr),
            p(Param::UpperThr)
        ))
        .with_comment("touchmode"),
        MachineCommand::StepperEnable => Command::new("M17").with_comment("enable stepper"),
        MachineCommand::StepperDisable => Command::new("M18").with_comment("disable stepper"),
        MachineCommand::MosfetT1(on) => Command::new(format!("M20 {}", u8::from(on)))
            .with_comment(format!("mosfet T1 {}", on_off(on))),
        MachineCommand::MosfetT2(on) => Command::new(format!("M21 {}", u8::from(on)))
            .with_comment(format!("mosfet T2 {}", on_off(on))),
    }
}

/// Shorthand for `build_command(cmd, config).encode()`.
pub fn encode_command(cmd: MachineCommand, config: &ConfigStore) -> String {
    build_command(cmd, config).encode()
}

fn on_off(on: bool) -> &'static str {
    if on {
        "on"
    } else {
        "off"
    }
}
