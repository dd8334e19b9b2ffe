//! Operator input typed at the monitor prompt.

use cube_control::{Direction, MachineCommand, StepSize};

#[derive(Clone, Debug, PartialEq)]
pub enum Intent {
    /// Free-form command body written as typed.
    Raw(String),
    Command(MachineCommand),
    Set { name: String, value: String },
    ShowAll(bool),
    AutoScroll(bool),
    /// Print entries held back while auto-scroll is off.
    ShowLog,
    Clear,
    Status,
    Quit,
}

/// Lines starting with `:` are shortcuts; anything else goes to the device verbatim.
pub fn parse_intent(line: &str) -> Result<Option<Intent>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(shortcut) = line.strip_prefix(':') else {
        return Ok(Some(Intent::Raw(line.to_string())));
    };
    let mut words = shortcut.split_whitespace();
    let verb = words.next().unwrap_or_default();
    let args: Vec<&str> = words.collect();
    let intent = match (verb, args.as_slice()) {
        ("quit" | "q", []) => Intent::Quit,
        ("clear", []) => Intent::Clear,
        ("log", []) => Intent::ShowLog,
        ("scroll", [flag]) => Intent::AutoScroll(parse_on_off(flag)?),
        ("status", []) => Intent::Status,
        ("showall", [flag]) => Intent::ShowAll(parse_on_off(flag)?),
        ("set", [name, value]) => Intent::Set {
            name: (*name).to_string(),
            value: (*value).to_string(),
        },
        ("reset", []) => Intent::Command(MachineCommand::Reset),
        ("home", []) => Intent::Command(MachineCommand::Home),
        ("touch", []) => Intent::Command(MachineCommand::TouchMode),
        ("report", []) => Intent::Command(MachineCommand::RequestReport),
        ("gen", [flag]) => Intent::Command(if parse_on_off(flag)? {
            MachineCommand::GeneratorOn
        } else {
            MachineCommand::GeneratorOff
        }),
        ("auto", [flag]) => Intent::Command(if parse_on_off(flag)? {
            MachineCommand::AutoOn
        } else {
            MachineCommand::AutoOff
        }),
        ("stepper", [flag]) => Intent::Command(if parse_on_off(flag)? {
            MachineCommand::StepperEnable
        } else {
            MachineCommand::StepperDisable
        }),
        ("up" | "down", [step]) => {
            let step: StepSize = step.parse()?;
            let direction = if verb == "up" {
                Direction::Up
            } else {
                Direction::Down
            };
            Intent::Command(MachineCommand::Move { step, direction })
        }
        _ => return Err(format!("unknown shortcut: {line}")),
    };
    Ok(Some(intent))
}

fn parse_on_off(word: &str) -> Result<bool, String> {
    match word {
        "on" | "1" => Ok(true),
        "off" | "0" => Ok(false),
        other => Err(format!("expected on/off, got {other}")),
    }
}
