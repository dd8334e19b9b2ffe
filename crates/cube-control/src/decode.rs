use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Serialize;

/// ADC report: `<ADC> ... calc:<digits>.<digits>V`.
pub const ADC_PATTERN: &str = r"<ADC>.*calc:(\d+\.\d+)V";
/// Position report with exactly four fractional digits on `pos`.
pub const POS_PATTERN: &str = r"POS> homed:([01]) steps:(\d+) pos:(\d+\.\d{4})(?:\D|$)";

/// One decoded inbound line.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TelemetryEvent {
    AdcReading {
        voltage: f64,
    },
    PositionStatus {
        homed: bool,
        steps: i64,
        position_mm: f64,
    },
    RawLine {
        text: String,
    },
}

type Convert = fn(&Captures<'_>) -> Option<TelemetryEvent>;

struct Matcher {
    name: &'static str,
    regex: &'static Lazy<Option<Regex>>,
    convert: Convert,
}

fn compile(name: &str, pattern: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::error!(matcher = name, error = %e, "telemetry pattern failed to compile");
            None
        }
    }
}

// A pattern that fails to compile never matches.
static ADC_RE: Lazy<Option<Regex>> = Lazy::new(|| compile("adc", ADC_PATTERN));
static POS_RE: Lazy<Option<Regex>> = Lazy::new(|| compile("pos", POS_PATTERN));

/// Tried in order; the first matcher whose pattern and conversion both succeed wins.
static MATCHERS: [Matcher; 2] = [
    Matcher {
        name: "adc",
        regex: &ADC_RE,
        convert: convert_adc,
    },
    Matcher {
        name: "pos",
        regex: &POS_RE,
        convert: convert_pos,
    },
];

fn convert_adc(caps: &Captures<'_>) -> Option<TelemetryEvent> {
    let voltage = caps.get(1)?.as_str().parse::<f64>().ok()?;
    Some(TelemetryEvent::AdcReading { voltage })
}

fn convert_pos(caps: &Captures<'_>) -> Option<TelemetryEvent> {
    let homed = caps.get(1)?.as_str() == "1";
    let steps = caps.get(2)?.as_str().parse::<i64>().ok()?;
    let position_mm = caps.get(3)?.as_str().parse::<f64>().ok()?;
    Some(TelemetryEvent::PositionStatus {
        homed,
        steps,
        position_mm,
    })
}

/// Classify one decoded inbound line. Never fails: anything unrecognized, or
/// recognized but not convertible, comes back as `RawLine`.
pub fn parse_line(line: &str) -> TelemetryEvent {
    for m in &MATCHERS {
        let Some(caps) = Lazy::force(m.regex)
            .as_ref()
            .and_then(|re| re.captures(line))
        else {
            continue;
        };
        if let Some(event) = (m.convert)(&caps) {
            return event;
        }
        tracing::debug!(matcher = m.name, line, "telemetry fields did not convert");
        break;
    }
    TelemetryEvent::RawLine {
        text: line.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patterns_compile() {
        assert!(ADC_RE.is_some());
        assert!(POS_RE.is_some());
    }

    #[test]
    fn test_adc_reading() {
        assert_eq!(
            parse_line("<ADC> raw:512 calc:12.3400V"),
            TelemetryEvent::AdcReading { voltage: 12.34 }
        );
        assert_eq!(
            parse_line("<ADC> calc:0.5V\r\n"),
            TelemetryEvent::AdcReading { voltage: 0.5 }
        );
    }

    #[test]
    fn test_position_status() {
        assert_eq!(
            parse_line("POS> homed:1 steps:1500 pos:12.3450"),
            TelemetryEvent::PositionStatus {
                homed: true,
                steps: 1500,
                position_mm: 12.345
            }
        );
        assert_eq!(
            parse_line("POS> homed:0 steps:0 pos:0.0000\r\n"),
            TelemetryEvent::PositionStatus {
                homed: false,
                steps: 0,
                position_mm: 0.0
            }
        );
    }

    #[test]
    fn test_position_needs_four_decimals() {
        let three = "POS> homed:1 steps:1500 pos:12.345";
        assert_eq!(
            parse_line(three),
            TelemetryEvent::RawLine {
                text: three.to_string()
            }
        );
        let five = "POS> homed:1 steps:1500 pos:12.34567";
        assert!(matches!(parse_line(five), TelemetryEvent::RawLine { .. }));
    }

    #[test]
    fn test_adc_wins_over_position() {
        let line = "<ADC> calc:1.0V POS> homed:1 steps:1 pos:1.0000";
        assert_eq!(
            parse_line(line),
            TelemetryEvent::AdcReading { voltage: 1.0 }
        );
    }

    #[test]
    fn test_unconvertible_numbers_fall_back_to_raw() {
        // Fits the pattern but overflows i64.
        let line = "POS> homed:1 steps:99999999999999999999999 pos:1.0000";
        assert!(matches!(parse_line(line), TelemetryEvent::RawLine { .. }));
        // Unicode digits satisfy `\d` but not the numeric parsers.
        let line = "<ADC> calc:١٢.٣V";
        assert!(matches!(parse_line(line), TelemetryEvent::RawLine { .. }));
    }

    #[test]
    fn test_other_lines_are_raw() {
        assert_eq!(
            parse_line("homing complete\r\n"),
            TelemetryEvent::RawLine {
                text: "homing complete\r\n".to_string()
            }
        );
    }
}
