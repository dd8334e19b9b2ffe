use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Exclusive lower bound shared by every parameter.
pub const PARAM_MIN_EXCLUSIVE: f64 = 0.0;
/// Inclusive upper bound shared by every parameter.
pub const PARAM_MAX: f64 = 100_000.0;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Param {
    OnTime,
    OffTime,
    LowerThr,
    UpperThr,
    AutoSens,
}

impl Param {
    pub const ALL: [Param; 5] = [
        Param::OnTime,
        Param::OffTime,
        Param::LowerThr,
        Param::UpperThr,
        Param::AutoSens,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Param::OnTime => "ontime",
            Param::OffTime => "offtime",
            Param::LowerThr => "lower_thr",
            Param::UpperThr => "upper_thr",
            Param::AutoSens => "auto_sens",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.name() == name)
    }

    pub fn label(self) -> &'static str {
        match self {
            Param::OnTime => "OnTime (ns)",
            Param::OffTime => "OffTime (ns)",
            Param::LowerThr => "Lower Threshold (V)",
            Param::UpperThr => "Upper Threshold (V)",
            Param::AutoSens => "Sensitivity",
        }
    }

    pub fn group(self) -> &'static str {
        match self {
            Param::OnTime | Param::OffTime => "Generator Settings",
            Param::LowerThr | Param::UpperThr => "ADC Settings",
            Param::AutoSens => "Automode Settings",
        }
    }

    pub fn kind(self) -> ParamKind {
        match self {
            Param::LowerThr | Param::UpperThr => ParamKind::Float,
            Param::OnTime | Param::OffTime | Param::AutoSens => ParamKind::Int,
        }
    }

    pub fn default_value(self) -> ParamValue {
        match self {
            Param::OnTime => ParamValue::Int(4000),
            Param::OffTime => ParamValue::Int(12000),
            Param::LowerThr => ParamValue::Float(3.5),
            Param::UpperThr => ParamValue::Float(30.0),
            Param::AutoSens => ParamValue::Int(10),
        }
    }

    fn index(self) -> usize {
        match self {
            Param::OnTime => 0,
            Param::OffTime => 1,
            Param::LowerThr => 2,
            Param::UpperThr => 3,
            Param::AutoSens => 4,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ParamKind {
    Int,
    Float,
}

impl ParamKind {
    fn as_str(self) -> &'static str {
        match self {
            ParamKind::Int => "integer",
            ParamKind::Float => "float",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
}

impl ParamValue {
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(self) -> f64 {
        match self {
            ParamValue::Int(v) => v as f64,
            ParamValue::Float(v) => v,
        }
    }
}

impl fmt::Display for ParamValue {
    // Floats keep at least one fractional digit so the device sees `30.0`, not `30`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Float(v) if v.is_finite() && v.fract() == 0.0 => write!(f, "{v:.1}"),
            ParamValue::Float(v) => write!(f, "{v}"),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("unknown parameter: {0}")]
    UnknownParam(String),
    #[error("cannot parse {input:?} as {kind} for {name}")]
    Unparsable {
        name: &'static str,
        input: String,
        kind: &'static str,
    },
    #[error("{name}={value} is outside (0, 100000]")]
    OutOfRange { name: &'static str, value: f64 },
}

/// Outcome of a validated entry. A rejection leaves the stored value untouched.
#[derive(Debug, Clone, PartialEq)]
pub enum Validation {
    Accepted(ParamValue),
    Rejected {
        reason: ConfigError,
        /// Last valid value, which the editing field should show again.
        current: Option<ParamValue>,
    },
}

impl Validation {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Validation::Accepted(_))
    }
}

/// In-memory numeric parameters consumed by the command encoder.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    values: [ParamValue; 5],
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self {
            values: Param::ALL.map(Param::default_value),
        }
    }
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(&self, param: Param) -> ParamValue {
        self.values[param.index()]
    }

    pub fn get(&self, name: &str) -> Option<ParamValue> {
        Param::from_name(name).map(|p| self.value(p))
    }

    pub fn entries(&self) -> impl Iterator<Item = (Param, ParamValue)> + '_ {
        Param::ALL.into_iter().map(|p| (p, self.value(p)))
    }

    /// Parse and range-check `input` for `name`, storing it only when valid.
    pub fn validate(&mut self, name: &str, input: &str) -> Validation {
        let Some(param) = Param::from_name(name) else {
            tracing::warn!(name, "rejected unknown config parameter");
            return Validation::Rejected {
                reason: ConfigError::UnknownParam(name.to_string()),
                current: None,
            };
        };
        match parse_value(param, input) {
            Ok(value) => {
                self.values[param.index()] = value;
                tracing::debug!(name, %value, "config parameter updated");
                Validation::Accepted(value)
            }
            Err(reason) => {
                let current = self.value(param);
                tracing::warn!(name, input, %reason, %current, "config entry rejected; keeping last valid value");
                Validation::Rejected {
                    reason,
                    current: Some(current),
                }
            }
        }
    }
}

fn parse_value(param: Param, input: &str) -> Result<ParamValue, ConfigError> {
    let text = input.trim();
    let unparsable = || ConfigError::Unparsable {
        name: param.name(),
        input: input.to_string(),
        kind: param.kind().as_str(),
    };
    let value = match param.kind() {
        ParamKind::Int => ParamValue::Int(text.parse::<i64>().map_err(|_| unparsable())?),
        ParamKind::Float => ParamValue::Float(text.parse::<f64>().map_err(|_| unparsable())?),
    };
    let v = value.as_f64();
    // NaN fails both comparisons and is rejected here.
    if v > PARAM_MIN_EXCLUSIVE && v <= PARAM_MAX {
        Ok(value)
    } else {
        Err(ConfigError::OutOfRange {
            name: param.name(),
            value: v,
        })
    }
}
