use crate::config::{ConfigStore, Validation};
use crate::encode::MachineCommand;
use crate::ports::DEFAULT_POLL_INTERVAL;
use crate::session::{SessionSettings, CLOSE_MARGIN, MIN_READ_TIMEOUT};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Connection knobs and parameter overrides read at startup. Never written back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionProfile {
    pub baud: u32,
    pub read_timeout_ms: u64,
    pub close_timeout_ms: Option<u64>,
    pub report_interval_ms: u32,
    pub relative_positioning: bool,
    pub poll_interval_ms: u64,
    pub show_all: bool,
    pub auto_scroll: bool,
    pub params: BTreeMap<String, Value>,
}

impl Default for SessionProfile {
    fn default() -> Self {
        Self {
            baud: 115_200,
            read_timeout_ms: 100,
            close_timeout_ms: None,
            report_interval_ms: 500,
            relative_positioning: true,
            poll_interval_ms: u64::try_from(DEFAULT_POLL_INTERVAL.as_millis()).unwrap_or(1000),
            show_all: false,
            auto_scroll: true,
            params: BTreeMap::new(),
        }
    }
}

impl SessionProfile {
    pub fn handshake(&self) -> Vec<MachineCommand> {
        let mut cmds = vec![MachineCommand::Reset];
        if self.relative_positioning {
            cmds.push(MachineCommand::RelativePositioning);
        }
        cmds.push(MachineCommand::ReportInterval {
            ms: self.report_interval_ms,
        });
        cmds
    }

    pub fn settings(&self) -> SessionSettings {
        let read_timeout = Duration::from_millis(self.read_timeout_ms).max(MIN_READ_TIMEOUT);
        let close_timeout = self
            .close_timeout_ms
            .map_or(read_timeout + CLOSE_MARGIN, Duration::from_millis)
            .max(read_timeout);
        SessionSettings {
            baud: self.baud,
            read_timeout,
            close_timeout,
            handshake: self.handshake(),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Feed every `params` entry through validation. Rejected entries keep the
    /// default and are reported back by name.
    pub fn apply_params(&self, config: &mut ConfigStore) -> Vec<(String, Validation)> {
        self.params
            .iter()
            .map(|(name, raw)| {
                let text = match raw {
                    Value::Number(n) => n.to_string(),
                    Value::String(s) => s.clone(),
                    other => serde_yaml::to_string(other)
                        .unwrap_or_default()
                        .trim()
                        .to_string(),
                };
                (name.clone(), config.validate(name, &text))
            })
            .collect()
    }
}

pub fn parse_profile(raw: &str) -> anyhow::Result<SessionProfile> {
    let val: Value = serde_yaml::from_str(raw).context("parsing yaml")?;
    if val.is_null() {
        return Ok(SessionProfile::default());
    }
    let profile: SessionProfile =
        serde_yaml::from_value(val).context("decoding session profile")?;
    anyhow::ensure!(profile.read_timeout_ms > 0, "read_timeout_ms must be positive");
    anyhow::ensure!(profile.poll_interval_ms > 0, "poll_interval_ms must be positive");
    Ok(profile)
}

pub fn load_profile_file(path: impl AsRef<Path>) -> anyhow::Result<SessionProfile> {
    let path = path.as_ref();
    let raw =
        fs::read_to_string(path).with_context(|| format!("reading profile: {}", path.display()))?;
    parse_profile(&raw).with_context(|| format!("loading profile: {}", path.display()))
}
