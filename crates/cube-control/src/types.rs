use crate::decode::TelemetryEvent;
use serde::Serialize;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

/// Latest structured telemetry, as shown in the status panel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct DeviceStatus {
    pub voltage: Option<f64>,
    pub homed: Option<bool>,
    pub steps: Option<i64>,
    pub position_mm: Option<f64>,
}

impl DeviceStatus {
    /// Fold one event in; returns whether anything changed.
    pub fn apply(&mut self, event: &TelemetryEvent) -> bool {
        let before = *self;
        match *event {
            TelemetryEvent::AdcReading { voltage } => self.voltage = Some(voltage),
            TelemetryEvent::PositionStatus {
                homed,
                steps,
                position_mm,
            } => {
                self.homed = Some(homed);
                self.steps = Some(steps);
                self.position_mm = Some(position_mm);
            }
            TelemetryEvent::RawLine { .. } => {}
        }
        before != *self
    }

    pub fn voltage_label(&self) -> String {
        match self.voltage {
            Some(v) => format!("ADC voltage: {v}V"),
            None => "ADC voltage: ?".to_string(),
        }
    }

    pub fn position_label(&self) -> String {
        match self.position_mm {
            Some(p) => format!("{p:.4}mm"),
            None => "?".to_string(),
        }
    }

    pub fn steps_label(&self) -> String {
        match self.steps {
            Some(s) => format!("Steps: {s}"),
            None => "Steps: ?".to_string(),
        }
    }

    pub fn homed_label(&self) -> &'static str {
        if self.homed == Some(true) {
            "Homed"
        } else {
            "Not Homed"
        }
    }
}
