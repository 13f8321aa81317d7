//! Live control state shared with collaborators as read-only snapshots.

use crate::thermometer::{SensorFault, Temperature};

/// Which target temperature applies
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BoilerMode {
    #[default]
    Brew,
    Steam,
}

/// Active operation label
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Operation {
    #[default]
    Idle,
    Brewing,
    Steaming,
    AutoTuning,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Brewing => "Brewing",
            Self::Steaming => "Steaming",
            Self::AutoTuning => "AutoTuning",
        }
    }
}

impl From<BoilerMode> for Operation {
    fn from(mode: BoilerMode) -> Self {
        match mode {
            BoilerMode::Brew => Self::Brewing,
            BoilerMode::Steam => Self::Steaming,
        }
    }
}

/// Mutated only by the [`Boiler`](crate::boiler::Boiler)
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct ControlState {
    /// Last successful reading, `None` after a fault or before the first reading
    pub current: Option<Temperature>,
    pub target: Temperature,
    pub heating: bool,
    pub operation: Operation,
    pub mode: BoilerMode,
    /// Fault seen by the most recent tick
    pub fault: Option<SensorFault>,
}

/// Snapshot returned by [`Boiler::status`](crate::boiler::Boiler::status)
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Status {
    pub current: Option<Temperature>,
    pub target: Temperature,
    pub heating: bool,
    pub operation: Operation,
    pub mode: BoilerMode,
    pub fault: Option<SensorFault>,
}

impl From<&ControlState> for Status {
    fn from(state: &ControlState) -> Self {
        Self {
            current: state.current,
            target: state.target,
            heating: state.heating,
            operation: state.operation,
            mode: state.mode,
            fault: state.fault,
        }
    }
}
