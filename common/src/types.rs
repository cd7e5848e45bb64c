use serde::{Deserialize, Serialize};

/// One full sensor period in microseconds: a high phase followed by a low phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeriodMeasurement(u32);

impl PeriodMeasurement {
    pub const ZERO: Self = Self(0);

    pub const fn from_micros(micros: u32) -> Self {
        Self(micros)
    }

    pub fn from_phases(high_us: u32, low_us: u32) -> Self {
        Self(high_us.saturating_add(low_us))
    }

    pub const fn as_micros(self) -> u32 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl From<u32> for PeriodMeasurement {
    fn from(micros: u32) -> Self {
        Self(micros)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connected => "CONNECTED",
        }
    }

    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }

    pub fn on_open(self) -> Self {
        Self::Connected
    }

    pub fn on_error(self) -> Self {
        Self::Disconnected
    }

    pub fn on_close(self) -> Self {
        Self::Disconnected
    }
}
