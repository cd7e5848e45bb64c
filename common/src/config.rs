use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{
    filter::FilterConfig,
    power::{CalibrationFormula, KINETIC_ROLLER_FORMULA, QUADRATIC_FIT_FORMULA},
};

pub const DEFAULT_HOSTNAME: &str = "spm";
pub const DEFAULT_HTTP_PORT: u16 = 80;
pub const DEFAULT_WS_PORT: u16 = 81;
pub const DEFAULT_SAMPLING_INTERVAL_MS: u64 = 1_000;

/// Calibration profiles compiled into the firmware. Each one fixes the phase
/// timeout, the period-to-watts formula and the filter cutoffs it was tuned with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CalibrationProfile {
    #[default]
    KineticRoller,
    QuadraticFit,
}

impl CalibrationProfile {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::KineticRoller => "kinetic-roller",
            Self::QuadraticFit => "quadratic-fit",
        }
    }

    pub fn phase_timeout_us(self) -> u32 {
        match self {
            Self::KineticRoller => 1_000_000,
            Self::QuadraticFit => 450_000,
        }
    }

    pub fn formula(self) -> CalibrationFormula {
        match self {
            Self::KineticRoller => KINETIC_ROLLER_FORMULA,
            Self::QuadraticFit => QUADRATIC_FIT_FORMULA,
        }
    }

    pub fn filter(self) -> FilterConfig {
        match self {
            Self::KineticRoller | Self::QuadraticFit => FilterConfig::default(),
        }
    }
}

impl FromStr for CalibrationProfile {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "kinetic-roller" | "kinetic" => Ok(Self::KineticRoller),
            "quadratic-fit" | "quadratic" => Ok(Self::QuadraticFit),
            other => Err(format!("unknown calibration profile `{other}`")),
        }
    }
}

/// What a phase that outlives its timeout contributes to the period.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeoutPolicy {
    /// The phase counts as the full timeout.
    #[default]
    Saturate,
    /// The phase counts as zero, so a dead signal reads as no signal.
    Zero,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SamplerConfig {
    /// Overrides the profile's phase timeout when set.
    #[serde(default)]
    pub timeout_us: Option<u32>,
    #[serde(default)]
    pub timeout_policy: TimeoutPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub wifi_ssid: String,
    pub wifi_pass: String,
    pub hostname: String,
    pub http_port: u16,
    pub ws_port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            wifi_ssid: String::new(),
            wifi_pass: String::new(),
            hostname: DEFAULT_HOSTNAME.to_string(),
            http_port: DEFAULT_HTTP_PORT,
            ws_port: DEFAULT_WS_PORT,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub sampling_interval_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sampling_interval_ms: DEFAULT_SAMPLING_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub profile: CalibrationProfile,
    #[serde(default)]
    pub sampler: SamplerConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
}

impl RuntimeConfig {
    pub fn phase_timeout_us(&self) -> u32 {
        self.sampler
            .timeout_us
            .unwrap_or_else(|| self.profile.phase_timeout_us())
    }

    pub fn sanitize(&mut self) {
        self.sampler.sanitize();
        self.network.sanitize();
        self.monitor.sanitize();
    }
}

impl SamplerConfig {
    pub fn sanitize(&mut self) {
        if let Some(timeout) = self.timeout_us {
            self.timeout_us = Some(timeout.clamp(1_000, 5_000_000));
        }
    }
}

impl NetworkConfig {
    pub fn sanitize(&mut self) {
        let hostname = self.hostname.trim();
        self.hostname = if hostname.is_empty() {
            DEFAULT_HOSTNAME.to_string()
        } else {
            hostname.to_ascii_lowercase()
        };

        if self.http_port == 0 {
            self.http_port = DEFAULT_HTTP_PORT;
        }
        if self.ws_port == 0 || self.ws_port == self.http_port {
            self.ws_port = DEFAULT_WS_PORT;
        }
    }
}

impl MonitorConfig {
    pub fn sanitize(&mut self) {
        self.sampling_interval_ms = self.sampling_interval_ms.clamp(50, 60_000);
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn profiles_carry_their_own_timeouts() {
        let mut runtime = RuntimeConfig::default();
        assert_eq!(runtime.phase_timeout_us(), 1_000_000);

        runtime.profile = CalibrationProfile::QuadraticFit;
        assert_eq!(runtime.phase_timeout_us(), 450_000);

        runtime.sampler.timeout_us = Some(250_000);
        assert_eq!(runtime.phase_timeout_us(), 250_000);
    }

    #[test]
    fn profile_names_parse() {
        assert_eq!(
            "quadratic".parse::<CalibrationProfile>(),
            Ok(CalibrationProfile::QuadraticFit)
        );
        assert_eq!(
            " Kinetic-Roller ".parse::<CalibrationProfile>(),
            Ok(CalibrationProfile::KineticRoller)
        );
        assert!("turbo".parse::<CalibrationProfile>().is_err());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let runtime: RuntimeConfig =
            serde_json::from_str(r#"{"profile":"quadratic-fit","network":{"wifi_ssid":"shed","wifi_pass":"","hostname":"","http_port":8080,"ws_port":8080}}"#)
                .unwrap();
        let mut runtime = runtime;
        runtime.sanitize();

        assert_eq!(runtime.profile, CalibrationProfile::QuadraticFit);
        assert_eq!(runtime.sampler.timeout_policy, TimeoutPolicy::Saturate);
        assert_eq!(runtime.network.hostname, DEFAULT_HOSTNAME);
        assert_eq!(runtime.network.http_port, 8080);
        assert_eq!(runtime.network.ws_port, DEFAULT_WS_PORT);
        assert_eq!(runtime.monitor.sampling_interval_ms, 1_000);
    }

    #[test]
    fn sanitize_clamps_timeouts_and_intervals() {
        let mut runtime = RuntimeConfig::default();
        runtime.sampler.timeout_us = Some(10);
        runtime.monitor.sampling_interval_ms = 0;
        runtime.sanitize();

        assert_eq!(runtime.sampler.timeout_us, Some(1_000));
        assert_eq!(runtime.monitor.sampling_interval_ms, 50);
    }
}
