use std::time::Duration;

use chrono::NaiveTime;
use serde::Serialize;

use crate::{
    config::{CalibrationProfile, MonitorConfig},
    filter::{FilterOutcome, ValidityFilter},
    power::CalibrationFormula,
    protocol::{decode_period_frame, FrameError},
    types::{ConnectionState, PeriodMeasurement},
};

const SECONDS_PER_DAY: u64 = 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChartPoint {
    pub minutes: f64,
    pub watts: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PowerSeries {
    points: Vec<ChartPoint>,
}

impl PowerSeries {
    pub fn push(&mut self, elapsed: Duration, watts: f64) {
        self.points.push(ChartPoint {
            minutes: elapsed.as_secs_f64() / 60.0,
            watts,
        });
    }

    pub fn points(&self) -> &[ChartPoint] {
        &self.points
    }

    pub fn last(&self) -> Option<&ChartPoint> {
        self.points.last()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// What the display shows for one active tick. The caller sends one period
/// request every time it gets one of these.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickReport {
    pub watts: f64,
    pub rounded_watts: i64,
    pub timer_label: String,
    pub elapsed: Duration,
}

/// Client-side polling state: connection, pause flag, filter and chart.
#[derive(Debug, Clone)]
pub struct MonitorSession {
    formula: CalibrationFormula,
    filter: ValidityFilter,
    interval: Duration,
    connection: ConnectionState,
    paused: bool,
    elapsed: Duration,
    pending_w: f64,
    last_period: Option<PeriodMeasurement>,
    series: PowerSeries,
}

impl MonitorSession {
    pub fn new(formula: CalibrationFormula, filter: ValidityFilter, interval: Duration) -> Self {
        Self {
            formula,
            filter,
            interval,
            connection: ConnectionState::Disconnected,
            paused: true,
            elapsed: Duration::ZERO,
            pending_w: 0.0,
            last_period: None,
            series: PowerSeries::default(),
        }
    }

    pub fn for_profile(profile: CalibrationProfile, monitor: &MonitorConfig) -> Self {
        Self::new(
            profile.formula(),
            ValidityFilter::new(profile.filter()),
            Duration::from_millis(monitor.sampling_interval_ms),
        )
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn series(&self) -> &PowerSeries {
        &self.series
    }

    pub fn last_period(&self) -> Option<PeriodMeasurement> {
        self.last_period
    }

    pub fn on_open(&mut self) {
        self.connection = self.connection.on_open();
    }

    pub fn on_error(&mut self) {
        self.connection = self.connection.on_error();
    }

    pub fn on_close(&mut self) {
        self.connection = self.connection.on_close();
    }

    pub fn play(&mut self) {
        self.paused = false;
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// Runs one polling tick. Inactive sessions return `None` and leave all
    /// state untouched.
    pub fn tick(&mut self) -> Option<TickReport> {
        if !self.connection.is_connected() || self.paused {
            return None;
        }

        let watts = self.pending_w;
        let report = TickReport {
            watts,
            rounded_watts: watts.round() as i64,
            timer_label: format_elapsed(self.elapsed),
            elapsed: self.elapsed,
        };

        self.elapsed += self.interval;
        self.series.push(self.elapsed, watts);
        // A reply that misses the next tick plots as zero.
        self.pending_w = 0.0;

        Some(report)
    }

    /// Feeds one reply frame through estimation and the validity filter.
    /// Replies are taken even while paused.
    pub fn on_reply(&mut self, frame: &[u8]) -> Result<FilterOutcome, FrameError> {
        let period = decode_period_frame(frame)?;
        let outcome = self.filter.apply(self.formula.watts(period));

        self.last_period = Some(period);
        self.pending_w = outcome.watts();
        Ok(outcome)
    }
}

/// `HH:MM:SS`, wrapping every 24 hours.
pub fn format_elapsed(elapsed: Duration) -> String {
    let seconds = (elapsed.as_secs() % SECONDS_PER_DAY) as u32;
    NaiveTime::from_num_seconds_from_midnight_opt(seconds, 0)
        .map(|time| time.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "00:00:00".to_string())
}
