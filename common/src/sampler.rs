use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};

use crate::{config::TimeoutPolicy, types::PeriodMeasurement};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    High,
    Low,
}

/// A digital input that can time how long it stays at one level.
pub trait PulseInput {
    /// Waits for a pulse at `level` to start and returns its width in
    /// microseconds, or `None` if `timeout_us` elapsed first.
    fn pulse_width(&mut self, level: Level, timeout_us: u32) -> Option<u32>;
}

impl<T: PulseInput + ?Sized> PulseInput for &mut T {
    fn pulse_width(&mut self, level: Level, timeout_us: u32) -> Option<u32> {
        (**self).pulse_width(level, timeout_us)
    }
}

/// Latest period, written by the sampler and read by protocol handlers.
#[derive(Debug, Clone, Default)]
pub struct LatestPeriod(Arc<AtomicU32>);

impl LatestPeriod {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, period: PeriodMeasurement) {
        self.0.store(period.as_micros(), Ordering::Release);
    }

    pub fn load(&self) -> PeriodMeasurement {
        PeriodMeasurement::from_micros(self.0.load(Ordering::Acquire))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SamplerStats {
    pub samples: u64,
    pub timed_out_phases: u64,
}

#[derive(Debug)]
pub struct PulseSampler<P> {
    input: P,
    timeout_us: u32,
    policy: TimeoutPolicy,
    latest: LatestPeriod,
    stats: SamplerStats,
}

impl<P: PulseInput> PulseSampler<P> {
    pub fn new(input: P, timeout_us: u32, policy: TimeoutPolicy, latest: LatestPeriod) -> Self {
        Self {
            input,
            timeout_us,
            policy,
            latest,
            stats: SamplerStats::default(),
        }
    }

    pub fn latest(&self) -> &LatestPeriod {
        &self.latest
    }

    pub fn timeout_us(&self) -> u32 {
        self.timeout_us
    }

    pub fn stats(&self) -> SamplerStats {
        self.stats
    }

    /// Measures one high phase then one low phase and publishes their sum.
    pub fn sample(&mut self) -> PeriodMeasurement {
        let high = self.measure_phase(Level::High);
        let low = self.measure_phase(Level::Low);
        let period = PeriodMeasurement::from_phases(high, low);

        self.latest.store(period);
        self.stats.samples += 1;
        period
    }

    fn measure_phase(&mut self, level: Level) -> u32 {
        match self.input.pulse_width(level, self.timeout_us) {
            Some(width) => width.min(self.timeout_us),
            None => {
                self.stats.timed_out_phases += 1;
                match self.policy {
                    TimeoutPolicy::Saturate => self.timeout_us,
                    TimeoutPolicy::Zero => 0,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use pretty_assertions::assert_eq;

    use super::*;

    struct ScriptedInput {
        widths: VecDeque<(Level, Option<u32>)>,
    }

    impl ScriptedInput {
        fn new(widths: &[(Level, Option<u32>)]) -> Self {
            Self {
                widths: widths.iter().copied().collect(),
            }
        }
    }

    impl PulseInput for ScriptedInput {
        fn pulse_width(&mut self, level: Level, _timeout_us: u32) -> Option<u32> {
            let (expected, width) = self.widths.pop_front().expect("script exhausted");
            assert_eq!(expected, level);
            width
        }
    }

    #[test]
    fn sums_high_and_low_and_publishes() {
        let input = ScriptedInput::new(&[(Level::High, Some(900)), (Level::Low, Some(1_100))]);
        let latest = LatestPeriod::new();
        let mut sampler =
            PulseSampler::new(input, 1_000_000, TimeoutPolicy::Saturate, latest.clone());

        assert_eq!(sampler.sample().as_micros(), 2_000);
        assert_eq!(latest.load().as_micros(), 2_000);
        assert_eq!(
            sampler.stats(),
            SamplerStats {
                samples: 1,
                timed_out_phases: 0,
            }
        );
    }

    #[test]
    fn timed_out_phase_counts_as_timeout() {
        let input = ScriptedInput::new(&[(Level::High, None), (Level::Low, Some(300))]);
        let mut sampler =
            PulseSampler::new(input, 450_000, TimeoutPolicy::Saturate, LatestPeriod::new());

        assert_eq!(sampler.sample().as_micros(), 450_300);
        assert_eq!(sampler.stats().timed_out_phases, 1);
    }

    #[test]
    fn zero_policy_reports_dead_signal_as_zero() {
        let input = ScriptedInput::new(&[(Level::High, None), (Level::Low, None)]);
        let mut sampler =
            PulseSampler::new(input, 1_000_000, TimeoutPolicy::Zero, LatestPeriod::new());

        assert_eq!(sampler.sample(), PeriodMeasurement::ZERO);
        assert_eq!(sampler.stats().timed_out_phases, 2);
    }

    #[test]
    fn newer_sample_overwrites_older() {
        let input = ScriptedInput::new(&[
            (Level::High, Some(10_000)),
            (Level::Low, Some(10_000)),
            (Level::High, Some(20_000)),
            (Level::Low, Some(25_000)),
        ]);
        let latest = LatestPeriod::new();
        let mut sampler =
            PulseSampler::new(input, 1_000_000, TimeoutPolicy::Saturate, latest.clone());

        sampler.sample();
        sampler.sample();
        assert_eq!(latest.load().as_micros(), 45_000);
    }

    #[test]
    fn overlong_widths_are_capped_at_timeout() {
        let input = ScriptedInput::new(&[(Level::High, Some(9_000)), (Level::Low, Some(1))]);
        let mut sampler = PulseSampler::new(input, 5_000, TimeoutPolicy::Zero, LatestPeriod::new());

        assert_eq!(sampler.sample().as_micros(), 5_001);
    }
}
