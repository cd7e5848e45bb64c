use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Candidates at or above this many watts are treated as noise.
    pub absolute_cutoff_w: f64,
    /// Largest accepted jump from the previous accepted sample. `None` skips the check.
    pub derivative_cutoff_w: Option<f64>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            absolute_cutoff_w: 1_000.0,
            derivative_cutoff_w: Some(100.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterOutcome {
    Accepted(f64),
    Rejected { candidate: f64, held: f64 },
}

impl FilterOutcome {
    /// The value to display for this sample.
    pub fn watts(self) -> f64 {
        match self {
            Self::Accepted(watts) => watts,
            Self::Rejected { held, .. } => held,
        }
    }

    pub fn is_accepted(self) -> bool {
        matches!(self, Self::Accepted(_))
    }
}

/// Suppresses implausible readings by holding the last accepted sample.
#[derive(Debug, Clone)]
pub struct ValidityFilter {
    config: FilterConfig,
    last_accepted_w: f64,
}

impl ValidityFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self {
            config,
            last_accepted_w: 0.0,
        }
    }

    pub fn config(&self) -> FilterConfig {
        self.config
    }

    pub fn last_accepted(&self) -> f64 {
        self.last_accepted_w
    }

    pub fn apply(&mut self, candidate_w: f64) -> FilterOutcome {
        if self.accepts(candidate_w) {
            self.last_accepted_w = candidate_w;
            FilterOutcome::Accepted(candidate_w)
        } else {
            FilterOutcome::Rejected {
                candidate: candidate_w,
                held: self.last_accepted_w,
            }
        }
    }

    fn accepts(&self, candidate_w: f64) -> bool {
        // NaN fails both comparisons and is rejected.
        if !(candidate_w < self.config.absolute_cutoff_w) {
            return false;
        }

        match self.config.derivative_cutoff_w {
            Some(cutoff) => (candidate_w - self.last_accepted_w).abs() < cutoff,
            None => true,
        }
    }
}

impl Default for ValidityFilter {
    fn default() -> Self {
        Self::new(FilterConfig::default())
    }
}
