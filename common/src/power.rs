use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::types::PeriodMeasurement;

const MICROS_PER_SECOND: f64 = 1e6;
const SECONDS_PER_HOUR: f64 = 3_600.0;
const MILES_PER_KM: f64 = 0.621371;

/// Kinetic trainer roller, 54.2 mm diameter, fitted against the vendor power
/// curve `5.244820 * mph + 0.019168 * mph^3`. Substituting
/// `mph = pi * d / p * 1e6 * 3600 * 0.621371` collapses the curve to
/// `a / p + b / p^3`.
pub const KINETIC_ROLLER_CURVE: RollerCurve = RollerCurve {
    roller_diameter_km: 54.2e-6,
    linear_w_per_mph: 5.244820,
    cubic_w_per_mph3: 0.019168,
};

pub const KINETIC_ROLLER_FORMULA: CalibrationFormula = CalibrationFormula::RollerCubic {
    a: 635_891.991_888_686 * PI,
    b: 34_161_356_213_001.9 * PI * PI * PI,
};

/// Least-squares refit of [`KINETIC_ROLLER_FORMULA`] as a quadratic in `1/p`
/// over 25 ms to 450 ms periods, the range the shorter phase timeout can see.
pub const QUADRATIC_FIT_FORMULA: CalibrationFormula = CalibrationFormula::Quadratic {
    a: 5.444_455_939e10,
    b: 1.303_825_275e6,
    c: 1.867_949_796,
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum CalibrationFormula {
    /// `a / p + b / p^3`
    RollerCubic { a: f64, b: f64 },
    /// `a * (1/p)^2 + b * (1/p) + c`
    Quadratic { a: f64, b: f64, c: f64 },
}

impl CalibrationFormula {
    /// Estimated watts for one period. A zero period means no signal and
    /// always maps to exactly zero watts.
    pub fn watts(&self, period: PeriodMeasurement) -> f64 {
        if period.is_zero() {
            return 0.0;
        }

        let inverse = 1.0 / f64::from(period.as_micros());
        match *self {
            Self::RollerCubic { a, b } => a * inverse + b * inverse * inverse * inverse,
            Self::Quadratic { a, b, c } => a * inverse * inverse + b * inverse + c,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RollerCurve {
    pub roller_diameter_km: f64,
    pub linear_w_per_mph: f64,
    pub cubic_w_per_mph3: f64,
}

impl RollerCurve {
    /// `mph * p` for one roller revolution per period `p` in microseconds.
    fn mph_micros(&self) -> f64 {
        PI * self.roller_diameter_km * MICROS_PER_SECOND * SECONDS_PER_HOUR * MILES_PER_KM
    }

    pub fn speed_mph(&self, period: PeriodMeasurement) -> f64 {
        if period.is_zero() {
            return 0.0;
        }
        self.mph_micros() / f64::from(period.as_micros())
    }

    pub fn formula(&self) -> CalibrationFormula {
        let k = self.mph_micros();
        CalibrationFormula::RollerCubic {
            a: self.linear_w_per_mph * k,
            b: self.cubic_w_per_mph3 * k * k * k,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(actual: f64, expected: f64, relative: f64) -> bool {
        (actual - expected).abs() <= expected.abs() * relative
    }

    #[test]
    fn zero_period_is_zero_watts() {
        assert_eq!(KINETIC_ROLLER_FORMULA.watts(PeriodMeasurement::ZERO), 0.0);
        assert_eq!(QUADRATIC_FIT_FORMULA.watts(PeriodMeasurement::ZERO), 0.0);
    }

    #[test]
    fn two_millisecond_period_matches_roller_curve() {
        let watts = KINETIC_ROLLER_FORMULA.watts(PeriodMeasurement::from_micros(2_000));
        assert!(close(watts, 133_400.914_619_424, 1e-9), "got {watts}");
        assert_eq!(
            watts,
            KINETIC_ROLLER_FORMULA.watts(PeriodMeasurement::from_micros(2_000))
        );
    }

    #[test]
    fn roller_derivation_reproduces_constants() {
        let derived = KINETIC_ROLLER_CURVE.formula();
        let (
            CalibrationFormula::RollerCubic { a, b },
            CalibrationFormula::RollerCubic {
                a: expected_a,
                b: expected_b,
            },
        ) = (derived, KINETIC_ROLLER_FORMULA)
        else {
            panic!("roller curve must derive a cubic formula");
        };

        assert!(close(a, expected_a, 1e-6), "a={a} expected={expected_a}");
        assert!(close(b, expected_b, 1e-6), "b={b} expected={expected_b}");
    }

    #[test]
    fn power_falls_as_period_grows() {
        for formula in [KINETIC_ROLLER_FORMULA, QUADRATIC_FIT_FORMULA] {
            let mut previous = f64::INFINITY;
            for micros in (25_000..=450_000).step_by(5_000) {
                let watts = formula.watts(PeriodMeasurement::from_micros(micros));
                assert!(watts.is_finite());
                assert!(watts > 0.0);
                assert!(watts < previous, "{formula:?} not decreasing at {micros}");
                previous = watts;
            }
        }
    }

    #[test]
    fn quadratic_refit_tracks_roller_curve() {
        for micros in [50_000_u32, 100_000, 200_000] {
            let period = PeriodMeasurement::from_micros(micros);
            let cubic = KINETIC_ROLLER_FORMULA.watts(period);
            let quadratic = QUADRATIC_FIT_FORMULA.watts(period);
            assert!(
                (cubic - quadratic).abs() < 2.0,
                "{micros}: cubic={cubic} quadratic={quadratic}"
            );
        }
    }

    #[test]
    fn speed_uses_roller_circumference() {
        let speed = KINETIC_ROLLER_CURVE.speed_mph(PeriodMeasurement::from_micros(1_000_000));
        assert!(close(speed, 0.380_891, 1e-4), "got {speed}");
        assert_eq!(KINETIC_ROLLER_CURVE.speed_mph(PeriodMeasurement::ZERO), 0.0);
    }
}
