use serde::Serialize;

use powermeter_common::{
    CalibrationFormula, CalibrationProfile, FilterConfig, PERIOD_REQUEST, WS_SUBPROTOCOL,
};

const PAGE_TEMPLATE: &str = include_str!("../web/index.html");
const CONFIG_PLACEHOLDER: &str = "/*METER_CONFIG*/null";

#[derive(Debug, Serialize)]
struct PageConfig {
    profile: &'static str,
    #[serde(rename = "wsPort")]
    ws_port: u16,
    #[serde(rename = "wsProtocol")]
    ws_protocol: &'static str,
    request: &'static str,
    #[serde(rename = "intervalMs")]
    interval_ms: u64,
    formula: CalibrationFormula,
    filter: FilterConfig,
}

/// The single page served at `/`, with the active calibration compiled in.
pub fn render(profile: CalibrationProfile, ws_port: u16, interval_ms: u64) -> String {
    let config = PageConfig {
        profile: profile.as_str(),
        ws_port,
        ws_protocol: WS_SUBPROTOCOL,
        request: PERIOD_REQUEST,
        interval_ms,
        formula: profile.formula(),
        filter: profile.filter(),
    };

    let json = serde_json::to_string(&config).unwrap_or_else(|_| "null".to_string());
    PAGE_TEMPLATE.replacen(CONFIG_PLACEHOLDER, &json, 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embeds_profile_config() {
        let page = render(CalibrationProfile::QuadraticFit, 81, 1_000);

        assert!(!page.contains(CONFIG_PLACEHOLDER));
        assert!(page.contains(r#""profile":"quadratic-fit""#));
        assert!(page.contains(r#""wsPort":81"#));
        assert!(page.contains(r#""kind":"quadratic""#));
        assert!(page.contains(r#""absolute_cutoff_w":1000.0"#));
    }

    #[test]
    fn kinetic_profile_uses_cubic_formula() {
        let page = render(CalibrationProfile::KineticRoller, 8081, 500);

        assert!(page.contains(r#""kind":"roller-cubic""#));
        assert!(page.contains(r#""intervalMs":500"#));
        assert!(page.starts_with("<!doctype html>"));
    }
}
