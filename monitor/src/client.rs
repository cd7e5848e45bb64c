use anyhow::Context;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use powermeter_common::{
    format_elapsed, CalibrationProfile, FilterOutcome, MonitorConfig, MonitorSession,
    PowerSeries, PERIOD_REQUEST,
};

const DEFAULT_URL: &str = "ws://127.0.0.1:8081/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Play,
    Pause,
    Status,
    Quit,
}

fn parse_command(line: &str) -> Option<Command> {
    match line.trim().to_ascii_lowercase().as_str() {
        "play" | "p" | "start" => Some(Command::Play),
        "pause" | "s" | "stop" => Some(Command::Pause),
        "status" | "?" => Some(Command::Status),
        "quit" | "q" | "exit" => Some(Command::Quit),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct SeriesSummary {
    points: usize,
    peak_w: f64,
    mean_w: f64,
    minutes: f64,
}

fn summarize(series: &PowerSeries) -> SeriesSummary {
    let points = series.points();
    if points.is_empty() {
        return SeriesSummary {
            points: 0,
            peak_w: 0.0,
            mean_w: 0.0,
            minutes: 0.0,
        };
    }

    let total: f64 = points.iter().map(|point| point.watts).sum();
    SeriesSummary {
        points: points.len(),
        peak_w: points.iter().map(|point| point.watts).fold(0.0, f64::max),
        mean_w: total / points.len() as f64,
        minutes: series.last().map(|point| point.minutes).unwrap_or(0.0),
    }
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let url = std::env::var("POWERMETER_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
    let profile = match std::env::var("POWERMETER_PROFILE") {
        Ok(value) => value
            .parse::<CalibrationProfile>()
            .map_err(anyhow::Error::msg)
            .context("invalid POWERMETER_PROFILE")?,
        Err(_) => CalibrationProfile::default(),
    };
    let mut monitor = MonitorConfig::default();
    if let Some(interval_ms) = std::env::var("POWERMETER_INTERVAL_MS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
    {
        monitor.sampling_interval_ms = interval_ms;
    }
    monitor.sanitize();

    let mut session = MonitorSession::for_profile(profile, &monitor);

    let (mut socket, _) = connect_async(url.as_str())
        .await
        .with_context(|| format!("failed to connect to meter at {url}"))?;
    session.on_open();
    info!(
        "connected to {url} (profile `{}`, every {} ms)",
        profile.as_str(),
        monitor.sampling_interval_ms
    );

    if std::env::var("POWERMETER_START_PAUSED").is_err() {
        session.play();
    } else {
        info!("paused; type `play` to start");
    }

    let mut commands = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut interval = tokio::time::interval(session.interval());

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let Some(report) = session.tick() else {
                    continue;
                };
                info!(
                    watts = report.rounded_watts,
                    time = %report.timer_label,
                    "power"
                );
                if let Err(err) = socket.send(Message::text(PERIOD_REQUEST)).await {
                    warn!("failed to send period request: {err}");
                    session.on_error();
                    break;
                }
            }
            message = socket.next() => match message {
                Some(Ok(Message::Binary(frame))) => match session.on_reply(&frame) {
                    Ok(FilterOutcome::Accepted(watts)) => {
                        debug!("period {:?} -> {watts:.1} W", session.last_period());
                    }
                    Ok(FilterOutcome::Rejected { candidate, held }) => {
                        debug!("rejected {candidate:.1} W, holding {held:.1} W");
                    }
                    Err(err) => warn!("ignoring reply: {err}"),
                },
                Some(Ok(Message::Close(_))) | None => {
                    session.on_close();
                    info!("meter closed the connection");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    session.on_error();
                    warn!("connection error: {err}");
                    break;
                }
            },
            line = commands.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match parse_command(&line) {
                    Some(Command::Play) => session.play(),
                    Some(Command::Pause) => session.pause(),
                    Some(Command::Status) => info!(
                        "{} | {} | elapsed {}",
                        session.connection().as_str(),
                        if session.is_paused() { "PAUSED" } else { "RUNNING" },
                        format_elapsed(session.elapsed())
                    ),
                    Some(Command::Quit) => break,
                    None => warn!("unknown command `{}`", line.trim()),
                },
                // Keep polling after stdin closes.
                Ok(None) => stdin_open = false,
                Err(err) => warn!("failed to read command: {err}"),
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    let summary = summarize(session.series());
    info!(
        "{} point(s) over {:.2} min, peak {:.0} W, mean {:.0} W",
        summary.points, summary.minutes, summary.peak_w, summary.mean_w
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn commands_parse_case_insensitively() {
        assert_eq!(parse_command(" PLAY "), Some(Command::Play));
        assert_eq!(parse_command("s"), Some(Command::Pause));
        assert_eq!(parse_command("?"), Some(Command::Status));
        assert_eq!(parse_command("exit"), Some(Command::Quit));
        assert_eq!(parse_command("faster"), None);
    }

    #[test]
    fn summary_of_empty_series_is_zero() {
        let summary = summarize(&PowerSeries::default());
        assert_eq!(summary.points, 0);
        assert_eq!(summary.peak_w, 0.0);
    }

    #[test]
    fn summary_reports_peak_and_mean() {
        let mut series = PowerSeries::default();
        series.push(Duration::from_secs(1), 100.0);
        series.push(Duration::from_secs(2), 150.0);
        series.push(Duration::from_secs(3), 50.0);

        let summary = summarize(&series);
        assert_eq!(summary.points, 3);
        assert_eq!(summary.peak_w, 150.0);
        assert_eq!(summary.mean_w, 100.0);
        assert_eq!(summary.minutes, 3.0 / 60.0);
    }
}
