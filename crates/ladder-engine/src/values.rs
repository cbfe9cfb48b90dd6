//! Parsing and display of self-reported results.

use ladder_types::{Mode, ResultKind};

use crate::error::{LadderError, Result};

/// A reported value in both forms the engine keeps: normalized text for
/// display and history, and the number the rating engine works with.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportedValue {
    pub display: String,
    pub metric: f64,
}

/// `SS.sss` or `M:SS.sss`, in seconds.
pub fn parse_time(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    let seconds = match raw.split_once(':') {
        Some((minutes, secs)) => {
            if secs.contains(':') {
                return None;
            }
            let minutes: u32 = minutes.trim().parse().ok()?;
            let secs: f64 = secs.trim().parse().ok()?;
            f64::from(minutes) * 60.0 + secs
        }
        None => raw.parse().ok()?,
    };
    seconds.is_finite().then_some(seconds)
}

pub fn format_time(seconds: f64) -> String {
    let minutes = (seconds / 60.0).floor() as u64;
    let secs = seconds - minutes as f64 * 60.0;
    if minutes > 0 {
        format!("{}:{:06.3}", minutes, secs)
    } else {
        format!("{:.3}", secs)
    }
}

pub fn parse_score(raw: &str) -> Option<u32> {
    raw.trim().parse().ok()
}

fn time_value(raw: &str) -> Result<ReportedValue> {
    match parse_time(raw) {
        Some(seconds) if seconds > 0.0 => Ok(ReportedValue {
            display: format_time(seconds),
            metric: seconds,
        }),
        Some(_) => Err(LadderError::validation("Time must be greater than zero.")),
        None => Err(LadderError::validation(
            "Invalid time format. Use MM:SS.sss or SS.sss",
        )),
    }
}

fn score_value(raw: &str, kind: ResultKind, target: u32) -> Result<ReportedValue> {
    let score =
        parse_score(raw).ok_or_else(|| LadderError::validation("Scores must be whole numbers."))?;
    match kind {
        ResultKind::Win if score != target => Err(LadderError::validation(format!(
            "Winning score must be {}.",
            target
        ))),
        ResultKind::Loss if score >= target => Err(LadderError::validation(format!(
            "Losing score must be less than {}.",
            target
        ))),
        _ => Ok(ReportedValue {
            display: score.to_string(),
            metric: f64::from(score),
        }),
    }
}

/// Validate a value reported as a `kind` result under `mode`.
pub fn parse_reported(mode: Mode, kind: ResultKind, raw: &str) -> Result<ReportedValue> {
    match mode {
        Mode::Speedrun => time_value(raw),
        Mode::Score { target } => score_value(raw, kind, target),
    }
}

/// Fixed forfeit values recorded when a targeted opponent declines: a 30s
/// penalty against a token winning time, or a shutout at the target.
pub fn forfeit_values(mode: Mode) -> (ReportedValue, ReportedValue) {
    match mode {
        Mode::Speedrun => (
            ReportedValue {
                display: format_time(0.001),
                metric: 0.001,
            },
            ReportedValue {
                display: format_time(30.0),
                metric: 30.0,
            },
        ),
        Mode::Score { target } => (
            ReportedValue {
                display: target.to_string(),
                metric: f64::from(target),
            },
            ReportedValue {
                display: "0".to_string(),
                metric: 0.0,
            },
        ),
    }
}
