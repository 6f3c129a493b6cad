//! Fish-escape risk scoring.
//!
//! Three inputs (today's significant wave height, yesterday's, and the
//! surface current speed) are each mapped through a saturating piecewise
//! linear contribution on a 0-10 scale, then combined with fixed weights.
//! Yesterday's sea state carries the most weight: structural fatigue from a
//! storm shows up as escapes the following day.

pub mod pipeline;
pub mod series;

use serde::Serialize;

use crate::model::RiskTier;

pub const WEIGHT_WAVE_TODAY: f64 = 0.3;
pub const WEIGHT_WAVE_YESTERDAY: f64 = 0.7;
pub const WEIGHT_CURRENT: f64 = 0.2;

pub const WAVE_THRESHOLD_M: f64 = 3.0;
pub const CURRENT_THRESHOLD_MS: f64 = 0.8;

/// Index reported when a site has no usable data.
pub const NO_DATA_INDEX: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FactorKind {
    WaveYesterday,
    WaveToday,
    CurrentSpeed,
}

impl FactorKind {
    pub fn label(&self) -> &'static str {
        match self {
            FactorKind::WaveYesterday => "Wave height (previous day)",
            FactorKind::WaveToday => "Wave height (current day)",
            FactorKind::CurrentSpeed => "Current speed",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            FactorKind::WaveYesterday | FactorKind::WaveToday => "m",
            FactorKind::CurrentSpeed => "m/s",
        }
    }

    pub fn threshold(&self) -> f64 {
        match self {
            FactorKind::WaveYesterday | FactorKind::WaveToday => WAVE_THRESHOLD_M,
            FactorKind::CurrentSpeed => CURRENT_THRESHOLD_MS,
        }
    }
}

/// One input's share of the index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskFactor {
    pub kind: FactorKind,
    /// Input value, 2 decimals.
    pub value: f64,
    pub threshold: f64,
    /// 0-10, 1 decimal.
    pub contribution: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskAssessment {
    /// 0-10, 1 decimal.
    pub index: f64,
    pub tier: RiskTier,
    /// 0-1, 2 decimals.
    pub probability: f64,
    /// Highest contribution first.
    pub factors: Vec<RiskFactor>,
}

impl RiskAssessment {
    /// Assessment used when a site has no complete day of data.
    pub fn no_data() -> Self {
        Self {
            index: NO_DATA_INDEX,
            tier: RiskTier::Low,
            probability: NO_DATA_INDEX / 10.0,
            factors: [FactorKind::WaveYesterday, FactorKind::WaveToday, FactorKind::CurrentSpeed]
                .into_iter()
                .map(|kind| RiskFactor { kind, value: 0.0, threshold: kind.threshold(), contribution: 0.0 })
                .collect(),
        }
    }
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

/// Contribution of a significant wave height in metres.
pub fn wave_contribution(h: f64) -> f64 {
    let h = h.max(0.0);
    if h < 1.5 {
        h / 1.5 * 3.0
    } else if h < 3.0 {
        3.0 + (h - 1.5) / 1.5 * 3.0
    } else {
        6.0 + f64::min(4.0, (h - 3.0) * 2.0)
    }
}

/// Contribution of a current speed in m/s.
pub fn current_contribution(c: f64) -> f64 {
    let c = c.max(0.0);
    if c < 0.3 {
        c / 0.3 * 3.0
    } else if c < 0.8 {
        3.0 + (c - 0.3) / 0.5 * 4.0
    } else {
        7.0 + f64::min(3.0, (c - 0.8) * 5.0)
    }
}

/// Scores one day's conditions.
pub fn score(wave_today: f64, wave_yesterday: f64, current_magnitude: f64) -> RiskAssessment {
    let today = wave_contribution(wave_today);
    let yesterday = wave_contribution(wave_yesterday);
    let current = current_contribution(current_magnitude);

    let raw = (WEIGHT_WAVE_TODAY * today + WEIGHT_WAVE_YESTERDAY * yesterday + WEIGHT_CURRENT * current)
        / (WEIGHT_WAVE_TODAY + WEIGHT_WAVE_YESTERDAY + WEIGHT_CURRENT);
    let index = raw.clamp(0.0, 10.0);

    let mut factors = vec![
        RiskFactor {
            kind: FactorKind::WaveYesterday,
            value: round_to(wave_yesterday, 2),
            threshold: WAVE_THRESHOLD_M,
            contribution: round_to(yesterday, 1),
        },
        RiskFactor {
            kind: FactorKind::WaveToday,
            value: round_to(wave_today, 2),
            threshold: WAVE_THRESHOLD_M,
            contribution: round_to(today, 1),
        },
        RiskFactor {
            kind: FactorKind::CurrentSpeed,
            value: round_to(current_magnitude, 2),
            threshold: CURRENT_THRESHOLD_MS,
            contribution: round_to(current, 1),
        },
    ];
    // stable: equal contributions keep the order above
    factors.sort_by(|a, b| b.contribution.total_cmp(&a.contribution));

    RiskAssessment {
        index: round_to(index, 1),
        tier: RiskTier::from_index(index),
        probability: round_to(index / 10.0, 2),
        factors,
    }
}

/// Probability and tier from the fixed-coefficient logistic formulation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogisticEstimate {
    /// 4 decimals.
    pub probability: f64,
    pub tier: RiskTier,
}

/// Logistic escape probability over
/// `[wave_today, wave_yesterday, temperature, current]` with coefficients
/// `[0.5, 2.1, 0.3, 0.1]` and intercept `-4.0`. Missing temperature
/// defaults to 22 °C and missing current to 0.3 m/s.
#[deprecated(note = "the weighted piecewise model in `score` is canonical; kept for comparison")]
pub fn logistic_probability(
    wave_today: f64,
    wave_yesterday: f64,
    temperature: Option<f64>,
    current: Option<f64>,
) -> LogisticEstimate {
    let temperature = temperature.unwrap_or(22.0);
    let current = current.unwrap_or(0.3);
    let z = -4.0 + 0.5 * wave_today + 2.1 * wave_yesterday + 0.3 * temperature + 0.1 * current;
    let p = 1.0 / (1.0 + (-z).exp());
    let tier = if p > 0.6 {
        RiskTier::High
    } else if p > 0.3 {
        RiskTier::Medium
    } else {
        RiskTier::Low
    };
    LogisticEstimate { probability: round_to(p, 4), tier }
}
