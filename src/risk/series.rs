//! Daily input series for the risk model.
//!
//! A site's recent observations are averaged per calendar day, waves and
//! currents are joined on the day, and the previous row's wave height
//! becomes "yesterday". Only rows where every input is present are
//! scored.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::model::{Observation, VAR_CURRENT_U, VAR_CURRENT_V, VAR_WAVE_HEIGHT, VAR_WIND_SPEED};

/// Variables read for scoring.
pub const SCORING_VARIABLES: &[&str] = &[VAR_WAVE_HEIGHT, VAR_CURRENT_U, VAR_CURRENT_V, VAR_WIND_SPEED];

/// Significant wave height estimated from wind speed: `h ≈ 0.02·v²`.
pub fn wave_from_wind(wind_speed_ms: f64) -> f64 {
    0.02 * wind_speed_ms * wind_speed_ms
}

/// One calendar day of averaged conditions. Any field may be missing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailyRow {
    pub day: NaiveDate,
    pub wave_m: Option<f64>,
    pub current_u: Option<f64>,
    pub current_v: Option<f64>,
    /// Wave height of the previous row in the series.
    pub wave_prev_m: Option<f64>,
}

impl DailyRow {
    pub fn current_magnitude(&self) -> Option<f64> {
        match (self.current_u, self.current_v) {
            (Some(u), Some(v)) => Some((u * u + v * v).sqrt()),
            _ => None,
        }
    }

    pub fn complete(&self) -> Option<DailyInputs> {
        Some(DailyInputs {
            day: self.day,
            wave_today_m: self.wave_m?,
            wave_yesterday_m: self.wave_prev_m?,
            current_magnitude_ms: self.current_magnitude()?,
        })
    }
}

/// The three model inputs for one day.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailyInputs {
    pub day: NaiveDate,
    pub wave_today_m: f64,
    pub wave_yesterday_m: f64,
    pub current_magnitude_ms: f64,
}

#[derive(Default)]
struct Mean {
    sum: f64,
    n: usize,
}

impl Mean {
    fn push(&mut self, v: f64) {
        self.sum += v;
        self.n += 1;
    }

    fn get(&self) -> Option<f64> {
        (self.n > 0).then(|| self.sum / self.n as f64)
    }
}

fn daily_means(values: impl Iterator<Item = (NaiveDate, f64)>) -> BTreeMap<NaiveDate, f64> {
    let mut acc: BTreeMap<NaiveDate, Mean> = BTreeMap::new();
    for (day, v) in values {
        acc.entry(day).or_default().push(v);
    }
    acc.into_iter()
        .filter_map(|(day, m)| m.get().map(|mean| (day, mean)))
        .collect()
}

fn of_variable<'a>(
    rows: &'a [Observation],
    variable: &'a str,
) -> impl Iterator<Item = (NaiveDate, f64)> + 'a {
    rows.iter()
        .filter(move |o| o.variable == variable && o.value.is_finite())
        .map(|o| (o.timestamp.date_naive(), o.value))
}

/// Builds the day-by-day series from a site's observations.
///
/// When there is no wave data at all and `wind_proxy` is set, wave height is
/// estimated from wind speed. Returns an empty series when either waves or
/// currents are missing entirely.
pub fn daily_series(rows: &[Observation], wind_proxy: bool) -> Vec<DailyRow> {
    let mut waves = daily_means(of_variable(rows, VAR_WAVE_HEIGHT));
    if waves.is_empty() && wind_proxy {
        waves = daily_means(of_variable(rows, VAR_WIND_SPEED).map(|(d, v)| (d, wave_from_wind(v))));
    }
    let u = daily_means(of_variable(rows, VAR_CURRENT_U));
    let v = daily_means(of_variable(rows, VAR_CURRENT_V));
    if waves.is_empty() || (u.is_empty() && v.is_empty()) {
        return Vec::new();
    }

    let mut days: Vec<NaiveDate> = waves.keys().chain(u.keys()).chain(v.keys()).copied().collect();
    days.sort();
    days.dedup();

    let mut series = Vec::with_capacity(days.len());
    let mut prev_wave: Option<f64> = None;
    for day in days {
        let wave_m = waves.get(&day).copied();
        series.push(DailyRow {
            day,
            wave_m,
            current_u: u.get(&day).copied(),
            current_v: v.get(&day).copied(),
            wave_prev_m: prev_wave,
        });
        prev_wave = wave_m;
    }
    series
}

/// The most recent day with every input present.
pub fn latest_complete(series: &[DailyRow]) -> Option<DailyInputs> {
    series.iter().rev().find_map(DailyRow::complete)
}
