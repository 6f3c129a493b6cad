//! Nearest-observation matching.
//!
//! Given a site's point, finds raw pool observations within a distance bound
//! and keeps one per (variable, calendar day): the nearest, with the most
//! recent winning a distance tie. The caller-side policy (radius back-off,
//! donor fallback, writing rows) lives in [`assign`].

pub mod assign;

use std::collections::HashMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::model::GeoPoint;
use crate::store::{Candidate, CandidateQuery, GeoStore};

/// One matching request around a site.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchRequest {
    pub origin: GeoPoint,
    pub variable: Option<String>,
    pub max_distance_km: f64,
    pub time_window_days: Option<u32>,
    pub limit: Option<usize>,
    /// Fewer selected rows than this is reported as insufficient.
    pub min_matches: usize,
}

impl MatchRequest {
    pub fn with_radius(&self, max_distance_km: f64) -> Self {
        Self { max_distance_km, ..self.clone() }
    }

    fn query(&self, now: DateTime<Utc>) -> CandidateQuery {
        CandidateQuery {
            origin: self.origin,
            variable: self.variable.clone(),
            max_distance_km: self.max_distance_km,
            since: self
                .time_window_days
                .map(|days| now - Duration::days(i64::from(days))),
            limit: self.limit,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    /// At least `min_matches` rows were selected.
    Matched(Vec<Candidate>),
    /// Fewer rows than required; `found` may be empty.
    InsufficientData { found: Vec<Candidate>, required: usize },
    /// The store could not be queried.
    SourceUnavailable(String),
}

impl MatchOutcome {
    /// Selected rows regardless of whether the minimum was reached.
    pub fn rows(&self) -> &[Candidate] {
        match self {
            MatchOutcome::Matched(rows) => rows,
            MatchOutcome::InsufficientData { found, .. } => found,
            MatchOutcome::SourceUnavailable(_) => &[],
        }
    }
}

/// Runs the candidate query for `request` and reduces it to one row per
/// (variable, day).
pub fn find_matches<S: GeoStore + ?Sized>(
    store: &mut S,
    request: &MatchRequest,
    now: DateTime<Utc>,
) -> MatchOutcome {
    let candidates = match store.candidates(&request.query(now)) {
        Ok(c) => c,
        Err(e) => return MatchOutcome::SourceUnavailable(e.to_string()),
    };

    let selected = select_matches(candidates);
    if !selected.is_empty() && selected.len() >= request.min_matches {
        MatchOutcome::Matched(selected)
    } else {
        MatchOutcome::InsufficientData { found: selected, required: request.min_matches }
    }
}

/// Keeps, for every (variable, calendar day), the candidate with the
/// smallest distance; equal distances go to the later timestamp.
///
/// Output is ordered newest day first, then by variable name.
pub fn select_matches(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut best: HashMap<(String, NaiveDate), Candidate> = HashMap::new();

    for c in candidates {
        let key = (c.variable.clone(), c.timestamp.date_naive());
        match best.get(&key) {
            Some(current) if !is_better(&c, current) => {}
            _ => {
                best.insert(key, c);
            }
        }
    }

    let mut selected: Vec<Candidate> = best.into_values().collect();
    selected.sort_by(|a, b| {
        b.timestamp
            .date_naive()
            .cmp(&a.timestamp.date_naive())
            .then_with(|| a.variable.cmp(&b.variable))
    });
    selected
}

fn is_better(challenger: &Candidate, current: &Candidate) -> bool {
    match challenger.distance_km.total_cmp(&current.distance_km) {
        std::cmp::Ordering::Less => true,
        std::cmp::Ordering::Greater => false,
        std::cmp::Ordering::Equal => challenger.timestamp > current.timestamp,
    }
}
