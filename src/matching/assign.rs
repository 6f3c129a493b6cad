//! Site assignment policy.
//!
//! Turns matches into site-tagged observation rows:
//!
//! 1. search at the base radius;
//! 2. widen by each back-off multiplier while fewer than `min_matches` rows
//!    are found;
//! 3. if still short and the policy allows it, copy the history of a donor
//!    site with per-value jitter;
//! 4. otherwise write whatever was found.
//!
//! Rows are written at the site's own point, so the raw pool is never
//! modified and reruns upsert onto the same keys. Sites must be processed
//! one at a time; the binaries iterate sequentially.

use chrono::{DateTime, Utc};
use rand::Rng;

use super::{find_matches, MatchOutcome, MatchRequest};
use crate::config::MatchPolicy;
use crate::logging::{self, Component};
use crate::model::{GloriaError, Observation, Provenance, Site};
use crate::store::{upsert_chunked, Candidate, GeoStore, UpsertReport};

#[derive(Debug, Clone, PartialEq)]
pub enum AssignmentOutcome {
    /// Matched rows were written. `below_minimum` is set when back-off ran
    /// out and fewer than `min_matches` rows were assigned.
    Matched {
        radius_km: f64,
        report: UpsertReport,
        below_minimum: bool,
    },
    /// Too few rows nearby; a donor's history was copied instead.
    Synthesized { donor_site_id: i32, report: UpsertReport },
    InsufficientData { found: usize, required: usize },
    SourceUnavailable(String),
}

impl AssignmentOutcome {
    pub fn rows_written(&self) -> usize {
        match self {
            AssignmentOutcome::Matched { report, .. } => report.written,
            AssignmentOutcome::Synthesized { report, .. } => report.written,
            _ => 0,
        }
    }
}

/// Radii tried in order: the base radius, then each multiple of it.
pub fn search_radii(policy: &MatchPolicy) -> Vec<f64> {
    std::iter::once(policy.max_distance_km)
        .chain(policy.radius_backoff.iter().map(|m| policy.max_distance_km * m))
        .collect()
}

/// Builds the rows a site receives from its matches.
pub fn assigned_rows(site: &Site, matches: &[Candidate]) -> Vec<Observation> {
    matches
        .iter()
        .map(|m| Observation {
            dataset_id: m.dataset_id,
            variable: m.variable.clone(),
            timestamp: m.timestamp,
            value: m.value,
            site_id: Some(site.id),
            location: site.location,
            depth: m.depth,
            quality: m.quality,
            provenance: Provenance::Assigned,
        })
        .collect()
}

/// Copies donor rows to `site`, scaling each value by a uniform factor in
/// `[1 - jitter, 1 + jitter]`.
pub fn jittered_copies<R: Rng + ?Sized>(
    site: &Site,
    donor_rows: &[Observation],
    jitter: f64,
    rng: &mut R,
) -> Vec<Observation> {
    donor_rows
        .iter()
        .filter(|o| o.provenance != Provenance::Synthetic)
        .map(|o| Observation {
            value: o.value * rng.random_range((1.0 - jitter)..=(1.0 + jitter)),
            site_id: Some(site.id),
            location: site.location,
            provenance: Provenance::Synthetic,
            ..o.clone()
        })
        .collect()
}

/// Assigns observations of `variable` (or of every variable) to `site`.
pub fn assign_site<S, R>(
    store: &mut S,
    site: &Site,
    variable: Option<&str>,
    policy: &MatchPolicy,
    now: DateTime<Utc>,
    rng: &mut R,
) -> AssignmentOutcome
where
    S: GeoStore + ?Sized,
    R: Rng + ?Sized,
{
    let site_tag = site.id.to_string();
    let base = MatchRequest {
        origin: site.location,
        variable: variable.map(String::from),
        max_distance_km: policy.max_distance_km,
        time_window_days: policy.time_window_days,
        limit: policy.candidate_limit,
        min_matches: policy.min_matches,
    };

    let mut best: Option<(f64, Vec<Candidate>)> = None;
    for radius in search_radii(policy) {
        match find_matches(store, &base.with_radius(radius), now) {
            MatchOutcome::Matched(rows) => {
                let report = upsert_chunked(
                    store,
                    &assigned_rows(site, &rows),
                    policy.chunk_size,
                    Component::Matching,
                );
                return AssignmentOutcome::Matched { radius_km: radius, report, below_minimum: false };
            }
            MatchOutcome::InsufficientData { found, required } => {
                logging::debug(
                    Component::Matching,
                    Some(&site_tag),
                    &format!("{} of {} rows within {:.0} km", found.len(), required, radius),
                );
                if best.as_ref().is_none_or(|(_, rows)| found.len() > rows.len()) {
                    best = Some((radius, found));
                }
            }
            MatchOutcome::SourceUnavailable(msg) => {
                return AssignmentOutcome::SourceUnavailable(msg);
            }
        }
    }

    if policy.donor_fallback {
        let found = best.as_ref().map_or(0, |(_, rows)| rows.len());
        match copy_from_donor(store, site, variable, policy, found, rng) {
            Ok(Some(outcome)) => return outcome,
            Ok(None) => {}
            Err(e) => return AssignmentOutcome::SourceUnavailable(e.to_string()),
        }
    }

    match best {
        Some((radius, rows)) if !rows.is_empty() => {
            logging::warn(
                Component::Matching,
                Some(&site_tag),
                &format!(
                    "Only {} rows within {:.0} km (minimum {}); assigning them anyway",
                    rows.len(),
                    radius,
                    policy.min_matches
                ),
            );
            let report = upsert_chunked(
                store,
                &assigned_rows(site, &rows),
                policy.chunk_size,
                Component::Matching,
            );
            AssignmentOutcome::Matched { radius_km: radius, report, below_minimum: true }
        }
        _ => AssignmentOutcome::InsufficientData { found: 0, required: policy.min_matches },
    }
}

fn copy_from_donor<S, R>(
    store: &mut S,
    site: &Site,
    variable: Option<&str>,
    policy: &MatchPolicy,
    found: usize,
    rng: &mut R,
) -> Result<Option<AssignmentOutcome>, GloriaError>
where
    S: GeoStore + ?Sized,
    R: Rng + ?Sized,
{
    let Some(donor) = store.donor_site(site.id, policy.donor_min_observations)? else {
        return Ok(None);
    };
    let variables: Vec<&str> = variable.into_iter().collect();
    let donor_rows = store.site_observations(donor.site_id, &variables, None)?;
    let copies = jittered_copies(site, &donor_rows, policy.jitter_fraction, rng);
    if copies.is_empty() {
        return Ok(None);
    }

    logging::warn(
        Component::Matching,
        Some(&site.id.to_string()),
        &format!(
            "Only {} of {} rows nearby; copying {} rows from site {} as synthetic data",
            found,
            policy.min_matches,
            copies.len(),
            donor.site_id
        ),
    );
    let report = upsert_chunked(store, &copies, policy.chunk_size, Component::Matching);
    Ok(Some(AssignmentOutcome::Synthesized { donor_site_id: donor.site_id, report }))
}

// ---------------------------------------------------------------------------
// Batch runs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssignmentSummary {
    pub sites: usize,
    pub matched: usize,
    pub synthesized: usize,
    pub insufficient: usize,
    pub rows_written: usize,
    pub rows_failed: usize,
}

impl AssignmentSummary {
    fn record(&mut self, outcome: &AssignmentOutcome) {
        match outcome {
            AssignmentOutcome::Matched { report, .. } => {
                self.matched += 1;
                self.rows_written += report.written;
                self.rows_failed += report.failed_rows;
            }
            AssignmentOutcome::Synthesized { report, .. } => {
                self.synthesized += 1;
                self.rows_written += report.written;
                self.rows_failed += report.failed_rows;
            }
            AssignmentOutcome::InsufficientData { .. } => self.insufficient += 1,
            AssignmentOutcome::SourceUnavailable(_) => {}
        }
    }
}

fn log_outcome(site: &Site, variable: Option<&str>, outcome: &AssignmentOutcome) {
    let tag = site.id.to_string();
    let what = variable.unwrap_or("all variables");
    match outcome {
        AssignmentOutcome::Matched { radius_km, report, .. } => logging::info(
            Component::Matching,
            Some(&tag),
            &format!("{}: {} rows assigned within {:.0} km", what, report.written, radius_km),
        ),
        AssignmentOutcome::Synthesized { donor_site_id, report } => logging::info(
            Component::Matching,
            Some(&tag),
            &format!("{}: {} synthetic rows from site {}", what, report.written, donor_site_id),
        ),
        AssignmentOutcome::InsufficientData { required, .. } => logging::warn(
            Component::Matching,
            Some(&tag),
            &format!("{}: no data found (needed {})", what, required),
        ),
        AssignmentOutcome::SourceUnavailable(msg) => {
            logging::error(Component::Matching, Some(&tag), msg)
        }
    }
}

/// Every site, one variable at a time, for each variable in the raw pool.
pub fn run_per_variable<S, R>(
    store: &mut S,
    sites: &[Site],
    policy: &MatchPolicy,
    now: DateTime<Utc>,
    rng: &mut R,
) -> Result<AssignmentSummary, GloriaError>
where
    S: GeoStore + ?Sized,
    R: Rng + ?Sized,
{
    let variables = store.raw_variables()?;
    let mut summary = AssignmentSummary::default();
    for site in sites {
        summary.sites += 1;
        for variable in &variables {
            let outcome = assign_site(store, site, Some(variable), policy, now, rng);
            log_outcome(site, Some(variable), &outcome);
            if let AssignmentOutcome::SourceUnavailable(msg) = outcome {
                return Err(GloriaError::Database(msg));
            }
            summary.record(&outcome);
        }
    }
    Ok(summary)
}

/// Sites that hold no observations yet, all variables at once.
pub fn run_unassigned_sites<S, R>(
    store: &mut S,
    policy: &MatchPolicy,
    now: DateTime<Utc>,
    rng: &mut R,
) -> Result<AssignmentSummary, GloriaError>
where
    S: GeoStore + ?Sized,
    R: Rng + ?Sized,
{
    let sites = store.sites_without_observations()?;
    logging::info(
        Component::Matching,
        None,
        &format!("{} sites without data", sites.len()),
    );
    let mut summary = AssignmentSummary::default();
    for site in &sites {
        summary.sites += 1;
        let outcome = assign_site(store, site, None, policy, now, rng);
        log_outcome(site, None, &outcome);
        if let AssignmentOutcome::SourceUnavailable(msg) = outcome {
            return Err(GloriaError::Database(msg));
        }
        summary.record(&outcome);
    }
    Ok(summary)
}
