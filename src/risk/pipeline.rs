//! Daily scoring run: read a site's recent conditions, score them, persist
//! the record, and raise an alert for high-risk days.

use chrono::{DateTime, Duration, Utc};

use super::series::{daily_series, latest_complete, DailyInputs, SCORING_VARIABLES};
use super::{score, RiskAssessment};
use crate::alert::thresholds::check_escape_risk;
use crate::config::ScoringConfig;
use crate::logging::{self, Component};
use crate::model::{Alert, GloriaError, RiskRecord, Site, SiteKind};
use crate::store::GeoStore;

#[derive(Debug, Clone, PartialEq)]
pub struct SiteAssessment {
    pub site: Site,
    /// `None` when no complete day was available and the default was used.
    pub inputs: Option<DailyInputs>,
    pub assessment: RiskAssessment,
    pub record: RiskRecord,
    pub alert: Option<Alert>,
}

/// Sites the scorer considers: marine and active.
pub fn scorable(site: &Site) -> bool {
    site.kind == SiteKind::Marine && site.active
}

/// Scores one site as of `now` and writes the record (and alert, if any).
pub fn assess_site<S: GeoStore + ?Sized>(
    store: &mut S,
    site: &Site,
    config: &ScoringConfig,
    now: DateTime<Utc>,
) -> Result<SiteAssessment, GloriaError> {
    let tag = site.id.to_string();
    let since = now - Duration::days(i64::from(config.days_back));
    let rows = store.site_observations(site.id, SCORING_VARIABLES, Some(since))?;
    let series = daily_series(&rows, config.wind_proxy);
    let inputs = latest_complete(&series);

    let assessment = match inputs {
        Some(i) => score(i.wave_today_m, i.wave_yesterday_m, i.current_magnitude_ms),
        None => {
            logging::warn(
                Component::Scoring,
                Some(&tag),
                &format!(
                    "No complete day in the last {} days ({} rows); using default index",
                    config.days_back,
                    rows.len()
                ),
            );
            RiskAssessment::no_data()
        }
    };

    let record = RiskRecord {
        site_id: site.id,
        day: now.date_naive(),
        wave_today_m: inputs.map(|i| i.wave_today_m).unwrap_or(0.0),
        wave_yesterday_m: inputs.map(|i| i.wave_yesterday_m).unwrap_or(0.0),
        current_magnitude_ms: inputs.map(|i| i.current_magnitude_ms).unwrap_or(0.0),
        index: assessment.index,
        tier: assessment.tier,
        probability: assessment.probability,
        computed_at: now,
    };
    store.upsert_risk_record(&record)?;

    let alert = check_escape_risk(&record);
    if let Some(ref a) = alert {
        store.upsert_alert(a)?;
        logging::warn(
            Component::Scoring,
            Some(&tag),
            &format!("{} alert: {}", a.severity.as_str(), a.description),
        );
    }

    logging::debug(
        Component::Scoring,
        Some(&tag),
        &format!("index {:.1} ({})", record.index, record.tier.as_str()),
    );

    Ok(SiteAssessment { site: site.clone(), inputs, assessment, record, alert })
}

/// Scores every marine, active site. Results are sorted by index, highest
/// first.
///
/// A site whose reads or writes fail is logged and left out; the rest are
/// still scored. Only a lost connection stops the run.
pub fn run_scoring<S: GeoStore + ?Sized>(
    store: &mut S,
    config: &ScoringConfig,
    now: DateTime<Utc>,
) -> Result<Vec<SiteAssessment>, GloriaError> {
    let sites: Vec<Site> = store.sites()?.into_iter().filter(scorable).collect();
    logging::info(Component::Scoring, None, &format!("Scoring {} marine sites", sites.len()));

    let mut results = Vec::with_capacity(sites.len());
    let mut failed = 0;
    for site in &sites {
        match assess_site(store, site, config, now) {
            Ok(result) => results.push(result),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                failed += 1;
                logging::error(
                    Component::Scoring,
                    Some(&site.id.to_string()),
                    &format!("Scoring failed: {}", e),
                );
            }
        }
    }
    logging::log_batch_summary(Component::Scoring, "Scoring", sites.len(), results.len(), failed);

    results.sort_by(|a, b| b.record.index.total_cmp(&a.record.index));
    Ok(results)
}
