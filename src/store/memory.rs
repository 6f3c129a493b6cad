//! In-process `GeoStore`.
//!
//! Mirrors the PostGIS backend's semantics: the same uniqueness keys, the
//! same candidate ordering, all-or-nothing chunks. Distances use the geodesic
//! on the WGS84 ellipsoid, matching `ST_Distance` on geography.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};

use super::{
    validate_observation, Candidate, CandidateQuery, Donor, GeoStore, ImportLogEntry,
};
use crate::geodesy::{geodesic_distance_km, ring_contains};
use crate::model::{
    Alert, GeoPoint, GloriaError, Observation, ObservationKey, Provenance, RiskRecord, Site,
};

#[derive(Debug, Default)]
pub struct MemoryGeoStore {
    sites: Vec<Site>,
    observations: Vec<Observation>,
    index: HashMap<ObservationKey, usize>,
    risk_records: HashMap<(i32, NaiveDate), RiskRecord>,
    alerts: HashMap<(i32, String, NaiveDate), Alert>,
    imports: Vec<ImportLogEntry>,
    datasets: Vec<String>,
    unavailable: bool,
    rejected_sites: Vec<i32>,
}

impl MemoryGeoStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_site(&mut self, site: Site) {
        self.sites.retain(|s| s.id != site.id);
        self.sites.push(site);
        self.sites.sort_by_key(|s| s.id);
    }

    /// Makes every query fail as if the database were unreachable.
    pub fn set_unavailable(&mut self, unavailable: bool) {
        self.unavailable = unavailable;
    }

    /// Makes risk-record and alert writes for `site_id` fail, leaving every
    /// other site writable.
    pub fn reject_writes_for(&mut self, site_id: i32) {
        self.rejected_sites.push(site_id);
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn observation_count(&self) -> usize {
        self.observations.len()
    }

    pub fn risk_records(&self) -> Vec<&RiskRecord> {
        let mut records: Vec<&RiskRecord> = self.risk_records.values().collect();
        records.sort_by_key(|r| (r.site_id, r.day));
        records
    }

    pub fn alerts(&self) -> Vec<&Alert> {
        let mut alerts: Vec<&Alert> = self.alerts.values().collect();
        alerts.sort_by_key(|a| (a.site_id, a.opened_at));
        alerts
    }

    pub fn imports(&self) -> &[ImportLogEntry] {
        &self.imports
    }

    fn check_available(&self) -> Result<(), GloriaError> {
        if self.unavailable {
            Err(GloriaError::ConnectionLost("store unavailable".to_string()))
        } else {
            Ok(())
        }
    }

    fn check_writable(&self, site_id: i32) -> Result<(), GloriaError> {
        self.check_available()?;
        if self.rejected_sites.contains(&site_id) {
            Err(GloriaError::Database(format!("write rejected for site {}", site_id)))
        } else {
            Ok(())
        }
    }
}

impl GeoStore for MemoryGeoStore {
    fn sites(&mut self) -> Result<Vec<Site>, GloriaError> {
        self.check_available()?;
        Ok(self.sites.clone())
    }

    fn site(&mut self, id: i32) -> Result<Site, GloriaError> {
        self.check_available()?;
        self.sites
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or(GloriaError::SiteNotFound(id))
    }

    fn sites_without_observations(&mut self) -> Result<Vec<Site>, GloriaError> {
        self.check_available()?;
        Ok(self
            .sites
            .iter()
            .filter(|s| !self.observations.iter().any(|o| o.site_id == Some(s.id)))
            .cloned()
            .collect())
    }

    fn raw_variables(&mut self) -> Result<Vec<String>, GloriaError> {
        self.check_available()?;
        let mut names: Vec<String> = self
            .observations
            .iter()
            .filter(|o| o.site_id.is_none())
            .map(|o| o.variable.clone())
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    fn candidates(&mut self, query: &CandidateQuery) -> Result<Vec<Candidate>, GloriaError> {
        self.check_available()?;
        let mut found: Vec<Candidate> = self
            .observations
            .iter()
            .filter(|o| o.site_id.is_none())
            .filter(|o| query.variable.as_deref().is_none_or(|v| o.variable == v))
            .filter(|o| query.since.is_none_or(|since| o.timestamp >= since))
            .filter_map(|o| {
                let distance_km = geodesic_distance_km(query.origin, o.location);
                (distance_km <= query.max_distance_km).then(|| Candidate {
                    variable: o.variable.clone(),
                    timestamp: o.timestamp,
                    value: o.value,
                    dataset_id: o.dataset_id,
                    depth: o.depth,
                    quality: o.quality,
                    distance_km,
                })
            })
            .collect();

        found.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then(a.distance_km.total_cmp(&b.distance_km))
        });
        if let Some(limit) = query.limit {
            found.truncate(limit);
        }
        Ok(found)
    }

    fn locate_site(
        &mut self,
        point: GeoPoint,
        max_distance_km: f64,
    ) -> Result<Option<i32>, GloriaError> {
        self.check_available()?;
        if let Some(site) = self
            .sites
            .iter()
            .find(|s| s.area.as_deref().is_some_and(|ring| ring_contains(ring, point)))
        {
            return Ok(Some(site.id));
        }

        Ok(self
            .sites
            .iter()
            .map(|s| (s.id, geodesic_distance_km(s.location, point)))
            .filter(|(_, d)| *d <= max_distance_km)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(id, _)| id))
    }

    fn upsert_chunk(&mut self, rows: &[Observation]) -> Result<usize, GloriaError> {
        self.check_available()?;
        for row in rows {
            validate_observation(row)?;
        }
        for row in rows {
            match self.index.get(&row.key()) {
                Some(&i) => {
                    let existing = &mut self.observations[i];
                    existing.value = row.value;
                    existing.quality = row.quality;
                    existing.provenance = row.provenance;
                }
                None => {
                    self.index.insert(row.key(), self.observations.len());
                    self.observations.push(row.clone());
                }
            }
        }
        Ok(rows.len())
    }

    fn donor_site(
        &mut self,
        exclude: i32,
        min_observations: i64,
    ) -> Result<Option<Donor>, GloriaError> {
        self.check_available()?;
        let mut counts: HashMap<i32, i64> = HashMap::new();
        for o in &self.observations {
            if let Some(id) = o.site_id {
                if id != exclude && o.provenance != Provenance::Synthetic {
                    *counts.entry(id).or_insert(0) += 1;
                }
            }
        }
        Ok(counts
            .into_iter()
            .filter(|(_, n)| *n > min_observations)
            // most observations, lowest id on ties
            .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
            .map(|(site_id, observation_count)| Donor { site_id, observation_count }))
    }

    fn site_observations(
        &mut self,
        site_id: i32,
        variables: &[&str],
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Observation>, GloriaError> {
        self.check_available()?;
        let mut rows: Vec<Observation> = self
            .observations
            .iter()
            .filter(|o| o.site_id == Some(site_id))
            .filter(|o| variables.is_empty() || variables.contains(&o.variable.as_str()))
            .filter(|o| since.is_none_or(|s| o.timestamp >= s))
            .cloned()
            .collect();
        rows.sort_by_key(|o| o.timestamp);
        Ok(rows)
    }

    fn upsert_risk_record(&mut self, record: &RiskRecord) -> Result<(), GloriaError> {
        self.check_writable(record.site_id)?;
        self.risk_records
            .insert((record.site_id, record.day), record.clone());
        Ok(())
    }

    fn upsert_alert(&mut self, alert: &Alert) -> Result<(), GloriaError> {
        self.check_writable(alert.site_id)?;
        let key = (alert.site_id, alert.alert_type.clone(), alert.opened_at.date_naive());
        match self.alerts.get_mut(&key) {
            Some(existing) => {
                existing.severity = alert.severity;
                existing.description = alert.description.clone();
                existing.active = alert.active;
            }
            None => {
                self.alerts.insert(key, alert.clone());
            }
        }
        Ok(())
    }

    fn record_import(&mut self, entry: &ImportLogEntry) -> Result<(), GloriaError> {
        self.check_available()?;
        self.imports.push(entry.clone());
        Ok(())
    }

    fn dataset_ref(&mut self, external_id: &str) -> Result<i32, GloriaError> {
        self.check_available()?;
        let pos = match self.datasets.iter().position(|d| d == external_id) {
            Some(pos) => pos,
            None => {
                self.datasets.push(external_id.to_string());
                self.datasets.len() - 1
            }
        };
        Ok(pos as i32 + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AlertSeverity, RiskTier, SiteKind, VAR_TEMPERATURE, VAR_WAVE_HEIGHT};
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 10, 12, 0, 0).unwrap()
    }

    fn raw(variable: &str, hours: i64, lon: f64, lat: f64, value: f64) -> Observation {
        Observation {
            dataset_id: 1,
            variable: variable.to_string(),
            timestamp: t0() + Duration::hours(hours),
            value,
            site_id: None,
            location: GeoPoint::new(lon, lat),
            depth: None,
            quality: 90,
            provenance: Provenance::Measured,
        }
    }

    fn site(id: i32, lon: f64, lat: f64) -> Site {
        Site {
            id,
            name: format!("Site {}", id),
            kind: SiteKind::Marine,
            location: GeoPoint::new(lon, lat),
            area: None,
            active: true,
        }
    }

    #[test]
    fn test_upsert_same_key_updates_in_place() {
        let mut store = MemoryGeoStore::new();
        let first = raw(VAR_TEMPERATURE, 0, -0.4, 38.3, 17.0);
        store.upsert_chunk(&[first.clone()]).unwrap();

        let mut again = first.clone();
        again.value = 18.5;
        again.quality = 80;
        store.upsert_chunk(&[again]).unwrap();

        assert_eq!(store.observation_count(), 1);
        assert_eq!(store.observations()[0].value, 18.5);
        assert_eq!(store.observations()[0].quality, 80);
    }

    #[test]
    fn test_chunk_with_invalid_row_writes_nothing() {
        let mut store = MemoryGeoStore::new();
        let rows = vec![
            raw(VAR_TEMPERATURE, 0, -0.4, 38.3, 17.0),
            raw(VAR_TEMPERATURE, 1, -0.4, 38.3, f64::INFINITY),
        ];
        assert!(store.upsert_chunk(&rows).is_err());
        assert_eq!(store.observation_count(), 0);
    }

    #[test]
    fn test_candidates_ordered_newest_then_nearest_and_limited() {
        let mut store = MemoryGeoStore::new();
        store
            .upsert_chunk(&[
                raw(VAR_WAVE_HEIGHT, 0, -0.40, 38.30, 1.0),
                raw(VAR_WAVE_HEIGHT, 5, -0.45, 38.30, 1.1),
                raw(VAR_WAVE_HEIGHT, 5, -0.41, 38.30, 1.2),
                raw(VAR_WAVE_HEIGHT, 5, 3.00, 38.30, 9.9),
            ])
            .unwrap();

        let query = CandidateQuery {
            origin: GeoPoint::new(-0.40, 38.30),
            variable: None,
            max_distance_km: 20.0,
            since: None,
            limit: None,
        };
        let found = store.candidates(&query).unwrap();
        let values: Vec<f64> = found.iter().map(|c| c.value).collect();
        assert_eq!(values, vec![1.2, 1.1, 1.0]);

        let limited = store.candidates(&CandidateQuery { limit: Some(1), ..query }).unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].value, 1.2);
    }

    #[test]
    fn test_candidates_skip_assigned_rows_and_respect_filters() {
        let mut store = MemoryGeoStore::new();
        let mut assigned = raw(VAR_WAVE_HEIGHT, 0, -0.40, 38.30, 1.0);
        assigned.site_id = Some(3);
        store
            .upsert_chunk(&[
                assigned,
                raw(VAR_TEMPERATURE, -200, -0.40, 38.31, 16.0),
                raw(VAR_TEMPERATURE, 1, -0.40, 38.31, 17.0),
            ])
            .unwrap();

        let found = store
            .candidates(&CandidateQuery {
                origin: GeoPoint::new(-0.40, 38.30),
                variable: Some(VAR_TEMPERATURE.to_string()),
                max_distance_km: 5.0,
                since: Some(t0() - Duration::days(1)),
                limit: None,
            })
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].value, 17.0);
        assert!(found[0].distance_km > 1.0 && found[0].distance_km < 1.2);
    }

    #[test]
    fn test_locate_site_prefers_containing_area() {
        let mut store = MemoryGeoStore::new();
        let mut fenced = site(1, -0.30, 38.30);
        fenced.area = Some(vec![
            GeoPoint::new(-0.52, 38.28),
            GeoPoint::new(-0.48, 38.28),
            GeoPoint::new(-0.48, 38.32),
            GeoPoint::new(-0.52, 38.32),
        ]);
        store.add_site(fenced);
        store.add_site(site(2, -0.50, 38.30));

        // inside site 1's lease even though site 2's point is closer
        assert_eq!(store.locate_site(GeoPoint::new(-0.50, 38.30), 10.0).unwrap(), Some(1));
        assert_eq!(store.locate_site(GeoPoint::new(-0.55, 38.30), 10.0).unwrap(), Some(2));
        assert_eq!(store.locate_site(GeoPoint::new(2.0, 38.30), 10.0).unwrap(), None);
    }

    #[test]
    fn test_donor_is_largest_site_above_minimum() {
        let mut store = MemoryGeoStore::new();
        let mut rows = Vec::new();
        for h in 0..5 {
            let mut a = raw(VAR_TEMPERATURE, h, -0.40, 38.30, 17.0);
            a.site_id = Some(1);
            rows.push(a);
        }
        for h in 0..3 {
            let mut b = raw(VAR_TEMPERATURE, h, -0.60, 38.30, 17.0);
            b.site_id = Some(2);
            rows.push(b);
        }
        store.upsert_chunk(&rows).unwrap();

        assert_eq!(
            store.donor_site(9, 2).unwrap(),
            Some(Donor { site_id: 1, observation_count: 5 })
        );
        assert_eq!(store.donor_site(1, 2).unwrap().map(|d| d.site_id), Some(2));
        assert_eq!(store.donor_site(9, 5).unwrap(), None);
    }

    #[test]
    fn test_alert_unique_per_site_type_and_day() {
        let mut store = MemoryGeoStore::new();
        let alert = Alert {
            site_id: 4,
            alert_type: "escape_risk".to_string(),
            severity: AlertSeverity::Warning,
            description: "first".to_string(),
            opened_at: t0(),
            active: true,
            recommended_action: String::new(),
        };
        store.upsert_alert(&alert).unwrap();
        store
            .upsert_alert(&Alert {
                severity: AlertSeverity::Critical,
                description: "second".to_string(),
                opened_at: t0() + Duration::hours(2),
                ..alert.clone()
            })
            .unwrap();
        assert_eq!(store.alerts().len(), 1);
        assert_eq!(store.alerts()[0].severity, AlertSeverity::Critical);

        store
            .upsert_alert(&Alert { opened_at: t0() + Duration::days(1), ..alert })
            .unwrap();
        assert_eq!(store.alerts().len(), 2);
    }

    #[test]
    fn test_risk_record_overwritten_for_same_day() {
        let mut store = MemoryGeoStore::new();
        let record = RiskRecord {
            site_id: 1,
            day: t0().date_naive(),
            wave_today_m: 1.0,
            wave_yesterday_m: 1.0,
            current_magnitude_ms: 0.1,
            index: 2.9,
            tier: RiskTier::Low,
            probability: 0.29,
            computed_at: t0(),
        };
        store.upsert_risk_record(&record).unwrap();
        store
            .upsert_risk_record(&RiskRecord { index: 4.0, tier: RiskTier::Medium, ..record })
            .unwrap();
        let records = store.risk_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].tier, RiskTier::Medium);
    }

    #[test]
    fn test_unavailable_store_fails_queries() {
        let mut store = MemoryGeoStore::new();
        store.set_unavailable(true);
        let err = store.sites().unwrap_err();
        assert!(matches!(err, GloriaError::ConnectionLost(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_rejected_site_writes_fail_alone() {
        let mut store = MemoryGeoStore::new();
        store.reject_writes_for(2);
        let record = |site_id| RiskRecord {
            site_id,
            day: NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
            wave_today_m: 1.0,
            wave_yesterday_m: 1.0,
            current_magnitude_ms: 0.1,
            index: 2.0,
            tier: RiskTier::Low,
            probability: 0.2,
            computed_at: Utc::now(),
        };
        let err = store.upsert_risk_record(&record(2)).unwrap_err();
        assert!(!err.is_fatal());
        assert!(store.upsert_risk_record(&record(1)).is_ok());
    }

    #[test]
    fn test_dataset_refs_are_stable() {
        let mut store = MemoryGeoStore::new();
        let a = store.dataset_ref("waves").unwrap();
        let b = store.dataset_ref("currents").unwrap();
        assert_ne!(a, b);
        assert_eq!(store.dataset_ref("waves").unwrap(), a);
    }
}
