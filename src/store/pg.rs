//! PostgreSQL + PostGIS `GeoStore`.
//!
//! Tables live in the `gloria` schema (see `sql/001_gloria_schema.sql`).
//! Distances are computed on `geography`, so they are geodesic metres on
//! the WGS84 spheroid.

use chrono::{DateTime, NaiveDate, Utc};
use postgres::{Client, Row};
use serde_json::Value;

use super::{
    validate_observation, Candidate, CandidateQuery, Donor, GeoStore, ImportLogEntry,
};
use crate::model::{
    Alert, GeoPoint, GloriaError, Observation, Provenance, RiskRecord, Site, SiteKind,
};

const SITE_COLUMNS: &str = "id, name, site_type, ST_X(location), ST_Y(location), \
                            ST_AsGeoJSON(area), active";

const UPSERT_OBSERVATION: &str = "
    INSERT INTO gloria.observations
        (dataset_id, variable, observed_at, value, site_id, location, depth, quality, provenance)
    VALUES ($1, $2, $3, $4, $5, ST_SetSRID(ST_MakePoint($6, $7), 4326), $8, $9, $10)
    ON CONFLICT (variable, observed_at, location, site_id) DO UPDATE
        SET value = EXCLUDED.value,
            quality = EXCLUDED.quality,
            provenance = EXCLUDED.provenance";

pub struct PgGeoStore {
    client: Client,
}

impl PgGeoStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connects with `DATABASE_URL` and checks the `gloria` schema exists.
    pub fn connect() -> Result<Self, GloriaError> {
        Ok(Self::new(crate::db::connect_and_verify(&["gloria"])?))
    }

    pub fn client(&mut self) -> &mut Client {
        &mut self.client
    }
}

fn site_from_row(row: &Row) -> Result<Site, GloriaError> {
    let site_type: String = row.get(2);
    let area_json: Option<String> = row.get(5);
    let area = match area_json {
        Some(text) => Some(parse_polygon_ring(&text)?),
        None => None,
    };
    Ok(Site {
        id: row.get(0),
        name: row.get(1),
        kind: SiteKind::from_type_label(&site_type),
        location: GeoPoint::new(row.get(3), row.get(4)),
        area,
        active: row.get(6),
    })
}

/// Exterior ring of a GeoJSON Polygon.
fn parse_polygon_ring(geojson: &str) -> Result<Vec<GeoPoint>, GloriaError> {
    let value: Value = serde_json::from_str(geojson)
        .map_err(|e| GloriaError::Database(format!("bad site area GeoJSON: {}", e)))?;
    let ring = value["coordinates"][0]
        .as_array()
        .ok_or_else(|| GloriaError::Database("site area is not a polygon".to_string()))?;
    ring.iter()
        .map(|pair| match (pair[0].as_f64(), pair[1].as_f64()) {
            (Some(lon), Some(lat)) => Ok(GeoPoint::new(lon, lat)),
            _ => Err(GloriaError::Database(format!("bad area vertex: {}", pair))),
        })
        .collect()
}

fn observation_from_row(row: &Row) -> Result<Observation, GloriaError> {
    let provenance: String = row.get(9);
    Ok(Observation {
        dataset_id: row.get(0),
        variable: row.get(1),
        timestamp: row.get(2),
        value: row.get(3),
        site_id: row.get(4),
        location: GeoPoint::new(row.get(5), row.get(6)),
        depth: row.get(7),
        quality: row.get(8),
        provenance: Provenance::parse(&provenance).ok_or_else(|| {
            GloriaError::Database(format!("unknown provenance '{}'", provenance))
        })?,
    })
}

impl GeoStore for PgGeoStore {
    fn sites(&mut self) -> Result<Vec<Site>, GloriaError> {
        let rows = self.client.query(
            &format!("SELECT {} FROM gloria.sites ORDER BY id", SITE_COLUMNS),
            &[],
        )?;
        rows.iter().map(site_from_row).collect()
    }

    fn site(&mut self, id: i32) -> Result<Site, GloriaError> {
        let row = self.client.query_opt(
            &format!("SELECT {} FROM gloria.sites WHERE id = $1", SITE_COLUMNS),
            &[&id],
        )?;
        match row {
            Some(row) => site_from_row(&row),
            None => Err(GloriaError::SiteNotFound(id)),
        }
    }

    fn sites_without_observations(&mut self) -> Result<Vec<Site>, GloriaError> {
        let rows = self.client.query(
            &format!(
                "SELECT {} FROM gloria.sites s
                 WHERE NOT EXISTS (SELECT 1 FROM gloria.observations o WHERE o.site_id = s.id)
                 ORDER BY id",
                SITE_COLUMNS
            ),
            &[],
        )?;
        rows.iter().map(site_from_row).collect()
    }

    fn raw_variables(&mut self) -> Result<Vec<String>, GloriaError> {
        let rows = self.client.query(
            "SELECT DISTINCT variable FROM gloria.observations
             WHERE site_id IS NULL ORDER BY variable",
            &[],
        )?;
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }

    fn candidates(&mut self, query: &CandidateQuery) -> Result<Vec<Candidate>, GloriaError> {
        let limit: Option<i64> = query.limit.map(|l| l as i64);
        let max_distance_m = query.max_distance_km * 1000.0;
        let rows = self.client.query(
            "WITH origin AS (
                 SELECT ST_SetSRID(ST_MakePoint($1, $2), 4326)::geography AS g
             )
             SELECT o.variable, o.observed_at, o.value, o.dataset_id, o.depth, o.quality,
                    ST_Distance(o.location::geography, origin.g) / 1000.0 AS distance_km
             FROM gloria.observations o, origin
             WHERE o.site_id IS NULL
               AND ($3::text IS NULL OR o.variable = $3)
               AND ($4::timestamptz IS NULL OR o.observed_at >= $4)
               AND ST_DWithin(o.location::geography, origin.g, $5)
             ORDER BY o.observed_at DESC, distance_km ASC
             LIMIT $6",
            &[
                &query.origin.lon,
                &query.origin.lat,
                &query.variable,
                &query.since,
                &max_distance_m,
                &limit,
            ],
        )?;
        Ok(rows
            .iter()
            .map(|r| Candidate {
                variable: r.get(0),
                timestamp: r.get(1),
                value: r.get(2),
                dataset_id: r.get(3),
                depth: r.get(4),
                quality: r.get(5),
                distance_km: r.get(6),
            })
            .collect())
    }

    fn locate_site(
        &mut self,
        point: GeoPoint,
        max_distance_km: f64,
    ) -> Result<Option<i32>, GloriaError> {
        let contained = self.client.query_opt(
            "SELECT id FROM gloria.sites
             WHERE area IS NOT NULL
               AND ST_Contains(area, ST_SetSRID(ST_MakePoint($1, $2), 4326))
             ORDER BY id LIMIT 1",
            &[&point.lon, &point.lat],
        )?;
        if let Some(row) = contained {
            return Ok(Some(row.get(0)));
        }

        let nearest = self.client.query_opt(
            "WITH p AS (SELECT ST_SetSRID(ST_MakePoint($1, $2), 4326)::geography AS g)
             SELECT s.id FROM gloria.sites s, p
             WHERE ST_DWithin(s.location::geography, p.g, $3)
             ORDER BY ST_Distance(s.location::geography, p.g), s.id
             LIMIT 1",
            &[&point.lon, &point.lat, &(max_distance_km * 1000.0)],
        )?;
        Ok(nearest.map(|row| row.get(0)))
    }

    fn upsert_chunk(&mut self, rows: &[Observation]) -> Result<usize, GloriaError> {
        for row in rows {
            validate_observation(row)?;
        }
        let mut tx = self.client.transaction()?;
        let stmt = tx.prepare(UPSERT_OBSERVATION)?;
        for row in rows {
            tx.execute(
                &stmt,
                &[
                    &row.dataset_id,
                    &row.variable,
                    &row.timestamp,
                    &row.value,
                    &row.site_id,
                    &row.location.lon,
                    &row.location.lat,
                    &row.depth,
                    &row.quality,
                    &row.provenance.as_str(),
                ],
            )?;
        }
        tx.commit()?;
        Ok(rows.len())
    }

    fn donor_site(
        &mut self,
        exclude: i32,
        min_observations: i64,
    ) -> Result<Option<Donor>, GloriaError> {
        let row = self.client.query_opt(
            "SELECT site_id, COUNT(*) AS n
             FROM gloria.observations
             WHERE site_id IS NOT NULL AND site_id <> $1 AND provenance <> 'synthetic'
             GROUP BY site_id
             HAVING COUNT(*) > $2
             ORDER BY n DESC, site_id
             LIMIT 1",
            &[&exclude, &min_observations],
        )?;
        Ok(row.map(|r| Donor { site_id: r.get(0), observation_count: r.get(1) }))
    }

    fn site_observations(
        &mut self,
        site_id: i32,
        variables: &[&str],
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Observation>, GloriaError> {
        let names: Vec<String> = variables.iter().map(|v| v.to_string()).collect();
        let rows = self.client.query(
            "SELECT dataset_id, variable, observed_at, value, site_id,
                    ST_X(location), ST_Y(location), depth, quality, provenance
             FROM gloria.observations
             WHERE site_id = $1
               AND (cardinality($2::text[]) = 0 OR variable = ANY($2))
               AND ($3::timestamptz IS NULL OR observed_at >= $3)
             ORDER BY observed_at",
            &[&site_id, &names, &since],
        )?;
        rows.iter().map(observation_from_row).collect()
    }

    fn upsert_risk_record(&mut self, record: &RiskRecord) -> Result<(), GloriaError> {
        self.client.execute(
            "INSERT INTO gloria.risk_records
                 (site_id, day, wave_today_m, wave_yesterday_m, current_magnitude_ms,
                  risk_index, tier, probability, computed_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (site_id, day) DO UPDATE
                 SET wave_today_m = EXCLUDED.wave_today_m,
                     wave_yesterday_m = EXCLUDED.wave_yesterday_m,
                     current_magnitude_ms = EXCLUDED.current_magnitude_ms,
                     risk_index = EXCLUDED.risk_index,
                     tier = EXCLUDED.tier,
                     probability = EXCLUDED.probability,
                     computed_at = EXCLUDED.computed_at",
            &[
                &record.site_id,
                &record.day,
                &record.wave_today_m,
                &record.wave_yesterday_m,
                &record.current_magnitude_ms,
                &record.index,
                &record.tier.as_str(),
                &record.probability,
                &record.computed_at,
            ],
        )?;
        Ok(())
    }

    fn upsert_alert(&mut self, alert: &Alert) -> Result<(), GloriaError> {
        let day: NaiveDate = alert.opened_at.date_naive();
        self.client.execute(
            "INSERT INTO gloria.alerts
                 (site_id, alert_type, severity, description, opened_at, opened_on,
                  active, recommended_action)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (site_id, alert_type, opened_on) DO UPDATE
                 SET severity = EXCLUDED.severity,
                     description = EXCLUDED.description,
                     active = EXCLUDED.active",
            &[
                &alert.site_id,
                &alert.alert_type,
                &alert.severity.as_str(),
                &alert.description,
                &alert.opened_at,
                &day,
                &alert.active,
                &alert.recommended_action,
            ],
        )?;
        Ok(())
    }

    fn record_import(&mut self, entry: &ImportLogEntry) -> Result<(), GloriaError> {
        self.client.execute(
            "INSERT INTO gloria.imports
                 (file_name, dataset_id, status, rows_written, rows_failed, message,
                  started_at, finished_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            &[
                &entry.file_name,
                &entry.dataset_id,
                &entry.status.as_str(),
                &(entry.rows_written as i64),
                &(entry.rows_failed as i64),
                &entry.message,
                &entry.started_at,
                &entry.finished_at,
            ],
        )?;
        Ok(())
    }

    fn dataset_ref(&mut self, external_id: &str) -> Result<i32, GloriaError> {
        let row = self.client.query_one(
            "INSERT INTO gloria.datasets (external_id)
             VALUES ($1)
             ON CONFLICT (external_id) DO UPDATE SET external_id = EXCLUDED.external_id
             RETURNING id",
            &[&external_id],
        )?;
        Ok(row.get(0))
    }
}
