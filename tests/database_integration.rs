/// Integration tests for the PostGIS store.
///
/// Tests verify:
/// 1. Observation upserts are idempotent on (variable, timestamp, location, site)
/// 2. Candidate queries respect the distance bound and skip assigned rows
/// 3. Site lookup prefers polygon containment over distance
/// 4. Risk records and alerts are unique per site and day
///
/// Prerequisites:
/// - PostgreSQL with PostGIS and sql/001_gloria_schema.sql applied
/// - DATABASE_URL set in .env
///
/// Run with: cargo test --test database_integration -- --ignored --test-threads=1

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use postgres::Client;

use gloria_service::alert::thresholds::check_escape_risk;
use gloria_service::db;
use gloria_service::model::{GeoPoint, Observation, Provenance, RiskRecord, RiskTier};
use gloria_service::store::{CandidateQuery, GeoStore, PgGeoStore};

const TEST_VARIABLE: &str = "test_wave_height";
const TEST_SITE_NAME: &str = "TEST_GLORIA_SITE";

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

fn get_test_client() -> Client {
    db::connect_and_verify(&["gloria"]).unwrap_or_else(|e| {
        eprintln!("\n❌ Database setup failed:");
        eprintln!("   {}", e);
        eprintln!("\n   Apply sql/001_gloria_schema.sql and set DATABASE_URL in .env");
        panic!("database not ready");
    })
}

fn cleanup(client: &mut Client) {
    let _ = client.execute(
        "DELETE FROM gloria.alerts WHERE site_id IN (SELECT id FROM gloria.sites WHERE name = $1)",
        &[&TEST_SITE_NAME],
    );
    let _ = client.execute(
        "DELETE FROM gloria.risk_records WHERE site_id IN (SELECT id FROM gloria.sites WHERE name = $1)",
        &[&TEST_SITE_NAME],
    );
    let _ = client.execute("DELETE FROM gloria.observations WHERE variable = $1", &[&TEST_VARIABLE]);
    let _ = client.execute("DELETE FROM gloria.sites WHERE name = $1", &[&TEST_SITE_NAME]);
}

/// Inserts a test site with a small square area around (lon, lat).
fn insert_site(client: &mut Client, lon: f64, lat: f64) -> i32 {
    let row = client
        .query_one(
            "INSERT INTO gloria.sites (name, site_type, location, area)
             VALUES ($1, 'maricultura', ST_SetSRID(ST_MakePoint($2, $3), 4326),
                     ST_Expand(ST_SetSRID(ST_MakePoint($2, $3), 4326), 0.01))
             RETURNING id",
            &[&TEST_SITE_NAME, &lon, &lat],
        )
        .expect("Failed to insert test site");
    row.get(0)
}

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()
}

fn raw(dataset_id: i32, hour: i64, lon: f64, lat: f64, value: f64) -> Observation {
    Observation {
        dataset_id,
        variable: TEST_VARIABLE.to_string(),
        timestamp: base_time() + Duration::hours(hour),
        value,
        site_id: None,
        location: GeoPoint::new(lon, lat),
        depth: None,
        quality: 90,
        provenance: Provenance::Measured,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
#[ignore]
fn test_observation_upsert_is_idempotent() {
    let mut store = PgGeoStore::new(get_test_client());
    cleanup(store.client());
    let dataset = store.dataset_ref("test-dataset").unwrap();

    let rows = vec![raw(dataset, 0, -0.5, 38.3, 1.0), raw(dataset, 1, -0.5, 38.3, 1.1)];
    assert_eq!(store.upsert_chunk(&rows).unwrap(), 2);

    let mut updated = rows.clone();
    updated[0].value = 2.0;
    store.upsert_chunk(&updated).unwrap();

    let row = store
        .client()
        .query_one(
            "SELECT COUNT(*), MAX(value) FROM gloria.observations WHERE variable = $1",
            &[&TEST_VARIABLE],
        )
        .unwrap();
    let count: i64 = row.get(0);
    let max: f64 = row.get(1);
    assert_eq!(count, 2);
    assert_eq!(max, 2.0);

    cleanup(store.client());
}

#[test]
#[ignore]
fn test_site_copy_on_grid_point_keeps_raw_row() {
    let mut store = PgGeoStore::new(get_test_client());
    cleanup(store.client());
    let dataset = store.dataset_ref("test-dataset").unwrap();
    let site_id = insert_site(store.client(), -0.5, 38.3);

    let raw_row = raw(dataset, 0, -0.5, 38.3, 1.0);
    store.upsert_chunk(&[raw_row.clone()]).unwrap();
    let copy = Observation {
        value: 1.7,
        site_id: Some(site_id),
        provenance: Provenance::Synthetic,
        ..raw_row
    };
    store.upsert_chunk(&[copy]).unwrap();

    let rows = store
        .client()
        .query(
            "SELECT site_id, value, provenance FROM gloria.observations
             WHERE variable = $1 ORDER BY site_id NULLS FIRST",
            &[&TEST_VARIABLE],
        )
        .unwrap();
    assert_eq!(rows.len(), 2);
    let (raw_site, raw_value, raw_provenance): (Option<i32>, f64, String) =
        (rows[0].get(0), rows[0].get(1), rows[0].get(2));
    assert_eq!(raw_site, None);
    assert_eq!(raw_value, 1.0);
    assert_eq!(raw_provenance, "measured");
    let copy_site: Option<i32> = rows[1].get(0);
    assert_eq!(copy_site, Some(site_id));

    cleanup(store.client());
}

#[test]
#[ignore]
fn test_failed_chunk_writes_nothing() {
    let mut store = PgGeoStore::new(get_test_client());
    cleanup(store.client());
    let dataset = store.dataset_ref("test-dataset").unwrap();

    let rows = vec![raw(dataset, 0, -0.5, 38.3, 1.0), raw(dataset, 1, -0.5, 38.3, f64::NAN)];
    assert!(store.upsert_chunk(&rows).is_err());

    let row = store
        .client()
        .query_one("SELECT COUNT(*) FROM gloria.observations WHERE variable = $1", &[&TEST_VARIABLE])
        .unwrap();
    let count: i64 = row.get(0);
    assert_eq!(count, 0);

    cleanup(store.client());
}

#[test]
#[ignore]
fn test_candidates_within_distance_bound() {
    let mut store = PgGeoStore::new(get_test_client());
    cleanup(store.client());
    let dataset = store.dataset_ref("test-dataset").unwrap();

    // roughly 0 km, 9 km and 90 km east of the origin
    store
        .upsert_chunk(&[
            raw(dataset, 0, -0.5, 38.3, 1.0),
            raw(dataset, 0, -0.4, 38.3, 1.5),
            raw(dataset, 0, 0.5, 38.3, 2.0),
        ])
        .unwrap();

    let query = CandidateQuery {
        origin: GeoPoint::new(-0.5, 38.3),
        variable: Some(TEST_VARIABLE.to_string()),
        max_distance_km: 20.0,
        since: None,
        limit: None,
    };
    let near = store.candidates(&query).unwrap();
    assert_eq!(near.len(), 2);
    assert!(near.iter().all(|c| c.distance_km <= 20.0));
    assert!(near[0].distance_km < near[1].distance_km);

    let wide = store.candidates(&CandidateQuery { max_distance_km: 200.0, ..query }).unwrap();
    assert_eq!(wide.len(), 3);

    cleanup(store.client());
}

#[test]
#[ignore]
fn test_locate_site_prefers_containment() {
    let mut store = PgGeoStore::new(get_test_client());
    cleanup(store.client());
    let site_id = insert_site(store.client(), -0.45, 38.35);

    let inside = store.locate_site(GeoPoint::new(-0.451, 38.351), 0.001).unwrap();
    assert_eq!(inside, Some(site_id));

    let nearby = store.locate_site(GeoPoint::new(-0.40, 38.35), 10.0).unwrap();
    assert_eq!(nearby, Some(site_id));

    let far = store.locate_site(GeoPoint::new(3.0, 42.0), 10.0).unwrap();
    assert_ne!(far, Some(site_id));

    let site = store.site(site_id).unwrap();
    assert!(site.area.is_some());

    cleanup(store.client());
}

#[test]
#[ignore]
fn test_risk_record_and_alert_unique_per_day() {
    let mut store = PgGeoStore::new(get_test_client());
    cleanup(store.client());
    let site_id = insert_site(store.client(), -0.45, 38.35);

    let computed_at = Utc.with_ymd_and_hms(2025, 6, 2, 6, 0, 0).unwrap();
    let mut record = RiskRecord {
        site_id,
        day: NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
        wave_today_m: 4.0,
        wave_yesterday_m: 4.5,
        current_magnitude_ms: 0.9,
        index: 7.5,
        tier: RiskTier::High,
        probability: 0.75,
        computed_at,
    };
    store.upsert_risk_record(&record).unwrap();
    store.upsert_alert(&check_escape_risk(&record).unwrap()).unwrap();

    record.index = 8.6;
    record.probability = 0.86;
    record.computed_at = computed_at + Duration::hours(4);
    store.upsert_risk_record(&record).unwrap();
    store.upsert_alert(&check_escape_risk(&record).unwrap()).unwrap();

    let client = store.client();
    let row = client
        .query_one(
            "SELECT COUNT(*), MAX(risk_index) FROM gloria.risk_records WHERE site_id = $1",
            &[&site_id],
        )
        .unwrap();
    let (count, index): (i64, f64) = (row.get(0), row.get(1));
    assert_eq!(count, 1);
    assert_eq!(index, 8.6);

    let row = client
        .query_one(
            "SELECT COUNT(*), MAX(severity) FROM gloria.alerts WHERE site_id = $1",
            &[&site_id],
        )
        .unwrap();
    let (count, severity): (i64, String) = (row.get(0), row.get(1));
    assert_eq!(count, 1);
    assert_eq!(severity, "critical");

    cleanup(client);
}
