//! Escape-risk alert thresholds.
//!
//! A risk record in the high tier raises an `escape_risk` alert; above an
//! index of 8 it is critical. Deduplication is per site, type and calendar
//! day and is enforced by the store's upsert.

use crate::model::{Alert, AlertSeverity, RiskRecord, RiskTier};

pub const ESCAPE_RISK_ALERT: &str = "escape_risk";

/// Index above which a high-tier alert is critical rather than a warning.
pub const CRITICAL_INDEX: f64 = 8.0;

pub const RECOMMENDED_ACTION: &str = "Reinforce structures, reduce biomass, check moorings and nets.";

/// Severity for an index, or `None` when the tier does not warrant an alert.
pub fn escape_severity(index: f64, tier: RiskTier) -> Option<AlertSeverity> {
    if tier != RiskTier::High {
        return None;
    }
    if index > CRITICAL_INDEX {
        Some(AlertSeverity::Critical)
    } else {
        Some(AlertSeverity::Warning)
    }
}

/// Builds the alert for a risk record, if its tier is high.
///
/// The alert opens at the record's computation time.
pub fn check_escape_risk(record: &RiskRecord) -> Option<Alert> {
    let severity = escape_severity(record.index, record.tier)?;
    Some(Alert {
        site_id: record.site_id,
        alert_type: ESCAPE_RISK_ALERT.to_string(),
        severity,
        description: format!(
            "High fish escape risk. Index: {:.1}/10 ({}%)",
            record.index,
            (record.index * 10.0) as i64
        ),
        opened_at: record.computed_at,
        active: true,
        recommended_action: RECOMMENDED_ACTION.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};

    fn record(index: f64) -> RiskRecord {
        RiskRecord {
            site_id: 12,
            day: NaiveDate::from_ymd_opt(2025, 1, 20).unwrap(),
            wave_today_m: 3.0,
            wave_yesterday_m: 4.0,
            current_magnitude_ms: 0.9,
            index,
            tier: RiskTier::from_index(index),
            probability: index / 10.0,
            computed_at: Utc.with_ymd_and_hms(2025, 1, 20, 6, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_critical_above_eight() {
        let alert = check_escape_risk(&record(8.5)).expect("8.5 should alert");
        assert_eq!(alert.severity, AlertSeverity::Critical);
        assert_eq!(alert.alert_type, ESCAPE_RISK_ALERT);
        assert!(alert.active);
    }

    #[test]
    fn test_warning_between_seven_and_eight() {
        let alert = check_escape_risk(&record(7.2)).expect("7.2 should alert");
        assert_eq!(alert.severity, AlertSeverity::Warning);
        assert_eq!(check_escape_risk(&record(8.0)).map(|a| a.severity), Some(AlertSeverity::Warning));
    }

    #[test]
    fn test_no_alert_below_high_tier() {
        assert!(check_escape_risk(&record(6.9)).is_none());
        assert!(check_escape_risk(&record(2.0)).is_none());
    }

    #[test]
    fn test_description_embeds_index() {
        let alert = check_escape_risk(&record(7.5)).unwrap();
        assert_eq!(alert.description, "High fish escape risk. Index: 7.5/10 (75%)");
        assert_eq!(alert.recommended_action, RECOMMENDED_ACTION);
        assert_eq!(alert.opened_at, record(7.5).computed_at);
    }
}
