//! Recency and kind boost multipliers.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

/// Exponential half-life decay: `2^(-age / half_life)`.
///
/// Equals 1.0 at age zero and for future timestamps (age clamps at 0).
/// A `half_life_hours` of 0 disables the boost, as does a missing or
/// unparseable timestamp.
pub fn recency_boost(ts: Option<&str>, half_life_hours: f64, now: DateTime<Utc>) -> f64 {
    if half_life_hours <= 0.0 {
        return 1.0;
    }
    let Some(ts) = ts else { return 1.0 };
    let Ok(parsed) = DateTime::parse_from_rfc3339(ts) else {
        return 1.0;
    };
    let age_seconds = (now - parsed.with_timezone(&Utc)).num_seconds().max(0) as f64;
    let half_life_seconds = half_life_hours * 3600.0;
    (2.0f64).powf(-age_seconds / half_life_seconds)
}

/// Per-kind multiplier from config; unknown kinds get 1.0.
pub fn kind_boost(kind_boosts: &HashMap<String, f64>, kind: &str) -> f64 {
    kind_boosts.get(kind).copied().unwrap_or(1.0)
}

/// Epoch seconds for the deterministic tie-break (missing/invalid → i64::MIN).
pub fn recency_epoch(ts: Option<&str>) -> i64 {
    ts.and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.timestamp())
        .unwrap_or(i64::MIN)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn equals_one_at_age_zero() {
        let now = at("2025-06-01T00:00:00Z");
        let b = recency_boost(Some("2025-06-01T00:00:00Z"), 168.0, now);
        assert!((b - 1.0).abs() < 1e-12);
    }

    #[test]
    fn halves_each_half_life() {
        let now = at("2025-06-08T00:00:00Z");
        let b = recency_boost(Some("2025-06-01T00:00:00Z"), 168.0, now);
        assert!((b - 0.5).abs() < 1e-9, "one week at a 168h half-life, got {b}");
    }

    #[test]
    fn strictly_decreasing_in_age() {
        let now = at("2025-06-10T00:00:00Z");
        let newer = recency_boost(Some("2025-06-09T00:00:00Z"), 72.0, now);
        let older = recency_boost(Some("2025-06-01T00:00:00Z"), 72.0, now);
        assert!(newer > older);
    }

    #[test]
    fn future_timestamps_clamp_to_one() {
        let now = at("2025-06-01T00:00:00Z");
        let b = recency_boost(Some("2030-01-01T00:00:00Z"), 168.0, now);
        assert_eq!(b, 1.0);
    }

    #[test]
    fn zero_half_life_disables() {
        let now = at("2025-06-08T00:00:00Z");
        assert_eq!(recency_boost(Some("2020-01-01T00:00:00Z"), 0.0, now), 1.0);
    }

    #[test]
    fn missing_or_invalid_timestamp_is_neutral() {
        let now = at("2025-06-08T00:00:00Z");
        assert_eq!(recency_boost(None, 168.0, now), 1.0);
        assert_eq!(recency_boost(Some("not a time"), 168.0, now), 1.0);
    }

    #[test]
    fn unknown_kind_gets_unity() {
        let boosts = HashMap::from([("preference".to_string(), 1.5)]);
        assert_eq!(kind_boost(&boosts, "preference"), 1.5);
        assert_eq!(kind_boost(&boosts, "general"), 1.0);
    }
}
