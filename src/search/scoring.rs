//! Pure scoring helpers shared by every backend and the ranker.

use chrono::{DateTime, Utc};

/// Min-max normalize scores to [0, 1]. When every score is equal (including
/// a single score) all results are 0, so a lone candidate carries no
/// relative evidence.
pub fn normalize_minmax(values: &[f64]) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }

    let s_min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let s_max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    if !(s_max - s_min).is_finite() || (s_max - s_min).abs() < f64::EPSILON {
        return vec![0.0; values.len()];
    }

    values
        .iter()
        .map(|v| ((v - s_min) / (s_max - s_min)).clamp(0.0, 1.0))
        .collect()
}

/// Exponential recency decay: `0.5^(age_days / half_life_days)`.
///
/// Future timestamps count as age 0. A missing timestamp scores 0.
pub fn recency_score(ts: Option<DateTime<Utc>>, now: DateTime<Utc>, half_life_days: f64) -> f64 {
    let Some(ts) = ts else {
        return 0.0;
    };
    if half_life_days <= 0.0 {
        return 0.0;
    }
    let age_days = ((now - ts).num_seconds() as f64 / 86_400.0).max(0.0);
    0.5f64.powf(age_days / half_life_days)
}

/// Whether two tag lists share at least one value.
pub fn has_overlap(a: &[String], b: &[String]) -> bool {
    a.iter().any(|x| b.contains(x))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_normalize_empty() {
        assert!(normalize_minmax(&[]).is_empty());
    }

    #[test]
    fn test_normalize_range() {
        let result = normalize_minmax(&[10.0, 5.0, 0.0]);
        assert!((result[0] - 1.0).abs() < 1e-9);
        assert!((result[1] - 0.5).abs() < 1e-9);
        assert!(result[2].abs() < 1e-9);
    }

    #[test]
    fn test_normalize_all_equal_is_zero() {
        assert_eq!(normalize_minmax(&[3.0, 3.0]), vec![0.0, 0.0]);
        assert_eq!(normalize_minmax(&[0.7]), vec![0.0]);
    }

    #[test]
    fn test_scores_always_in_unit() {
        for score in normalize_minmax(&[-5.0, 100.0, 42.0]) {
            assert!((0.0..=1.0).contains(&score), "Score out of range: {}", score);
        }
    }

    #[test]
    fn test_recency_half_life() {
        let now = Utc::now();
        let h = 180.0;
        assert!((recency_score(Some(now), now, h) - 1.0).abs() < 1e-9);
        assert!((recency_score(Some(now - Duration::days(180)), now, h) - 0.5).abs() < 1e-9);
        assert!((recency_score(Some(now - Duration::days(360)), now, h) - 0.25).abs() < 1e-9);
        assert_eq!(recency_score(None, now, h), 0.0);
    }

    #[test]
    fn test_recency_future_is_fresh() {
        let now = Utc::now();
        assert!((recency_score(Some(now + Duration::days(3)), now, 180.0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_overlap() {
        let a = vec!["x".to_string(), "y".to_string()];
        assert!(has_overlap(&a, &["y".to_string()]));
        assert!(!has_overlap(&a, &["z".to_string()]));
        assert!(!has_overlap(&a, &[]));
    }
}
