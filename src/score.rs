//! Pure scoring functions for retrieval ranking and source health.
//!
//! Kept free of storage and clock dependencies so the formulas can be
//! tested in isolation.
//!
//! The combined retrieval score blends three signals:
//!
//! ```text
//! combined = 0.6 * similarity + 0.3 * recency + 0.1 * priority
//! ```
//!
//! Similarity dominates, while the recency and priority terms demote
//! month-old content and low-trust sources a pure similarity search
//! would rank first.

/// Weight of raw embedding similarity in the combined score.
pub const SIMILARITY_WEIGHT: f64 = 0.6;
/// Weight of the recency factor in the combined score.
pub const RECENCY_WEIGHT: f64 = 0.3;
/// Weight of the source-priority factor in the combined score.
pub const PRIORITY_WEIGHT: f64 = 0.1;

/// Content older than this contributes zero recency.
pub const RECENCY_HORIZON_DAYS: f64 = 30.0;

/// Source priority scale: 1 (lowest) to 5 (highest trust).
pub const MAX_PRIORITY: i64 = 5;

/// Linear recency decay: 1.0 for fresh content, 0.0 at 30+ days old.
pub fn recency_factor(age_days: f64) -> f64 {
    (1.0 - age_days / RECENCY_HORIZON_DAYS).max(0.0)
}

/// Source priority normalized to [0, 1].
pub fn priority_factor(priority: i64) -> f64 {
    (priority.clamp(1, MAX_PRIORITY) as f64) / (MAX_PRIORITY as f64)
}

/// Combined hybrid score used to rank retrieval candidates.
pub fn combined_score(similarity: f64, age_days: f64, priority: i64) -> f64 {
    SIMILARITY_WEIGHT * similarity
        + RECENCY_WEIGHT * recency_factor(age_days)
        + PRIORITY_WEIGHT * priority_factor(priority)
}

/// Source health after one fetch attempt. Recovery is slower than decay:
/// +0.1 per success, -0.2 per failure, clamped to [0, 1].
pub fn updated_health(current: f64, success: bool) -> f64 {
    if success {
        (current + 0.1).min(1.0)
    } else {
        (current - 0.2).max(0.0)
    }
}
