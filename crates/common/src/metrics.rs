//! Request and query performance tracking.
//!
//! Keeps a bounded window of recent request samples and slow queries plus
//! aggregate per-endpoint timings. All counters live in process memory and
//! reset on restart.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::warn;

/// Window of retained request samples.
const REQUEST_WINDOW: usize = 1000;

/// Window of retained slow queries.
const SLOW_QUERY_WINDOW: usize = 100;

/// Queries slower than this are recorded.
const SLOW_QUERY_THRESHOLD: Duration = Duration::from_secs(1);

/// Requests slower than this are logged.
const SLOW_REQUEST_THRESHOLD: Duration = Duration::from_secs(2);

/// Normalized queries are truncated to this length.
const QUERY_MAX_LEN: usize = 200;

static NUMBER_RE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)] // pattern is a literal
    Regex::new(r"\d+").unwrap()
});

static SINGLE_QUOTED_RE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)] // pattern is a literal
    Regex::new(r"'[^']*'").unwrap()
});

static DOUBLE_QUOTED_RE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)] // pattern is a literal
    Regex::new(r#""[^"]*""#).unwrap()
});

/// Replace literals in a query so equal shapes aggregate together.
#[must_use]
pub fn normalize_query(query: &str) -> String {
    let q = SINGLE_QUOTED_RE.replace_all(query, "'?'");
    let q = DOUBLE_QUOTED_RE.replace_all(&q, "\"?\"");
    let q = NUMBER_RE.replace_all(&q, "?");
    let q = q.trim();
    if q.len() > QUERY_MAX_LEN {
        q.chars().take(QUERY_MAX_LEN).collect()
    } else {
        q.to_string()
    }
}

struct RequestSample {
    duration: Duration,
    at: Instant,
}

struct SlowQuery {
    query: String,
    duration: Duration,
}

#[derive(Default, Clone, Copy)]
struct EndpointStats {
    count: u64,
    total: Duration,
    min: Duration,
    max: Duration,
}

#[derive(Default, Clone, Copy)]
struct QueryStats {
    count: u64,
    total: Duration,
    max: Duration,
}

#[derive(Default)]
struct Inner {
    requests: VecDeque<RequestSample>,
    slow_queries: VecDeque<SlowQuery>,
    endpoints: HashMap<String, EndpointStats>,
    queries: HashMap<String, QueryStats>,
    total_requests: u64,
}

/// In-process performance metrics.
#[derive(Default)]
pub struct PerformanceMetrics {
    inner: Mutex<Inner>,
}

/// Aggregate for one endpoint in the summary.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointSummary {
    pub endpoint: String,
    pub count: u64,
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
}

/// One slow query shape in the summary, aggregated by normalized form.
#[derive(Debug, Clone, Serialize)]
pub struct SlowQuerySummary {
    pub query: String,
    pub count: u64,
    pub avg_ms: f64,
    pub max_ms: f64,
}

/// Point-in-time metrics summary.
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceSummary {
    pub total_requests: u64,
    pub requests_last_hour: u64,
    /// Requests observed in the last 60 seconds.
    pub requests_per_minute: u64,
    pub avg_response_ms: f64,
    /// Five slowest endpoints by average response time.
    pub top_endpoints: Vec<EndpointSummary>,
    /// Five slowest query shapes by average time.
    pub slow_queries: Vec<SlowQuerySummary>,
}

impl PerformanceMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one handled request.
    ///
    /// Endpoint keys take the shape `"GET /api/requests"`.
    pub fn record_request(&self, method: &str, endpoint: &str, duration: Duration) {
        if duration > SLOW_REQUEST_THRESHOLD {
            warn!(
                method = %method,
                endpoint = %endpoint,
                duration_ms = duration.as_millis() as u64,
                "Slow request"
            );
        }

        let key = format!("{method} {endpoint}");
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };

        inner.total_requests += 1;
        if inner.requests.len() >= REQUEST_WINDOW {
            inner.requests.pop_front();
        }
        inner.requests.push_back(RequestSample {
            duration,
            at: Instant::now(),
        });

        let stats = inner.endpoints.entry(key).or_default();
        if stats.count == 0 {
            stats.min = duration;
            stats.max = duration;
        } else {
            stats.min = stats.min.min(duration);
            stats.max = stats.max.max(duration);
        }
        stats.count += 1;
        stats.total += duration;
    }

    /// Record one database query; only slow queries are retained.
    pub fn record_query(&self, query: &str, duration: Duration) {
        if duration <= SLOW_QUERY_THRESHOLD {
            return;
        }
        let normalized = normalize_query(query);
        warn!(
            query = %normalized,
            duration_ms = duration.as_millis() as u64,
            "Slow query"
        );

        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        if inner.slow_queries.len() >= SLOW_QUERY_WINDOW {
            inner.slow_queries.pop_front();
        }
        inner.slow_queries.push_back(SlowQuery {
            query: normalized.clone(),
            duration,
        });

        let stats = inner.queries.entry(normalized).or_default();
        stats.count += 1;
        stats.total += duration;
        stats.max = stats.max.max(duration);
    }

    /// Build a point-in-time summary from the retained windows.
    #[must_use]
    pub fn summary(&self) -> PerformanceSummary {
        let Ok(inner) = self.inner.lock() else {
            return PerformanceSummary {
                total_requests: 0,
                requests_last_hour: 0,
                requests_per_minute: 0,
                avg_response_ms: 0.0,
                top_endpoints: Vec::new(),
                slow_queries: Vec::new(),
            };
        };

        let now = Instant::now();
        let hour = Duration::from_secs(3600);
        let minute = Duration::from_secs(60);
        let mut requests_last_hour = 0;
        let mut requests_per_minute = 0;
        for sample in &inner.requests {
            let age = now.duration_since(sample.at);
            if age <= hour {
                requests_last_hour += 1;
            }
            if age <= minute {
                requests_per_minute += 1;
            }
        }

        let avg_response_ms = if inner.requests.is_empty() {
            0.0
        } else {
            let total: Duration = inner.requests.iter().map(|s| s.duration).sum();
            total.as_secs_f64() * 1000.0 / inner.requests.len() as f64
        };

        let mut top_endpoints: Vec<EndpointSummary> = inner
            .endpoints
            .iter()
            .map(|(endpoint, stats)| EndpointSummary {
                endpoint: endpoint.clone(),
                count: stats.count,
                avg_ms: stats.total.as_secs_f64() * 1000.0 / stats.count.max(1) as f64,
                min_ms: stats.min.as_secs_f64() * 1000.0,
                max_ms: stats.max.as_secs_f64() * 1000.0,
            })
            .collect();
        top_endpoints.sort_by(|a, b| {
            b.avg_ms
                .partial_cmp(&a.avg_ms)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.endpoint.cmp(&b.endpoint))
        });
        top_endpoints.truncate(5);

        let mut slow_queries: Vec<SlowQuerySummary> = inner
            .queries
            .iter()
            .map(|(query, stats)| SlowQuerySummary {
                query: query.clone(),
                count: stats.count,
                avg_ms: stats.total.as_secs_f64() * 1000.0 / stats.count.max(1) as f64,
                max_ms: stats.max.as_secs_f64() * 1000.0,
            })
            .collect();
        slow_queries.sort_by(|a, b| {
            b.avg_ms
                .partial_cmp(&a.avg_ms)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        slow_queries.truncate(5);

        PerformanceSummary {
            total_requests: inner.total_requests,
            requests_last_hour,
            requests_per_minute,
            avg_response_ms,
            top_endpoints,
            slow_queries,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_query_masks_literals() {
        assert_eq!(
            normalize_query("SELECT * FROM requests WHERE id = 42"),
            "SELECT * FROM requests WHERE id = ?"
        );
        assert_eq!(
            normalize_query("SELECT * FROM users WHERE name = 'ahmed'"),
            "SELECT * FROM users WHERE name = '?'"
        );
        assert_eq!(
            normalize_query(r#"SELECT "col 1" FROM t"#),
            r#"SELECT "?" FROM t"#
        );
    }

    #[test]
    fn test_normalize_query_truncates() {
        let long = format!("SELECT {} FROM t", "x".repeat(400));
        assert_eq!(normalize_query(&long).len(), 200);
    }

    #[test]
    fn test_record_request_aggregates_per_endpoint() {
        let metrics = PerformanceMetrics::new();
        metrics.record_request("GET", "/api/requests", Duration::from_millis(20));
        metrics.record_request("GET", "/api/requests", Duration::from_millis(40));
        metrics.record_request("POST", "/api/requests", Duration::from_millis(60));

        let summary = metrics.summary();
        assert_eq!(summary.total_requests, 3);
        assert_eq!(summary.requests_last_hour, 3);

        let get = summary
            .top_endpoints
            .iter()
            .find(|e| e.endpoint == "GET /api/requests")
            .unwrap();
        assert_eq!(get.count, 2);
        assert!((get.avg_ms - 30.0).abs() < 1.0);
        assert!((get.min_ms - 20.0).abs() < 1.0);
        assert!((get.max_ms - 40.0).abs() < 1.0);
    }

    #[test]
    fn test_top_endpoints_ranked_slowest_first() {
        let metrics = PerformanceMetrics::new();
        for _ in 0..10 {
            metrics.record_request("GET", "/api/fast", Duration::from_millis(10));
        }
        metrics.record_request("GET", "/api/slow", Duration::from_secs(5));

        let summary = metrics.summary();
        assert_eq!(summary.top_endpoints[0].endpoint, "GET /api/slow");
        assert_eq!(summary.top_endpoints[1].endpoint, "GET /api/fast");
    }

    #[test]
    fn test_requests_per_minute_counts_recent_samples() {
        let metrics = PerformanceMetrics::new();
        for _ in 0..3 {
            metrics.record_request("GET", "/api/requests", Duration::from_millis(5));
        }
        // Everything was just recorded, so the minute window holds it all.
        let summary = metrics.summary();
        assert_eq!(summary.requests_per_minute, 3);
        assert_eq!(summary.requests_last_hour, 3);
    }

    #[test]
    fn test_slow_queries_aggregate_by_normalized_form() {
        let metrics = PerformanceMetrics::new();
        metrics.record_query(
            "SELECT * FROM request WHERE id = 1",
            Duration::from_millis(1200),
        );
        metrics.record_query(
            "SELECT * FROM request WHERE id = 2",
            Duration::from_millis(1800),
        );
        metrics.record_query(
            "SELECT * FROM app_user WHERE id = 3",
            Duration::from_millis(1100),
        );

        let summary = metrics.summary();
        assert_eq!(summary.slow_queries.len(), 2);

        let requests = summary
            .slow_queries
            .iter()
            .find(|q| q.query == "SELECT * FROM request WHERE id = ?")
            .unwrap();
        assert_eq!(requests.count, 2);
        assert!((requests.avg_ms - 1500.0).abs() < 1.0);
        assert!((requests.max_ms - 1800.0).abs() < 1.0);
    }

    #[test]
    fn test_top_endpoints_capped_at_five() {
        let metrics = PerformanceMetrics::new();
        for i in 0..8 {
            metrics.record_request("GET", &format!("/api/e{i}"), Duration::from_millis(10));
        }
        assert_eq!(metrics.summary().top_endpoints.len(), 5);
    }

    #[test]
    fn test_only_slow_queries_are_recorded() {
        let metrics = PerformanceMetrics::new();
        metrics.record_query("SELECT 1", Duration::from_millis(10));
        metrics.record_query(
            "SELECT * FROM files WHERE request_id = 9",
            Duration::from_millis(1500),
        );

        let summary = metrics.summary();
        assert_eq!(summary.slow_queries.len(), 1);
        assert_eq!(
            summary.slow_queries[0].query,
            "SELECT * FROM files WHERE request_id = ?"
        );
    }

    #[test]
    fn test_request_window_is_bounded() {
        let metrics = PerformanceMetrics::new();
        for _ in 0..1100 {
            metrics.record_request("GET", "/api/requests", Duration::from_millis(1));
        }
        let summary = metrics.summary();
        assert_eq!(summary.total_requests, 1100);
        assert_eq!(summary.requests_last_hour, 1000);
    }
}
