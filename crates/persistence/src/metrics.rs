//! Database metrics collection.

use metrics::{gauge, histogram};
use sqlx::PgPool;
use std::time::Instant;

/// Record database query duration.
pub fn record_query_duration(query_name: &'static str, duration_secs: f64, ok: bool) {
    histogram!(
        "database_query_duration_seconds",
        "query" => query_name,
        "outcome" => if ok { "ok" } else { "error" }
    )
    .record(duration_secs);
}

/// Record database connection pool metrics.
///
/// Called periodically by the realtime metrics job.
pub fn record_pool_metrics(pool: &PgPool) {
    let size = pool.size() as usize;
    let idle = pool.num_idle();
    let active = size.saturating_sub(idle);

    gauge!("database_connections_active").set(active as f64);
    gauge!("database_connections_idle").set(idle as f64);
    gauge!("database_connections_total").set(size as f64);
}

/// Times one repository call.
///
/// ```ignore
/// let timer = QueryTimer::new("insert_location");
/// let result = sqlx::query_as::<_, LocationEntity>(...).fetch_one(&pool).await;
/// timer.finish(&result);
/// result
/// ```
pub struct QueryTimer {
    query_name: &'static str,
    start: Instant,
}

impl QueryTimer {
    pub fn new(query_name: &'static str) -> Self {
        Self {
            query_name,
            start: Instant::now(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.query_name
    }

    /// Records the elapsed time, labelled with whether the query succeeded.
    pub fn finish<T, E>(self, result: &Result<T, E>) {
        let duration = self.start.elapsed().as_secs_f64();
        record_query_duration(self.query_name, duration, result.is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_timer_keeps_name() {
        let timer = QueryTimer::new("open_alerts");
        assert_eq!(timer.name(), "open_alerts");
        timer.finish::<(), ()>(&Ok(()));
    }
}
