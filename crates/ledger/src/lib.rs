use std::collections::HashMap;
use std::time::Duration;

use arkiv_contracts::period::{PeriodStarts, SeriesRange};
use arkiv_contracts::{
    CaseKind, CaseRecord, CaseStatus, DailyCount, NewViewEvent, OverviewTotals, PopularTarget,
};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::Row;
use sqlx::postgres::PgPoolOptions;
use ulid::Ulid;

#[derive(Debug)]
pub enum LedgerError {
    Timeout,
    Sqlx(sqlx::Error),
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerError::Timeout => write!(f, "view store operation timed out"),
            LedgerError::Sqlx(err) => write!(f, "view store sql error: {}", err),
        }
    }
}

impl std::error::Error for LedgerError {}

impl From<sqlx::Error> for LedgerError {
    fn from(value: sqlx::Error) -> Self {
        LedgerError::Sqlx(value)
    }
}

/// Postgres-backed store for view events and the case read model.
///
/// Appends are bounded by `write_timeout`; aggregation reads run unbounded
/// since they only serve the moderator reporting surface.
#[derive(Clone)]
pub struct ViewStore {
    pool: sqlx::PgPool,
    write_timeout: Duration,
}

impl ViewStore {
    pub async fn connect(db_url: &str, write_timeout: Duration) -> Result<Self, LedgerError> {
        let pool = tokio::time::timeout(
            Duration::from_secs(2),
            PgPoolOptions::new().max_connections(8).connect(db_url),
        )
        .await
        .map_err(|_| LedgerError::Timeout)??;

        Ok(Self {
            pool,
            write_timeout,
        })
    }

    pub async fn connect_and_migrate(
        db_url: &str,
        write_timeout: Duration,
    ) -> Result<Self, LedgerError> {
        let store = Self::connect(db_url, write_timeout).await?;
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<(), LedgerError> {
        tokio::time::timeout(Duration::from_secs(10), migrate(&self.pool))
            .await
            .map_err(|_| LedgerError::Timeout)??;
        Ok(())
    }

    pub async fn ping(&self) -> Result<(), LedgerError> {
        tokio::time::timeout(
            Duration::from_millis(500),
            sqlx::query("SELECT 1").execute(&self.pool),
        )
        .await
        .map_err(|_| LedgerError::Timeout)??;
        Ok(())
    }

    /// Appends one view event and returns its generated id.
    pub async fn append_view(&self, event: &NewViewEvent) -> Result<String, LedgerError> {
        let event_id = Ulid::new().to_string();
        let target_id = event.target_id.map(|id| id.to_string());

        tokio::time::timeout(
            self.write_timeout,
            sqlx::query(
                "INSERT INTO arkiv_view_events (event_id, path, target_id, visitor_signature, user_agent_raw, occurred_at) VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(&event_id)
            .bind(&event.path)
            .bind(&target_id)
            .bind(&event.visitor_signature)
            .bind(&event.user_agent_raw)
            .bind(event.occurred_at)
            .execute(&self.pool),
        )
        .await
        .map_err(|_| LedgerError::Timeout)??;

        Ok(event_id)
    }

    /// Rolling totals for the named calendar periods, all anchored at `now`.
    pub async fn overview_totals(
        &self,
        now: DateTime<Utc>,
    ) -> Result<OverviewTotals, LedgerError> {
        let starts = PeriodStarts::compute(now);

        let row = sqlx::query(
            "SELECT \
                count(*) FILTER (WHERE occurred_at >= $1) AS today, \
                count(*) FILTER (WHERE occurred_at >= $2) AS week, \
                count(*) FILTER (WHERE occurred_at >= $3) AS month, \
                count(*) FILTER (WHERE occurred_at >= $4) AS quarter, \
                count(*) FILTER (WHERE occurred_at >= $5) AS half_year, \
                count(*) AS all_time \
             FROM arkiv_view_events",
        )
        .bind(starts.today)
        .bind(starts.week)
        .bind(starts.month)
        .bind(starts.quarter)
        .bind(starts.half_year)
        .fetch_one(&self.pool)
        .await?;

        Ok(OverviewTotals {
            today: row.get("today"),
            week: row.get("week"),
            month: row.get("month"),
            quarter: row.get("quarter"),
            half_year: row.get("half_year"),
            all_time: row.get("all_time"),
        })
    }

    /// Most-viewed targets, enriched with case-record details.
    ///
    /// Ordered by view count descending; ties break on ascending target id.
    /// Targets missing from the case store are labeled unknown rather than
    /// dropped, keeping the counts consistent with the raw aggregation.
    pub async fn popular_targets(&self, limit: i64) -> Result<Vec<PopularTarget>, LedgerError> {
        let rows = sqlx::query(
            "SELECT target_id, count(*) AS views \
             FROM arkiv_view_events \
             WHERE target_id IS NOT NULL \
             GROUP BY target_id \
             ORDER BY views DESC, target_id ASC \
             LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let target_ids = rows
            .iter()
            .map(|row| row.get::<String, _>("target_id"))
            .collect::<Vec<_>>();

        let records = self.case_records_by_id(&target_ids).await?;

        let result = rows
            .iter()
            .map(|row| {
                let target_id = row.get::<String, _>("target_id");
                let views = row.get::<i64, _>("views");
                match records.get(&target_id) {
                    Some(record) => PopularTarget {
                        target_id,
                        views,
                        title: record.display_title().to_string(),
                        kind: record.kind,
                        status: record.status.as_str().to_string(),
                        year: record.year,
                    },
                    None => PopularTarget {
                        target_id,
                        views,
                        title: "Unknown".to_string(),
                        kind: CaseKind::Case,
                        status: "unknown".to_string(),
                        year: None,
                    },
                }
            })
            .collect();

        Ok(result)
    }

    /// Per-day view counts over `[range.from, range.to)`, grouped by UTC
    /// calendar day, ascending. Days without events are not synthesized.
    pub async fn daily_counts(&self, range: &SeriesRange) -> Result<Vec<DailyCount>, LedgerError> {
        let rows = sqlx::query(
            "SELECT (occurred_at AT TIME ZONE 'UTC')::date AS day, count(*) AS views \
             FROM arkiv_view_events \
             WHERE occurred_at >= $1 AND occurred_at < $2 \
             GROUP BY day \
             ORDER BY day ASC",
        )
        .bind(range.from)
        .bind(range.to)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| DailyCount {
                date: row.get::<NaiveDate, _>("day"),
                count: row.get("views"),
            })
            .collect())
    }

    /// Total event count over `[range.from, range.to)` — the custom-period
    /// counterpart of the named rolling totals.
    pub async fn range_total(&self, range: &SeriesRange) -> Result<i64, LedgerError> {
        let row = sqlx::query(
            "SELECT count(*) AS views FROM arkiv_view_events \
             WHERE occurred_at >= $1 AND occurred_at < $2",
        )
        .bind(range.from)
        .bind(range.to)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("views"))
    }

    pub async fn published_cases(&self, limit: i64) -> Result<Vec<CaseRecord>, LedgerError> {
        let rows = sqlx::query(
            "SELECT case_id, title, person_name, kind, status, year \
             FROM arkiv_cases \
             WHERE status = 'published' \
             ORDER BY case_id DESC \
             LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(case_record_from_row).collect())
    }

    pub async fn published_case(&self, case_id: &str) -> Result<Option<CaseRecord>, LedgerError> {
        let row = sqlx::query(
            "SELECT case_id, title, person_name, kind, status, year \
             FROM arkiv_cases \
             WHERE case_id = $1 AND status = 'published'",
        )
        .bind(case_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(case_record_from_row))
    }

    async fn case_records_by_id(
        &self,
        case_ids: &[String],
    ) -> Result<HashMap<String, CaseRecord>, LedgerError> {
        if case_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = sqlx::query(
            "SELECT case_id, title, person_name, kind, status, year \
             FROM arkiv_cases \
             WHERE case_id = ANY($1)",
        )
        .bind(case_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let record = case_record_from_row(row);
                (record.case_id.clone(), record)
            })
            .collect())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn case_record_from_row(row: &sqlx::postgres::PgRow) -> CaseRecord {
    // kind/status are CHECK-constrained; the fallbacks are unreachable for
    // rows written through the migrations above.
    let kind = CaseKind::parse(row.get::<String, _>("kind").as_str()).unwrap_or(CaseKind::Case);
    let status = CaseStatus::parse(row.get::<String, _>("status").as_str())
        .unwrap_or(CaseStatus::Published);

    CaseRecord {
        case_id: row.get("case_id"),
        title: row.get("title"),
        person_name: row.get("person_name"),
        kind,
        status,
        year: row.get("year"),
    }
}

pub async fn migrate(pool: &sqlx::PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
