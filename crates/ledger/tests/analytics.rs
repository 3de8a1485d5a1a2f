use std::time::Duration;

use arkiv_contracts::NewViewEvent;
use arkiv_contracts::period::SeriesRange;
use arkiv_ledger::ViewStore;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use sqlx::postgres::PgPoolOptions;
use ulid::Ulid;

fn test_db_url() -> Option<String> {
    std::env::var("ARKIV_TEST_DB_URL")
        .ok()
        .or_else(|| std::env::var("DATABASE_URL").ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn schema_db_url(base: &str, schema: &str) -> String {
    let separator = if base.contains('?') { "&" } else { "?" };
    format!("{base}{separator}options=-csearch_path%3D{schema}")
}

async fn isolated_store() -> Option<(sqlx::PgPool, ViewStore)> {
    let db_url = test_db_url()?;
    let schema = format!("arkiv_test_{}", Ulid::new()).to_lowercase();

    let admin = PgPoolOptions::new()
        .max_connections(1)
        .connect(&db_url)
        .await
        .expect("DB connect should succeed");
    sqlx::query(&format!("CREATE SCHEMA {schema}"))
        .execute(&admin)
        .await
        .expect("create schema should succeed");
    admin.close().await;

    let url = schema_db_url(&db_url, &schema);
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&url)
        .await
        .expect("schema connect should succeed");

    arkiv_ledger::migrate(&pool)
        .await
        .expect("migrations should apply");
    arkiv_ledger::migrate(&pool)
        .await
        .expect("migrations should be idempotent");

    let store = ViewStore::connect(&url, Duration::from_secs(2))
        .await
        .expect("store connect should succeed");

    Some((pool, store))
}

fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
}

fn event(
    path: &str,
    target_id: Option<Ulid>,
    signature: &str,
    occurred_at: DateTime<Utc>,
) -> NewViewEvent {
    NewViewEvent {
        path: path.to_string(),
        target_id,
        visitor_signature: signature.to_string(),
        user_agent_raw: "test-agent".to_string(),
        occurred_at,
    }
}

async fn insert_case(
    pool: &sqlx::PgPool,
    case_id: &str,
    title: &str,
    person_name: Option<&str>,
    kind: &str,
    status: &str,
    year: Option<i32>,
) {
    sqlx::query(
        "INSERT INTO arkiv_cases (case_id, title, person_name, kind, status, year) VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(case_id)
    .bind(title)
    .bind(person_name)
    .bind(kind)
    .bind(status)
    .bind(year)
    .execute(pool)
    .await
    .expect("case insert should succeed");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn overview_totals_nest_and_updates_are_rejected() {
    let Some((pool, store)) = isolated_store().await else {
        eprintln!("skipping ledger test; set ARKIV_TEST_DB_URL to enable");
        return;
    };

    // Thursday 2025-05-15; week starts Monday 05-12, quarter 04-01,
    // half-year 01-01. One event per nested period plus one from last year.
    let now = utc(2025, 5, 15, 12, 0, 0);
    let times = [
        utc(2025, 5, 15, 10, 0, 0),
        utc(2025, 5, 13, 9, 0, 0),
        utc(2025, 5, 2, 9, 0, 0),
        utc(2025, 4, 10, 9, 0, 0),
        utc(2025, 1, 15, 9, 0, 0),
        utc(2024, 6, 1, 9, 0, 0),
    ];
    for (idx, at) in times.iter().enumerate() {
        store
            .append_view(&event(&format!("/cases/{idx}"), None, "10.0.0.1", *at))
            .await
            .expect("append should succeed");
    }

    let totals = store
        .overview_totals(now)
        .await
        .expect("overview should succeed");

    assert_eq!(totals.today, 1);
    assert_eq!(totals.week, 2);
    assert_eq!(totals.month, 3);
    assert_eq!(totals.quarter, 4);
    assert_eq!(totals.half_year, 5);
    assert_eq!(totals.all_time, 6);

    assert!(totals.today <= totals.week);
    assert!(totals.week <= totals.month);
    assert!(totals.month <= totals.quarter);
    assert!(totals.quarter <= totals.half_year);
    assert!(totals.half_year <= totals.all_time);

    let update = sqlx::query("UPDATE arkiv_view_events SET path = 'rewritten'")
        .execute(&pool)
        .await;
    assert!(update.is_err(), "view events must be append-only");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn popular_targets_are_ordered_labeled_and_truncated() {
    let Some((pool, store)) = isolated_store().await else {
        eprintln!("skipping ledger test; set ARKIV_TEST_DB_URL to enable");
        return;
    };

    let case_a = Ulid::from_string("01ARZ3NDEKTSV4RRFFQ69G5FAA").unwrap();
    let memory_b = Ulid::from_string("01ARZ3NDEKTSV4RRFFQ69G5FAB").unwrap();
    let vanished_c = Ulid::from_string("01ARZ3NDEKTSV4RRFFQ69G5FAC").unwrap();

    insert_case(
        &pool,
        &case_a.to_string(),
        "Trial records, 1952",
        None,
        "case",
        "published",
        Some(1952),
    )
    .await;
    insert_case(
        &pool,
        &memory_b.to_string(),
        "Deportation memory",
        Some("M. Kask"),
        "memory",
        "published",
        Some(1949),
    )
    .await;

    let at = utc(2025, 5, 15, 10, 0, 0);
    let views = [
        (case_a, 3),
        (memory_b, 3),
        (vanished_c, 1),
    ];
    for (target, count) in views {
        for i in 0..count {
            store
                .append_view(&event(
                    &format!("/cases/{target}"),
                    Some(target),
                    &format!("10.0.0.{i}"),
                    at,
                ))
                .await
                .expect("append should succeed");
        }
    }
    // A path-only event must never show up in the target ranking.
    store
        .append_view(&event("/archive", None, "10.0.0.9", at))
        .await
        .expect("append should succeed");

    let popular = store
        .popular_targets(10)
        .await
        .expect("popular should succeed");

    assert_eq!(popular.len(), 3);

    // Tied counts order by ascending target id.
    assert_eq!(popular[0].target_id, case_a.to_string());
    assert_eq!(popular[0].views, 3);
    assert_eq!(popular[0].title, "Trial records, 1952");
    assert_eq!(popular[0].status, "published");
    assert_eq!(popular[0].year, Some(1952));

    assert_eq!(popular[1].target_id, memory_b.to_string());
    assert_eq!(popular[1].views, 3);
    assert_eq!(popular[1].title, "M. Kask");

    // A target missing from the case store stays in the report as unknown.
    assert_eq!(popular[2].target_id, vanished_c.to_string());
    assert_eq!(popular[2].views, 1);
    assert_eq!(popular[2].title, "Unknown");
    assert_eq!(popular[2].status, "unknown");
    assert_eq!(popular[2].year, None);

    let top_two = store
        .popular_targets(2)
        .await
        .expect("popular should succeed");
    assert_eq!(top_two.len(), 2);
    assert_eq!(top_two[1].target_id, memory_b.to_string());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn daily_series_sums_match_the_range_total() {
    let Some((_pool, store)) = isolated_store().await else {
        eprintln!("skipping ledger test; set ARKIV_TEST_DB_URL to enable");
        return;
    };

    let day_2 = NaiveDate::from_ymd_opt(2025, 5, 2).unwrap();
    let day_5 = NaiveDate::from_ymd_opt(2025, 5, 5).unwrap();

    for at in [
        utc(2025, 5, 2, 1, 0, 0),
        utc(2025, 5, 2, 12, 30, 0),
        utc(2025, 5, 2, 23, 59, 59),
        utc(2025, 5, 5, 8, 0, 0),
    ] {
        store
            .append_view(&event("/archive", None, "10.0.0.1", at))
            .await
            .expect("append should succeed");
    }
    // Outside the queried window.
    store
        .append_view(&event("/archive", None, "10.0.0.1", utc(2025, 4, 28, 8, 0, 0)))
        .await
        .expect("append should succeed");

    let range = SeriesRange::dates(
        NaiveDate::from_ymd_opt(2025, 5, 1).unwrap(),
        NaiveDate::from_ymd_opt(2025, 5, 7).unwrap(),
    );

    let series = store
        .daily_counts(&range)
        .await
        .expect("daily counts should succeed");

    // Exactly the two non-empty days, ascending; no synthesized zero days.
    assert_eq!(series.len(), 2);
    assert_eq!(series[0].date, day_2);
    assert_eq!(series[0].count, 3);
    assert_eq!(series[1].date, day_5);
    assert_eq!(series[1].count, 1);

    let total = store
        .range_total(&range)
        .await
        .expect("range total should succeed");
    assert_eq!(series.iter().map(|d| d.count).sum::<i64>(), total);
    assert_eq!(total, 4);
}
