use std::io::Read;

use anyhow::Context;
use chrono::NaiveDate;
use sqlx::{PgPool, Row};

use crate::models::UserProgressRecord;

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

async fn upsert_progress(pool: &PgPool, record: &UserProgressRecord) -> anyhow::Result<u64> {
    let result = sqlx::query(
        r#"
        INSERT INTO la_report.user_progress
        (user_pseudo_id, app_id, country, la_date, max_lvl_date, max_lvl)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (app_id, user_pseudo_id) DO UPDATE
        SET country = EXCLUDED.country,
            max_lvl_date = EXCLUDED.max_lvl_date,
            max_lvl = EXCLUDED.max_lvl
        WHERE la_report.user_progress.max_lvl_date <= EXCLUDED.max_lvl_date
        "#,
    )
    .bind(&record.user_id)
    .bind(&record.app_id)
    .bind(&record.country)
    .bind(record.acquisition_date)
    .bind(record.max_level_date)
    .bind(record.max_level)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let learners = vec![
        ("seed-hi-001", "org.curiouslearning.ftm_hindi", "India", (2022, 1, 17), (2022, 2, 3), 12),
        ("seed-hi-002", "org.curiouslearning.ftm_hindi", "India", (2022, 1, 17), (2022, 1, 20), 3),
        ("seed-hi-003", "org.curiouslearning.ftm_hindi", "Nepal", (2022, 1, 18), (2022, 4, 9), 47),
        ("seed-hi-004", "org.curiouslearning.ftm_hindi", "India", (2022, 2, 2), (2022, 2, 2), 1),
        ("seed-sw-001", "org.curiouslearning.ftm_swahili", "Kenya", (2022, 5, 4), (2022, 6, 11), 30),
        ("seed-sw-002", "org.curiouslearning.ftm_swahili", "Kenya", (2022, 5, 4), (2022, 5, 9), 8),
        ("seed-sw-003", "org.curiouslearning.ftm_swahili", "Tanzania", (2022, 5, 6), (2022, 8, 1), 52),
        ("seed-sw-004", "org.curiouslearning.ftm_swahili", "Kenya", (2023, 1, 12), (2023, 1, 30), 19),
    ];

    for (user_id, app_id, country, acquired, last_progress, max_level) in learners {
        let record = UserProgressRecord {
            user_id: user_id.to_string(),
            app_id: app_id.to_string(),
            country: country.to_string(),
            acquisition_date: NaiveDate::from_ymd_opt(acquired.0, acquired.1, acquired.2)
                .context("invalid date")?,
            max_level_date: NaiveDate::from_ymd_opt(
                last_progress.0,
                last_progress.1,
                last_progress.2,
            )
            .context("invalid date")?,
            max_level,
        };
        upsert_progress(pool, &record).await?;
    }

    Ok(())
}

/// Learners acquired between `acquired_from` and `acquired_to`, inclusive.
pub async fn fetch_user_progress(
    pool: &PgPool,
    acquired_from: NaiveDate,
    acquired_to: NaiveDate,
) -> anyhow::Result<Vec<UserProgressRecord>> {
    let records = sqlx::query(
        "SELECT user_pseudo_id, app_id, country, la_date, max_lvl_date, max_lvl \
         FROM la_report.user_progress \
         WHERE la_date BETWEEN $1 AND $2 \
         ORDER BY app_id, la_date, user_pseudo_id",
    )
    .bind(acquired_from)
    .bind(acquired_to)
    .fetch_all(pool)
    .await
    .context("failed to fetch user progress")?;

    let mut learners = Vec::with_capacity(records.len());

    for row in records {
        learners.push(UserProgressRecord {
            user_id: row.get("user_pseudo_id"),
            app_id: row.get("app_id"),
            country: row.get("country"),
            acquisition_date: row.get("la_date"),
            max_level_date: row.get("max_lvl_date"),
            max_level: row.get("max_lvl"),
        });
    }

    tracing::info!(
        %acquired_from,
        %acquired_to,
        learners = learners.len(),
        "fetched user progress"
    );
    Ok(learners)
}

/// Parses a warehouse export with the `ftm_users` column names.
pub fn read_progress_csv<R: Read>(source: R) -> anyhow::Result<Vec<UserProgressRecord>> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        user_pseudo_id: String,
        app_id: String,
        country: String,
        #[serde(rename = "LA_date")]
        la_date: NaiveDate,
        max_lvl_date: NaiveDate,
        max_lvl: i32,
    }

    let mut reader = csv::Reader::from_reader(source);
    let mut records = Vec::new();

    for (index, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result.with_context(|| format!("progress export row {}", index + 1))?;
        if row.max_lvl_date < row.la_date {
            tracing::warn!(
                user_id = %row.user_pseudo_id,
                "last progress date precedes acquisition date"
            );
        }
        records.push(UserProgressRecord {
            user_id: row.user_pseudo_id,
            app_id: row.app_id,
            country: row.country,
            acquisition_date: row.la_date,
            max_level_date: row.max_lvl_date,
            max_level: row.max_lvl,
        });
    }

    Ok(records)
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    let file = std::fs::File::open(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let records = read_progress_csv(file)?;
    let mut written = 0usize;

    for record in &records {
        if upsert_progress(pool, record).await? > 0 {
            written += 1;
        }
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_warehouse_export() {
        let data = "\
user_pseudo_id,app_id,country,LA_date,max_lvl_date,max_lvl,event_count
abc123,org.curiouslearning.ftm_hindi,India,2022-01-17,2022-02-03,12,88
def456,org.curiouslearning.ftm_zulu,South Africa,2022-03-02,2022-03-02,1,4
";
        let records = read_progress_csv(data.as_bytes()).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].user_id, "abc123");
        assert_eq!(records[0].max_level, 12);
        assert_eq!(
            records[1].acquisition_date,
            NaiveDate::from_ymd_opt(2022, 3, 2).unwrap()
        );
        assert_eq!(records[1].country, "South Africa");
    }

    #[test]
    fn rejects_malformed_level() {
        let data = "\
user_pseudo_id,app_id,country,LA_date,max_lvl_date,max_lvl
abc123,org.curiouslearning.ftm_hindi,India,2022-01-17,2022-02-03,twelve
";
        assert!(read_progress_csv(data.as_bytes()).is_err());
    }
}
