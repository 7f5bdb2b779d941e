use std::collections::BTreeMap;

use crate::error::{CoreError, CoreResult};
use crate::models::{AppDefinition, Decile, DecileBucketRow, UserProgressRecord};

pub fn progress_ratio(max_level: i32, total_levels: f64) -> f64 {
    f64::from(max_level) / total_levels
}

pub(crate) fn validate_total_levels(total_levels: f64) -> CoreResult<()> {
    if total_levels.is_finite() && total_levels > 0.0 {
        Ok(())
    } else {
        Err(CoreError::InvalidConfiguration(format!(
            "total levels must be positive, got {total_levels}"
        )))
    }
}

/// Mean level count across apps whose count is known.
///
/// Blank or zero counts are treated as unknown and left out of the mean.
pub fn average_total_levels(apps: &[AppDefinition]) -> CoreResult<f64> {
    let known: Vec<f64> = apps
        .iter()
        .filter_map(|app| app.total_levels)
        .filter(|levels| *levels > 0)
        .map(f64::from)
        .collect();

    if known.is_empty() {
        return Err(CoreError::InvalidConfiguration(
            "no app has a known total level count".to_string(),
        ));
    }

    Ok(known.iter().sum::<f64>() / known.len() as f64)
}

/// Buckets one campaign's learners by progress ratio.
///
/// Rows are returned in ascending decile order; empty deciles are omitted.
pub fn bucket_by_decile<'a, I>(
    campaign: &str,
    users: I,
    total_levels: f64,
) -> CoreResult<Vec<DecileBucketRow>>
where
    I: IntoIterator<Item = &'a UserProgressRecord>,
{
    validate_total_levels(total_levels)?;

    let mut buckets: BTreeMap<Decile, (u64, f64)> = BTreeMap::new();
    let mut total = 0u64;

    for user in users {
        let ratio = progress_ratio(user.max_level, total_levels);
        if ratio > 1.0 {
            tracing::debug!(
                campaign,
                user_id = %user.user_id,
                ratio,
                "progress ratio above 1.0 clipped into top decile"
            );
        }
        let entry = buckets.entry(Decile::for_ratio(ratio)).or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 += ratio;
        total += 1;
    }

    Ok(buckets
        .into_iter()
        .map(|(decile, (count, ratio_sum))| DecileBucketRow {
            campaign: campaign.to_string(),
            decile,
            learner_count: count,
            mean_progress_ratio: ratio_sum / count as f64,
            la_share: count as f64 / total as f64,
            rac: None,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn learner(id: usize, max_level: i32) -> UserProgressRecord {
        let date = NaiveDate::from_ymd_opt(2022, 6, 1).unwrap();
        UserProgressRecord {
            user_id: format!("user-{id}"),
            acquisition_date: date,
            max_level_date: date,
            max_level,
            country: "India".to_string(),
            app_id: "org.curiouslearning.ftm_hindi".to_string(),
        }
    }

    fn app(levels: Option<u32>) -> AppDefinition {
        AppDefinition {
            app_id: "app".to_string(),
            language: "Hindi".to_string(),
            total_levels: levels,
        }
    }

    fn decile(label: f64) -> Decile {
        Decile::from_step((label * 10.0).round() as u8).unwrap()
    }

    #[test]
    fn lower_bound_is_inclusive() {
        assert_eq!(Decile::for_ratio(0.0), decile(0.1));
        assert_eq!(Decile::for_ratio(0.3), decile(0.4));
        assert_eq!(Decile::for_ratio(0.1), decile(0.2));
        assert_eq!(Decile::for_ratio(0.899), decile(0.9));
        assert_eq!(Decile::for_ratio(0.95), decile(1.0));
        assert_eq!(Decile::for_ratio(1.7), decile(1.0));
        assert_eq!(Decile::for_ratio(-0.2), decile(0.1));
    }

    #[test]
    fn buckets_sample_campaign() {
        let users: Vec<_> = [1, 2, 3, 9, 10]
            .iter()
            .enumerate()
            .map(|(id, level)| learner(id, *level))
            .collect();
        let rows = bucket_by_decile("Hindi Q1", &users, 10.0).unwrap();

        let labels: Vec<String> = rows.iter().map(|row| row.decile.to_string()).collect();
        assert_eq!(labels, vec!["0.2", "0.3", "0.4", "1.0"]);

        let top = rows.last().unwrap();
        assert_eq!(top.learner_count, 2);
        assert!((top.la_share - 0.4).abs() < 1e-9);
        assert!((top.mean_progress_ratio - 0.95).abs() < 1e-9);
        assert!(rows.iter().all(|row| row.rac.is_none()));
    }

    #[test]
    fn every_user_lands_in_exactly_one_bucket() {
        let users: Vec<_> = (0..137).map(|id| learner(id, (id * 7 % 61) as i32)).collect();
        let rows = bucket_by_decile("Mixed", &users, 48.0).unwrap();

        let counted: u64 = rows.iter().map(|row| row.learner_count).sum();
        assert_eq!(counted, 137);
        let share: f64 = rows.iter().map(|row| row.la_share).sum();
        assert!((share - 1.0).abs() < 1e-9);
    }

    #[test]
    fn empty_campaign_yields_no_rows() {
        let users: Vec<UserProgressRecord> = Vec::new();
        let rows = bucket_by_decile("Empty", &users, 10.0).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn rejects_non_positive_total_levels() {
        let users = vec![learner(1, 3)];
        for bad in [0.0, -4.0, f64::NAN] {
            let err = bucket_by_decile("Bad", &users, bad).unwrap_err();
            assert!(matches!(err, CoreError::InvalidConfiguration(_)));
        }
    }

    #[test]
    fn zero_level_apps_are_excluded_from_average() {
        let apps = vec![app(Some(40)), app(Some(0)), app(None), app(Some(60))];
        assert_eq!(average_total_levels(&apps).unwrap(), 50.0);
    }

    #[test]
    fn average_fails_without_known_levels() {
        let apps = vec![app(Some(0)), app(None)];
        assert!(matches!(
            average_total_levels(&apps),
            Err(CoreError::InvalidConfiguration(_))
        ));
    }
}
