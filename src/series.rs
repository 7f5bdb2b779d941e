use std::collections::VecDeque;

use chrono::NaiveDate;
use serde::Serialize;

use crate::models::{LaPoint, NormalizedLaSeries, RollingPoint};

/// Smoothing applied to a daily LA series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum RollingWindow {
    Daily,
    Weekly,
    Monthly,
}

impl RollingWindow {
    pub fn size(self) -> usize {
        match self {
            RollingWindow::Daily => 1,
            RollingWindow::Weekly => 7,
            RollingWindow::Monthly => 30,
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            RollingWindow::Daily => "Daily LA",
            RollingWindow::Weekly => "Weekly LA Rolling Mean",
            RollingWindow::Monthly => "Monthly LA Rolling Mean",
        }
    }
}

fn sorted_by_campaign<K: Ord + Clone>(series: &[LaPoint<K>]) -> Vec<LaPoint<K>> {
    let mut sorted = series.to_vec();
    sorted.sort_by(|a, b| a.campaign.cmp(&b.campaign).then_with(|| a.at.cmp(&b.at)));
    sorted
}

/// Re-keys each campaign's rows by day since its first observed day.
///
/// Rows are grouped by `(campaign, date)` first, so interleaved input still
/// yields `1..=n` per campaign.
pub fn normalize_date_range(series: &[LaPoint<NaiveDate>]) -> NormalizedLaSeries {
    sorted_by_campaign(series)
        .into_iter()
        .fold(
            (Vec::with_capacity(series.len()), None::<(String, u32)>),
            |(mut out, previous), point| {
                let day_index = match previous {
                    Some((campaign, day)) if campaign == point.campaign => day + 1,
                    _ => 1,
                };
                let state = Some((point.campaign.clone(), day_index));
                out.push(LaPoint {
                    campaign: point.campaign,
                    at: day_index,
                    count: point.count,
                });
                (out, state)
            },
        )
        .0
}

/// Trailing mean over the last `window` observed rows of each campaign.
///
/// Days without any acquisition are absent from the series and are not
/// filled with zeros, so a weekly mean covers the seven most recent active
/// days. The first `window - 1` rows of each campaign have no mean.
pub fn rolling_mean<K: Ord + Clone>(
    series: &[LaPoint<K>],
    window: RollingWindow,
) -> Vec<RollingPoint<K>> {
    let size = window.size();
    let mut out = Vec::with_capacity(series.len());
    let mut trailing: VecDeque<u64> = VecDeque::with_capacity(size);
    let mut sum = 0u64;
    let mut current: Option<String> = None;

    for point in sorted_by_campaign(series) {
        if current.as_deref() != Some(point.campaign.as_str()) {
            trailing.clear();
            sum = 0;
            current = Some(point.campaign.clone());
        }

        trailing.push_back(point.count);
        sum += point.count;
        if trailing.len() > size {
            if let Some(dropped) = trailing.pop_front() {
                sum -= dropped;
            }
        }

        let mean = (trailing.len() == size).then(|| sum as f64 / size as f64);
        out.push(RollingPoint {
            campaign: point.campaign,
            at: point.at,
            count: point.count,
            mean,
        });
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2022, 1, d).unwrap()
    }

    fn point(campaign: &str, d: u32, count: u64) -> LaPoint<NaiveDate> {
        LaPoint {
            campaign: campaign.to_string(),
            at: day(d),
            count,
        }
    }

    #[test]
    fn normalization_restarts_per_campaign() {
        let series = vec![
            point("India", 3, 4),
            point("India", 4, 2),
            point("India", 9, 1),
            point("Kenya", 1, 7),
            point("Kenya", 2, 5),
        ];
        let normalized = normalize_date_range(&series);

        assert_eq!(normalized.len(), series.len());
        let india: Vec<u32> = normalized
            .iter()
            .filter(|p| p.campaign == "India")
            .map(|p| p.at)
            .collect();
        let kenya: Vec<u32> = normalized
            .iter()
            .filter(|p| p.campaign == "Kenya")
            .map(|p| p.at)
            .collect();
        assert_eq!(india, vec![1, 2, 3]);
        assert_eq!(kenya, vec![1, 2]);
        assert_eq!(normalized[2].count, 1);
    }

    #[test]
    fn normalization_groups_interleaved_rows() {
        let series = vec![
            point("A", 1, 1),
            point("B", 1, 10),
            point("A", 2, 2),
            point("B", 2, 20),
            point("A", 3, 3),
        ];
        let normalized = normalize_date_range(&series);

        let a: Vec<(u32, u64)> = normalized
            .iter()
            .filter(|p| p.campaign == "A")
            .map(|p| (p.at, p.count))
            .collect();
        assert_eq!(a, vec![(1, 1), (2, 2), (3, 3)]);
        let b: Vec<(u32, u64)> = normalized
            .iter()
            .filter(|p| p.campaign == "B")
            .map(|p| (p.at, p.count))
            .collect();
        assert_eq!(b, vec![(1, 10), (2, 20)]);
    }

    #[test]
    fn normalization_of_empty_series_is_empty() {
        assert!(normalize_date_range(&[]).is_empty());
    }

    #[test]
    fn weekly_mean_leaves_prefix_undefined() {
        let series: Vec<_> = (1..=9).map(|d| point("A", d, u64::from(d))).collect();
        let rolled = rolling_mean(&series, RollingWindow::Weekly);

        assert_eq!(rolled.len(), 9);
        assert!(rolled[..6].iter().all(|p| p.mean.is_none()));
        // (1 + .. + 7) / 7
        assert_eq!(rolled[6].mean, Some(4.0));
        assert_eq!(rolled[7].mean, Some(5.0));
        assert_eq!(rolled[8].mean, Some(6.0));
    }

    #[test]
    fn daily_window_is_the_raw_count() {
        let series = vec![point("A", 1, 3), point("A", 2, 8)];
        let rolled = rolling_mean(&series, RollingWindow::Daily);
        assert_eq!(rolled[0].mean, Some(3.0));
        assert_eq!(rolled[1].mean, Some(8.0));
    }

    #[test]
    fn window_does_not_cross_campaigns() {
        let mut series: Vec<_> = (1..=7).map(|d| point("A", d, 1)).collect();
        series.extend((1..=3).map(|d| point("B", d, 100)));
        let rolled = rolling_mean(&series, RollingWindow::Weekly);

        assert_eq!(rolled[6].mean, Some(1.0));
        assert!(rolled[7..].iter().all(|p| p.mean.is_none()));
    }

    #[test]
    fn mean_is_over_observed_days_not_calendar_days() {
        // Gaps on the 2nd, 4th and 6th are not filled with zero rows.
        let series = vec![
            point("A", 1, 2),
            point("A", 3, 4),
            point("A", 5, 6),
            point("A", 7, 8),
            point("A", 9, 10),
            point("A", 11, 12),
            point("A", 13, 14),
        ];
        let rolled = rolling_mean(&series, RollingWindow::Weekly);
        assert_eq!(rolled[6].mean, Some(8.0));
    }

    #[test]
    fn rolling_works_on_normalized_series() {
        let series: Vec<_> = (1..=30).map(|d| point("A", d, 2)).collect();
        let normalized = normalize_date_range(&series);
        let rolled = rolling_mean(&normalized, RollingWindow::Monthly);

        assert!(rolled[28].mean.is_none());
        assert_eq!(rolled[29].at, 30);
        assert_eq!(rolled[29].mean, Some(2.0));
    }

    #[test]
    fn rolling_mean_is_idempotent() {
        let series = vec![
            point("B", 2, 5),
            point("A", 1, 3),
            point("A", 2, 9),
            point("B", 1, 4),
        ];
        let first = rolling_mean(&series, RollingWindow::Weekly);
        let second = rolling_mean(&series, RollingWindow::Weekly);
        assert_eq!(first, second);
    }
}
