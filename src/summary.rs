use crate::decile::{progress_ratio, validate_total_levels};
use crate::error::{CoreError, CoreResult};
use crate::models::{CampaignMetrics, DecileBucketRow, UserProgressRecord};

fn validate_cost(total_cost: f64) -> CoreResult<()> {
    if total_cost.is_finite() && total_cost >= 0.0 {
        Ok(())
    } else {
        Err(CoreError::InvalidConfiguration(format!(
            "campaign cost must be a non-negative amount, got {total_cost}"
        )))
    }
}

fn checked_div(numerator: f64, denominator: f64, what: &'static str) -> CoreResult<f64> {
    if denominator == 0.0 || !denominator.is_finite() {
        return Err(CoreError::DivisionUndefined(what));
    }
    Ok(numerator / denominator)
}

/// Spend attributed to one decile per unit of reading progress.
pub fn reading_acquisition_cost(
    total_cost: f64,
    row: &DecileBucketRow,
    total_learners: u64,
) -> CoreResult<f64> {
    checked_div(
        total_cost * row.la_share,
        row.mean_progress_ratio * total_learners as f64,
        "decile RAC with zero progress or zero learners",
    )
}

/// Fills in `rac` for one campaign's decile rows.
///
/// Rows whose RAC has no defined value keep `rac: None`.
pub fn summarize(rows: &[DecileBucketRow], total_cost: f64) -> CoreResult<Vec<DecileBucketRow>> {
    validate_cost(total_cost)?;
    let total_learners: u64 = rows.iter().map(|row| row.learner_count).sum();

    Ok(rows
        .iter()
        .map(|row| {
            let rac = match reading_acquisition_cost(total_cost, row, total_learners) {
                Ok(value) => Some(value),
                Err(err) => {
                    tracing::debug!(
                        campaign = %row.campaign,
                        decile = %row.decile,
                        %err,
                        "RAC left undefined"
                    );
                    None
                }
            };
            DecileBucketRow {
                rac,
                ..row.clone()
            }
        })
        .collect())
}

pub fn learner_acquisition_cost(total_cost: f64, la: u64) -> CoreResult<f64> {
    checked_div(total_cost, la as f64, "LAC with no learners")
}

/// `Σ(ra · la) / Σ(la)` over `(ra, la)` pairs.
pub fn weighted_average_ra<I>(values: I) -> CoreResult<f64>
where
    I: IntoIterator<Item = (f64, u64)>,
{
    let (weighted, weight) = values
        .into_iter()
        .fold((0.0, 0u64), |(weighted, weight), (ra, la)| {
            (weighted + ra * la as f64, weight + la)
        });
    checked_div(weighted, weight as f64, "weighted RA with zero total LA")
}

/// Overall LA, LAC, RA and RAC for one campaign's learners.
pub fn campaign_metrics(
    campaign: &str,
    users: &[&UserProgressRecord],
    total_levels: f64,
    total_cost: f64,
) -> CoreResult<CampaignMetrics> {
    validate_cost(total_cost)?;
    validate_total_levels(total_levels)?;

    let la = users.len() as u64;
    let ra = checked_div(
        users
            .iter()
            .map(|user| progress_ratio(user.max_level, total_levels))
            .sum::<f64>(),
        la as f64,
        "RA with no learners",
    )
    .ok();
    let rac = ra.and_then(|ra| checked_div(total_cost, ra * la as f64, "campaign RAC").ok());

    Ok(CampaignMetrics {
        campaign: campaign.to_string(),
        la,
        lac: learner_acquisition_cost(total_cost, la).ok(),
        ra,
        rac,
    })
}
