use std::collections::HashSet;
use std::fmt::Write;

use chrono::NaiveDate;
use serde::Serialize;

use crate::cohort::{self, Cohort};
use crate::decile;
use crate::error::{CoreError, CoreResult};
use crate::models::{
    AnnualMetrics, AppDefinition, CampaignDefinition, CampaignMetrics, CountryLa, DecileBucketRow,
    LaPoint, RollingPoint, UserProgressRecord,
};
use crate::series::{self, RollingWindow};
use crate::summary;

type Definition = (&'static str, &'static str, &'static str, &'static str);

const ANNUAL_DEFINITIONS: &[Definition] = &[
    (
        "LA",
        "Learner Acquisition",
        "The number of users that have completed at least one level.",
        "COUNT(Learners)",
    ),
    (
        "LAC",
        "Learner Acquisition Cost",
        "The cost (USD) of acquiring one learner.",
        "Total Spend / LA",
    ),
    (
        "EstRA",
        "Estimated Reading Acquisition",
        "The estimated average percentage of levels completed per learner from start date to today.",
        "AVG Max Level Reached / AVG Total Levels",
    ),
    (
        "RAC",
        "Reading Acquisition Cost",
        "The cost (USD) associated with one learner reaching the average percentage of levels (EstRA).",
        "Total Spend / (EstRA * LA)",
    ),
];

const COMPARISON_DEFINITIONS: &[Definition] = &[
    (
        "LA",
        "Learner Acquisition",
        "The number of users that have completed at least one level.",
        "COUNT(Learners)",
    ),
    (
        "LAC",
        "Learner Acquisition Cost",
        "The cost (USD) of acquiring one learner.",
        "Total Spend / LA",
    ),
    (
        "RA",
        "Reading Acquisition",
        "The average percentage of levels completed per learner from start date to today.",
        "AVG Max Level Reached / Total Levels",
    ),
    (
        "RAC",
        "Reading Acquisition Cost",
        "The cost (USD) associated with one learner reaching the average percentage of levels (RA).",
        "Total Spend / (RA * LA)",
    ),
];

#[derive(Debug, Clone, Copy, Serialize)]
pub struct TimelineView {
    pub window: RollingWindow,
    pub normalized: bool,
}

/// LA timeline keyed by calendar date, or by day since each series' first
/// observed day when normalized.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Timeline {
    Calendar(Vec<RollingPoint<NaiveDate>>),
    Normalized(Vec<RollingPoint<u32>>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesSummary {
    pub campaign: String,
    pub observed_days: usize,
    pub total_la: u64,
    pub peak: Option<f64>,
    pub latest: Option<f64>,
}

fn summarize_series<K>(points: &[RollingPoint<K>]) -> Vec<SeriesSummary> {
    let mut summaries: Vec<SeriesSummary> = Vec::new();

    for point in points {
        let starts_new = summaries
            .last()
            .map_or(true, |last| last.campaign != point.campaign);
        if starts_new {
            summaries.push(SeriesSummary {
                campaign: point.campaign.clone(),
                observed_days: 0,
                total_la: 0,
                peak: None,
                latest: None,
            });
        }
        if let Some(current) = summaries.last_mut() {
            current.observed_days += 1;
            current.total_la += point.count;
            current.latest = point.mean;
            if let Some(mean) = point.mean {
                current.peak = Some(current.peak.map_or(mean, |peak| peak.max(mean)));
            }
        }
    }

    summaries
}

impl Timeline {
    pub fn build(series: &[LaPoint<NaiveDate>], view: TimelineView) -> Self {
        if view.normalized {
            let normalized = series::normalize_date_range(series);
            Timeline::Normalized(series::rolling_mean(&normalized, view.window))
        } else {
            Timeline::Calendar(series::rolling_mean(series, view.window))
        }
    }

    pub fn summaries(&self) -> Vec<SeriesSummary> {
        match self {
            Timeline::Calendar(points) => summarize_series(points),
            Timeline::Normalized(points) => summarize_series(points),
        }
    }

    /// Writes one row per point: `campaign,at,count,mean`.
    pub fn write_csv<W: std::io::Write>(&self, writer: W) -> anyhow::Result<()> {
        let mut out = csv::Writer::from_writer(writer);
        match self {
            Timeline::Calendar(points) => {
                for point in points {
                    out.serialize(point)?;
                }
            }
            Timeline::Normalized(points) => {
                for point in points {
                    out.serialize(point)?;
                }
            }
        }
        out.flush()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnnualReport {
    pub view: TimelineView,
    pub years: Vec<AnnualMetrics>,
    pub total_la: u64,
    pub weighted_ra: Option<f64>,
    pub average_total_levels: f64,
    pub timeline: Timeline,
    pub countries: Vec<CountryLa>,
    pub deciles: Vec<DecileBucketRow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CampaignLine {
    #[serde(flatten)]
    pub metrics: CampaignMetrics,
    pub country: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub total_cost: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComparisonReport {
    pub view: TimelineView,
    pub campaigns: Vec<CampaignLine>,
    pub total_la: u64,
    pub weighted_ra: Option<f64>,
    pub timeline: Timeline,
    pub deciles: Vec<DecileBucketRow>,
}

/// Year bounds covering every row the annual report can use.
pub fn annual_window(years: &[AnnualMetrics]) -> Option<(NaiveDate, NaiveDate)> {
    let first = years.iter().map(|m| m.year).min()?;
    let last = years.iter().map(|m| m.year).max()?;
    Some((
        NaiveDate::from_ymd_opt(first, 1, 1)?,
        NaiveDate::from_ymd_opt(last, 12, 31)?,
    ))
}

/// Acquisition window spanning every given campaign.
pub fn campaign_window(campaigns: &[&CampaignDefinition]) -> Option<(NaiveDate, NaiveDate)> {
    let start = campaigns.iter().map(|c| c.start_date).min()?;
    let end = campaigns.iter().map(|c| c.end_date).max()?;
    Some((start, end))
}

/// Sheet rows for the selected years; all rows when nothing is selected.
pub fn select_years(selected: &[i32], sheet: &[AnnualMetrics]) -> CoreResult<Vec<AnnualMetrics>> {
    let mut years = if selected.is_empty() {
        sheet.to_vec()
    } else {
        selected
            .iter()
            .map(|year| {
                sheet
                    .iter()
                    .find(|metrics| metrics.year == *year)
                    .cloned()
                    .ok_or_else(|| {
                        CoreError::InvalidConfiguration(format!(
                            "year {year} is not in the annual metrics sheet"
                        ))
                    })
            })
            .collect::<CoreResult<Vec<_>>>()?
    };
    years.sort_by_key(|metrics| metrics.year);
    years.dedup_by_key(|metrics| metrics.year);
    Ok(years)
}

/// Campaigns by name in selection order, repeats dropped; all campaigns when
/// nothing is selected.
pub fn select_campaigns<'a>(
    selected: &[String],
    campaigns: &'a [CampaignDefinition],
) -> CoreResult<Vec<&'a CampaignDefinition>> {
    if selected.is_empty() {
        return Ok(campaigns.iter().collect());
    }
    let mut seen = HashSet::new();
    selected
        .iter()
        .filter(|name| seen.insert(name.as_str()))
        .map(|name| {
            campaigns
                .iter()
                .find(|campaign| &campaign.name == name)
                .ok_or_else(|| CoreError::InvalidConfiguration(format!("unknown campaign {name}")))
        })
        .collect()
}

pub fn build_annual_report(
    years: Vec<AnnualMetrics>,
    apps: &[AppDefinition],
    users: &[UserProgressRecord],
    view: TimelineView,
) -> CoreResult<AnnualReport> {
    let total_la = years.iter().map(|metrics| metrics.la).sum();
    let weighted_ra =
        summary::weighted_average_ra(years.iter().map(|metrics| (metrics.ra, metrics.la))).ok();

    let year_list: Vec<i32> = years.iter().map(|metrics| metrics.year).collect();
    let cohorts = cohort::assign_annual_cohorts(&year_list, users);
    let timeline = Timeline::build(&cohort::daily_la(&cohorts), view);
    let countries = cohort::la_by_country(&cohorts);

    let average_total_levels = decile::average_total_levels(apps)?;
    let mut deciles = Vec::new();
    for cohort in &cohorts {
        deciles.extend(decile::bucket_by_decile(
            &cohort.name,
            cohort.users.iter().copied(),
            average_total_levels,
        )?);
    }

    Ok(AnnualReport {
        view,
        years,
        total_la,
        weighted_ra,
        average_total_levels,
        timeline,
        countries,
        deciles,
    })
}

pub fn build_comparison_report(
    selected: &[&CampaignDefinition],
    campaigns: &[CampaignDefinition],
    apps: &[AppDefinition],
    users: &[UserProgressRecord],
    view: TimelineView,
) -> CoreResult<ComparisonReport> {
    let names: Vec<String> = selected.iter().map(|c| c.name.clone()).collect();
    let campaign_cohorts = cohort::assign_campaign_cohorts(&names, campaigns, apps, users)?;

    let mut lines = Vec::with_capacity(campaign_cohorts.len());
    let mut deciles = Vec::new();
    for entry in &campaign_cohorts {
        let campaign = entry.campaign;
        let total_levels = entry.total_levels()?;
        let metrics = summary::campaign_metrics(
            &campaign.name,
            &entry.cohort.users,
            total_levels,
            campaign.total_cost,
        )?;
        let buckets = decile::bucket_by_decile(
            &campaign.name,
            entry.cohort.users.iter().copied(),
            total_levels,
        )?;
        deciles.extend(summary::summarize(&buckets, campaign.total_cost)?);

        lines.push(CampaignLine {
            metrics,
            country: campaign.country.to_string(),
            start_date: campaign.start_date,
            end_date: campaign.end_date,
            total_cost: campaign.total_cost,
        });
    }
    deciles.sort_by(|a, b| a.campaign.cmp(&b.campaign).then(a.decile.cmp(&b.decile)));

    let total_la = lines.iter().map(|line| line.metrics.la).sum();
    let weighted_ra = summary::weighted_average_ra(
        lines
            .iter()
            .filter_map(|line| line.metrics.ra.map(|ra| (ra, line.metrics.la))),
    )
    .ok();

    let cohorts: Vec<Cohort<'_>> = campaign_cohorts
        .into_iter()
        .map(|entry| entry.cohort)
        .collect();
    let timeline = Timeline::build(&cohort::daily_la(&cohorts), view);

    Ok(ComparisonReport {
        view,
        campaigns: lines,
        total_la,
        weighted_ra,
        timeline,
        deciles,
    })
}

fn or_na(value: Option<f64>, precision: usize) -> String {
    match value {
        Some(value) => format!("{value:.precision$}"),
        None => "N/A".to_string(),
    }
}

fn write_definitions(output: &mut String, definitions: &[Definition]) {
    let _ = writeln!(output, "## Definitions");
    let _ = writeln!(output, "| Acronym | Name | Definition | Formula |");
    let _ = writeln!(output, "| --- | --- | --- | --- |");
    for (acronym, name, definition, formula) in definitions {
        let _ = writeln!(output, "| {acronym} | {name} | {definition} | {formula} |");
    }
    let _ = writeln!(output);
}

fn write_timeline(output: &mut String, label: &str, timeline: &Timeline, view: TimelineView) {
    let axis = if view.normalized {
        "normalized start"
    } else {
        "original start"
    };
    let _ = writeln!(output, "## {} ({axis})", view.window.title());

    let summaries = timeline.summaries();
    if summaries.is_empty() {
        let _ = writeln!(output, "No learners acquired for this selection.");
        let _ = writeln!(output);
        return;
    }

    let _ = writeln!(
        output,
        "| {label} | Active days | LA | Peak LA/day | Latest LA/day |"
    );
    let _ = writeln!(output, "| --- | ---: | ---: | ---: | ---: |");
    for summary in summaries {
        let _ = writeln!(
            output,
            "| {} | {} | {} | {} | {} |",
            summary.campaign,
            summary.observed_days,
            summary.total_la,
            or_na(summary.peak, 1),
            or_na(summary.latest, 1)
        );
    }
    let _ = writeln!(output);
    let _ = writeln!(
        output,
        "Rolling means cover the most recent days with recorded acquisitions, not calendar days."
    );
    let _ = writeln!(output);
}

fn write_deciles(
    output: &mut String,
    label: &str,
    metric: &str,
    deciles: &[DecileBucketRow],
    with_rac: bool,
) {
    let _ = writeln!(output, "## LA by {metric} Decile");

    if deciles.is_empty() {
        let _ = writeln!(output, "No learners acquired for this selection.");
        let _ = writeln!(output);
        return;
    }

    if with_rac {
        let _ = writeln!(
            output,
            "| {label} | {metric} Decile | LA | % LA | Mean {metric} | RAC (USD) |"
        );
        let _ = writeln!(output, "| --- | ---: | ---: | ---: | ---: | ---: |");
    } else {
        let _ = writeln!(output, "| {label} | {metric} Decile | LA | % LA | Mean {metric} |");
        let _ = writeln!(output, "| --- | ---: | ---: | ---: | ---: |");
    }
    for row in deciles {
        let _ = write!(
            output,
            "| {} | {} | {} | {:.2} | {:.3} |",
            row.campaign, row.decile, row.learner_count, row.la_share, row.mean_progress_ratio
        );
        if with_rac {
            let _ = write!(output, " {} |", or_na(row.rac, 2));
        }
        let _ = writeln!(output);
    }
    let _ = writeln!(output);
    let _ = writeln!(
        output,
        "{metric} deciles split reading progress into ten groups. A learner who has completed 55% of the total levels is counted in the 0.6 decile."
    );
}

pub fn render_annual(report: &AnnualReport) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Annual Summary");
    let _ = writeln!(output);
    write_definitions(&mut output, ANNUAL_DEFINITIONS);

    let _ = writeln!(output, "## Headline");
    let _ = writeln!(output, "- Total LA: {}", report.total_la);
    let _ = writeln!(
        output,
        "- Avg EstRA (weighted): {}",
        or_na(report.weighted_ra, 2)
    );
    let _ = writeln!(output);

    let _ = writeln!(output, "## Summary");
    if report.years.is_empty() {
        let _ = writeln!(output, "No years selected.");
    } else {
        let _ = writeln!(output, "| Year | LA | EstRA |");
        let _ = writeln!(output, "| --- | ---: | ---: |");
        for metrics in &report.years {
            let _ = writeln!(
                output,
                "| {} | {} | {:.3} |",
                metrics.year, metrics.la, metrics.ra
            );
        }
    }
    let _ = writeln!(output);

    write_timeline(&mut output, "Year", &report.timeline, report.view);

    let _ = writeln!(output, "## LA by Country");
    if report.countries.is_empty() {
        let _ = writeln!(output, "No learners acquired for this selection.");
    } else {
        let _ = writeln!(output, "| Country | LA |");
        let _ = writeln!(output, "| --- | ---: |");
        for row in &report.countries {
            let _ = writeln!(output, "| {} | {} |", row.country, row.la);
        }
    }
    let _ = writeln!(output);

    write_deciles(&mut output, "Year", "EstRA", &report.deciles, false);
    let _ = writeln!(
        output,
        "Progress is measured against the average level count across apps ({:.1} levels).",
        report.average_total_levels
    );

    output
}

pub fn render_comparison(report: &ComparisonReport) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Campaign Comparison Details");
    let _ = writeln!(output);
    write_definitions(&mut output, COMPARISON_DEFINITIONS);

    let _ = writeln!(output, "## Headline");
    let _ = writeln!(output, "- Total LA: {}", report.total_la);
    let _ = writeln!(
        output,
        "- Avg RA (weighted): {}",
        or_na(report.weighted_ra, 2)
    );
    let _ = writeln!(output);

    let _ = writeln!(output, "## Campaigns");
    if report.campaigns.is_empty() {
        let _ = writeln!(output, "No campaigns selected.");
    } else {
        let _ = writeln!(
            output,
            "| Campaign | Country | Window | Total Spend (USD) | LA | LAC | RA | RAC |"
        );
        let _ = writeln!(output, "| --- | --- | --- | ---: | ---: | ---: | ---: | ---: |");
        for line in &report.campaigns {
            let _ = writeln!(
                output,
                "| {} | {} | {} to {} | {:.2} | {} | {} | {} | {} |",
                line.metrics.campaign,
                line.country,
                line.start_date,
                line.end_date,
                line.total_cost,
                line.metrics.la,
                or_na(line.metrics.lac, 2),
                or_na(line.metrics.ra, 3),
                or_na(line.metrics.rac, 2)
            );
        }
    }
    let _ = writeln!(output);

    write_timeline(&mut output, "Campaign", &report.timeline, report.view);
    write_deciles(&mut output, "Campaign", "RA", &report.deciles, true);

    output
}
