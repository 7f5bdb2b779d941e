use std::io::Read;
use std::path::Path;

use anyhow::Context;
use chrono::{Months, NaiveDate};
use serde::{Deserialize, Deserializer};

use crate::error::CoreError;
use crate::models::{AnnualMetrics, AppDefinition, CampaignDefinition, CountryFilter};

#[derive(Deserialize)]
struct CampaignRow {
    #[serde(rename = "Campaign Name")]
    name: String,
    #[serde(rename = "Language")]
    language: String,
    #[serde(rename = "Country")]
    country: String,
    #[serde(rename = "Start Date", deserialize_with = "sheet_date")]
    start_date: NaiveDate,
    #[serde(rename = "End Date", deserialize_with = "sheet_date")]
    end_date: NaiveDate,
    #[serde(rename = "Total Cost (USD)")]
    total_cost: f64,
}

#[derive(Deserialize)]
struct AppRow {
    app_id: String,
    language: String,
    total_lvls: Option<u32>,
}

#[derive(Deserialize)]
struct AnnualRow {
    year: i32,
    la: u64,
    ra: f64,
}

const SHEET_DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y"];

/// Accepts ISO dates and the spreadsheet's `M/D/YYYY` form.
fn sheet_date<'de, D>(deserializer: D) -> Result<NaiveDate, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    let value = raw.trim();
    SHEET_DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
        .ok_or_else(|| serde::de::Error::custom(format!("unrecognised date {value:?}")))
}

/// The sheet records the campaign's last month; the window runs to the day
/// before the same date one month later.
pub fn end_of_sheet_month(date: NaiveDate) -> Option<NaiveDate> {
    date.checked_add_months(Months::new(1))?.pred_opt()
}

fn campaign_from_row(row: CampaignRow) -> Result<CampaignDefinition, CoreError> {
    let end_date = end_of_sheet_month(row.end_date).ok_or_else(|| {
        CoreError::InvalidConfiguration(format!("end date {} out of range", row.end_date))
    })?;

    if row.start_date > end_date {
        return Err(CoreError::InvalidConfiguration(format!(
            "campaign {} starts {} after it ends {}",
            row.name, row.start_date, end_date
        )));
    }
    if !row.total_cost.is_finite() || row.total_cost < 0.0 {
        return Err(CoreError::InvalidConfiguration(format!(
            "campaign {} has cost {}",
            row.name, row.total_cost
        )));
    }

    let country = CountryFilter::parse(&row.country).ok_or_else(|| {
        CoreError::InvalidConfiguration(format!(
            "campaign {} has a blank country; use \"All\" for every country",
            row.name
        ))
    })?;

    Ok(CampaignDefinition {
        country,
        name: row.name,
        language: row.language,
        start_date: row.start_date,
        end_date,
        total_cost: row.total_cost,
    })
}

pub fn read_campaigns<R: Read>(source: R) -> anyhow::Result<Vec<CampaignDefinition>> {
    let mut reader = csv::Reader::from_reader(source);
    let mut campaigns = Vec::new();

    for (index, result) in reader.deserialize::<CampaignRow>().enumerate() {
        let row = result.with_context(|| format!("campaign sheet row {}", index + 1))?;
        let campaign =
            campaign_from_row(row).with_context(|| format!("campaign sheet row {}", index + 1))?;
        campaigns.push(campaign);
    }

    Ok(campaigns)
}

pub fn read_apps<R: Read>(source: R) -> anyhow::Result<Vec<AppDefinition>> {
    let mut reader = csv::Reader::from_reader(source);
    let mut apps = Vec::new();

    for (index, result) in reader.deserialize::<AppRow>().enumerate() {
        let row = result.with_context(|| format!("apps sheet row {}", index + 1))?;
        if row.total_lvls.unwrap_or(0) == 0 {
            tracing::warn!(app_id = %row.app_id, "app has no level count; treating as unknown");
        }
        apps.push(AppDefinition {
            app_id: row.app_id,
            language: row.language,
            total_levels: row.total_lvls.filter(|levels| *levels > 0),
        });
    }

    Ok(apps)
}

/// Annual rows up to and including `current_year`, in sheet order.
pub fn read_annual_metrics<R: Read>(
    source: R,
    current_year: i32,
) -> anyhow::Result<Vec<AnnualMetrics>> {
    let mut reader = csv::Reader::from_reader(source);
    let mut metrics = Vec::new();

    for (index, result) in reader.deserialize::<AnnualRow>().enumerate() {
        let row = result.with_context(|| format!("annual metrics sheet row {}", index + 1))?;
        if row.year > current_year {
            continue;
        }
        metrics.push(AnnualMetrics {
            year: row.year,
            la: row.la,
            ra: row.ra,
        });
    }

    Ok(metrics)
}

fn open(path: &Path) -> anyhow::Result<std::fs::File> {
    std::fs::File::open(path).with_context(|| format!("failed to open sheet {}", path.display()))
}

pub fn load_campaigns(path: &Path) -> anyhow::Result<Vec<CampaignDefinition>> {
    read_campaigns(open(path)?)
}

pub fn load_apps(path: &Path) -> anyhow::Result<Vec<AppDefinition>> {
    read_apps(open(path)?)
}

pub fn load_annual_metrics(path: &Path, current_year: i32) -> anyhow::Result<Vec<AnnualMetrics>> {
    read_annual_metrics(open(path)?, current_year)
}
