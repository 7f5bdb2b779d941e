use std::fmt;

use chrono::NaiveDate;
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct UserProgressRecord {
    pub user_id: String,
    pub acquisition_date: NaiveDate,
    pub max_level_date: NaiveDate,
    pub max_level: i32,
    pub country: String,
    pub app_id: String,
}

/// Country scope of a campaign. The sheet uses the literal "All" for no filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CountryFilter {
    All,
    Only(String),
}

impl CountryFilter {
    /// `None` for a blank cell; only the literal "All" disables the filter.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "" => None,
            "All" => Some(CountryFilter::All),
            country => Some(CountryFilter::Only(country.to_string())),
        }
    }

    pub fn matches(&self, country: &str) -> bool {
        match self {
            CountryFilter::All => true,
            CountryFilter::Only(expected) => expected == country,
        }
    }
}

impl fmt::Display for CountryFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CountryFilter::All => write!(f, "All"),
            CountryFilter::Only(country) => write!(f, "{country}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CampaignDefinition {
    pub name: String,
    pub language: String,
    pub country: CountryFilter,
    pub start_date: NaiveDate,
    /// Inclusive, already shifted to the end of the sheet's month.
    pub end_date: NaiveDate,
    pub total_cost: f64,
}

#[derive(Debug, Clone)]
pub struct AppDefinition {
    pub app_id: String,
    pub language: String,
    /// `None` when the sheet leaves it blank or zero.
    pub total_levels: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnnualMetrics {
    pub year: i32,
    pub la: u64,
    pub ra: f64,
}

/// Learners acquired on one point of a campaign's timeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LaPoint<K> {
    pub campaign: String,
    pub at: K,
    pub count: u64,
}

pub type DailyLaSeries = Vec<LaPoint<NaiveDate>>;

/// Series keyed by day since the campaign's first observed day (1-based).
pub type NormalizedLaSeries = Vec<LaPoint<u32>>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RollingPoint<K> {
    pub campaign: String,
    pub at: K,
    pub count: u64,
    pub mean: Option<f64>,
}

/// One of the ten progress buckets, labelled 0.1 through 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(into = "f64")]
pub struct Decile(u8);

impl Decile {
    pub const COUNT: u8 = 10;

    #[cfg(test)]
    pub fn from_step(step: u8) -> Option<Self> {
        (1..=Self::COUNT).contains(&step).then_some(Decile(step))
    }

    /// Half-open buckets: `[0.0, 0.1)` is 0.1, ..., `[0.8, 0.9)` is 0.9.
    ///
    /// Everything at or above 0.9 lands in 1.0, including ratios above 1.0
    /// from users whose max level exceeds the app's level count.
    pub fn for_ratio(ratio: f64) -> Self {
        let step = (1..Self::COUNT)
            .find(|step| ratio < f64::from(*step) / 10.0)
            .unwrap_or(Self::COUNT);
        Decile(step)
    }

    pub fn label(self) -> f64 {
        f64::from(self.0) / 10.0
    }
}

impl From<Decile> for f64 {
    fn from(decile: Decile) -> f64 {
        decile.label()
    }
}

impl fmt::Display for Decile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}", self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecileBucketRow {
    pub campaign: String,
    pub decile: Decile,
    pub learner_count: u64,
    pub mean_progress_ratio: f64,
    pub la_share: f64,
    pub rac: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CampaignMetrics {
    pub campaign: String,
    pub la: u64,
    pub lac: Option<f64>,
    pub ra: Option<f64>,
    pub rac: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CountryLa {
    pub country: String,
    pub la: u64,
}
