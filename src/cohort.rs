use std::collections::{BTreeMap, HashMap};

use chrono::{Datelike, NaiveDate};

use crate::error::{CoreError, CoreResult};
use crate::models::{
    AppDefinition, CampaignDefinition, CountryLa, DailyLaSeries, LaPoint, UserProgressRecord,
};

/// Learners attributed to one report series (a campaign or a year).
#[derive(Debug, Clone)]
pub struct Cohort<'a> {
    pub name: String,
    pub users: Vec<&'a UserProgressRecord>,
}

#[derive(Debug, Clone)]
pub struct CampaignCohort<'a> {
    pub campaign: &'a CampaignDefinition,
    pub app: &'a AppDefinition,
    pub cohort: Cohort<'a>,
}

impl CampaignCohort<'_> {
    pub fn total_levels(&self) -> CoreResult<f64> {
        self.app
            .total_levels
            .filter(|levels| *levels > 0)
            .map(f64::from)
            .ok_or_else(|| {
                CoreError::InvalidConfiguration(format!(
                    "app {} for campaign {} has no known level count",
                    self.app.app_id, self.campaign.name
                ))
            })
    }
}

fn app_for_language<'a>(
    apps: &'a [AppDefinition],
    campaign: &CampaignDefinition,
) -> CoreResult<&'a AppDefinition> {
    let mut matching = apps.iter().filter(|app| app.language == campaign.language);
    match (matching.next(), matching.next()) {
        (Some(app), None) => Ok(app),
        (None, _) => Err(CoreError::InvalidConfiguration(format!(
            "no app for language {} of campaign {}",
            campaign.language, campaign.name
        ))),
        (Some(_), Some(_)) => Err(CoreError::InvalidConfiguration(format!(
            "several apps for language {} of campaign {}",
            campaign.language, campaign.name
        ))),
    }
}

/// Attributes learners to each selected campaign.
///
/// A learner belongs to a campaign when they were acquired inside the
/// campaign's inclusive date window, on the campaign language's app, and in
/// the campaign's country unless it targets all countries. Overlapping
/// campaigns may share learners.
pub fn assign_campaign_cohorts<'a>(
    selected: &[String],
    campaigns: &'a [CampaignDefinition],
    apps: &'a [AppDefinition],
    users: &'a [UserProgressRecord],
) -> CoreResult<Vec<CampaignCohort<'a>>> {
    let mut cohorts = Vec::with_capacity(selected.len());

    for name in selected {
        let campaign = campaigns
            .iter()
            .find(|campaign| &campaign.name == name)
            .ok_or_else(|| CoreError::InvalidConfiguration(format!("unknown campaign {name}")))?;
        let app = app_for_language(apps, campaign)?;

        let members: Vec<&UserProgressRecord> = users
            .iter()
            .filter(|user| {
                user.acquisition_date >= campaign.start_date
                    && user.acquisition_date <= campaign.end_date
                    && user.app_id == app.app_id
                    && campaign.country.matches(&user.country)
            })
            .collect();

        tracing::info!(
            campaign = %campaign.name,
            app_id = %app.app_id,
            learners = members.len(),
            "assigned campaign cohort"
        );

        cohorts.push(CampaignCohort {
            campaign,
            app,
            cohort: Cohort {
                name: campaign.name.clone(),
                users: members,
            },
        });
    }

    Ok(cohorts)
}

/// One cohort per selected year, by acquisition year.
pub fn assign_annual_cohorts<'a>(years: &[i32], users: &'a [UserProgressRecord]) -> Vec<Cohort<'a>> {
    let mut sorted = years.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut by_year: HashMap<i32, Vec<&UserProgressRecord>> = HashMap::new();
    for user in users {
        let year = user.acquisition_date.year();
        if sorted.binary_search(&year).is_ok() {
            by_year.entry(year).or_default().push(user);
        }
    }

    sorted
        .into_iter()
        .map(|year| Cohort {
            name: year.to_string(),
            users: by_year.remove(&year).unwrap_or_default(),
        })
        .collect()
}

/// Learners acquired per cohort per observed day, sorted by cohort then date.
pub fn daily_la(cohorts: &[Cohort<'_>]) -> DailyLaSeries {
    let mut counts: BTreeMap<(&str, NaiveDate), u64> = BTreeMap::new();
    for cohort in cohorts {
        for user in &cohort.users {
            *counts
                .entry((cohort.name.as_str(), user.acquisition_date))
                .or_insert(0) += 1;
        }
    }

    counts
        .into_iter()
        .map(|((campaign, at), count)| LaPoint {
            campaign: campaign.to_string(),
            at,
            count,
        })
        .collect()
}

/// Learners per country across all cohorts, largest first.
pub fn la_by_country(cohorts: &[Cohort<'_>]) -> Vec<CountryLa> {
    let mut counts: HashMap<&str, u64> = HashMap::new();
    for user in cohorts.iter().flat_map(|cohort| cohort.users.iter()) {
        *counts.entry(user.country.as_str()).or_insert(0) += 1;
    }

    let mut rows: Vec<CountryLa> = counts
        .into_iter()
        .map(|(country, la)| CountryLa {
            country: country.to_string(),
            la,
        })
        .collect();
    rows.sort_by(|a, b| b.la.cmp(&a.la).then_with(|| a.country.cmp(&b.country)));
    rows
}
