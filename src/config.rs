use std::path::PathBuf;

use anyhow::Context;

/// Spreadsheet exports the reports read campaign and app metadata from.
#[derive(Debug, Clone, clap::Args)]
pub struct SheetPaths {
    /// Campaign sheet (Campaign Name, Language, Country, Start Date, End Date, Total Cost (USD));
    /// dates as YYYY-MM-DD or M/D/YYYY
    #[arg(long, env = "LA_CAMPAIGNS_CSV", default_value = "sheets/campaigns.csv")]
    pub campaigns: PathBuf,
    /// App sheet (app_id, language, total_lvls, ...)
    #[arg(long, env = "LA_APPS_CSV", default_value = "sheets/apps.csv")]
    pub apps: PathBuf,
    /// Annual metrics sheet (year, la, ra)
    #[arg(long, env = "LA_ANNUAL_METRICS_CSV", default_value = "sheets/annual_metrics.csv")]
    pub annual_metrics: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub max_connections: u32,
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|url| !url.is_empty())
            .context("DATABASE_URL must be set to the learner progress warehouse")?;
        let max_connections = match lookup("LA_REPORT_MAX_CONNECTIONS") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("LA_REPORT_MAX_CONNECTIONS is not a number: {raw}"))?,
            None => 5,
        };

        Ok(Self {
            database_url,
            max_connections,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_pool_size() {
        let settings =
            Settings::from_lookup(lookup_from(&[("DATABASE_URL", "postgres://warehouse/la")]))
                .unwrap();
        assert_eq!(settings.database_url, "postgres://warehouse/la");
        assert_eq!(settings.max_connections, 5);
    }

    #[test]
    fn requires_database_url() {
        assert!(Settings::from_lookup(lookup_from(&[])).is_err());
        assert!(Settings::from_lookup(lookup_from(&[("DATABASE_URL", "")])).is_err());
    }

    #[test]
    fn rejects_bad_pool_size() {
        let result = Settings::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://warehouse/la"),
            ("LA_REPORT_MAX_CONNECTIONS", "many"),
        ]));
        assert!(result.is_err());
    }
}
