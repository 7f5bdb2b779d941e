use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{Datelike, Utc};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cohort;
mod config;
mod db;
mod decile;
mod error;
mod models;
mod report;
mod series;
mod sheets;
mod summary;

use crate::config::{SheetPaths, Settings};
use crate::report::{Timeline, TimelineView};
use crate::series::RollingWindow;

#[derive(Parser)]
#[command(name = "la-report")]
#[command(about = "Learner and reading acquisition reports for literacy app campaigns", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ViewArgs {
    /// Rolling mean applied to daily LA
    #[arg(long, value_enum, default_value_t = RollingWindow::Daily)]
    window: RollingWindow,
    /// Align series on days since their first acquisition
    #[arg(long)]
    normalized: bool,
}

impl From<ViewArgs> for TimelineView {
    fn from(args: ViewArgs) -> Self {
        TimelineView {
            window: args.window,
            normalized: args.normalized,
        }
    }
}

#[derive(Args)]
struct OutputArgs {
    #[arg(long, default_value = "report.md")]
    out: PathBuf,
    /// Also write the LA timeline as CSV
    #[arg(long)]
    series_out: Option<PathBuf>,
    /// Also write the computed report data as JSON
    #[arg(long)]
    json_out: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the warehouse schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import learner progress from a warehouse CSV export
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Annual summary across acquisition years
    Annual {
        /// Year to include; repeat for several (default: every year in the sheet)
        #[arg(long = "year")]
        years: Vec<i32>,
        #[command(flatten)]
        view: ViewArgs,
        #[command(flatten)]
        sheets: SheetPaths,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Campaign comparison details
    Compare {
        /// Campaign name; repeat for several (default: every campaign in the sheet)
        #[arg(long = "campaign")]
        campaigns: Vec<String>,
        #[command(flatten)]
        view: ViewArgs,
        #[command(flatten)]
        sheets: SheetPaths,
        #[command(flatten)]
        output: OutputArgs,
    },
}

fn write_outputs<T: Serialize>(
    output: &OutputArgs,
    markdown: String,
    timeline: &Timeline,
    data: &T,
) -> anyhow::Result<()> {
    std::fs::write(&output.out, markdown)
        .with_context(|| format!("failed to write {}", output.out.display()))?;
    println!("Report written to {}.", output.out.display());

    if let Some(path) = &output.series_out {
        let file = create(path)?;
        timeline.write_csv(file)?;
        println!("Series written to {}.", path.display());
    }

    if let Some(path) = &output.json_out {
        let file = create(path)?;
        serde_json::to_writer_pretty(file, data)?;
        println!("Report data written to {}.", path.display());
    }

    Ok(())
}

fn create(path: &Path) -> anyhow::Result<std::fs::File> {
    std::fs::File::create(path).with_context(|| format!("failed to create {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "la_report=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let settings = Settings::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .connect(&settings.database_url)
        .await
        .context("failed to connect to the learner progress warehouse")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let written = db::import_csv(&pool, &csv).await?;
            println!("Stored {written} learner rows from {}.", csv.display());
        }
        Commands::Annual {
            years,
            view,
            sheets: sheet_paths,
            output,
        } => {
            let current_year = Utc::now().date_naive().year();
            let sheet = sheets::load_annual_metrics(&sheet_paths.annual_metrics, current_year)?;
            let years = report::select_years(&years, &sheet)?;
            let apps = sheets::load_apps(&sheet_paths.apps)?;

            let users = match report::annual_window(&years) {
                Some((from, to)) => db::fetch_user_progress(&pool, from, to).await?,
                None => Vec::new(),
            };

            let annual = report::build_annual_report(years, &apps, &users, view.into())?;
            write_outputs(&output, report::render_annual(&annual), &annual.timeline, &annual)?;
        }
        Commands::Compare {
            campaigns,
            view,
            sheets: sheet_paths,
            output,
        } => {
            let definitions = sheets::load_campaigns(&sheet_paths.campaigns)?;
            let apps = sheets::load_apps(&sheet_paths.apps)?;
            let selected = report::select_campaigns(&campaigns, &definitions)?;

            let users = match report::campaign_window(&selected) {
                Some((from, to)) => db::fetch_user_progress(&pool, from, to).await?,
                None => Vec::new(),
            };

            let comparison = report::build_comparison_report(
                &selected,
                &definitions,
                &apps,
                &users,
                view.into(),
            )?;
            write_outputs(
                &output,
                report::render_comparison(&comparison),
                &comparison.timeline,
                &comparison,
            )?;
        }
    }

    Ok(())
}
