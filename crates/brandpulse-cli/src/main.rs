use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use brandpulse_ingest::{FetchParams, Pipeline, Source};

#[derive(Debug, Parser)]
#[command(name = "brandpulse-cli")]
#[command(about = "BrandPulse ingestion command line interface")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one ingest fetch for a source and print the run summary as JSON.
    Fetch {
        /// Source to poll: reddit, cfpb, glassdoor, twitter, trends, or all.
        source: String,
        /// Rewind to the full lookback window with larger pages.
        #[arg(long)]
        initial: bool,
        /// Explicit scan start date (YYYY-MM-DD, midnight UTC).
        #[arg(long)]
        since_date: Option<NaiveDate>,
        /// Per-request page size cap.
        #[arg(long)]
        limit: Option<usize>,
        /// Restrict the run to these brand ids.
        #[arg(long, value_delimiter = ',')]
        brands: Option<Vec<String>>,
        /// Override the configured subreddit list (Reddit only).
        #[arg(long, value_delimiter = ',')]
        subreddits: Option<Vec<String>>,
    },
    /// Apply pending database migrations and exit.
    Migrate,
    /// Print the newest cursor rows for a state key.
    State {
        /// State key, e.g. `reddit_wallstreetbets`.
        source: String,
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },
    /// Print recent ingest runs.
    Runs {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = brandpulse_core::load_app_config()?;
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    let pool_config = brandpulse_db::PoolConfig {
        max_connections: config.db_max_connections,
        min_connections: config.db_min_connections,
        acquire_timeout_secs: config.db_acquire_timeout_secs,
    };
    let pool = brandpulse_db::connect_pool(&config.database_url, pool_config).await?;

    match cli.command {
        Commands::Migrate => {
            brandpulse_db::run_migrations(&pool).await?;
            println!("migrations applied");
        }
        Commands::Fetch {
            source,
            initial,
            since_date,
            limit,
            brands,
            subreddits,
        } => {
            brandpulse_db::run_migrations(&pool).await?;
            let brands_file = brandpulse_core::load_brands(&config.brands_path)?;
            let pipeline = Pipeline::new(config, brands_file, pool)
                .map_err(|e| anyhow::anyhow!("failed to build pipeline: {e}"))?;
            let params = FetchParams {
                date: None,
                since_date,
                limit,
                initial_fetch: initial,
                subreddits,
                brands,
            };

            let sources: Vec<Source> = if source == "all" {
                Source::ALL.to_vec()
            } else {
                vec![source.parse()?]
            };

            let mut failed = false;
            for source in sources {
                match pipeline.run(source, "cli", params.clone()).await {
                    Ok(summary) => println!("{}", serde_json::to_string_pretty(&summary)?),
                    Err(e) => {
                        failed = true;
                        tracing::error!(source = %source, error = %e, transient = e.is_transient(), "fetch run failed");
                    }
                }
            }
            if failed {
                anyhow::bail!("one or more fetch runs failed");
            }
        }
        Commands::State { source, limit } => {
            let rows = brandpulse_db::cursor::list_states(&pool, &source, limit).await?;
            if rows.is_empty() {
                println!("no cursor state for '{source}'");
            }
            for row in rows {
                println!(
                    "{}  cursor={}  tie_breaker={}",
                    row.updated_at.to_rfc3339(),
                    row.cursor_iso.as_deref().unwrap_or("-"),
                    row.tie_breaker_id.as_deref().unwrap_or("-"),
                );
            }
        }
        Commands::Runs { limit } => {
            let rows = brandpulse_db::ingest_runs::list_ingest_runs(&pool, limit).await?;
            for row in rows {
                println!(
                    "{}  {:<9} {:<9} records={:<6} files={:<3} {}",
                    row.created_at.to_rfc3339(),
                    row.source,
                    row.status,
                    row.records_emitted,
                    row.files_written,
                    row.error_message.as_deref().unwrap_or(""),
                );
            }
        }
    }

    Ok(())
}
