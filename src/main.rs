use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use indicatif::HumanDuration;
use tracing::info;

use felix_export::assemble::{export_all, Assembler, Pipeline};
use felix_export::config::Settings;
use felix_export::db::SqliteSource;
use felix_export::export;
use felix_export::source::ArticleSource;

#[derive(Parser)]
#[command(name = "felix_export", about = "Export Felix Online articles to a Ghost import file")]
struct Cli {
    /// Settings file (default: felix-export.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// SQLite copy of the legacy database
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Canonical site origin; links under it are made relative
    #[arg(long, global = true)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Assemble every published article and write the Ghost import JSON
    Export {
        /// Output file
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Articles assembled at once
        #[arg(short = 'j', long)]
        concurrency: Option<usize>,
    },
    /// Print one article's sanitized body
    Render {
        article_id: i64,
    },
    /// Show article and block counts
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        settings.db_path = db;
    }
    if let Some(base_url) = cli.base_url {
        settings.base_url = base_url;
    }

    let source = SqliteSource::open(&settings.db_path)?;

    let result = match cli.command {
        Commands::Export {
            output,
            concurrency,
        } => {
            let output = output.unwrap_or_else(|| settings.output.clone());
            let concurrency = concurrency.unwrap_or(settings.concurrency);

            let assembler = Arc::new(Assembler::new(
                Pipeline::new(settings.base_url.clone()),
                settings.default_author.clone().into(),
            ));
            let source: Arc<dyn ArticleSource> = Arc::new(source);
            let report = export_all(assembler, source, concurrency).await?;

            let file = export::build(&report.posts, chrono::Utc::now());
            export::write(&output, &file)?;
            info!("Wrote {:?}", output);
            println!(
                "Exported {} posts to {} ({} articles skipped).",
                report.posts.len(),
                output.display(),
                report.failures.len()
            );
            Ok(())
        }
        Commands::Render { article_id } => {
            let pipeline = Pipeline::new(settings.base_url.clone());
            let records = source.blocks(article_id).await?;
            if records.is_empty() {
                println!("Article {} has no blocks.", article_id);
                return Ok(());
            }
            let html = pipeline
                .transform(records, &source)
                .await
                .with_context(|| format!("Article {} could not be rendered", article_id))?;
            println!("{}", html);
            Ok(())
        }
        Commands::Stats => {
            let s = source.stats()?;
            println!("Articles:  {}", s.articles);
            println!("Blocks:");
            for (tag, count) in &s.blocks {
                println!("  {:<12} {:>7}", tag, count);
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", HumanDuration(elapsed));
    }

    result
}
