use anyhow::Result;
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use mopsagent::analytics::display::{max_visits, text_bar, ChartEntry};
use mopsagent::analytics::{AggregationWindow, VisitAggregator, VisitStats};
use mopsagent::config::Config;
use mopsagent::connect_storage;
use mopsagent::signup::SignupService;
use tracing_subscriber::EnvFilter;

const BAR_WIDTH: usize = 30;

#[derive(Parser)]
#[command(name = "mopsagent-admin")]
#[command(about = "MopsAgent admin CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the visit report for a trailing window
    Stats {
        /// Window length in days
        #[arg(long, default_value_t = 7, value_parser = clap::value_parser!(u32).range(1..=366))]
        days: u32,
        /// Bucket days in UTC instead of the local time zone
        #[arg(long)]
        utc: bool,
        /// Print the raw stats as JSON
        #[arg(long)]
        json: bool,
    },
    /// List launch-list signups, newest first
    Signups {
        #[arg(long, default_value_t = 50)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },
    /// Add an email to the launch list
    AddSignup {
        email: String,
        #[arg(long, default_value = "admin")]
        source: String,
    },
}

fn print_section<T: ChartEntry>(title: &str, entries: &[T]) {
    println!("\n{title}");
    println!("{}", "-".repeat(80));
    if entries.is_empty() {
        println!("  (none)");
        return;
    }

    let max = max_visits(entries);
    for entry in entries {
        println!(
            "  {:<50} {} {}",
            entry.label(),
            text_bar(entry.visits(), max, BAR_WIDTH),
            entry.visits()
        );
    }
}

fn print_report(window: AggregationWindow, stats: &VisitStats) {
    println!("Visits over the last {} days", window.days());
    if stats.is_empty() {
        println!("  No visits recorded yet.");
        return;
    }

    println!("  Total visits:    {}", stats.total_visits);
    println!("  Unique visitors: {}", stats.unique_visitors);
    if stats.unparsed_timestamps > 0 {
        println!(
            "  ({} visits with unreadable timestamps are not in the daily series)",
            stats.unparsed_timestamps
        );
    }

    print_section("Daily visits", &stats.daily_visits);
    print_section("Top countries", &stats.top_countries);
    print_section("Top referrers", &stats.top_referrers);
}

fn aggregate<Tz: TimeZone>(
    aggregator: VisitAggregator<Tz>,
    records: &[mopsagent::models::VisitRecord],
    window: AggregationWindow,
) -> VisitStats {
    aggregator.aggregate(records, window.days())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let storage = connect_storage(&config).await?;

    match cli.command {
        Commands::Stats { days, utc, json } => {
            let window = AggregationWindow::last_days(days);
            let records = storage.visits_since(window.start(Utc::now())).await?;

            let stats = if utc {
                aggregate(VisitAggregator::with_time_zone(Utc), &records, window)
            } else {
                aggregate(VisitAggregator::new(), &records, window)
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_report(window, &stats);
            }
        }
        Commands::Signups { limit, offset } => {
            let signups = storage.list_signups(limit, offset).await?;
            if signups.is_empty() {
                println!("No signups found.");
            } else {
                println!("{:<40} {:<15} {}", "Email", "Source", "Signed up");
                println!("{}", "-".repeat(80));
                for signup in signups {
                    let when = Utc
                        .timestamp_opt(signup.created_at, 0)
                        .single()
                        .map(|ts| ts.to_rfc3339())
                        .unwrap_or_else(|| signup.created_at.to_string());
                    println!("{:<40} {:<15} {}", signup.email, signup.source, when);
                }
            }
        }
        Commands::AddSignup { email, source } => {
            let service = SignupService::new(storage);
            let signup = service.sign_up(&email, Some(&source)).await?;
            println!("✓ Added '{}' ({})", signup.email, signup.source);
        }
    }

    Ok(())
}
