//! Cardwatch CLI - ingest card transaction files and explore the results
//!
//! # Main Commands
//!
//! ```bash
//! cardwatch ingest march.xlsx          # Classify and store a file
//! cardwatch ingest march.csv --dry-run # Classify only, print JSON
//! cardwatch summary --risk "High Risk" # Metrics over stored rows
//! cardwatch export -o flagged.csv      # Download stored rows as CSV
//! cardwatch serve                      # Start HTTP server (port 3000)
//! ```
//!
//! # Setup / Debug Commands
//!
//! ```bash
//! cardwatch init-config                # Write the default cardwatch.toml
//! cardwatch parse input.csv            # Just parse a file to JSON
//! ```

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use cardwatch::dashboard::{self, DashboardSummary, Filter};
use cardwatch::models::RiskLevel;
use cardwatch::parser::load_file_with_delimiter;
use cardwatch::pipeline::{format_delimiter, ingest_file, store_report};
use cardwatch::{AppConfig, TransactionStore};

#[derive(Parser)]
#[command(name = "cardwatch")]
#[command(about = "Ingest card transaction files, tier them by risk and persist them", long_about = None)]
struct Cli {
    /// Configuration file (default: $CARDWATCH_CONFIG or ./cardwatch.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a CSV or spreadsheet file and output raw JSON records
    Parse {
        /// Input file
        input: PathBuf,

        /// CSV delimiter (auto-detect if not specified)
        #[arg(short, long)]
        delimiter: Option<char>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Full pipeline: standardize → clean → classify → store
    Ingest {
        /// Input file (.csv, .txt, .xlsx, .xlsm, .xls, .ods)
        input: PathBuf,

        /// Classify without writing to the database
        #[arg(long)]
        dry_run: bool,

        /// Write classified rows as JSON to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show metrics and breakdowns over stored transactions
    Summary {
        #[command(flatten)]
        filter: FilterArgs,

        /// Print the full summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Export stored transactions as CSV
    Export {
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Start HTTP server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,
    },

    /// Write the built-in configuration to a file
    InitConfig {
        /// Destination (default: cardwatch.toml)
        #[arg(short, long, default_value = "cardwatch.toml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args, Debug, Default)]
struct FilterArgs {
    /// Only this customer id
    #[arg(long)]
    customer: Option<String>,

    /// Only this risk level ("Normal", "Medium Risk", "High Risk")
    #[arg(long)]
    risk: Option<RiskLevel>,

    /// Only this channel
    #[arg(long)]
    channel: Option<String>,

    /// Only this city
    #[arg(long)]
    city: Option<String>,

    /// Earliest transaction date (YYYY-MM-DD)
    #[arg(long)]
    from: Option<NaiveDate>,

    /// Latest transaction date (YYYY-MM-DD)
    #[arg(long)]
    to: Option<NaiveDate>,

    /// Case-insensitive pattern over customer, city and channel
    #[arg(short, long)]
    search: Option<String>,
}

impl From<FilterArgs> for Filter {
    fn from(args: FilterArgs) -> Self {
        Filter {
            customer: args.customer,
            risk: args.risk,
            channel: args.channel,
            city: args.city,
            from: args.from,
            to: args.to,
            search: args.search,
        }
    }
}

#[tokio::main]
async fn main() {
    // Load .env file (if present)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    let result = match cli.command {
        Commands::Parse {
            input,
            delimiter,
            output,
        } => cmd_parse(&input, delimiter, output.as_deref()),

        Commands::Ingest {
            input,
            dry_run,
            output,
        } => cmd_ingest(config_path, &input, dry_run, output.as_deref()).await,

        Commands::Summary { filter, json } => cmd_summary(config_path, filter.into(), json).await,

        Commands::Export { output, filter } => {
            cmd_export(config_path, filter.into(), output.as_deref()).await
        }

        Commands::Serve { port } => cmd_serve(config_path, port).await,

        Commands::InitConfig { output, force } => cmd_init_config(&output, force),
    };

    if let Err(e) = result {
        eprintln!("❌ Error: {}", e);
        std::process::exit(1);
    }
}

fn cmd_parse(
    input: &Path,
    delimiter: Option<char>,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("📄 Parsing: {}", input.display());

    let table = load_file_with_delimiter(input, delimiter)?;
    if delimiter.is_some() && table.delimiter.is_none() {
        eprintln!("⚠️  --delimiter ignored for spreadsheets");
    }

    if let Some(ref encoding) = table.encoding {
        eprintln!("   Encoding: {}", encoding);
    }
    if let Some(d) = table.delimiter {
        eprintln!(
            "   Delimiter: '{}'{}",
            format_delimiter(d),
            if delimiter.is_none() { " (auto-detected)" } else { "" }
        );
    }
    if let Some(ref sheet) = table.sheet {
        eprintln!("   Sheet: {}", sheet);
    }
    eprintln!("   Columns: {}", table.headers.join(", "));
    eprintln!("✅ Parsed {} records", table.len());

    let json = serde_json::to_string_pretty(&table.records())?;
    write_output(&json, output)?;

    Ok(())
}

async fn cmd_ingest(
    config_path: Option<&Path>,
    input: &Path,
    dry_run: bool,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load_default(config_path)?;
    eprintln!("📄 Processing: {}", input.display());

    let report = ingest_file(input, &config)?;

    eprintln!("   Rows read: {}", report.rows_read());
    eprintln!("   Rows dropped: {}", report.rows_dropped());
    for (level, count) in report.risk_counts() {
        eprintln!("   {}: {}", level, count);
    }

    if let Some(path) = output {
        let json = serde_json::to_string_pretty(&report.transactions)?;
        write_output(&json, Some(path))?;
    } else if dry_run {
        let json = serde_json::to_string_pretty(&report.transactions)?;
        write_output(&json, None)?;
    }

    if dry_run {
        eprintln!("\n🔍 Dry run: nothing written to the database");
        return Ok(());
    }

    let store = TransactionStore::connect(&config.database).await?;
    let receipt = store_report(&store, &report).await?;
    eprintln!(
        "\n💾 Stored {} rows from {} (batch {})",
        receipt.rows, receipt.source_file, receipt.batch_id
    );
    eprintln!("✨ Done!");
    Ok(())
}

async fn cmd_summary(
    config_path: Option<&Path>,
    filter: Filter,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load_default(config_path)?;
    let store = TransactionStore::connect(&config.database).await?;
    let rows = store.latest().await?;
    let summary = DashboardSummary::build(&rows, &filter);

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    let m = &summary.metrics;
    println!("📊 Transactions: {}", m.total_transactions);
    println!("   Total amount: {:.2}", m.total_amount);
    println!("   Normal:       {}", m.normal);
    println!("   Medium Risk:  {}", m.medium_risk);
    println!("   High Risk:    {}", m.high_risk);

    if !summary.by_year.is_empty() {
        println!("\n📅 By year:");
        for c in &summary.by_year {
            println!("   {}: {}", c.key, c.count);
        }
    }
    if !summary.top_cities.is_empty() {
        println!("\n🏙️  Top cities:");
        for c in &summary.top_cities {
            println!("   {}: {}", c.key, c.count);
        }
    }
    if !summary.by_channel.is_empty() {
        println!("\n💳 Channels:");
        for c in &summary.by_channel {
            println!("   {}: {}", c.key, c.count);
        }
    }

    Ok(())
}

async fn cmd_export(
    config_path: Option<&Path>,
    filter: Filter,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load_default(config_path)?;
    let store = TransactionStore::connect(&config.database).await?;
    let rows = filter.apply(&store.latest().await?);
    let bytes = dashboard::to_csv(&rows)?;

    match output {
        Some(p) => {
            fs::write(p, &bytes)?;
            eprintln!("💾 {} rows written to: {}", rows.len(), p.display());
        }
        None => {
            use std::io::Write;
            std::io::stdout().write_all(&bytes)?;
        }
    }
    Ok(())
}

async fn cmd_serve(config_path: Option<&Path>, port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load_default(config_path)?;
    cardwatch::server::start_server(config, port).await
}

fn cmd_init_config(output: &Path, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    if output.exists() && !force {
        return Err(format!("{} already exists (use --force to overwrite)", output.display()).into());
    }
    fs::write(output, AppConfig::default().to_toml()?)?;
    eprintln!("✅ Default configuration written to: {}", output.display());
    Ok(())
}

fn write_output(content: &str, path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    match path {
        Some(p) => {
            fs::write(p, content)?;
            eprintln!("💾 Output written to: {}", p.display());
        }
        None => {
            println!("{}", content);
        }
    }
    Ok(())
}
