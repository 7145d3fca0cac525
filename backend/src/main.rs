//! Rebater CLI - run rebate transformers over a quarter of distributor files
//!
//! # Main Commands
//!
//! ```bash
//! rebater serve                          # Start HTTP server (port from settings)
//! rebater run --year 2024 --quarter 1    # Run every transformer, answering on stdin
//! rebater run --tag acme --ignore-questions
//! ```
//!
//! # Authoring Commands
//!
//! ```bash
//! rebater compile simple.json            # Show the advanced form of a simple transformer
//! rebater validate transformer.json      # Validate a definition against the schema
//! rebater compare actual.csv truth.csv   # Diff two rebate files
//! rebater operations                     # Show available DSL operations
//! ```

use clap::{Args, Parser, Subcommand};
use rebater::api::logs::log_info;
use rebater::logging::init_cli_logger;
use rebater::runner::discrepancies;
use rebater::{
    operations_description, parse_definition, validate_transformer, Answer, Question, RebateFile, RunEvent,
    RunReport, RunStatus, Runner, Settings, StoreItem, Time,
};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "rebater")]
#[command(about = "Transform distributor spreadsheets into rebate records", long_about = None)]
struct Cli {
    #[command(flatten)]
    options: GlobalOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalOptions {
    /// Settings file (default: rebater.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Data directory, overriding the settings file
    #[arg(short, long, global = true)]
    directory: Option<PathBuf>,

    /// Year to process
    #[arg(long, global = true)]
    year: Option<i32>,

    /// Quarter to process (1-4)
    #[arg(long, global = true)]
    quarter: Option<u8>,

    /// Only run transformers with this name (repeatable)
    #[arg(long = "name", global = true)]
    names: Vec<String>,

    /// Only run transformers carrying this tag (repeatable)
    #[arg(long = "tag", global = true)]
    tags: Vec<String>,

    /// Score the output against the truth files
    #[arg(long, global = true)]
    compare: bool,

    /// Also report suppliers only present in the truth files
    #[arg(long, global = true)]
    compare_all: bool,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start HTTP server
    Serve {
        /// Port to listen on (default: from settings)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Run the selected transformers for the quarter
    Run {
        /// Drop every row that needs an answer instead of asking
        #[arg(long)]
        ignore_questions: bool,
    },

    /// Compile a simple transformer and print its advanced form
    Compile {
        /// Definition file
        input: PathBuf,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate a transformer definition
    Validate {
        /// Definition file
        input: PathBuf,
    },

    /// Compare two rebate files
    Compare {
        /// Produced rebates
        actual: PathBuf,

        /// Expected rebates
        expected: PathBuf,

        /// Also report suppliers only present in the expected file
        #[arg(long)]
        all: bool,
    },

    /// Show available DSL operations
    Operations,
}

#[tokio::main]
async fn main() {
    // Load .env file (if present)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_cli_logger(cli.options.verbose);

    let result = match cli.command {
        Commands::Serve { port } => cmd_serve(&cli.options, port).await,
        Commands::Run { ignore_questions } => cmd_run(&cli.options, ignore_questions).await,
        Commands::Compile { input, output } => cmd_compile(&input, output.as_deref()),
        Commands::Validate { input } => cmd_validate(&input),
        Commands::Compare { actual, expected, all } => cmd_compare(&actual, &expected, all),
        Commands::Operations => cmd_operations(),
    };

    if let Err(e) = result {
        eprintln!("❌ Error: {}", e);
        std::process::exit(1);
    }
}

/// Settings file plus command-line overrides.
fn load_settings(options: &GlobalOptions) -> CliResult<Settings> {
    let path = options
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(rebater::config::DEFAULT_CONFIG_FILE));

    let mut settings = if path.exists() {
        Settings::from_file(&path)?
    } else if options.config.is_some() {
        return Err(format!("Settings file not found: {}", path.display()).into());
    } else {
        let directory = options
            .directory
            .clone()
            .ok_or("No settings file found; pass --config or --directory")?;
        let year = options.year.ok_or("--year is required without a settings file")?;
        let quarter = options.quarter.ok_or("--quarter is required without a settings file")?;
        let time = Time::new(year, quarter).ok_or_else(|| format!("Quarter {} is not between 1 and 4", quarter))?;
        Settings::new(directory, time)
    };

    if let Some(directory) = &options.directory {
        settings.directory = directory.clone();
    }
    if let Some(year) = options.year {
        settings.context.year = year;
    }
    if let Some(quarter) = options.quarter {
        settings.context.quarter = quarter;
    }
    if !options.names.is_empty() {
        settings.filter.names = options.names.clone();
    }
    if !options.tags.is_empty() {
        settings.filter.tags = options.tags.clone();
    }
    settings.testing.compare |= options.compare || options.compare_all;
    settings.testing.compare_all |= options.compare_all;

    settings.validate()?;
    Ok(settings)
}

async fn cmd_serve(options: &GlobalOptions, port: Option<u16>) -> CliResult<()> {
    let settings = load_settings(options)?;
    let port = port.unwrap_or(settings.server.port);

    let (runner, handle) = Runner::new(settings);
    runner.spawn();
    rebater::server::start_server(handle, port).await?;
    Ok(())
}

async fn cmd_run(options: &GlobalOptions, ignore_questions: bool) -> CliResult<()> {
    let settings = load_settings(options)?;
    eprintln!("📂 Data: {}", settings.directory.display());
    eprintln!("📅 Quarter: {}", settings.time()?);

    let (runner, handle) = Runner::new(settings);
    runner.spawn();

    let mut events = handle.subscribe();
    handle.start(None)?;
    if ignore_questions {
        handle.ignore_all()?;
    }

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let status = loop {
        match events.recv().await {
            Ok(RunEvent::Question(question)) => {
                let answer = ask(&question, &mut stdin).await?;
                handle.answer(answer)?;
            }
            Ok(RunEvent::Status(RunStatus::Running { progress })) => {
                eprintln!("   ⏳ {:>3.0}%", progress * 100.0);
            }
            Ok(RunEvent::Status(status)) if status.is_settled() => break status,
            Ok(RunEvent::Status(_)) => {}
            Err(RecvError::Lagged(skipped)) => log_info(format!("Skipped {} events", skipped)),
            Err(RecvError::Closed) => break handle.status(),
        }
    };

    match status {
        RunStatus::Done { report } => {
            print_report(&report);
            Ok(())
        }
        RunStatus::Error { message } => Err(message.into()),
        _ => {
            eprintln!("⏹️  Run stopped");
            Ok(())
        }
    }
}

/// Prompt for the unknown field of a question. An empty line ignores it.
async fn ask<R>(question: &Question, input: &mut tokio::io::Lines<R>) -> CliResult<Answer>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    eprintln!("\n❓ Table '{}' has no '{}' for:", question.table, question.unknown);
    for (field, value) in &question.known {
        eprintln!("     {} = {}", field, value);
    }
    if !question.suggestions.is_empty() {
        eprintln!("   Suggestions:");
        for suggestion in &question.suggestions {
            eprintln!("     - {}", suggestion);
        }
    }
    eprint!("   {} (empty to ignore): ", question.unknown);

    let line = input.next_line().await?.unwrap_or_default();
    let value = line.trim();
    if value.is_empty() {
        return Ok(Answer::ignore(&question.hash));
    }

    let mut record = question.known.clone();
    record.insert(question.unknown.clone(), value.to_string());
    Ok(Answer::with_record(&question.hash, record))
}

fn print_report(report: &RunReport) {
    eprintln!("\n{}", "=".repeat(70));
    eprintln!("📊 SUMMARY");
    eprintln!("{}", "=".repeat(70));

    for performance in &report.performance {
        eprintln!("   {:<30} {:>8} ms", performance.name, performance.millis());
    }

    if report.issues.is_empty() {
        eprintln!("   ✅ No issues");
    } else {
        for (kind, count) in report.issue_counts() {
            eprintln!("   ⚠️  {}: {}", kind, count);
        }
    }

    if let Some(discrepancies) = &report.discrepancy {
        eprintln!("\n🎯 Accuracy:");
        for d in discrepancies {
            eprintln!("   {:<20} match {:>5}  missing {:>5}  extra {:>5}", d.name, d.matched, d.take.len(), d.drop.len());
        }
    }

    if let Some(output) = &report.output {
        eprintln!("\n💾 Output: {}", output.display());
    }
    eprintln!("{}\n", "=".repeat(70));
}

fn cmd_compile(input: &Path, output: Option<&Path>) -> CliResult<()> {
    eprintln!("⚙️  Compiling: {}", input.display());

    let content = fs::read_to_string(input)?;
    let definition = parse_definition(&content)?;
    let transformer = definition.compile()?;
    eprintln!(
        "   {} properties, {} preprocess, {} postprocess",
        transformer.properties.len(),
        transformer.preprocess.len(),
        transformer.postprocess.len()
    );

    write_output(&transformer.to_json()?, output)
}

fn cmd_validate(input: &Path) -> CliResult<()> {
    eprintln!("✔️  Validating: {}", input.display());

    let content = fs::read_to_string(input)?;
    let value: Value = serde_json::from_str(&content)?;

    if let Err(errors) = validate_transformer(&value) {
        eprintln!("\n❌ {} schema error(s):", errors.len());
        for err in errors.iter().take(10) {
            eprintln!("   - {}", err);
        }
        std::process::exit(1);
    }

    let transformer = parse_definition(&content)?.compile()?;
    eprintln!("✅ '{}' is valid", transformer.name);
    Ok(())
}

fn read_rebates(path: &Path) -> CliResult<RebateFile> {
    let bytes = fs::read(path)?;
    Ok(RebateFile::deserialize(path, &bytes)?)
}

fn cmd_compare(actual: &Path, expected: &Path, all: bool) -> CliResult<()> {
    let actual = read_rebates(actual)?;
    let expected = read_rebates(expected)?;
    eprintln!("🎯 Comparing {} produced against {} expected rebates", actual.rebates().len(), expected.rebates().len());

    let report = discrepancies(actual.rebates().to_vec(), expected.rebates().to_vec(), all);
    for d in &report {
        eprintln!("   {:<20} match {:>5}  missing {:>5}  extra {:>5}", d.name, d.matched, d.take.len(), d.drop.len());
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn cmd_operations() -> CliResult<()> {
    println!("{}", operations_description());
    Ok(())
}

fn write_output(content: &str, path: Option<&Path>) -> CliResult<()> {
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
