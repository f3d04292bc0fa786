use std::io;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, CommandFactory, Parser, Subcommand};
use emojitool_core::config::{ToolConfig, load_config};
use emojitool_core::probe::{
    compare_deployments, print_scope_matrix, run_live_flow, validate_metadata,
};
use emojitool_core::registry::{
    add_custom_emoji, colliding_names, register_assets, scan_assets, seed_defaults,
};
use emojitool_core::runtime::{
    PathOverrides, ResolutionContext, ResolvedPaths, inspect_runtime, normalize_for_display,
    resolve_paths,
};
use emojitool_core::scraper::scrape;
use emojitool_core::store::{count_records, list_records, open_existing, open_read_only};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "emojitool",
    version,
    about = "Custom emoji maintenance for the status app: register, scrape, probe"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    emoji_dir: Option<PathBuf>,
    #[arg(long = "db", global = true, value_name = "PATH")]
    db_path: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    emoji_dir: Option<PathBuf>,
    db_path: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            emoji_dir: cli.emoji_dir.clone(),
            db_path: cli.db_path.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Show resolved paths and what exists on disk")]
    Status,
    #[command(about = "Register every image in the emoji directory")]
    Register(RegisterArgs),
    #[command(about = "Insert the built-in custom emoji list")]
    Seed,
    #[command(about = "Add a single custom emoji record")]
    Add(AddArgs),
    #[command(about = "List registered emoji records")]
    List,
    #[command(about = "Download gallery images into the emoji directory")]
    Scrape,
    #[command(about = "OAuth scope diagnostics")]
    Probe(ProbeArgs),
}

#[derive(Debug, Args)]
struct RegisterArgs {
    #[arg(long, value_name = "NAME", help = "Category for new records")]
    category: Option<String>,
}

#[derive(Debug, Args)]
struct AddArgs {
    name: String,
    filename: String,
    #[arg(long, value_name = "TEXT")]
    alt_text: Option<String>,
    #[arg(long, value_name = "NAME")]
    category: Option<String>,
}

#[derive(Debug, Args)]
struct ProbeArgs {
    #[command(subcommand)]
    command: ProbeSubcommand,
}

#[derive(Debug, Subcommand)]
enum ProbeSubcommand {
    #[command(about = "Print scope permutations with their client metadata")]
    Matrix,
    #[command(about = "Compare production and preview metadata scopes")]
    Compare,
    #[command(about = "Walk through what the authorization server sees")]
    Validate { url: Option<String> },
    #[command(about = "Run the authorize/token flow with an app password")]
    Live { handle: String, password: String },
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Status) => run_status(&runtime),
        Some(Commands::Register(args)) => run_register(&runtime, args),
        Some(Commands::Seed) => run_seed(&runtime),
        Some(Commands::Add(args)) => run_add(&runtime, args),
        Some(Commands::List) => run_list(&runtime),
        Some(Commands::Scrape) => run_scrape(&runtime),
        Some(Commands::Probe(ProbeArgs { command })) => match command {
            ProbeSubcommand::Matrix => run_probe_matrix(),
            ProbeSubcommand::Compare => run_probe_compare(&runtime),
            ProbeSubcommand::Validate { url } => run_probe_validate(&runtime, url),
            ProbeSubcommand::Live { handle, password } => {
                run_probe_live(&runtime, &handle, &password)
            }
        },
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();
}

fn run_status(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let status = inspect_runtime(&paths)?;

    println!("runtime status");
    println!("project_root: {}", normalize_for_display(&paths.project_root));
    println!(
        "project_root_exists: {}",
        format_flag(status.project_root_exists)
    );
    println!("emoji_dir: {}", normalize_for_display(&paths.emoji_dir));
    println!("emoji_dir_exists: {}", format_flag(status.emoji_dir_exists));
    println!("emoji_files: {}", status.emoji_files);
    println!("db_path: {}", normalize_for_display(&paths.db_path));
    println!("db_exists: {}", format_flag(status.db_exists));
    println!(
        "db_size_bytes: {}",
        status
            .db_size_bytes
            .map(|size| size.to_string())
            .unwrap_or_else(|| "n/a".to_string())
    );
    if status.db_exists {
        let connection = open_read_only(&paths.db_path)?;
        println!("registered_emojis: {}", count_records(&connection)?);
    }
    println!("config_exists: {}", format_flag(status.config_exists));
    print_warnings(&status.warnings);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_register(runtime: &RuntimeOptions, args: RegisterArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    let category = args
        .category
        .unwrap_or_else(|| config.register_category().to_string());

    let report = register_assets(&paths, &category)?;
    let collisions = colliding_names(&scan_assets(&paths.emoji_dir)?);

    println!("register");
    println!("emoji_dir: {}", normalize_for_display(&paths.emoji_dir));
    println!("db_path: {}", normalize_for_display(&paths.db_path));
    println!("category: {category}");
    println!("found: {}", report.found);
    println!("already_registered: {}", report.already_registered);
    for record in &report.added_records {
        println!("added: {} ({})", record.name, record.filename);
    }
    println!("added_count: {}", report.added);
    println!("skipped: {}", report.skipped);
    println!("total: {}", report.total);
    for name in &collisions {
        println!("collision: {name}");
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_seed(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    let report = seed_defaults(&paths, config.seed_category())?;

    println!("seed");
    println!("db_path: {}", normalize_for_display(&paths.db_path));
    for name in &report.added {
        println!("added: {name}");
    }
    for name in &report.skipped {
        println!("skipped: {name}");
    }
    println!("added_count: {}", report.added.len());
    println!("skipped_count: {}", report.skipped.len());
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_add(runtime: &RuntimeOptions, args: AddArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    let category = args
        .category
        .unwrap_or_else(|| config.seed_category().to_string());
    let connection = open_existing(&paths.db_path)?;
    let inserted = add_custom_emoji(
        &connection,
        &args.name,
        &args.filename,
        args.alt_text.as_deref(),
        &category,
    )?;

    println!("add");
    println!("name: {}", args.name.trim());
    println!("filename: {}", args.filename);
    println!("category: {category}");
    println!("inserted: {}", format_flag(inserted));
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_list(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let connection = open_read_only(&paths.db_path)?;
    let records = list_records(&connection)?;

    println!("emoji records");
    println!("db_path: {}", normalize_for_display(&paths.db_path));
    println!("count: {}", records.len());
    if records.is_empty() {
        println!("records: <none>");
    }
    for record in &records {
        println!(
            "record: {} {} [{}] {}",
            record.name,
            record.filename,
            record.category,
            record.alt_text.as_deref().unwrap_or("<no alt text>")
        );
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_scrape(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    let report = scrape(&config, &paths.emoji_dir)?;

    println!("scrape");
    println!("page_url: {}", report.page_url);
    println!("output_dir: {}", normalize_for_display(&paths.emoji_dir));
    if report.found == 0 {
        println!("found: 0 (no emoji images on the page)");
    } else {
        println!("found: {}", report.found);
    }
    println!("downloaded: {}", report.downloaded);
    println!("already_present: {}", report.already_present);
    println!("duplicate_filenames: {}", report.duplicate_filenames);
    println!("empty: {}", report.empty);
    println!("failed: {}", report.failed);
    for (url, message) in &report.failures {
        println!("failure: {url}: {message}");
    }
    println!("files_in_dir: {}", report.files_in_dir);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_probe_matrix() -> Result<()> {
    print_scope_matrix(&mut io::stdout().lock())
}

fn run_probe_compare(runtime: &RuntimeOptions) -> Result<()> {
    let (paths, config) = resolve_runtime_config(runtime)?;
    compare_deployments(&config, &mut io::stdout().lock())?;
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_probe_validate(runtime: &RuntimeOptions, url: Option<String>) -> Result<()> {
    let (paths, config) = resolve_runtime_config(runtime)?;
    let url = url.unwrap_or_else(|| config.preview_metadata_url().to_string());
    validate_metadata(&config, &url, &mut io::stdout().lock())?;
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_probe_live(runtime: &RuntimeOptions, handle: &str, password: &str) -> Result<()> {
    let (paths, config) = resolve_runtime_config(runtime)?;
    run_live_flow(&config, handle, password, &mut io::stdout().lock())?;
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        emoji_dir: runtime.emoji_dir.clone(),
        db_path: runtime.db_path.clone(),
        config: runtime.config.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let project_env = initial.project_root.join(".env");
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }

    resolve_paths(&context, &overrides)
}

fn resolve_runtime_config(runtime: &RuntimeOptions) -> Result<(ResolvedPaths, ToolConfig)> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    Ok((paths, config))
}

fn print_warnings(warnings: &[String]) {
    if warnings.is_empty() {
        return;
    }
    println!("warnings:");
    for warning in warnings {
        println!("  - {warning}");
    }
}

fn print_diagnostics(runtime: &RuntimeOptions, paths: &ResolvedPaths) {
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
