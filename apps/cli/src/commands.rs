//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use scriptorium_core::{ExtractOptions, ExtractSummary, Granularity, ProgressReporter, to_json};
use scriptorium_repository::{
    InstallRequest, InstallStatus, RepositoryManager, VerifyOutcome, parse_install_conf,
};
use scriptorium_shared::{
    AppConfig, RepositoryConfig, SourceEntry, VerseAddress, config_file_path, expand_home,
    init_config, load_config, load_config_from,
};
use scriptorium_versification::{Registry, map_reference};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Scriptorium: install, verify and extract SWORD modules.
#[derive(Parser)]
#[command(
    name = "scriptorium",
    version,
    about = "Manage local SWORD module stores and extract modules to structured JSON.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.scriptorium/scriptorium.toml).
    #[arg(long, global = true, env = "SCRIPTORIUM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Module store root, overriding `[store] root`.
    #[arg(long, global = true, env = "SCRIPTORIUM_ROOT")]
    pub root: Option<String>,

    /// Modules processed at once in batch operations.
    #[arg(long, global = true)]
    pub concurrency: Option<usize>,

    /// Overall deadline for batch operations, in seconds.
    #[arg(long, global = true)]
    pub deadline: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Show the configured remote sources.
    ListSources,

    /// Download the module index of one or more sources.
    Refresh {
        /// Source names; all sources when omitted.
        sources: Vec<String>,
    },

    /// List the modules a source offered at its last refresh.
    List {
        source: String,

        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Install modules into the store.
    Install {
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        modules: Vec<String>,

        /// Source to install from; required when several offer a module.
        #[arg(short, long)]
        source: Option<String>,

        /// Install every module the source offered at its last refresh.
        #[arg(long)]
        all: bool,
    },

    /// List installed modules and their last verification.
    Installed {
        #[arg(long)]
        json: bool,
    },

    /// Remove a module, keeping data directories other modules share.
    Uninstall { module: String },

    /// Check installed modules against their descriptors.
    Verify {
        /// Modules to check; all installed modules when omitted.
        modules: Vec<String>,
    },

    /// Print the descriptor of an installed or indexed module.
    Describe { module: String },

    /// Translate a reference between versification systems.
    Map {
        /// Reference such as `Ps 23:1` or `Psalm 23:1`.
        reference: String,

        #[arg(long, default_value = "KJV")]
        from: String,

        #[arg(long, default_value = "Vulg")]
        to: String,
    },

    /// Extract a module to structured JSON.
    Extract {
        /// A conf file, an unpacked module directory, or an e-Sword file.
        path: PathBuf,

        /// book, chapter or verse (defaults to `[output] granularity`).
        #[arg(short, long)]
        granularity: Option<String>,

        /// Write the document here instead of stdout.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
    /// Add the sources listed in an `install.conf` to the config file.
    ImportSources { path: PathBuf },
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "scriptorium=info",
        1 => "scriptorium=debug",
        _ => "scriptorium=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Settings shared by every command, resolved from the config file and flags.
struct Context {
    config: AppConfig,
    config_path: Option<PathBuf>,
    root: Option<String>,
    concurrency: Option<usize>,
    deadline: Option<u64>,
}

impl Context {
    fn repository_config(&self) -> Result<RepositoryConfig> {
        let mut repo = RepositoryConfig::from_app(&self.config)?;
        if let Some(root) = &self.root {
            repo.root = expand_home(root)?;
        }
        if let Some(concurrency) = self.concurrency {
            repo.concurrency = concurrency.max(1);
        }
        if let Some(secs) = self.deadline {
            repo.batch_deadline = Some(Duration::from_secs(secs));
        }
        Ok(repo)
    }

    fn manager(&self) -> Result<Arc<RepositoryManager>> {
        Ok(Arc::new(RepositoryManager::new(self.repository_config()?)?))
    }
}

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    let ctx = Context {
        config,
        config_path: cli.config,
        root: cli.root,
        concurrency: cli.concurrency,
        deadline: cli.deadline,
    };

    match cli.command {
        Command::ListSources => cmd_list_sources(&ctx),
        Command::Refresh { sources } => cmd_refresh(&ctx, &sources).await,
        Command::List { source, json } => cmd_list(&ctx, &source, json),
        Command::Install {
            modules,
            source,
            all,
        } => cmd_install(&ctx, modules, source, all).await,
        Command::Installed { json } => cmd_installed(&ctx, json).await,
        Command::Uninstall { module } => cmd_uninstall(&ctx, &module).await,
        Command::Verify { modules } => cmd_verify(&ctx, &modules).await,
        Command::Describe { module } => cmd_describe(&ctx, &module).await,
        Command::Map {
            reference,
            from,
            to,
        } => cmd_map(&reference, &from, &to),
        Command::Extract {
            path,
            granularity,
            out,
        } => cmd_extract(&ctx, &path, granularity.as_deref(), out).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(&ctx),
            ConfigAction::ImportSources { path } => cmd_config_import(&ctx, &path),
        },
    }
}

// ---------------------------------------------------------------------------
// Repository commands
// ---------------------------------------------------------------------------

fn cmd_list_sources(ctx: &Context) -> Result<()> {
    let manager = ctx.manager()?;
    for source in manager.list_sources() {
        println!(
            "{:<28} {}://{}{}",
            source.name, source.protocol, source.host, source.directory
        );
    }
    Ok(())
}

async fn cmd_refresh(ctx: &Context, names: &[String]) -> Result<()> {
    let manager = ctx.manager()?;
    let names: Vec<String> = if names.is_empty() {
        manager.list_sources().iter().map(|s| s.name.clone()).collect()
    } else {
        names.to_vec()
    };

    let spinner = spinner();
    let mut failed = 0;
    for name in &names {
        spinner.set_message(format!("Refreshing {name}"));
        match manager.refresh_index(name).await {
            Ok(index) => {
                spinner.println(format!(
                    "  {name}: {} modules, {} skipped",
                    index.entries.len(),
                    index.failures.len()
                ));
                for failure in &index.failures {
                    spinner.println(format!("    skipped {}: {}", failure.file, failure.reason));
                }
            }
            Err(e) => {
                failed += 1;
                spinner.println(format!("  {name}: failed: {e}"));
            }
        }
    }
    spinner.finish_and_clear();

    if failed > 0 {
        return Err(eyre!("{failed} of {} sources failed to refresh", names.len()));
    }
    Ok(())
}

fn cmd_list(ctx: &Context, source: &str, json: bool) -> Result<()> {
    let manager = ctx.manager()?;
    let index = manager.list_modules(source)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&index.entries)?);
        return Ok(());
    }
    for entry in &index.entries {
        let d = &entry.descriptor;
        println!(
            "{:<16} {:<11} {:<6} {}",
            d.id,
            d.kind().to_string(),
            d.language.as_deref().unwrap_or("-"),
            d.description.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

async fn cmd_install(
    ctx: &Context,
    modules: Vec<String>,
    source: Option<String>,
    all: bool,
) -> Result<()> {
    let manager = ctx.manager()?;
    let installed_at = chrono::Utc::now().to_rfc3339();
    let spinner = spinner();

    let reports = match (all, source.as_deref()) {
        (true, Some(source)) => {
            spinner.set_message(format!("Installing everything from {source}"));
            manager.install_all(source, &installed_at).await?
        }
        (true, None) => return Err(eyre!("--all needs --source")),
        (false, source) => {
            info!(modules = modules.len(), "installing");
            spinner.set_message(format!("Installing {} module(s)", modules.len()));
            let requests = modules
                .iter()
                .map(|module| InstallRequest::new(source, module.as_str(), installed_at.as_str()))
                .collect();
            manager.install_many(requests).await
        }
    };
    spinner.finish_and_clear();
    let total = reports.len();

    let mut failed = 0;
    for report in &reports {
        let from = report.source.as_deref().unwrap_or("-");
        match report.status {
            InstallStatus::Done => println!("  {:<16} installed from {from}", report.module),
            InstallStatus::Unavailable => {
                println!("  {:<16} unavailable: no package on {from}", report.module)
            }
            InstallStatus::Failed => {
                failed += 1;
                println!(
                    "  {:<16} failed: {}",
                    report.module,
                    report.detail.as_deref().unwrap_or("unknown error")
                );
            }
        }
    }
    if failed > 0 {
        return Err(eyre!("{failed} of {total} modules failed to install"));
    }
    Ok(())
}

async fn cmd_installed(ctx: &Context, json: bool) -> Result<()> {
    let manager = ctx.manager()?;
    let modules = manager.installed().await;
    if json {
        println!("{}", serde_json::to_string_pretty(&modules)?);
        return Ok(());
    }
    for module in &modules {
        let verification = match &module.verification {
            None => "unverified".to_string(),
            Some(VerifyOutcome::Pass) => "pass".to_string(),
            Some(VerifyOutcome::Fail { error }) => format!("fail: {error}"),
        };
        println!(
            "{:<16} {:<20} {}",
            module.id,
            module.source.as_deref().unwrap_or("-"),
            verification
        );
    }
    Ok(())
}

async fn cmd_uninstall(ctx: &Context, module: &str) -> Result<()> {
    let manager = ctx.manager()?;
    let report = manager.uninstall(module).await?;
    for path in &report.removed {
        println!("  removed {}", path.display());
    }
    for path in &report.kept {
        println!("  kept {} (shared with another module)", path.display());
    }
    Ok(())
}

async fn cmd_verify(ctx: &Context, modules: &[String]) -> Result<()> {
    let manager = ctx.manager()?;
    let mut failed = 0;
    let mut total = 0;

    if modules.is_empty() {
        for report in manager.verify_all().await {
            total += 1;
            match (&report.outcome, &report.error) {
                (Some(VerifyOutcome::Pass), _) => println!("  {:<16} pass", report.module),
                (Some(VerifyOutcome::Fail { error }), _) => {
                    failed += 1;
                    println!("  {:<16} fail: {error}", report.module);
                }
                (None, error) => {
                    failed += 1;
                    println!(
                        "  {:<16} error: {}",
                        report.module,
                        error.as_deref().unwrap_or("unknown error")
                    );
                }
            }
        }
    } else {
        for module in modules {
            total += 1;
            match manager.verify(module).await {
                Ok(VerifyOutcome::Pass) => println!("  {module:<16} pass"),
                Ok(VerifyOutcome::Fail { error }) => {
                    failed += 1;
                    println!("  {module:<16} fail: {error}");
                }
                Err(e) => {
                    failed += 1;
                    println!("  {module:<16} error: {e}");
                }
            }
        }
    }

    if failed > 0 {
        return Err(eyre!("{failed} of {total} modules failed verification"));
    }
    Ok(())
}

async fn cmd_describe(ctx: &Context, module: &str) -> Result<()> {
    let manager = ctx.manager()?;
    let description = manager.describe(module).await?;
    println!("{}", serde_json::to_string_pretty(&description)?);
    Ok(())
}

fn cmd_map(reference: &str, from: &str, to: &str) -> Result<()> {
    let address = parse_reference(reference)
        .ok_or_else(|| eyre!("cannot read reference '{reference}', expected e.g. 'Ps 23:1'"))?;
    let mapped = map_reference(from, to, &address);
    match &mapped.address {
        Some(target) => println!("{address} ({from}) -> {target} ({to}) [{}]", mapped.kind),
        None => println!("{address} ({from}) has no counterpart in {to}"),
    }
    Ok(())
}

/// `Book C:V`, where the book may contain spaces (`1 John 3:16`).
fn parse_reference(text: &str) -> Option<VerseAddress> {
    let (book, numbers) = text.trim().rsplit_once(' ')?;
    let (chapter, verse) = numbers.split_once(':')?;
    Some(VerseAddress::new(
        book.trim(),
        chapter.parse().ok()?,
        verse.parse().ok()?,
    ))
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

async fn cmd_extract(
    ctx: &Context,
    path: &Path,
    granularity: Option<&str>,
    out: Option<PathBuf>,
) -> Result<()> {
    let granularity: Granularity = granularity
        .unwrap_or(&ctx.config.output.granularity)
        .parse()?;

    let extra = ctx
        .config
        .versification
        .extra_definitions
        .iter()
        .map(|p| expand_home(p))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let registry = Registry::with_extra_definitions(extra.as_slice())?;

    let store_root = expand_home(ctx.root.as_deref().unwrap_or(&ctx.config.store.root))?;

    let options = ExtractOptions {
        granularity,
        store_root: Some(store_root),
        generated: chrono::Utc::now().to_rfc3339(),
        tool_version: env!("CARGO_PKG_VERSION").to_string(),
        output: out.clone(),
    };

    info!(path = %path.display(), %granularity, "extracting module");
    let reporter = CliProgress::new();
    let extraction = scriptorium_core::extract_module(path, &options, &registry, &reporter).await?;
    let summary = &extraction.summary;

    if out.is_none() {
        println!("{}", to_json(&extraction.document)?);
    }

    eprintln!();
    eprintln!("  Module:    {}", summary.module);
    eprintln!("  Records:   {}", summary.records);
    eprintln!("  Assembled: {}", summary.assembled);
    eprintln!("  Fallbacks: {}", summary.fallbacks);
    eprintln!("  Failures:  {}", summary.failures);
    if let Some(path) = &summary.output {
        eprintln!("  Output:    {}", path.display());
    }
    eprintln!("  Time:      {:.1}s", summary.elapsed.as_secs_f64());
    eprintln!();

    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

fn spinner() -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
        spinner.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
    }
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner
}

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        Self { spinner: spinner() }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn record_converted(&self, current: usize, total: usize) {
        if current % 256 == 0 || current == total {
            self.spinner
                .set_message(format!("Converting markup [{current}/{total}]"));
        }
    }

    fn done(&self, _summary: &ExtractSummary) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// Config commands
// ---------------------------------------------------------------------------

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(ctx: &Context) -> Result<()> {
    let toml_str = toml::to_string_pretty(&ctx.config)?;
    println!("{toml_str}");
    Ok(())
}

fn cmd_config_import(ctx: &Context, install_conf: &Path) -> Result<()> {
    let text = std::fs::read_to_string(install_conf)
        .map_err(|e| eyre!("cannot read {}: {e}", install_conf.display()))?;
    let imported = parse_install_conf(&text)?;
    if imported.is_empty() {
        return Err(eyre!("no FTPSource/HTTPSource lines in {}", install_conf.display()));
    }

    let mut config = ctx.config.clone();
    let mut added = 0;
    for source in imported {
        if config
            .sources
            .iter()
            .any(|s| s.name.eq_ignore_ascii_case(&source.name))
        {
            println!("  {} already configured, skipped", source.name);
            continue;
        }
        config.sources.push(SourceEntry {
            name: source.name,
            protocol: source.protocol.to_string(),
            host: source.host,
            directory: source.directory,
            package_patterns: Vec::new(),
        });
        added += 1;
    }

    let path = match &ctx.config_path {
        Some(path) => path.clone(),
        None => config_file_path()?,
    };
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(&path, toml::to_string_pretty(&config)?)?;
    println!("Added {added} source(s) to {}", path.display());
    Ok(())
}
