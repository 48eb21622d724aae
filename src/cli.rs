// MediaFlow CLI binary

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};

use mediaflow_lib::constants::DEFAULT_HISTORY_DAYS;
use mediaflow_lib::db::open_db;
use mediaflow_lib::db::schema::{self, FileStatus, MediaFileRecord};
use mediaflow_lib::jobs::runner;
use mediaflow_lib::settings::{default_settings_path, load_settings, Settings};
use mediaflow_lib::{init_logging, tools, CancelFlag};

#[derive(Parser)]
#[command(name = "mediaflow")]
#[command(about = "MediaFlow - compress, back up and upload a personal media archive", long_about = None)]
#[command(version)]
struct Cli {
    /// Settings file (defaults to $MEDIAFLOW_SETTINGS or ~/.mediaflow/settings.json)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Warnings and errors only
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the settings file, media folders and database
    Init,

    /// Queue new files from the staging directory
    Ingest,

    /// Process pending files
    Run {
        /// Dry run with simulated stages; neither files nor the library change
        #[arg(long)]
        simulate: bool,
    },

    /// List files
    List {
        /// Filter by status (pending, processing, success, failed)
        #[arg(long)]
        status: Option<String>,
        /// Maximum files to show
        #[arg(long, default_value = "100")]
        limit: i64,
    },

    /// Show file details and its log
    Show {
        /// File ID
        id: i64,
    },

    /// List failed files with their errors
    Failed,

    /// Put failed files back in the queue
    Requeue {
        /// File ID
        #[arg(required_unless_present = "all_failed", conflicts_with = "all_failed")]
        id: Option<i64>,
        /// Requeue every failed file
        #[arg(long)]
        all_failed: bool,
    },

    /// Show aggregate stats
    Stats {
        /// Rebuild counters from the file table first
        #[arg(long)]
        recompute: bool,
    },

    /// Show recent log entries
    Logs {
        /// Only entries for this file
        #[arg(long)]
        file: Option<i64>,
        /// Maximum entries to show
        #[arg(long, default_value = "50")]
        limit: i64,
    },

    /// Daily processed/failed counts
    History {
        #[arg(long, default_value_t = DEFAULT_HISTORY_DAYS)]
        days: i64,
    },

    /// Check external tools and settings
    Doctor,

    /// Print the active settings
    Settings,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings_path = match cli.settings.clone() {
        Some(p) => p,
        None => default_settings_path()?,
    };
    let settings = load_settings(&settings_path)?;

    let level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        settings.log_level.as_str()
    };
    let _log_guard = init_logging(level, Some(Path::new(&settings.log_dir)));

    match cli.command {
        Commands::Init => cmd_init(&settings, &settings_path),
        Commands::Ingest => cmd_ingest(&settings),
        Commands::Run { simulate } => cmd_run(&settings, simulate),
        Commands::List { status, limit } => cmd_list(&settings, status, limit),
        Commands::Show { id } => cmd_show(&settings, id),
        Commands::Failed => cmd_failed(&settings),
        Commands::Requeue { id, all_failed } => cmd_requeue(&settings, id, all_failed),
        Commands::Stats { recompute } => cmd_stats(&settings, recompute),
        Commands::Logs { file, limit } => cmd_logs(&settings, file, limit),
        Commands::History { days } => cmd_history(&settings, days),
        Commands::Doctor => cmd_doctor(&settings, &settings_path),
        Commands::Settings => cmd_settings(&settings, &settings_path),
    }
}

fn cmd_init(settings: &Settings, settings_path: &Path) -> Result<()> {
    settings.validate()?;

    for dir in [
        settings.staging_path(),
        settings.archive_path(),
        settings.processed_path(),
        PathBuf::from(&settings.log_dir),
    ] {
        std::fs::create_dir_all(&dir)?;
    }
    open_db(&settings.db_file())?;

    println!("Initialized {}", settings.app_name);
    println!("  Settings:   {}", settings_path.display());
    println!("  Staging:    {}", settings.staging_dir);
    println!("  Archive:    {}", settings.archive_dir);
    println!("  Processed:  {}", settings.processed_dir);
    println!("  Logs:       {}", settings.log_dir);
    println!("  Database:   {}", settings.db_path);

    Ok(())
}

fn cmd_ingest(settings: &Settings) -> Result<()> {
    println!("Scanning {}", settings.staging_dir);
    let result = runner::run_ingest(settings)?;

    println!();
    println!("Ingest complete:");
    println!("  Total files:  {}", result.total_files);
    println!("  Queued:       {}", result.inserted);
    println!("  Duplicates:   {}", result.duplicates);
    println!("  Known:        {}", result.already_known);
    println!("  Failed:       {}", result.failed);

    Ok(())
}

fn cmd_run(settings: &Settings, simulate: bool) -> Result<()> {
    let cancel = CancelFlag::new();
    cancel_on_signal(&cancel);

    let summary = runner::run_processing(settings, simulate, cancel)?;
    println!("{}", summary.message);

    if summary.failed_count > 0 {
        println!("Use 'mediaflow failed' to see why.");
    }
    Ok(())
}

/// First Ctrl-C (or SIGTERM) stops the run after the file in flight; a
/// second one exits immediately.
fn cancel_on_signal(cancel: &CancelFlag) {
    let cancel = cancel.clone();
    let spawned = std::thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(rt) => rt,
                Err(e) => {
                    log::warn!("Interrupt handling unavailable: {}", e);
                    return;
                }
            };
            runtime.block_on(async {
                wait_for_shutdown_signal().await;
                log::warn!("Interrupt received; stopping after the current file (again to abort)");
                cancel.cancel();
                wait_for_shutdown_signal().await;
                std::process::exit(130);
            });
        });

    if let Err(e) = spawned {
        log::warn!("Interrupt handling unavailable: {}", e);
    }
}

async fn wait_for_shutdown_signal() {
    use tokio::signal;

    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(_) => {
                signal::ctrl_c().await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await.ok();
    }
}

fn cmd_list(settings: &Settings, status: Option<String>, limit: i64) -> Result<()> {
    let status = status.map(|s| s.parse::<FileStatus>()).transpose()?;
    let conn = open_db(&settings.db_file())?;
    let files = schema::list_files(&conn, status, limit)?;

    if files.is_empty() {
        println!("No files found. Use 'mediaflow ingest' to queue staged media.");
        return Ok(());
    }

    println!(
        "{:>6}  {:>10}  {:>5}  {:>10}  {:>10}  {:>10}  {:<16}  {}",
        "ID", "Status", "Type", "Size", "Compressed", "Created", "Camera", "Name"
    );
    println!("{}", "-".repeat(100));

    for file in &files {
        print_file_row(file);
    }

    Ok(())
}

fn print_file_row(file: &MediaFileRecord) {
    let created = file.created_date.split('T').next().unwrap_or(&file.created_date);
    let compressed = file
        .compressed_size_mb
        .map(format_mb)
        .unwrap_or_else(|| "-".to_string());

    println!(
        "{:>6}  {:>10}  {:>5}  {:>10}  {:>10}  {:>10}  {:<16}  {}",
        file.id,
        file.status.as_str(),
        file.media_type.as_str(),
        format_mb(file.original_size_mb),
        compressed,
        created,
        truncate(&file.camera, 16),
        file.file_name
    );
}

fn cmd_show(settings: &Settings, id: i64) -> Result<()> {
    let conn = open_db(&settings.db_file())?;
    let file = schema::get_file(&conn, id)?
        .ok_or_else(|| anyhow::anyhow!("File {} not found", id))?;

    println!("File #{}", file.id);
    println!();
    println!("Name:        {}", file.file_name);
    println!("Type:        {}", file.media_type);
    println!("Status:      {}", file.status);
    println!("Camera:      {}", file.camera);
    println!("Created:     {}", file.created_date);
    println!("Size:        {}", format_mb(file.original_size_mb));
    if let Some(size) = file.compressed_size_mb {
        println!("Compressed:  {}", format_mb(size));
    }
    if let Some(ref when) = file.last_compressed_date {
        println!("Processed:   {}", when);
    }
    println!("Hash:        {}", file.file_hash);
    println!();
    println!("NAS backup:  {}", yes_no(file.nas_backup));
    println!("Cloud:       {}", yes_no(file.cloud_upload));
    println!("iCloud:      {}", yes_no(file.icloud_upload));
    println!();
    println!("Staging:     {}", file.staging_path);
    if let Some(ref p) = file.archive_path {
        println!("Archive:     {}", p);
    }
    if let Some(ref p) = file.processed_path {
        println!("Processed:   {}", p);
    }
    println!("Serve from:  {}", file.servable_path());

    if let Some(ref error) = file.error_log {
        println!();
        println!("Error:       {}", error);
    }

    let logs = schema::list_logs_for_file(&conn, id)?;
    if !logs.is_empty() {
        println!();
        println!("Log:");
        for entry in logs {
            println!("  {}  {:<5}  {}", entry.timestamp, entry.level.as_str(), entry.message);
        }
    }

    Ok(())
}

fn cmd_failed(settings: &Settings) -> Result<()> {
    let conn = open_db(&settings.db_file())?;
    let files = schema::list_failed(&conn)?;

    if files.is_empty() {
        println!("No failed files.");
        return Ok(());
    }

    println!("{} failed files:", files.len());
    println!();
    for file in &files {
        println!("#{}  {}", file.id, file.file_name);
        println!("    {}", file.error_log.as_deref().unwrap_or("(no error recorded)"));
    }
    println!();
    println!("Use 'mediaflow requeue <id>' or 'mediaflow requeue --all-failed' to retry.");

    Ok(())
}

fn cmd_requeue(settings: &Settings, id: Option<i64>, all_failed: bool) -> Result<()> {
    let conn = open_db(&settings.db_file())?;

    if all_failed {
        let count = schema::requeue_all_failed(&conn)?;
        println!("Requeued {} failed files", count);
        return Ok(());
    }

    let id = id.ok_or_else(|| anyhow::anyhow!("Pass a file ID or --all-failed"))?;
    schema::requeue_file(&conn, id)?;
    println!("Requeued file {}", id);
    Ok(())
}

fn cmd_stats(settings: &Settings, recompute: bool) -> Result<()> {
    let conn = open_db(&settings.db_file())?;
    let stats = if recompute {
        schema::recompute_stats(&conn)?
    } else {
        schema::get_stats(&conn)?
    };

    println!("Total files:       {}", stats.total_files);
    println!("Storage saved:     {}", format_mb(stats.storage_saved_mb));
    println!("Duplicates found:  {}", stats.duplicates_found);
    println!("Processing errors: {}", stats.processing_errors);
    println!();

    for status in [FileStatus::Pending, FileStatus::Processing, FileStatus::Success, FileStatus::Failed] {
        println!("{:<11} {}", format!("{}:", status), schema::count_by_status(&conn, status)?);
    }

    Ok(())
}

fn cmd_logs(settings: &Settings, file: Option<i64>, limit: i64) -> Result<()> {
    let conn = open_db(&settings.db_file())?;
    let logs = match file {
        Some(id) => schema::list_logs_for_file(&conn, id)?,
        None => schema::list_logs(&conn, limit)?,
    };

    if logs.is_empty() {
        println!("No log entries.");
        return Ok(());
    }

    for entry in logs {
        let file = entry
            .file_id
            .map(|id| format!("#{}", id))
            .unwrap_or_else(|| "-".to_string());
        println!("{}  {:<5}  {:>6}  {}", entry.timestamp, entry.level.as_str(), file, entry.message);
    }

    Ok(())
}

fn cmd_history(settings: &Settings, days: i64) -> Result<()> {
    let conn = open_db(&settings.db_file())?;
    let history = schema::processing_history(&conn, days, Utc::now())?;

    println!("{:<12}  {:<4}  {:>9}  {:>6}", "Day", "", "Processed", "Failed");
    for point in history {
        println!("{:<12}  {:<4}  {:>9}  {:>6}", point.day, point.name, point.processed, point.failed);
    }

    Ok(())
}

fn cmd_doctor(settings: &Settings, settings_path: &Path) -> Result<()> {
    println!("Settings: {}", settings_path.display());
    match settings.validate() {
        Ok(()) => println!("  [ok]      settings are valid"),
        Err(e) => println!("  [error]   {}", e),
    }
    println!();

    println!("Tools:");
    for tool in tools::check_tools() {
        if tool.installed {
            println!("  [ok]      {:<22} {}", tool.name, tool.path);
        } else {
            println!("  [missing] {:<22} {}", tool.name, tool.help_text);
        }
    }
    println!();

    let missing = runner::missing_tools(settings);
    if missing.is_empty() {
        println!("All tools needed by the enabled stages are installed.");
    } else {
        println!("Enabled stages need: {}", missing.join(", "));
    }

    let db = settings.db_file();
    println!();
    if db.exists() {
        println!("Database: {}", db.display());
    } else {
        println!("Database: {} (not created yet, run 'mediaflow init')", db.display());
    }

    Ok(())
}

fn cmd_settings(settings: &Settings, settings_path: &Path) -> Result<()> {
    println!("# {}", settings_path.display());
    println!("{}", serde_json::to_string_pretty(settings)?);
    Ok(())
}

fn format_mb(mb: f64) -> String {
    if mb >= 1024.0 {
        format!("{:.2} GB", mb / 1024.0)
    } else {
        format!("{:.2} MB", mb)
    }
}

fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let head: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", head)
    } else {
        s.to_string()
    }
}
