//! vfsprobe - VFS read/write correlation sensor
//!
//! Turns the entry, dispatch-path, byte-accounting and return probes of
//! `vfs_read` / `vfs_write` into one event per call.

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use vfsprobe_capture::{SyntheticWorkload, SyntheticWorkloadConfig, WorkloadReport};
use vfsprobe_core::{ConfigLoader, OperationKind, ProbeConfig, VfsProbes, VFS_READ, VFS_WRITE};
use vfsprobe_export::{
    CollectionBuffer, CollectionTable, DrainStats, EventDrain, JsonlExporter, JsonlExporterConfig,
};

#[derive(Parser)]
#[command(name = "vfsprobe")]
#[command(version)]
#[command(about = "VFS read/write correlation sensor", long_about = None)]
struct Cli {
    /// Increase verbosity
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value = "text")]
    format: OutputFormat,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "VFSPROBE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
    Prometheus,
}

#[derive(Subcommand)]
enum Commands {
    /// Drive the probes with a synthetic multi-threaded workload (no eBPF required)
    Demo {
        /// Output file for JSONL rows (overrides [export.jsonl])
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Process id of the synthetic process (defaults to the filter target)
        #[arg(long)]
        pid: Option<u32>,

        /// Process name of the synthetic process
        #[arg(long, default_value = "vfsprobe-demo")]
        comm: String,

        /// Worker threads
        #[arg(short, long, default_value = "4")]
        threads: usize,

        /// Operations per worker thread
        #[arg(short = 'n', long, default_value = "1000")]
        ops: u64,

        /// Probability that an operation is a read
        #[arg(long, default_value = "0.5")]
        read_ratio: f64,

        /// RNG seed
        #[arg(long)]
        seed: Option<u64>,

        /// Pause between operations in microseconds
        #[arg(long, default_value = "0")]
        interval_us: u64,
    },

    /// Show sensor status, configuration and attach plan
    Status,

    /// Show collected rows
    Show {
        /// Input file (JSONL)
        #[arg(short, long)]
        input: PathBuf,

        /// Only rows of this table (vfs_read, vfs_write, read, write)
        #[arg(short, long)]
        table: Option<String>,

        /// Only unsuccessful operations
        #[arg(long)]
        failed: bool,

        /// Number of rows to show (0 = all)
        #[arg(short, long, default_value = "50")]
        num: usize,
    },

    /// Write a default configuration file
    InitConfig {
        /// Destination (defaults to the user config path)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // A bad config is fatal; main reports the error chain on stderr.
    // init-config skips loading so a broken file can be regenerated.
    let config = if matches!(cli.command, Commands::InitConfig { .. }) {
        ProbeConfig::default()
    } else {
        load_config(cli.config.clone())?
    };

    // Setup logging - CLI verbose flag takes precedence, then config, then default
    let log_level = if cli.verbose > 0 {
        match cli.verbose {
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        }
    } else {
        match config.probe.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::WARN,
        }
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    info!("Configuration loaded successfully");

    match cli.command {
        Commands::Demo {
            output,
            pid,
            comm,
            threads,
            ops,
            read_ratio,
            seed,
            interval_us,
        } => {
            let defaults = SyntheticWorkloadConfig::default();
            let pid = pid.unwrap_or(match config.filter.target_pid {
                0 => defaults.pid,
                target => target,
            });
            let workload = SyntheticWorkloadConfig {
                pid,
                comm,
                threads,
                ops_per_thread: ops,
                read_ratio,
                seed: seed.unwrap_or(defaults.seed),
                interval_us,
            };
            demo_command(config, workload, output, cli.format).await
        }
        Commands::Status => status_command(&config, cli.config.as_deref()).await,
        Commands::Show {
            input,
            table,
            failed,
            num,
        } => show_command(&input, table, failed, num, cli.format).await,
        Commands::InitConfig { output, force } => init_config_command(output, force),
    }
}

/// Load configuration from file/env; defaults apply only when no file exists
fn load_config(cli_path: Option<PathBuf>) -> anyhow::Result<ProbeConfig> {
    let source = cli_path.clone();
    ConfigLoader::new()
        .with_cli_path(cli_path)
        .load()
        .with_context(|| match source {
            Some(path) => format!("failed to load configuration from {}", path.display()),
            None => "failed to load configuration".to_string(),
        })
}

/// Build the JSONL exporter if requested on the command line or in config
fn jsonl_exporter(
    config: &ProbeConfig,
    output: Option<PathBuf>,
) -> anyhow::Result<Option<Arc<JsonlExporter>>> {
    let mut exporter_config = JsonlExporterConfig::from(&config.export.jsonl);
    match output {
        Some(path) => exporter_config.path = path,
        None if !config.export.jsonl.enabled => return Ok(None),
        None => {}
    }
    let exporter = JsonlExporter::open(exporter_config).context("failed to open JSONL output")?;
    Ok(Some(Arc::new(exporter)))
}

/// Demo mode - synthetic triggers through the full probe -> transport -> export path
async fn demo_command(
    config: ProbeConfig,
    workload_config: SyntheticWorkloadConfig,
    output: Option<PathBuf>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    if format == OutputFormat::Text {
        println!();
        println!("  vfsprobe v{} - DEMO MODE", vfsprobe_core::PROBE_VERSION);
        println!();
        println!("  Collection: {}", config.collection.id);
        println!(
            "  Workload:   pid {} ({}), {} threads x {} ops",
            workload_config.pid,
            workload_config.comm,
            workload_config.threads,
            workload_config.ops_per_thread
        );
        println!();
    }

    info!("Starting vfsprobe in demo mode...");

    let (probes, events) = VfsProbes::with_channel(&config);
    let metrics = probes.metrics().clone();

    let buffer = Arc::new(CollectionBuffer::new());
    let mut drain = EventDrain::new(config.collection.id.clone()).with_exporter(buffer.clone());
    let jsonl = jsonl_exporter(&config, output)?;
    if let Some(exporter) = &jsonl {
        drain.add_exporter(exporter.clone());
    }

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let drain_handle = tokio::spawn(drain.run(events, shutdown_rx));

    let workload = SyntheticWorkload::with_config(workload_config);
    let stop = workload.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, stopping workload");
            stop.store(false, Ordering::SeqCst);
        }
    });

    // The probes (and with them the transport's producer half) are dropped
    // when the workload thread returns.
    let (report, released) = tokio::task::spawn_blocking(move || {
        let report = workload.run(&probes);
        (report, probes.reset())
    })
    .await?;
    let report = report?;

    let _ = shutdown_tx.send(());
    let stats = drain_handle.await?;
    let tables = buffer.pop_data();

    match format {
        OutputFormat::Text => {
            print_demo_summary(&report, &stats, &tables, released);
            println!("  Filtered triggers: {}", metrics.filtered.load(Ordering::Relaxed));
            if let Some(exporter) = &jsonl {
                println!(
                    "  JSONL:             {} ({} rows)",
                    exporter.path().display(),
                    exporter.events_written()
                );
            }
            println!();
        }
        OutputFormat::Json => {
            let rows: serde_json::Map<String, serde_json::Value> = tables
                .iter()
                .map(|t| (t.name.to_string(), serde_json::json!(t.len())))
                .collect();
            let summary = serde_json::json!({
                "collection_id": config.collection.id,
                "workload": report,
                "drain": stats,
                "rows": rows,
                "released_contexts": released,
                "metrics": metrics.to_json(),
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        OutputFormat::Prometheus => print!("{}", metrics.to_prometheus()),
    }

    Ok(())
}

fn print_demo_summary(
    report: &WorkloadReport,
    stats: &DrainStats,
    tables: &[CollectionTable],
    released: usize,
) {
    println!("  Issued (direct / iterator / unclassified / failed):");
    for kind in OperationKind::ALL {
        let mix = report.mix(kind);
        println!(
            "    {:<10} {:>7} {:>7} {:>7} {:>7}",
            kind.layout().table_name,
            mix.direct,
            mix.iterator,
            mix.unclassified,
            mix.failed
        );
    }
    println!();
    println!("  Collected rows:");
    for table in tables {
        println!("    {:<10} {:>7}", table.name, table.len());
    }
    println!();
    println!(
        "  Drain: {} received, {} exported, {} errors in {}",
        stats.received,
        stats.exported,
        stats.export_errors,
        format_span(stats.started_at, stats.finished_at)
    );
    println!("  Workload time:     {:?}", report.elapsed);
    println!("  Released contexts: {}", released);
}

fn format_span(start: DateTime<Utc>, end: DateTime<Utc>) -> String {
    let span = end - start;
    match span.num_microseconds() {
        Some(us) if us < 1_000_000 => format!("{:.1}ms", us as f64 / 1000.0),
        _ => format!("{:.2}s", span.num_milliseconds() as f64 / 1000.0),
    }
}

async fn status_command(config: &ProbeConfig, cli_path: Option<&Path>) -> anyhow::Result<()> {
    println!();
    println!("vfsprobe v{}", vfsprobe_core::PROBE_VERSION);
    println!();

    // Platform
    println!(
        "Platform: {} {}",
        std::env::consts::OS,
        std::env::consts::ARCH
    );

    #[cfg(target_os = "linux")]
    {
        println!();
        println!("Linux Capabilities:");

        let bpffs = Path::new("/sys/fs/bpf").exists();
        println!("  bpffs mounted: {}", bpffs);

        let btf_available = Path::new("/sys/kernel/btf/vmlinux").exists();
        println!("  BTF available: {}", btf_available);

        if let Ok(release) = std::fs::read_to_string("/proc/sys/kernel/osrelease") {
            println!("  Kernel: {}", release.trim());
        }
    }

    println!();
    println!("Configuration:");
    let source = ConfigLoader::new()
        .with_cli_path(cli_path.map(Path::to_path_buf))
        .find_config_file();
    match source {
        Some(path) => println!("  Source: {}", path.display()),
        None => println!("  Source: defaults"),
    }
    println!(
        "  Context table: {} entries x2, {} shards",
        config.table.capacity, config.table.shards
    );
    println!("  Transport: {} events", config.transport.capacity);
    match config.filter.target_pid {
        0 => println!("  Target process: all"),
        pid => println!("  Target process: {}", pid),
    }
    println!("  Collection id: {}", config.collection.id);
    if config.export.jsonl.enabled {
        println!("  JSONL export: {}", config.export.jsonl.path);
    } else {
        println!("  JSONL export: disabled");
    }

    println!();
    println!("Attach plan (offsets are kernel-build specific):");
    for layout in [&VFS_READ, &VFS_WRITE] {
        println!("  {}", layout);
        for attachment in layout.attach_plan() {
            println!("    {}", attachment);
        }
    }
    println!();

    Ok(())
}

async fn show_command(
    input: &Path,
    table: Option<String>,
    failed_only: bool,
    num: usize,
    format: OutputFormat,
) -> anyhow::Result<()> {
    use std::fs::File;
    use std::io::{BufRead, BufReader};

    let kind = match table.as_deref() {
        None => None,
        Some("read") | Some("vfs_read") => Some(OperationKind::Read),
        Some("write") | Some("vfs_write") => Some(OperationKind::Write),
        Some(other) => bail!("Unknown table: {} (expected vfs_read or vfs_write)", other),
    };

    let file = File::open(input).with_context(|| format!("cannot open {}", input.display()))?;
    let reader = BufReader::new(file);

    let mut count = 0;
    for line in reader.lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }

        let row: serde_json::Value = serde_json::from_str(&line)?;

        if let Some(kind) = kind {
            if row.get("kind").and_then(|v| v.as_str()) != Some(kind.as_str()) {
                continue;
            }
        }
        if failed_only && row.get("success").and_then(|v| v.as_u64()) == Some(1) {
            continue;
        }

        match format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&row)?),
            _ => println!("{}", describe_row(&row)),
        }

        count += 1;
        if num != 0 && count >= num {
            break;
        }
    }

    Ok(())
}

/// One-line rendering of a collected row
fn describe_row(row: &serde_json::Value) -> String {
    let num = |key: &str| row.get(key).and_then(|v| v.as_i64()).unwrap_or_default();
    let kind = row.get("kind").and_then(|v| v.as_str()).unwrap_or("?");
    let layout = match kind {
        "write" => &VFS_WRITE,
        _ => &VFS_READ,
    };
    let path = match num(layout.path_field) {
        1 => "direct",
        2 => "iterator",
        _ => "unclassified",
    };

    format!(
        "{:>16} {:<5} {}[{}/{}] count={} ret={} path={} ok={} latency={}ns",
        num("ts_ns"),
        kind,
        row.get("comm").and_then(|v| v.as_str()).unwrap_or(""),
        num("tgid"),
        num("pid"),
        num("count"),
        num("ret"),
        path,
        num("success"),
        num("ret_ts_ns").saturating_sub(num("ts_ns"))
    )
}

fn init_config_command(output: Option<PathBuf>, force: bool) -> anyhow::Result<()> {
    let path = match output.or_else(ConfigLoader::default_config_path) {
        Some(path) => path,
        None => bail!("No config directory found; pass --output"),
    };

    if path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }

    ConfigLoader::new().save(&ProbeConfig::default(), &path)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}
