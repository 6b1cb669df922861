//! Collector binary.
//!
//! Loads YAML configuration from directories named by environment
//! variables (overridable by flags), builds the pipeline, and runs until
//! interrupted. SIGHUP reloads the configuration in place.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use snmp_collector::config::{self, Paths};
use snmp_collector::error::Error;
use snmp_collector::format::JsonFormatter;
use snmp_collector::pipeline::{Pipeline, PipelineConfig};
use snmp_collector::poll::PoolOptions;
use snmp_collector::transport::{
    RotateConfig, RotatingFile, SplitWriterTransport, Transport, WriterTransport,
};
use snmp_collector::trap::TrapReceiverConfig;

#[derive(Debug, Parser)]
#[command(name = "snmp-collector", version, about = "SNMP telemetry collector")]
struct Args {
    /// Log level: trace, debug, info, warn, error
    #[arg(long = "log.level", default_value = "info")]
    log_level: String,

    /// Log format: json, text
    #[arg(long = "log.fmt", default_value = "json")]
    log_fmt: String,

    /// Collector instance ID (default: hostname)
    #[arg(long = "collector.id", default_value = "")]
    collector_id: String,

    /// Pretty-print JSON output
    #[arg(long = "format.pretty")]
    pretty: bool,

    /// Number of concurrent poller workers
    #[arg(long = "poller.workers", default_value_t = 500)]
    poller_workers: usize,

    /// Inter-stage channel buffer size
    #[arg(long = "pipeline.buffer.size", default_value_t = 10_000)]
    buffer_size: usize,

    /// Enable the trap receiver
    #[arg(long = "trap.enabled")]
    trap_enabled: bool,

    /// Trap listener UDP address
    #[arg(long = "trap.listen", default_value = "0.0.0.0:162")]
    trap_listen: String,

    /// Enable enum resolution
    #[arg(long = "processor.enum.enable")]
    enum_enabled: bool,

    /// Enable counter delta computation
    #[arg(long = "processor.counter.delta", default_value_t = true)]
    counter_delta: bool,

    /// Max idle connections per device
    #[arg(long = "snmp.pool.max.idle", default_value_t = 2)]
    pool_max_idle: usize,

    /// Idle connection timeout in seconds (0 disables)
    #[arg(long = "snmp.pool.idle.timeout", default_value_t = 30)]
    pool_idle_timeout: u64,

    /// Split output: metrics and traps to separate files
    #[arg(long = "transport.file.split")]
    split_file: bool,

    /// Output file for poll metrics (split mode)
    #[arg(long = "transport.file.metrics", default_value = "snmp_metrics.json")]
    metrics_file: PathBuf,

    /// Output file for trap events (split mode)
    #[arg(long = "transport.file.traps", default_value = "snmp_traps.json")]
    traps_file: PathBuf,

    /// Max file size in bytes before rotation (0 disables)
    #[arg(long = "transport.file.max.bytes", default_value_t = 0)]
    file_max_bytes: u64,

    /// Max rotated backup files to keep (0 keeps all)
    #[arg(long = "transport.file.max.backups", default_value_t = 5)]
    file_max_backups: usize,

    /// Override INPUT_SNMP_DEVICE_DEFINITIONS_DIRECTORY_PATH
    #[arg(long = "config.devices")]
    config_devices: Option<PathBuf>,

    /// Override INPUT_SNMP_DEFAULTS_DIRECTORY_PATH
    #[arg(long = "config.defaults")]
    config_defaults: Option<PathBuf>,

    /// Override INPUT_SNMP_DEVICE_GROUP_DEFINITIONS_DIRECTORY_PATH
    #[arg(long = "config.device.groups")]
    config_device_groups: Option<PathBuf>,

    /// Override INPUT_SNMP_OBJECT_GROUP_DEFINITIONS_DIRECTORY_PATH
    #[arg(long = "config.object.groups")]
    config_object_groups: Option<PathBuf>,

    /// Override INPUT_SNMP_OBJECT_DEFINITIONS_DIRECTORY_PATH
    #[arg(long = "config.objects")]
    config_objects: Option<PathBuf>,

    /// Override PROCESSOR_SNMP_ENUM_DEFINITIONS_DIRECTORY_PATH
    #[arg(long = "config.enums")]
    config_enums: Option<PathBuf>,
}

fn main() {
    let args = Args::parse();
    if let Err(e) = run(args) {
        eprintln!("snmp-collector: {e}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> snmp_collector::Result<()> {
    init_logging(&args)?;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run_pipeline(args))
}

async fn run_pipeline(args: Args) -> snmp_collector::Result<()> {
    let paths = config_paths(&args);
    let snapshot = config::load(&paths)?;
    info!(
        devices = snapshot.devices.len(),
        objects = snapshot.objects.len(),
        "configuration loaded"
    );

    let transport = build_transport(&args)?;
    let cfg = PipelineConfig {
        collector_id: args.collector_id.clone(),
        poller_workers: args.poller_workers,
        buffer_size: args.buffer_size,
        pool: PoolOptions {
            max_idle_per_device: args.pool_max_idle,
            idle_timeout: (args.pool_idle_timeout > 0)
                .then(|| Duration::from_secs(args.pool_idle_timeout)),
            ..Default::default()
        },
        trap_enabled: args.trap_enabled,
        trap: TrapReceiverConfig {
            listen_addr: args.trap_listen.clone(),
            buffer: args.buffer_size,
            ..Default::default()
        },
        enum_enabled: args.enum_enabled,
        counter_delta_enabled: args.counter_delta,
        ..Default::default()
    };

    let mut pipeline = Pipeline::new(cfg, Arc::new(JsonFormatter::new(args.pretty)), transport);
    pipeline.start(snapshot).await?;
    info!("running, send SIGINT/SIGTERM to stop, SIGHUP to reload");

    wait_for_shutdown(&pipeline, &paths).await;

    pipeline.stop().await;
    Ok(())
}

/// Blocks until SIGINT or SIGTERM; SIGHUP triggers an in-place reload.
async fn wait_for_shutdown(pipeline: &Pipeline, paths: &Paths) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    let mut sighup = match signal(SignalKind::hangup()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to install SIGHUP handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received interrupt");
                return;
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM");
                return;
            }
            _ = sighup.recv() => {
                info!("received SIGHUP, reloading configuration");
                match config::load(paths) {
                    Ok(snapshot) => pipeline.reload(&snapshot),
                    Err(e) => error!(error = %e, "reload failed, keeping current configuration"),
                }
            }
        }
    }
}

fn init_logging(args: &Args) -> snmp_collector::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("snmp_collector={}", args.log_level)));

    match args.log_fmt.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
        "text" => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
        other => {
            return Err(Error::Config(format!(
                "unknown log format {other:?} (expected json|text)"
            )));
        }
    }
    Ok(())
}

fn config_paths(args: &Args) -> Paths {
    let mut paths = Paths::from_env();
    if let Some(p) = &args.config_devices {
        paths.devices = p.clone();
    }
    if let Some(p) = &args.config_defaults {
        paths.defaults = p.clone();
    }
    if let Some(p) = &args.config_device_groups {
        paths.device_groups = p.clone();
    }
    if let Some(p) = &args.config_object_groups {
        paths.object_groups = p.clone();
    }
    if let Some(p) = &args.config_objects {
        paths.objects = p.clone();
    }
    if let Some(p) = &args.config_enums {
        paths.enums = p.clone();
    }
    paths
}

/// Stdout by default; in split mode, metrics and traps go to their own
/// files, rotated when a size limit is set.
fn build_transport(args: &Args) -> snmp_collector::Result<Arc<dyn Transport>> {
    if !args.split_file {
        return Ok(Arc::new(WriterTransport::stdout()));
    }

    let open = |path: &PathBuf| -> snmp_collector::Result<Box<dyn std::io::Write + Send>> {
        let rotating = RotatingFile::open(RotateConfig {
            file_path: path.clone(),
            max_bytes: args.file_max_bytes,
            max_backups: args.file_max_backups,
        })?;
        Ok(Box::new(rotating))
    };

    Ok(Arc::new(SplitWriterTransport::new(
        open(&args.metrics_file)?,
        open(&args.traps_file)?,
    )))
}
