use clap::{Parser, Subcommand};
use gatefilter::capture::SnoopSocket;
use gatefilter::config::{self, DaemonConfig};
use gatefilter::control;
use gatefilter::engine::Context;
use gatefilter::kernel::{BpfProvider, FastPathProvider, MemoryProvider};
use gatefilter::policy::SysfsResolver;
use gatefilter::snoop;
use gatefilter::telemetry::{init_logging, MetricsRegistry};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "gatefilter")]
#[command(about = "Per-client traffic classification and dynamic whitelist daemon")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon
    Run {
        /// Path to the configuration file
        #[arg(short, long, default_value = "/etc/gatefilter.toml")]
        config: PathBuf,

        /// Keep classifier state in memory instead of kernel maps
        /// (development without the classifier object)
        #[arg(long)]
        no_kernel: bool,
    },
    /// Validate the configuration file without starting
    Validate {
        /// Path to the configuration file
        #[arg(short, long, default_value = "/etc/gatefilter.toml")]
        config: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Run { config, no_kernel }) => cmd_run(&config, no_kernel),
        Some(Commands::Validate { config }) => cmd_validate(&config),
        None => cmd_run(&PathBuf::from("/etc/gatefilter.toml"), false),
    };

    if let Err(e) = result {
        eprintln!("[ERROR] {}", e);
        std::process::exit(1);
    }
}

fn cmd_validate(path: &PathBuf) -> Result<(), String> {
    println!("[INFO] Validating {}...", path.display());

    let cfg = config::load(path).map_err(|e| format!("Failed to parse config: {}", e))?;
    let validation = config::validate(&cfg);
    validation.print_diagnostics();

    if validation.has_errors() {
        Err("Validation failed".to_string())
    } else {
        println!("[INFO] Configuration is valid");
        Ok(())
    }
}

fn cmd_run(path: &PathBuf, no_kernel: bool) -> Result<(), String> {
    let cfg = config::load(path).map_err(|e| format!("Failed to load config: {}", e))?;
    init_logging(Some(&cfg.log));

    let validation = config::validate(&cfg);
    validation.print_diagnostics();
    if validation.has_errors() {
        return Err("Configuration invalid".to_string());
    }

    // Single-threaded reactor: the engine has exactly one caller, and
    // each packet or request is fully processed before the next one.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("Failed to create runtime: {}", e))?;

    let local = tokio::task::LocalSet::new();
    runtime.block_on(local.run_until(run_daemon(cfg, no_kernel)))
}

async fn run_daemon(cfg: DaemonConfig, no_kernel: bool) -> Result<(), String> {
    let metrics = Arc::new(MetricsRegistry::new());

    let provider: Box<dyn FastPathProvider> = if no_kernel {
        warn!("running with in-memory maps, kernel classifier disabled");
        Box::new(MemoryProvider::new())
    } else {
        Box::new(BpfProvider::new(&cfg.daemon.bpf_object))
    };

    let mut ctx = Context::new(provider, Box::new(SysfsResolver), metrics);

    let (notify_tx, notify_rx) = mpsc::unbounded_channel();
    ctx.set_notify(notify_tx);

    for (name, boot) in &cfg.interfaces {
        info!(interface = %name, devices = ?boot.devices, "configuring interface");
        if let Err(e) = ctx.interface_add(name, &boot.config, &boot.devices) {
            // A failed interface does not take the daemon down; the
            // orchestrator can retry over the control socket.
            error!(interface = %name, error = %e, "interface setup failed");
        }
    }

    let _ = std::fs::remove_file(&cfg.daemon.control_socket);
    let listener = UnixListener::bind(&cfg.daemon.control_socket)
        .map_err(|e| format!("Failed to bind {}: {}", cfg.daemon.control_socket.display(), e))?;
    let (ctrl_tx, mut ctrl_rx) = mpsc::channel(16);
    tokio::task::spawn_local(control::serve(listener, ctrl_tx, notify_rx));

    let mut snoop_socket = SnoopSocket::bind(&cfg.daemon.snoop_device).map_err(|e| {
        format!(
            "Failed to open snoop device {}: {}. Run with root privileges.",
            cfg.daemon.snoop_device, e
        )
    })?;

    let mut poll_timer = tokio::time::interval(Duration::from_secs(cfg.daemon.poll_interval));
    let mut cname_timer = tokio::time::interval(Duration::from_secs(1));
    let mut buf = vec![0u8; 8192];

    info!(
        socket = %cfg.daemon.control_socket.display(),
        snoop = %cfg.daemon.snoop_device,
        "gatefilter started"
    );

    loop {
        let gc_deadline = ctx.next_gc_deadline();

        tokio::select! {
            Some((request, reply)) = ctrl_rx.recv() => {
                let response = control::dispatch(&mut ctx, request);
                let _ = reply.send(response);
            }
            result = snoop_socket.recv(&mut buf) => {
                match result {
                    Ok(len) if len > 0 => snoop::dispatch(&mut ctx, &buf[..len], Instant::now()),
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "snoop receive failed"),
                }
            }
            _ = poll_timer.tick() => {
                ctx.idle_tick(Instant::now());
            }
            _ = cname_timer.tick() => {
                ctx.cname_tick();
            }
            _ = gc_sleep(gc_deadline) => {
                ctx.whitelist_gc(Instant::now());
            }
        }
    }
}

/// Sleep until the earliest whitelist expiry; parks forever while the
/// whitelist is empty (the select loop re-arms on every iteration).
async fn gc_sleep(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending::<()>().await,
    }
}
