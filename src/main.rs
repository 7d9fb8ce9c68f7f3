use clap::Parser;
use crossbeam::channel;
use log::{error, info, LevelFilter};
use poolhttpd::{Server, ServerConfig, ServerResult};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Thread-pool HTTP/1.0 static file server
#[derive(Parser, Debug)]
#[command(name = "poolhttpd", version, about)]
struct Cli {
    /// Address to listen on
    #[arg(env = "POOLHTTPD_HOST")]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "POOLHTTPD_PORT")]
    port: Option<u16>,

    /// Document root
    #[arg(short, long, env = "POOLHTTPD_ROOT")]
    root: Option<PathBuf>,

    /// Number of worker threads
    #[arg(short, long, env = "POOLHTTPD_WORKERS")]
    workers: Option<usize>,

    /// Per-connection socket timeout in seconds
    #[arg(short, long, env = "POOLHTTPD_TIMEOUT")]
    timeout: Option<f64>,

    /// JSON configuration file; flags override its values
    #[arg(short, long, env = "POOLHTTPD_CONFIG")]
    config: Option<PathBuf>,

    /// Append log output to this file instead of stderr
    #[arg(short, long, env = "POOLHTTPD_LOG")]
    log: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short = 'v', long, default_value = "info", env = "POOLHTTPD_LEVEL")]
    level: LevelFilter,
}

impl Cli {
    fn server_config(&self) -> ServerResult<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_json_file(path)?,
            None => ServerConfig::new(),
        };

        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(root) = &self.root {
            config.document_root = root.clone();
        }
        if let Some(workers) = self.workers {
            config.max_workers = workers;
        }
        if let Some(timeout) = self.timeout {
            config.connection_timeout = Duration::try_from_secs_f64(timeout).map_err(|e| {
                poolhttpd::ServerError::Config(format!("invalid timeout {}: {}", timeout, e))
            })?;
        }

        Ok(config)
    }
}

fn init_logging(cli: &Cli) -> std::io::Result<()> {
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(cli.level)
        .parse_default_env()
        .format(|buf, record| {
            let level = record.level().as_str().chars().next().unwrap_or('?');
            writeln!(
                buf,
                "[{}] {} {}",
                chrono::Local::now().format("%Y.%m.%d %H:%M:%S"),
                level,
                record.args()
            )
        });

    if let Some(path) = &cli.log {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder.init();
    Ok(())
}

fn run(cli: Cli) -> ServerResult<()> {
    let server = Arc::new(Server::new(cli.server_config()?)?);

    let (signal_tx, signal_rx) = channel::bounded(1);
    let exit_tx = signal_tx.clone();
    ctrlc::set_handler(move || {
        let _ = signal_tx.try_send(());
    })
    .map_err(|e| poolhttpd::ServerError::Config(format!("cannot install signal handler: {}", e)))?;

    let serving = server.clone();
    let accept_thread = thread::Builder::new()
        .name("accept".to_string())
        .spawn(move || {
            let result = serving.serve();
            let _ = exit_tx.try_send(());
            result
        })?;

    // Either a signal arrives or the accept loop dies on its own
    let _ = signal_rx.recv();
    server.stop();

    match accept_thread.join() {
        Ok(result) => result,
        Err(_) => Err(poolhttpd::ServerError::Connection(
            "accept thread panicked".to_string(),
        )),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = init_logging(&cli) {
        eprintln!("Cannot open log file: {}", e);
        return ExitCode::FAILURE;
    }

    match run(cli) {
        Ok(()) => {
            info!("Bye");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
