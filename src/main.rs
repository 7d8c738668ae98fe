use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::Parser;
use console::style;
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use tsukuri::{FailurePolicy, Layout, Mode, Options, Runner, pipeline};

/// Front-end asset pipeline.
#[derive(Parser, Debug, Clone)]
#[command(version)]
struct Args {
    /// Task to run.
    #[arg(index = 1, default_value = "default")]
    task: String,

    /// Source root.
    #[arg(long, default_value = "src")]
    src: Utf8PathBuf,

    /// Output root.
    #[arg(long, default_value = "dist")]
    dist: Utf8PathBuf,

    /// Crop width in pixels.
    #[arg(long)]
    width: Option<u32>,

    /// Crop height in pixels.
    #[arg(long)]
    height: Option<u32>,

    /// Deployment credentials.
    #[arg(long, default_value = "ftp.json")]
    credentials: Utf8PathBuf,

    /// HTTP port for `serve`.
    #[arg(long, default_value_t = 3000)]
    port: u16,

    /// Live reload WebSocket port.
    #[arg(long, default_value_t = 1337)]
    reload_port: u16,

    /// Concurrent deploy connections.
    #[arg(long, default_value_t = 10)]
    parallel: usize,

    /// Stop a parallel task as soon as one member fails.
    #[arg(long)]
    fail_fast: bool,

    /// List the available tasks and exit.
    #[arg(long)]
    list: bool,
}

impl Args {
    fn options(&self) -> Options {
        Options {
            layout: Layout::new(self.src.clone(), self.dist.clone()),
            width: self.width,
            height: self.height,
            credentials: self.credentials.clone(),
            port: self.port,
            reload_port: self.reload_port,
            parallel: self.parallel,
            policy: if self.fail_fast {
                FailurePolicy::CancelOnFirstFailure
            } else {
                FailurePolicy::WaitForAll
            },
        }
    }
}

fn init_logging() {
    let indicatif = IndicatifLayer::new();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(indicatif.get_stderr_writer()))
        .with(indicatif)
        .init();
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {e:#}", style("error:").red().bold());
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> anyhow::Result<()> {
    let options = args.options();
    let graph = pipeline::blueprint(&options)?;

    if args.list {
        for name in graph.names() {
            println!("{name}");
        }
        return Ok(());
    }

    let Ok(handle) = graph.find(&args.task) else {
        anyhow::bail!(
            "unknown task '{}', available tasks:\n  {}",
            args.task,
            graph.names().join("\n  ")
        );
    };

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    rt.block_on(async {
        let runner = Runner::new(graph, options.environment(), options.policy);
        runner.run(handle, Mode::Development).await
    })?;

    Ok(())
}
