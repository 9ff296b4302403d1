//! ---
//! ps_section: "01-core-functionality"
//! ps_subsection: "binary"
//! ps_type: "source"
//! ps_scope: "code"
//! ps_description: "Binary entrypoint for the procstream daemon."
//! ps_version: "v0.1.0"
//! ps_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use procstream_common::config::{AppConfig, LoadedAppConfig, StreamConfig};
use procstream_common::logging::init_tracing;
use procstream_core::Streamer;
use procstream_msg::{JsonLinesPublisher, PublishMetrics, Publisher, TcpPublisher};
use procstream_sim::{ProcessModel, SimulationParameters, StochasticGenerator};
use prometheus::{Encoder, Registry, TextEncoder};
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type DaemonStreamer = Streamer<StochasticGenerator, Box<dyn Publisher>>;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Replay synthetic process traces onto a pub/sub transport",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, value_name = "ADDR", help = "Override stream.broker_address")]
    broker: Option<String>,

    #[arg(long, value_name = "BASE", help = "Override stream.topic_base")]
    topic: Option<String>,

    #[arg(long, value_name = "N", help = "Override stream.max_parallel_instances")]
    parallel: Option<usize>,

    #[arg(long, value_name = "X", help = "Override stream.time_multiplier")]
    multiplier: Option<f64>,

    #[arg(long, value_enum, default_value_t = Output::Tcp, help = "Where events are published")]
    output: Output,

    #[arg(long, value_name = "SECS", help = "Stop after this many seconds")]
    duration_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Output {
    /// Newline-delimited JSON on stdout.
    Stdout,
    /// Newline-delimited JSON frames to the broker address.
    Tcp,
}

impl Cli {
    fn config_candidates(&self) -> Vec<PathBuf> {
        let mut candidates = Vec::new();
        if let Some(path) = &self.config {
            candidates.push(path.clone());
        }
        candidates.push(PathBuf::from("configs/procstream.toml"));
        candidates
    }

    fn apply_overrides(&self, stream: &mut StreamConfig) {
        if let Some(broker) = &self.broker {
            stream.broker_address = broker.clone();
        }
        if let Some(topic) = &self.topic {
            stream.topic_base = topic.clone();
        }
        if let Some(parallel) = self.parallel {
            stream.max_parallel_instances = parallel;
        }
        if let Some(multiplier) = self.multiplier {
            stream.time_multiplier = multiplier;
        }
    }
}

fn build_publisher(output: Output, stream: &StreamConfig) -> Box<dyn Publisher> {
    match output {
        Output::Stdout => Box::new(JsonLinesPublisher::new(
            stream.topic_base.clone(),
            std::io::stdout(),
        )),
        Output::Tcp => Box::new(TcpPublisher::new(
            stream.broker_address.clone(),
            stream.topic_base.clone(),
        )),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let loaded = AppConfig::load_with_source(&cli.config_candidates())?;
    let mut config = loaded.config.clone();
    cli.apply_overrides(&mut config.stream);
    config
        .stream
        .validate()
        .context("invalid stream settings after command-line overrides")?;
    init_tracing("procstreamd", &config.logging)?;
    info!(
        config_path = %loaded.source.display(),
        process = %config.process.name,
        broker = %config.stream.broker_address,
        output = ?cli.output,
        "configuration loaded"
    );

    let model = ProcessModel::from_path(&loaded.resolve(&config.process.model))?;
    let params = SimulationParameters::from_config(&config.simulation)
        .context("invalid simulation.case_id_pattern")?;
    let generator = StochasticGenerator::from_parameters(&params);
    let drift = load_drift(&loaded)?;
    let publisher = build_publisher(cli.output, &config.stream);

    let registry = Registry::new();
    let streamer: Arc<DaemonStreamer> = Arc::new(
        Streamer::new(
            config.stream.clone(),
            config.process.name.clone(),
            model,
            params,
            generator,
            publisher,
        )?
        .with_metrics(PublishMetrics::register(&registry)?),
    );
    streamer.start()?;

    let drift_task = drift.map(|(after, model)| schedule_drift(after, model, &streamer));

    wait_for_shutdown(cli.duration_secs.map(Duration::from_secs)).await?;
    if let Some(task) = drift_task {
        task.abort();
    }

    let stopper = Arc::clone(&streamer);
    tokio::task::spawn_blocking(move || stopper.stop()).await?;

    let stats = streamer.stats();
    info!(
        traces_generated = stats.traces_generated,
        events_streamed = stats.events_streamed,
        events_dropped = stats.events_dropped,
        pending_events = stats.pending_events,
        "final stream statistics"
    );
    if let Some(err) = streamer.last_error() {
        warn!(error = %err, "stream halted before shutdown");
    }
    debug!(metrics = %render_metrics(&registry)?, "final publish metrics");
    Ok(())
}

/// Load the `[drift]` model up front so a bad path fails before streaming starts.
fn load_drift(loaded: &LoadedAppConfig) -> Result<Option<(Duration, ProcessModel)>> {
    let Some(drift) = &loaded.config.drift else {
        return Ok(None);
    };
    let model = ProcessModel::from_path(&loaded.resolve(&drift.model))?;
    Ok(Some((drift.after, model)))
}

/// Swap in `model` once `after` has elapsed.
fn schedule_drift(
    after: Duration,
    model: ProcessModel,
    streamer: &Arc<DaemonStreamer>,
) -> JoinHandle<()> {
    let streamer = Arc::clone(streamer);
    info!(model = %model.name, after_secs = after.as_secs(), "concept drift scheduled");
    tokio::spawn(async move {
        tokio::time::sleep(after).await;
        let name = model.name.clone();
        let swap = tokio::task::spawn_blocking(move || streamer.update_process(Some(model)));
        match swap.await {
            Ok(()) => info!(model = %name, "concept drift applied"),
            Err(err) => warn!(error = %err, "concept drift task failed"),
        }
    })
}

async fn wait_for_shutdown(duration: Option<Duration>) -> Result<()> {
    let deadline = async {
        match duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending().await,
        }
    };
    tokio::select! {
        result = signal::ctrl_c() => {
            result?;
            info!("ctrl-c received; shutting down");
        }
        _ = deadline => info!("run duration elapsed; shutting down"),
    }
    Ok(())
}

fn render_metrics(registry: &Registry) -> Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
