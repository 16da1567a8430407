use clap::Parser;
use frigate_analyzer::config::{ConfigProvider, SharedConfig};
use frigate_analyzer::coordinator::CoordinatorBuilder;
use frigate_analyzer::error::AppError;
use frigate_analyzer::intake::MqttEventSource;
use frigate_analyzer::pipeline::services::{
    GeminiClient, HttpClipRetriever, LogSink, MqttResultSink, ResultSink,
};
use frigate_analyzer::pipeline::{FfmpegDecoder, SampledFrameExtractor, SamplingPolicy};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "frigate-analyzer", about = "Second-opinion analysis of Frigate events")]
struct Cli {
    /// Configuration file, `ANALYZER__*` environment variables override it.
    #[arg(short, long, default_value = "analyzer.toml")]
    config: PathBuf,

    /// Log results instead of publishing them.
    #[arg(long)]
    dry_run: bool,
}

fn init_logging(debug: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "info" }));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let cli = Cli::parse();
    let config = Arc::new(SharedConfig::from_file(&cli.config)?);
    let settings = config.current();
    init_logging(settings.debug);
    info!(config = %cli.config.display(), dry_run = cli.dry_run, "Starting frigate-analyzer");

    for rule in settings.filters.rules() {
        info!(
            camera = ?rule.camera(),
            labels = ?rule.labels().collect::<Vec<_>>(),
            "Filter rule loaded"
        );
    }

    let pipeline = &settings.pipeline;
    let retriever = HttpClipRetriever::new(&settings.frigate_url, pipeline.download_timeout())?;
    let extractor = SampledFrameExtractor::new(
        FfmpegDecoder::new(&pipeline.ffmpeg_path, &pipeline.ffprobe_path)
            .with_timeout(pipeline.ffmpeg_timeout()),
        SamplingPolicy::new(pipeline.sample_fps, pipeline.min_clip()),
    );
    let inference = GeminiClient::new(&settings.gemini)?;
    let sink: Arc<dyn ResultSink> = if cli.dry_run {
        Arc::new(LogSink::new(&settings.mqtt.detected_field))
    } else {
        Arc::new(MqttResultSink::connect(&settings.mqtt))
    };
    let source = MqttEventSource::new(&settings.mqtt, settings.intake.queue_capacity);

    let mut coordinator = CoordinatorBuilder::new(config.clone())
        .source(Box::new(source))
        .retriever(Arc::new(retriever))
        .extractor(Arc::new(extractor))
        .inference(Arc::new(inference))
        .sink(sink)
        .build()?;

    #[cfg(unix)]
    let reload_task = {
        use tokio::signal::unix::{SignalKind, signal};
        let config = config.clone();
        let mut hangup = signal(SignalKind::hangup())?;
        tokio::spawn(async move {
            while hangup.recv().await.is_some() {
                info!(source = ?config.source(), "SIGHUP received, reloading configuration");
                if let Err(e) = config.reload_from_source() {
                    error!("Configuration reload failed: {}", e);
                }
            }
        })
    };

    tokio::select! {
        _ = coordinator.wait() => info!("Event source closed"),
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Shutdown requested");
        }
    }

    #[cfg(unix)]
    reload_task.abort();
    coordinator.shutdown().await;
    Ok(())
}
