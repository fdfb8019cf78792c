//! person_detector - classify camera images for people and report occupancy
//! to Home Assistant.
//!
//! Configuration comes from the add-on options file (`$DETECTOR_CONFIG` or
//! `/data/options.json`), then the environment, then built-in defaults.
//! Command-line flags override all three.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};

use person_detector::config::{BackendKind, DetectorConfig, SinkKind, SourceKind};
use person_detector::controller::DetectionController;
use person_detector::detect::{EdgeImpulseApiBackend, FallbackClassifier, RunnerBackend};
use person_detector::ingest::{CameraProxySource, TopicRouter};
use person_detector::sink::{HomeAssistantSink, MqttStateSink, StateSink};
use person_detector::transport::{client_id, MqttSession, INBOX_CAPACITY};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Detect people in camera images and publish occupancy to Home Assistant"
)]
struct Args {
    /// Options file to load instead of $DETECTOR_CONFIG / /data/options.json.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Camera entity id, e.g. camera.front_door.
    #[arg(long)]
    camera: Option<String>,

    /// Confidence threshold in 0.0..=1.0.
    #[arg(long)]
    confidence: Option<f64>,

    /// Seconds between pull-mode cycles.
    #[arg(long)]
    interval: Option<u64>,

    /// Image source: camera_proxy or mqtt.
    #[arg(long, value_name = "SOURCE")]
    source: Option<SourceKind>,

    /// Inference backend: auto, edge_impulse_api, runner or simulation.
    #[arg(long, value_name = "BACKEND")]
    backend: Option<BackendKind>,

    /// State sink: home_assistant or mqtt.
    #[arg(long, value_name = "SINK")]
    sink: Option<SinkKind>,
}

impl Args {
    fn apply(&self, cfg: &mut DetectorConfig) {
        if let Some(camera) = &self.camera {
            cfg.camera_entity = camera.clone();
        }
        if let Some(confidence) = self.confidence {
            cfg.confidence_threshold = confidence;
        }
        if let Some(interval) = self.interval {
            cfg.scan_interval = std::time::Duration::from_secs(interval);
        }
        if let Some(source) = self.source {
            cfg.source = source;
        }
        if let Some(backend) = self.backend {
            cfg.backend = backend;
        }
        if let Some(sink) = self.sink {
            cfg.sink = sink;
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = match &args.config {
        Some(path) => DetectorConfig::read_from(Some(path.as_path()))?,
        None => DetectorConfig::read()?,
    };
    args.apply(&mut cfg);
    cfg.validate()?;
    cfg.log_summary();

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            shutdown.store(true, Ordering::SeqCst);
        })
        .context("failed to install Ctrl-C handler")?;
    }

    let mut classifier = build_classifier(&cfg)?;
    classifier.warm_up()?;
    log::info!("inference backend: {}", classifier.primary_name());

    let (inbox, inbox_rx) = if cfg.source == SourceKind::Mqtt {
        let (tx, rx) = mpsc::sync_channel(INBOX_CAPACITY);
        (Some((TopicRouter::new(&cfg.topics), tx)), Some(rx))
    } else {
        (None, None)
    };
    let session = if cfg.source == SourceKind::Mqtt || cfg.sink == SinkKind::Mqtt {
        Some(MqttSession::connect(
            &cfg.mqtt,
            &client_id(),
            inbox,
            shutdown.clone(),
        )?)
    } else {
        None
    };

    let sink: Box<dyn StateSink> = match cfg.sink {
        SinkKind::HomeAssistant => Box::new(HomeAssistantSink::new(
            &cfg.home_assistant,
            cfg.request_timeout,
        )?),
        SinkKind::Mqtt => {
            let session = session
                .as_ref()
                .ok_or_else(|| anyhow!("MQTT sink selected without an MQTT session"))?;
            Box::new(MqttStateSink::new(session.client(), &cfg.topics))
        }
    };

    let mut controller = DetectionController::new(classifier, sink, cfg.scan_interval);
    match (cfg.source, inbox_rx) {
        (SourceKind::Mqtt, Some(rx)) => controller.run_push(&rx, &shutdown),
        (SourceKind::Mqtt, None) => return Err(anyhow!("MQTT source without an inbox")),
        (SourceKind::CameraProxy, _) => {
            let mut source = CameraProxySource::new(
                &cfg.home_assistant.api_url,
                &cfg.camera_entity,
                cfg.home_assistant.token.clone(),
                cfg.request_timeout,
            )?;
            log::info!("pulling images from {}", source.url());
            controller.run_pull(&mut source, &shutdown);
        }
    }

    shutdown.store(true, Ordering::SeqCst);
    if let Some(session) = session {
        if let Err(e) = session.disconnect() {
            log::warn!("MQTT disconnect failed: {}", e);
        }
    }
    log::info!("person detector stopped");
    Ok(())
}

fn build_classifier(cfg: &DetectorConfig) -> Result<FallbackClassifier> {
    let classifier = match cfg.effective_backend() {
        BackendKind::EdgeImpulseApi => match cfg.edge_impulse.api_key.as_deref() {
            Some(key) => FallbackClassifier::with_primary(
                EdgeImpulseApiBackend::new(&cfg.edge_impulse.classify_url, key, cfg.request_timeout)
                    .with_threshold(cfg.confidence_threshold),
            ),
            None => {
                log::warn!("edge_impulse_api backend selected without an API key, using simulation");
                FallbackClassifier::simulation_only()
            }
        },
        BackendKind::Runner => FallbackClassifier::with_primary(RunnerBackend::new(
            cfg.edge_impulse.runner_path.clone(),
            cfg.edge_impulse.model_path.clone(),
            cfg.inference_timeout,
        )?),
        BackendKind::Simulation | BackendKind::Auto => FallbackClassifier::simulation_only(),
    };
    Ok(classifier)
}
