//! Detection controller.
//!
//! Drives one image at a time through fetch -> classify -> debounce ->
//! publish. Two entry shapes share the same cycle:
//!
//! - Pull: [`DetectionController::run_pull`] polls an [`ImageSource`] and
//!   sleeps `scan_interval` between cycles. The next fetch never starts
//!   before the previous publish has finished.
//! - Push: [`DetectionController::run_push`] consumes [`InboundMessage`]s
//!   from a channel. There is exactly one consumer, so the flags need no
//!   locking. Everything pending is drained at once: switch messages are
//!   applied first and only the newest pending image is classified.
//!
//! Failed cycles never touch the published state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use crate::detect::{ClassifiedBy, DetectionResult, FallbackClassifier};
use crate::ingest::{decode_image_payload, ImageSource, InboundMessage};
use crate::sink::StateSink;

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(60);
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// Mutable controller state for the process lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ControllerState {
    /// Last published occupancy; `None` until the first publish.
    pub last_published: Option<bool>,
    pub detection_active: bool,
    pub upload_active: bool,
}

impl Default for ControllerState {
    fn default() -> Self {
        Self {
            last_published: None,
            detection_active: true,
            upload_active: false,
        }
    }
}

impl ControllerState {
    /// First result always publishes; afterwards only changes do.
    pub fn should_publish(&self, result: &DetectionResult) -> bool {
        self.last_published != Some(result.person_detected)
    }
}

/// Counters reported in the periodic health line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ControllerStats {
    pub cycles: u64,
    pub classified: u64,
    pub published: u64,
    pub debounced: u64,
    pub missed_images: u64,
    pub undecodable: u64,
    pub dropped_disabled: u64,
    pub superseded: u64,
    pub fallbacks: u64,
}

/// What happened to one image, fetch tick or inbound message.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CycleOutcome {
    /// Occupancy changed (or first run): both values were published.
    Published(DetectionResult),
    /// Same occupancy as last published: nothing was written.
    Unchanged(DetectionResult),
    /// Fetch produced nothing; retried next tick.
    NoImage,
    /// Image payload could not be decoded.
    Undecodable,
    /// Detection is switched off; no fetch or classification happened.
    Disabled,
    /// A switch message updated the flags.
    Toggled,
}

pub struct DetectionController {
    classifier: FallbackClassifier,
    sink: Box<dyn StateSink>,
    state: ControllerState,
    stats: ControllerStats,
    scan_interval: Duration,
    last_health_log: Instant,
}

impl DetectionController {
    pub fn new(
        classifier: FallbackClassifier,
        sink: Box<dyn StateSink>,
        scan_interval: Duration,
    ) -> Self {
        Self {
            classifier,
            sink,
            state: ControllerState::default(),
            stats: ControllerStats::default(),
            scan_interval,
            last_health_log: Instant::now(),
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn stats(&self) -> ControllerStats {
        ControllerStats {
            fallbacks: self.classifier.fallback_count(),
            ..self.stats
        }
    }

    pub fn set_detection_active(&mut self, active: bool) {
        self.state.detection_active = active;
        log::info!(
            "person detection turned {}",
            if active { "ON" } else { "OFF" }
        );
    }

    pub fn set_upload_active(&mut self, active: bool) {
        self.state.upload_active = active;
        log::info!(
            "training data upload turned {}",
            if active { "ON" } else { "OFF" }
        );
    }

    /// Classify one image, then publish unless debounced.
    pub fn process_image(&mut self, image: &[u8]) -> CycleOutcome {
        let (result, by) = self.classifier.classify(image);
        self.stats.classified += 1;
        if by == ClassifiedBy::Simulation && self.stats.classified == 1 {
            log::info!("no inference credential configured, using simulation mode");
        }

        if !self.state.should_publish(&result) {
            self.stats.debounced += 1;
            log::debug!(
                "state unchanged (person={}), skipping publish",
                result.person_detected
            );
            return CycleOutcome::Unchanged(result);
        }

        self.sink.publish(&result);
        self.state.last_published = Some(result.person_detected);
        self.stats.published += 1;
        if result.person_detected {
            log::info!(
                "person DETECTED with {}% confidence",
                result.confidence_label()
            );
        } else {
            log::info!(
                "no person detected (confidence: {}%)",
                result.confidence_label()
            );
        }
        CycleOutcome::Published(result)
    }

    /// One pull-mode tick: fetch (when enabled) and process.
    pub fn poll_once(&mut self, source: &mut dyn ImageSource) -> CycleOutcome {
        self.stats.cycles += 1;
        if !self.state.detection_active {
            self.stats.dropped_disabled += 1;
            return CycleOutcome::Disabled;
        }
        match source.fetch() {
            Some(image) => self.process_image(&image),
            None => {
                self.stats.missed_images += 1;
                log::warn!("failed to get image from {}, will retry", source.name());
                CycleOutcome::NoImage
            }
        }
    }

    /// Handle one push-mode message.
    pub fn handle_message(&mut self, message: InboundMessage) -> CycleOutcome {
        match message {
            InboundMessage::DetectionToggle(active) => {
                self.set_detection_active(active);
                CycleOutcome::Toggled
            }
            InboundMessage::UploadToggle(active) => {
                self.set_upload_active(active);
                CycleOutcome::Toggled
            }
            InboundMessage::Image(payload) => {
                self.stats.cycles += 1;
                if self.state.upload_active {
                    log::info!(
                        "received image for training data upload ({} bytes); no uploader configured",
                        payload.len()
                    );
                }
                if !self.state.detection_active {
                    self.stats.dropped_disabled += 1;
                    log::debug!("detection disabled, dropping image");
                    return CycleOutcome::Disabled;
                }
                match decode_image_payload(&payload) {
                    Ok(image) => {
                        log::info!("received image for processing ({} bytes)", image.len());
                        self.process_image(&image)
                    }
                    Err(e) => {
                        self.stats.undecodable += 1;
                        log::warn!("dropping image message: {}", e);
                        CycleOutcome::Undecodable
                    }
                }
            }
        }
    }

    /// Pull loop. Returns once `shutdown` is set; an in-flight cycle finishes first.
    pub fn run_pull(&mut self, source: &mut dyn ImageSource, shutdown: &AtomicBool) {
        log::info!(
            "starting pull loop on {} every {}s using {}",
            source.name(),
            self.scan_interval.as_secs_f32(),
            self.classifier.primary_name()
        );
        while !shutdown.load(Ordering::SeqCst) {
            self.poll_once(source);
            self.maybe_log_health();
            sleep_unless_shutdown(self.scan_interval, shutdown);
        }
        log::info!("pull loop stopped ({:?})", self.stats());
    }

    /// Handle everything that was pending at once.
    ///
    /// Switch messages take effect before any image, whatever their position
    /// in the batch. Older images are superseded by the newest one; returns
    /// the newest image's outcome, if the batch held one.
    pub fn handle_batch(&mut self, messages: Vec<InboundMessage>) -> Option<CycleOutcome> {
        let mut newest = None;
        for message in messages {
            match message {
                InboundMessage::Image(payload) => {
                    if newest.replace(payload).is_some() {
                        self.stats.superseded += 1;
                    }
                }
                toggle => {
                    self.handle_message(toggle);
                }
            }
        }
        newest.map(|payload| self.handle_message(InboundMessage::Image(payload)))
    }

    /// Push loop. Returns on shutdown or when the transport closes the channel.
    pub fn run_push(&mut self, inbox: &Receiver<InboundMessage>, shutdown: &AtomicBool) {
        log::info!(
            "starting push loop using {}",
            self.classifier.primary_name()
        );
        while !shutdown.load(Ordering::SeqCst) {
            match inbox.recv_timeout(SHUTDOWN_POLL) {
                Ok(first) => {
                    let mut batch = vec![first];
                    batch.extend(inbox.try_iter());
                    self.handle_batch(batch);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    log::warn!("message transport closed, stopping push loop");
                    break;
                }
            }
            self.maybe_log_health();
        }
        log::info!("push loop stopped ({:?})", self.stats());
    }

    fn maybe_log_health(&mut self) {
        if self.last_health_log.elapsed() < HEALTH_LOG_INTERVAL {
            return;
        }
        let stats = self.stats();
        log::info!(
            "health: cycles={} classified={} published={} debounced={} missed={} undecodable={} disabled={} superseded={} fallbacks={} sink={}",
            stats.cycles,
            stats.classified,
            stats.published,
            stats.debounced,
            stats.missed_images,
            stats.undecodable,
            stats.dropped_disabled,
            stats.superseded,
            stats.fallbacks,
            self.sink.name()
        );
        self.last_health_log = Instant::now();
    }
}

fn sleep_unless_shutdown(total: Duration, shutdown: &AtomicBool) {
    let deadline = Instant::now() + total;
    while !shutdown.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        std::thread::sleep((deadline - now).min(SHUTDOWN_POLL));
    }
}
