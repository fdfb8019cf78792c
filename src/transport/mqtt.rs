use rumqttc::v5::{mqttbytes::QoS, Client, Connection, Event, Incoming, MqttOptions};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::tls::MqttEndpoint;
use crate::config::MqttSettings;
use crate::error::BridgeError;
use crate::ingest::{InboundMessage, TopicRouter};

const KEEP_ALIVE: Duration = Duration::from_secs(60);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const REQUEST_CAPACITY: usize = 10;
/// Pending inbound messages the consumer may lag behind by.
pub const INBOX_CAPACITY: usize = 4;

/// Client id in the `ha-person-detector-<unix-seconds>` form.
pub fn client_id() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("ha-person-detector-{}", secs)
}

/// Connected MQTT client plus the thread that drives its event loop.
///
/// Inbound publishes on routed topics are forwarded, in arrival order, to
/// the bounded inbox channel. Images are dropped while the inbox is full;
/// switch messages wait for room. The pump re-subscribes after every
/// reconnect.
pub struct MqttSession {
    client: Client,
    endpoint: MqttEndpoint,
    pump: Option<JoinHandle<()>>,
}

impl MqttSession {
    /// Connect, retrying up to `connect_retries` times 5s apart.
    ///
    /// Exhausting the retries is a fatal `Config` error.
    pub fn connect(
        settings: &MqttSettings,
        client_id: &str,
        inbox: Option<(TopicRouter, SyncSender<InboundMessage>)>,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self, BridgeError> {
        let endpoint =
            MqttEndpoint::from_settings(settings).map_err(|e| BridgeError::Config(e.to_string()))?;
        let transport = endpoint
            .transport(settings.tls_ca_path.as_deref())
            .map_err(|e| BridgeError::Config(e.to_string()))?;

        let mut options = MqttOptions::new(client_id, &endpoint.host, endpoint.port);
        options.set_keep_alive(KEEP_ALIVE);
        options.set_clean_start(true);
        if let Some(user) = settings.username.as_deref() {
            options.set_credentials(user, settings.password.as_deref().unwrap_or_default());
        }
        options.set_transport(transport);

        log::info!(
            "connecting to MQTT broker at {}:{} (TLS: {}, auth: {})",
            endpoint.host,
            endpoint.port,
            endpoint.use_tls,
            settings.username.is_some()
        );
        let (client, mut connection) = Client::new(options, REQUEST_CAPACITY);
        await_connack(&mut connection, &endpoint, settings.connect_retries.max(1), &shutdown)?;
        log::info!("connected to MQTT broker");

        let subscriptions = inbox
            .as_ref()
            .map(|(router, _)| router.subscriptions())
            .unwrap_or_default();
        for topic in &subscriptions {
            client
                .subscribe(topic.clone(), QoS::AtMostOnce)
                .map_err(|e| BridgeError::transport(topic, e))?;
            log::info!("subscribed to {}", topic);
        }

        let pump_client = client.clone();
        let pump = std::thread::Builder::new()
            .name("mqtt-pump".into())
            .spawn(move || pump(connection, pump_client, subscriptions, inbox, shutdown))
            .map_err(|e| BridgeError::Config(format!("failed to spawn MQTT thread: {}", e)))?;

        Ok(Self {
            client,
            endpoint,
            pump: Some(pump),
        })
    }

    /// Handle for publishing; clones share the same connection.
    pub fn client(&self) -> Client {
        self.client.clone()
    }

    pub fn endpoint(&self) -> &MqttEndpoint {
        &self.endpoint
    }

    /// Send DISCONNECT and wait for the event loop thread to finish.
    pub fn disconnect(mut self) -> Result<(), BridgeError> {
        let endpoint = format!("{}:{}", self.endpoint.host, self.endpoint.port);
        self.client
            .disconnect()
            .map_err(|e| BridgeError::transport(endpoint, e))?;
        if let Some(handle) = self.pump.take() {
            let _ = handle.join();
        }
        log::info!("MQTT connection released");
        Ok(())
    }
}

fn await_connack(
    connection: &mut Connection,
    endpoint: &MqttEndpoint,
    max_attempts: u32,
    shutdown: &AtomicBool,
) -> Result<(), BridgeError> {
    let mut failures = 0u32;
    for event in connection.iter() {
        match event {
            Ok(Event::Incoming(Incoming::ConnAck(_))) => return Ok(()),
            Ok(_) => {}
            Err(e) => {
                failures += 1;
                if failures >= max_attempts || shutdown.load(Ordering::SeqCst) {
                    return Err(BridgeError::Config(format!(
                        "MQTT broker {}:{} unreachable after {} attempts: {}",
                        endpoint.host, endpoint.port, failures, e
                    )));
                }
                log::warn!(
                    "MQTT connect attempt {}/{} failed: {}. Retrying in {}s",
                    failures,
                    max_attempts,
                    e,
                    RECONNECT_DELAY.as_secs()
                );
                std::thread::sleep(RECONNECT_DELAY);
            }
        }
    }
    Err(BridgeError::Config(format!(
        "MQTT connection to {}:{} closed before acknowledgement",
        endpoint.host, endpoint.port
    )))
}

fn pump(
    mut connection: Connection,
    client: Client,
    subscriptions: Vec<String>,
    inbox: Option<(TopicRouter, SyncSender<InboundMessage>)>,
    shutdown: Arc<AtomicBool>,
) {
    for event in connection.iter() {
        match event {
            Ok(Event::Incoming(Incoming::Publish(publish))) => {
                let Some((router, tx)) = inbox.as_ref() else {
                    continue;
                };
                let topic = match std::str::from_utf8(&publish.topic) {
                    Ok(topic) => topic,
                    Err(e) => {
                        log::warn!("skipping publish with invalid topic: {}", e);
                        continue;
                    }
                };
                let Some(message) = router.route(topic, &publish.payload) else {
                    continue;
                };
                if !forward(tx, message) {
                    log::debug!("inbox closed, stopping MQTT pump");
                    break;
                }
            }
            Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                log::info!("MQTT reconnected, restoring subscriptions");
                for topic in &subscriptions {
                    if let Err(e) = client.try_subscribe(topic.clone(), QoS::AtMostOnce) {
                        log::error!("failed to resubscribe to {}: {}", topic, e);
                    }
                }
            }
            Ok(_) => {}
            Err(e) => {
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
                log::warn!(
                    "unexpected MQTT disconnection: {}. Reconnecting in {}s",
                    e,
                    RECONNECT_DELAY.as_secs()
                );
                std::thread::sleep(RECONNECT_DELAY);
            }
        }
    }
}

/// Hand a routed message to the consumer. Returns false once the inbox is gone.
fn forward(tx: &SyncSender<InboundMessage>, message: InboundMessage) -> bool {
    match message {
        InboundMessage::Image(_) => match tx.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::warn!("detector busy, dropping inbound image");
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        },
        toggle => tx.send(toggle).is_ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn client_id_has_expected_prefix() {
        let id = client_id();
        assert!(id.starts_with("ha-person-detector-"));
        assert!(id["ha-person-detector-".len()..].parse::<u64>().is_ok());
    }

    #[test]
    fn unreachable_broker_fails_after_retries() {
        let settings = MqttSettings {
            broker: "127.0.0.1".into(),
            port: 9,
            username: None,
            password: None,
            use_tls: false,
            tls_ca_path: None,
            connect_retries: 1,
        };
        let shutdown = Arc::new(AtomicBool::new(false));
        let err = MqttSession::connect(&settings, "test-client", None, shutdown)
            .err()
            .expect("closed port must fail");
        assert!(err.is_fatal());
        assert!(err.to_string().contains("unreachable"));
    }

    #[test]
    fn full_inbox_drops_images_but_keeps_switches() {
        let (tx, rx) = mpsc::sync_channel(2);
        assert!(forward(&tx, InboundMessage::Image(b"a".to_vec())));
        assert!(forward(&tx, InboundMessage::Image(b"b".to_vec())));
        assert!(forward(&tx, InboundMessage::Image(b"c".to_vec())));

        let consumer = std::thread::spawn(move || rx.iter().collect::<Vec<_>>());
        assert!(forward(&tx, InboundMessage::DetectionToggle(false)));
        drop(tx);

        let received = consumer.join().unwrap();
        assert_eq!(
            received,
            vec![
                InboundMessage::Image(b"a".to_vec()),
                InboundMessage::Image(b"b".to_vec()),
                InboundMessage::DetectionToggle(false),
            ]
        );
    }

    #[test]
    fn closed_inbox_stops_forwarding() {
        let (tx, rx) = mpsc::sync_channel(1);
        drop(rx);
        assert!(!forward(&tx, InboundMessage::Image(b"a".to_vec())));
        assert!(!forward(&tx, InboundMessage::UploadToggle(true)));
    }
}
