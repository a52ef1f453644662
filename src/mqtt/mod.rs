// mqtt/mod.rs
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::config::BrokerConfig;
use crate::error::AppError;
use crate::models::ControlSettings;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Read side of the settings channel, the seam the control loop sees.
pub trait SettingsFeed {
    /// The most recently decoded settings, or `None` if no message has ever
    /// been accepted. Never blocks the caller.
    fn latest(&self) -> Option<ControlSettings>;
    /// Unsubscribes and disconnects. Idempotent.
    fn stop(&mut self);
}

/// Single-slot, last-write-wins hand-off between the delivery task (sole
/// writer) and the control loop (sole reader). The mutex guarantees the
/// reader never sees a half-replaced value; a burst of messages collapses
/// to the newest one.
#[derive(Clone, Default)]
pub struct Mailbox {
    slot: Arc<Mutex<Option<ControlSettings>>>,
}

impl Mailbox {
    pub fn store(&self, settings: ControlSettings) {
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(settings);
    }

    pub fn latest(&self) -> Option<ControlSettings> {
        *self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Background subscriber to the control topic.
///
/// Owns the MQTT connection and a delivery task on the tokio runtime; the
/// task is the only writer of the mailbox for the whole process lifetime.
pub struct SettingsChannel {
    client: AsyncClient,
    mailbox: Mailbox,
    worker: Option<JoinHandle<()>>,
}

impl SettingsChannel {
    /// Connects to the broker and begins the background subscription.
    ///
    /// Called from the blocking control thread; the runtime handle drives
    /// the connection handshake and hosts the delivery task.
    pub fn start(cfg: &BrokerConfig, handle: &Handle) -> Result<Self, AppError> {
        let client_id = format!("roomlight-{}", Uuid::new_v4());
        let mut options = MqttOptions::new(client_id, &cfg.host, cfg.port);
        options.set_keep_alive(Duration::from_secs(60));

        let (client, mut eventloop) = AsyncClient::new(options, 16);

        handle
            .block_on(async {
                tokio::time::timeout(CONNECT_TIMEOUT, wait_for_connack(&mut eventloop)).await
            })
            .map_err(|_| {
                AppError::BrokerUnreachable("connection attempt timed out".into())
            })??;

        handle
            .block_on(client.subscribe(&cfg.topic, QoS::AtMostOnce))
            .map_err(|e| AppError::BrokerUnreachable(e.to_string()))?;
        info!(host = %cfg.host, port = cfg.port, topic = %cfg.topic, "subscribed to settings topic");

        let mailbox = Mailbox::default();
        let worker = handle.spawn(deliver(
            eventloop,
            client.clone(),
            cfg.topic.clone(),
            mailbox.clone(),
        ));

        Ok(Self {
            client,
            mailbox,
            worker: Some(worker),
        })
    }
}

impl SettingsFeed for SettingsChannel {
    fn latest(&self) -> Option<ControlSettings> {
        self.mailbox.latest()
    }

    fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = self.client.try_disconnect();
            worker.abort();
            info!("settings channel stopped");
        }
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), AppError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
            Ok(_) => {}
            Err(e) => return Err(AppError::BrokerUnreachable(e.to_string())),
        }
    }
}

async fn deliver(mut eventloop: EventLoop, client: AsyncClient, topic: String, mailbox: Mailbox) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                apply_payload(&mailbox, &publish.payload);
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                // The broker session is not persistent; renew on reconnect.
                if let Err(e) = client.subscribe(topic.clone(), QoS::AtMostOnce).await {
                    warn!(error = %e, "failed to renew subscription");
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "mqtt connection lost, retrying");
                tokio::time::sleep(RETRY_DELAY).await;
            }
        }
    }
}

/// Decode-and-store step for one inbound message. A malformed payload is
/// logged and dropped; the previously stored settings stay current.
fn apply_payload(mailbox: &Mailbox, payload: &[u8]) {
    match decode(payload) {
        Ok(settings) => {
            debug!(?settings, "settings updated");
            mailbox.store(settings);
        }
        Err(e) => warn!(error = %e, "discarding malformed settings message"),
    }
}

fn decode(payload: &[u8]) -> Result<ControlSettings, AppError> {
    let settings: ControlSettings =
        serde_json::from_slice(payload).map_err(|e| AppError::MessageDecode(e.to_string()))?;
    settings
        .validate()
        .map_err(|e| AppError::MessageDecode(e.to_string()))?;
    Ok(settings)
}
