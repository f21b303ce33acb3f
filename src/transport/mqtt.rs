use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use rumqttc::v5::mqttbytes::v5::Publish;
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{Client, Connection, Event, Incoming, MqttOptions};

use crate::config::BrokerSettings;
use crate::consumer::{AckPolicy, FrameDelivery, FrameQueue};

use super::tls::{parse_mqtt_endpoint, MqttEndpoint, TlsMaterials};

const REQUEST_CHANNEL_CAPACITY: usize = 10;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_millis(500);

impl FrameDelivery for Publish {
    fn payload(&self) -> &[u8] {
        &self.payload
    }
}

/// Everything needed to (re)open the broker session.
#[derive(Clone, Debug)]
pub struct MqttQueueOptions {
    pub endpoint: MqttEndpoint,
    pub tls: TlsMaterials,
    pub topic: String,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
    pub max_payload_bytes: usize,
    pub ack_policy: AckPolicy,
}

impl MqttQueueOptions {
    pub fn from_settings(settings: &BrokerSettings, ack_policy: AckPolicy) -> Result<Self> {
        let endpoint = parse_mqtt_endpoint(&settings.addr, settings.use_tls)?;
        let tls = TlsMaterials::load(
            settings.tls_ca_path.as_deref(),
            settings.tls_client_cert_path.as_deref(),
            settings.tls_client_key_path.as_deref(),
        )?;
        Ok(Self {
            endpoint,
            tls,
            topic: settings.topic.clone(),
            client_id: settings.client_id.clone(),
            username: settings.username.clone(),
            password: settings.password.clone(),
            keep_alive: Duration::from_secs(settings.keep_alive_secs),
            max_payload_bytes: settings.max_payload_bytes,
            ack_policy,
        })
    }

    fn qos(&self) -> QoS {
        match self.ack_policy {
            AckPolicy::OnReceipt => QoS::AtMostOnce,
            AckPolicy::AfterProcessing => QoS::AtLeastOnce,
        }
    }
}

/// Subscribes to the frame topic and hands publishes to the consumer.
///
/// With `AckPolicy::AfterProcessing` the session is persistent and acks are
/// manual. The broker redelivers unacked frames only on a new connection,
/// which the consumer opens after a detection failure. Otherwise frames are
/// QoS 0 and gone once received.
pub struct MqttFrameQueue {
    options: MqttQueueOptions,
    session: Option<(Client, Connection)>,
}

impl MqttFrameQueue {
    pub fn new(options: MqttQueueOptions) -> Self {
        Self {
            options,
            session: None,
        }
    }

    pub fn options(&self) -> &MqttQueueOptions {
        &self.options
    }

    fn mqtt_options(&self) -> Result<MqttOptions> {
        let o = &self.options;
        let mut options = MqttOptions::new(&o.client_id, &o.endpoint.host, o.endpoint.port);
        options.set_keep_alive(o.keep_alive);
        let persistent = o.ack_policy == AckPolicy::AfterProcessing;
        options.set_clean_start(!persistent);
        options.set_manual_acks(persistent);
        let max_packet = u32::try_from(o.max_payload_bytes)
            .context("max_payload_bytes does not fit an MQTT packet size")?;
        options.set_max_packet_size(Some(max_packet));
        if let Some(user) = o.username.as_deref() {
            options.set_credentials(user, o.password.as_deref().unwrap_or_default());
        }
        options.set_transport(o.tls.build_transport(&o.endpoint)?);
        Ok(options)
    }
}

impl FrameQueue for MqttFrameQueue {
    type Delivery = Publish;

    fn connect(&mut self) -> Result<()> {
        self.disconnect();
        let (client, mut connection) = Client::new(self.mqtt_options()?, REQUEST_CHANNEL_CAPACITY);
        client
            .subscribe(self.options.topic.as_str(), self.options.qos())
            .context("failed to queue frame topic subscription")?;

        let deadline = Instant::now() + CONNECT_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(anyhow!(
                    "timed out connecting to broker {}:{}",
                    self.options.endpoint.host,
                    self.options.endpoint.port
                ));
            }
            match connection.recv_timeout(remaining) {
                Ok(Ok(Event::Incoming(Incoming::ConnAck(_)))) => break,
                Ok(Ok(_)) => {}
                Ok(Err(e)) => return Err(anyhow!("broker connection failed: {}", e)),
                // Timed out waiting; the deadline check above decides.
                Err(_) => {}
            }
        }

        log::info!(
            "connected to broker {}:{} (TLS: {}, auth: {}), consuming '{}' at {:?}",
            self.options.endpoint.host,
            self.options.endpoint.port,
            self.options.endpoint.use_tls,
            self.options.username.is_some(),
            self.options.topic,
            self.options.qos()
        );
        self.session = Some((client, connection));
        Ok(())
    }

    fn recv(&mut self) -> Result<Option<Publish>> {
        let (_, connection) = self
            .session
            .as_mut()
            .ok_or_else(|| anyhow!("frame queue is not connected"))?;
        match connection.recv_timeout(POLL_INTERVAL) {
            Ok(Ok(Event::Incoming(Incoming::Publish(publish)))) => Ok(Some(publish)),
            Ok(Ok(Event::Incoming(Incoming::Disconnect(_)))) => {
                Err(anyhow!("broker sent disconnect"))
            }
            Ok(Ok(_)) | Err(_) => Ok(None),
            Ok(Err(e)) => Err(anyhow!("broker connection error: {}", e)),
        }
    }

    fn ack(&mut self, delivery: &Publish) -> Result<()> {
        if self.options.ack_policy != AckPolicy::AfterProcessing {
            return Ok(());
        }
        let (client, _) = self
            .session
            .as_ref()
            .ok_or_else(|| anyhow!("frame queue is not connected"))?;
        client.ack(delivery).context("failed to queue frame ack")?;
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some((client, _connection)) = self.session.take() {
            if let Err(e) = client.try_disconnect() {
                log::debug!("broker disconnect request failed: {}", e);
            }
        }
    }
}
