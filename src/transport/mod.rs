//! Frame queue transport over MQTT.

mod mqtt;
mod tls;

pub use mqtt::{MqttFrameQueue, MqttQueueOptions};
pub use tls::{parse_mqtt_endpoint, MqttEndpoint, TlsMaterials};
