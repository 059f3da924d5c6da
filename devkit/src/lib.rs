/*!
# franklin-devkit - Test stubs for franklin-monitor

Helpers for exercising monitor loops without CUPS or a broker:
- Mock MQTT sink recording discovery and state messages
- Scripted lpstat answers per server/queue
- Harness running a whole fleet on paused tokio time
*/

pub mod mqtt_stub;
pub mod query_stub;
pub mod test_utils;

pub use mqtt_stub::{MockConnector, MockMessage, MockMqttClient};
pub use query_stub::{ScriptStep, ScriptedQuery};
pub use test_utils::TestHarness;
