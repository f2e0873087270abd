/*!
# rtl2mqtt DevKit - Test stubs and helpers

Makes it possible to exercise the bridge without a broker or an SDR dongle:
- Recording MQTT client stub
- rtl_433-shaped reading builders
- Fake decoder scripts with a chosen output and exit code
- Assertion harness over published messages
*/

pub mod mqtt_stub;
pub mod test_utils;

pub use mqtt_stub::{MockMessage, MockMqttClient, ReadingBuilder};
pub use test_utils::{FakeDecoder, FakeDecoderScript, TestHarness, TestStats};
