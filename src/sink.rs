use std::sync::{Arc, Mutex};

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::protocol::{AtmosphericSample, GroundGpsPacket};

/// Downstream publishing seam (MQTT on the device). `publish` reports
/// delivery; a `false` return is logged and counted, never fatal. The
/// sample goes out again on a later cycle.
pub trait TelemetrySink {
    fn publish(&mut self, topic: &str, payload: &str) -> bool;
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("telemetry payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Atmospheric sample as published downstream, in engineering units.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AtmosphericReading {
    pub node_id: u8,
    pub temperature: f32,
    pub moisture: f32,
}

impl AtmosphericReading {
    pub fn from_sample(node_id: u8, sample: &AtmosphericSample) -> Self {
        Self {
            node_id,
            temperature: f32::from(sample.temp) / 10.0,
            moisture: f32::from(sample.moisture) / 10.0,
        }
    }

    pub fn to_json(&self) -> Result<String, SinkError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Ground/GPS/energy packet as published downstream.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroundReading {
    pub node_id: u8,
    pub temperature: f32,
    pub moisture: f32,
    pub n: u16,
    pub p: u16,
    pub k: u16,
    pub ec: u16,
    pub ph: f32,
    pub volt: f32,
    pub latitude: f64,
    pub longitude: f64,
}

impl GroundReading {
    pub fn from_packet(node_id: u8, packet: &GroundGpsPacket) -> Self {
        Self {
            node_id,
            temperature: f32::from(packet.ground.temp) / 10.0,
            moisture: f32::from(packet.ground.moisture) / 10.0,
            n: packet.ground.n,
            p: packet.ground.p,
            k: packet.ground.k,
            ec: packet.ground.ec,
            ph: f32::from(packet.ground.ph) / 10.0,
            volt: f32::from(packet.energy.volt) / 100.0,
            latitude: f64::from(packet.gps.latitude) / 1e7,
            longitude: f64::from(packet.gps.longitude) / 1e7,
        }
    }

    pub fn to_json(&self) -> Result<String, SinkError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Collecting sink for tests and simulation; clones share the buffer so a
/// handle stays usable after the coordinator takes ownership of its twin.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    messages: Arc<Mutex<Vec<(String, String)>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<(String, String)> {
        self.messages.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TelemetrySink for MemorySink {
    fn publish(&mut self, topic: &str, payload: &str) -> bool {
        self.messages
            .lock()
            .unwrap()
            .push((topic.to_owned(), payload.to_owned()));
        true
    }
}

/// Sink that forwards every payload to the tracing pipeline; stands in
/// for the MQTT client in the simulator.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl TelemetrySink for LogSink {
    fn publish(&mut self, topic: &str, payload: &str) -> bool {
        info!(topic, %payload, "telemetry published");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{EnergyData, GpsSensor, GroundSensor};

    #[test]
    fn atmospheric_reading_scales_units() {
        let sample = AtmosphericSample {
            temp: 215,
            moisture: 678,
            hour: 9,
            minute: 30,
        };
        let reading = AtmosphericReading::from_sample(0x10, &sample);
        let json = reading.to_json().unwrap();
        assert!(json.contains("\"nodeId\":16"));
        assert!(json.contains("\"temperature\":21.5"));
        assert!(json.contains("\"moisture\":67.8"));
    }

    #[test]
    fn ground_reading_scales_units() {
        let packet = GroundGpsPacket {
            ground: GroundSensor {
                temp: -15,
                moisture: 432,
                n: 120,
                p: 45,
                k: 310,
                ec: 1480,
                ph: 65,
            },
            gps: GpsSensor {
                latitude: -340_000_000,
                longitude: 1_505_000_000,
                ..GpsSensor::default()
            },
            energy: EnergyData { volt: 333, amp: 12 },
        };
        let reading = GroundReading::from_packet(0x2A, &packet);
        let json = reading.to_json().unwrap();
        assert!(json.contains("\"nodeId\":42"));
        assert!(json.contains("\"temperature\":-1.5"));
        assert!(json.contains("\"ph\":6.5"));
        assert!(json.contains("\"volt\":3.33"));
        assert!(json.contains("\"latitude\":-34"));
        assert!(json.contains("\"longitude\":150.5"));
    }

    #[test]
    fn memory_sink_clones_share_messages() {
        let sink = MemorySink::new();
        let mut writer = sink.clone();
        assert!(writer.publish("sensor/atmospheric", "{}"));
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.messages()[0].0, "sensor/atmospheric");
    }
}
