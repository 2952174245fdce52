use arrayvec::ArrayString;
use heapless::Vec;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert_eq;

/// Single-byte token carried by ANNOUNCE and both REQUEST messages.
/// Receivers drop announces whose first payload byte differs.
pub const KEY: u8 = 0x69;

/// Mesh broadcast destination. Also doubles as the "unset" sentinel for
/// persisted addresses, so it is never a valid node address.
pub const BROADCAST_ADDRESS: u8 = 0xFF;

/// Largest payload the radio mesh driver will carry in one message.
pub const MAX_PAYLOAD_LEN: usize = 245;

/// HELLO payload size: `XX:XX:XX:XX:XX:XX` plus the NUL terminator.
pub const MAC_STR_LEN: usize = 18;

pub const ATMOSPHERIC_SAMPLE_LEN: usize = 6;
pub const GROUND_SENSOR_LEN: usize = 13;
pub const GPS_SENSOR_LEN: usize = 14;
pub const ENERGY_DATA_LEN: usize = 4;
pub const GROUND_GPS_PACKET_LEN: usize =
    GROUND_SENSOR_LEN + GPS_SENSOR_LEN + ENERGY_DATA_LEN;

/// Samples buffered per node between atmospheric polls; the reply payload
/// must be exactly this many encoded samples.
pub const ATMOSPHERIC_SAMPLES_PER_NODE: usize = 8;
pub const ATMOSPHERIC_BLOCK_LEN: usize =
    ATMOSPHERIC_SAMPLE_LEN * ATMOSPHERIC_SAMPLES_PER_NODE;

/// Ground/GPS packets retained per node on the gateway.
pub const GROUND_SAMPLES_PER_NODE: usize = 2;

const_assert_eq!(GROUND_GPS_PACKET_LEN, 31);
const_assert_eq!(ATMOSPHERIC_BLOCK_LEN, 48);

pub type PayloadBuf = Vec<u8, MAX_PAYLOAD_LEN>;

/// MAC string without its wire NUL terminator.
pub type MacString = ArrayString<{ MAC_STR_LEN - 1 }>;

/// Wire tags for every message the mesh exchanges. The discriminants are
/// the on-air values and must not be reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    Announce = 0x01,
    RequestAtmospheric = 0x02,
    RequestGroundGps = 0x03,
    DataAtmospheric = 0x04,
    DataGroundGps = 0x05,
    Hello = 0x06,
    AddressError = 0x07,
}

impl MessageType {
    pub fn wire(self) -> u8 {
        self as u8
    }

    pub fn from_wire(tag: u8) -> Result<Self, ProtocolError> {
        match tag {
            0x01 => Ok(MessageType::Announce),
            0x02 => Ok(MessageType::RequestAtmospheric),
            0x03 => Ok(MessageType::RequestGroundGps),
            0x04 => Ok(MessageType::DataAtmospheric),
            0x05 => Ok(MessageType::DataGroundGps),
            0x06 => Ok(MessageType::Hello),
            0x07 => Ok(MessageType::AddressError),
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }
}

/// One buffered atmospheric measurement.
///
/// - `temp`: deci-degrees Celsius, [-400, 800]
/// - `moisture`: deci-percent relative humidity, [0, 1000]
/// - `hour`/`minute`: sample capture time, [0-23]/[0-59]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtmosphericSample {
    pub temp: i16,
    pub moisture: u16,
    pub hour: u8,
    pub minute: u8,
}

impl AtmosphericSample {
    pub fn encode(&self) -> [u8; ATMOSPHERIC_SAMPLE_LEN] {
        let mut raw = [0u8; ATMOSPHERIC_SAMPLE_LEN];
        raw[0..2].copy_from_slice(&self.temp.to_le_bytes());
        raw[2..4].copy_from_slice(&self.moisture.to_le_bytes());
        raw[4] = self.hour;
        raw[5] = self.minute;
        raw
    }

    pub fn decode(raw: &[u8]) -> Result<Self, ProtocolError> {
        expect_len(raw, ATMOSPHERIC_SAMPLE_LEN)?;
        Ok(Self {
            temp: i16::from_le_bytes([raw[0], raw[1]]),
            moisture: u16::from_le_bytes([raw[2], raw[3]]),
            hour: raw[4],
            minute: raw[5],
        })
    }
}

/// Soil probe reading (NPK/EC/pH RS485 sensor).
///
/// - `temp`: deci-degrees Celsius, [-400, 800]
/// - `moisture`: deci-percent, [0, 1000]
/// - `n`/`p`/`k`: mg/kg, [0, 1999]
/// - `ec`: electrical conductivity, µS/cm, [0, 20000]
/// - `ph`: deci-pH, [30, 90]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundSensor {
    pub temp: i16,
    pub moisture: u16,
    pub n: u16,
    pub p: u16,
    pub k: u16,
    pub ec: u16,
    pub ph: u8,
}

impl GroundSensor {
    pub fn encode(&self) -> [u8; GROUND_SENSOR_LEN] {
        let mut raw = [0u8; GROUND_SENSOR_LEN];
        raw[0..2].copy_from_slice(&self.temp.to_le_bytes());
        raw[2..4].copy_from_slice(&self.moisture.to_le_bytes());
        raw[4..6].copy_from_slice(&self.n.to_le_bytes());
        raw[6..8].copy_from_slice(&self.p.to_le_bytes());
        raw[8..10].copy_from_slice(&self.k.to_le_bytes());
        raw[10..12].copy_from_slice(&self.ec.to_le_bytes());
        raw[12] = self.ph;
        raw
    }

    pub fn decode(raw: &[u8]) -> Result<Self, ProtocolError> {
        expect_len(raw, GROUND_SENSOR_LEN)?;
        Ok(Self {
            temp: i16::from_le_bytes([raw[0], raw[1]]),
            moisture: u16::from_le_bytes([raw[2], raw[3]]),
            n: u16::from_le_bytes([raw[4], raw[5]]),
            p: u16::from_le_bytes([raw[6], raw[7]]),
            k: u16::from_le_bytes([raw[8], raw[9]]),
            ec: u16::from_le_bytes([raw[10], raw[11]]),
            ph: raw[12],
        })
    }
}

pub const GPS_FLAG_LOCATION_VALID: u8 = 0b0000_0001;
pub const GPS_FLAG_ALTITUDE_VALID: u8 = 0b0000_0010;
pub const GPS_FLAG_TIME_VALID: u8 = 0b0000_0100;

/// GPS fix as last captured by the node.
///
/// - `latitude`/`longitude`: degrees × 1e7
/// - `altitude`: metres above sea level
/// - `flags`: validity bitmask, see `GPS_FLAG_*`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpsSensor {
    pub latitude: i32,
    pub longitude: i32,
    pub altitude: i16,
    pub hour: u8,
    pub minute: u8,
    pub flags: u8,
}

impl GpsSensor {
    pub fn location_valid(&self) -> bool {
        self.flags & GPS_FLAG_LOCATION_VALID != 0
    }

    pub fn altitude_valid(&self) -> bool {
        self.flags & GPS_FLAG_ALTITUDE_VALID != 0
    }

    pub fn time_valid(&self) -> bool {
        self.flags & GPS_FLAG_TIME_VALID != 0
    }

    pub fn encode(&self) -> [u8; GPS_SENSOR_LEN] {
        let mut raw = [0u8; GPS_SENSOR_LEN];
        raw[0..4].copy_from_slice(&self.latitude.to_le_bytes());
        raw[4..8].copy_from_slice(&self.longitude.to_le_bytes());
        raw[8..10].copy_from_slice(&self.altitude.to_le_bytes());
        raw[10] = self.hour;
        raw[11] = self.minute;
        raw[12] = self.flags;
        raw
    }

    pub fn decode(raw: &[u8]) -> Result<Self, ProtocolError> {
        expect_len(raw, GPS_SENSOR_LEN)?;
        Ok(Self {
            latitude: i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
            longitude: i32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]),
            altitude: i16::from_le_bytes([raw[8], raw[9]]),
            hour: raw[10],
            minute: raw[11],
            flags: raw[12],
        })
    }
}

/// Node supply measurements, stored ×100 to keep two decimals without
/// floating point on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnergyData {
    pub volt: u16,
    pub amp: u16,
}

impl EnergyData {
    pub fn encode(&self) -> [u8; ENERGY_DATA_LEN] {
        let mut raw = [0u8; ENERGY_DATA_LEN];
        raw[0..2].copy_from_slice(&self.volt.to_le_bytes());
        raw[2..4].copy_from_slice(&self.amp.to_le_bytes());
        raw
    }

    pub fn decode(raw: &[u8]) -> Result<Self, ProtocolError> {
        expect_len(raw, ENERGY_DATA_LEN)?;
        Ok(Self {
            volt: u16::from_le_bytes([raw[0], raw[1]]),
            amp: u16::from_le_bytes([raw[2], raw[3]]),
        })
    }
}

/// Combined ground + GPS + energy reply, concatenated with no padding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundGpsPacket {
    pub ground: GroundSensor,
    pub gps: GpsSensor,
    pub energy: EnergyData,
}

impl GroundGpsPacket {
    pub fn encode(&self) -> [u8; GROUND_GPS_PACKET_LEN] {
        let mut raw = [0u8; GROUND_GPS_PACKET_LEN];
        raw[..GROUND_SENSOR_LEN].copy_from_slice(&self.ground.encode());
        raw[GROUND_SENSOR_LEN..GROUND_SENSOR_LEN + GPS_SENSOR_LEN]
            .copy_from_slice(&self.gps.encode());
        raw[GROUND_SENSOR_LEN + GPS_SENSOR_LEN..].copy_from_slice(&self.energy.encode());
        raw
    }

    pub fn decode(raw: &[u8]) -> Result<Self, ProtocolError> {
        expect_len(raw, GROUND_GPS_PACKET_LEN)?;
        Ok(Self {
            ground: GroundSensor::decode(&raw[..GROUND_SENSOR_LEN])?,
            gps: GpsSensor::decode(
                &raw[GROUND_SENSOR_LEN..GROUND_SENSOR_LEN + GPS_SENSOR_LEN],
            )?,
            energy: EnergyData::decode(&raw[GROUND_SENSOR_LEN + GPS_SENSOR_LEN..])?,
        })
    }
}

/// Encodes a full atmospheric sample block exactly as a node replies to
/// `RequestAtmospheric`.
pub fn encode_atmospheric_block(
    samples: &[AtmosphericSample; ATMOSPHERIC_SAMPLES_PER_NODE],
) -> PayloadBuf {
    let mut buf = PayloadBuf::new();
    for sample in samples {
        // Block size is asserted at compile time to fit the payload.
        let _ = buf.extend_from_slice(&sample.encode());
    }
    buf
}

/// Decodes a reply payload into the fixed sample array. The length must be
/// exactly `ATMOSPHERIC_BLOCK_LEN`; anything else is a failed poll attempt.
pub fn decode_atmospheric_block(
    raw: &[u8],
) -> Result<[AtmosphericSample; ATMOSPHERIC_SAMPLES_PER_NODE], ProtocolError> {
    expect_len(raw, ATMOSPHERIC_BLOCK_LEN)?;
    let mut samples = [AtmosphericSample::default(); ATMOSPHERIC_SAMPLES_PER_NODE];
    for (i, sample) in samples.iter_mut().enumerate() {
        let offset = i * ATMOSPHERIC_SAMPLE_LEN;
        *sample = AtmosphericSample::decode(&raw[offset..offset + ATMOSPHERIC_SAMPLE_LEN])?;
    }
    Ok(samples)
}

/// Encodes a HELLO payload: the MAC string plus NUL padding to 18 bytes.
pub fn encode_hello(mac: &MacString) -> [u8; MAC_STR_LEN] {
    let mut raw = [0u8; MAC_STR_LEN];
    raw[..mac.len()].copy_from_slice(mac.as_bytes());
    raw
}

/// Decodes a HELLO payload back into the MAC string. Requires the exact
/// 18-byte length and a NUL terminator somewhere in the buffer.
pub fn decode_hello(raw: &[u8]) -> Result<MacString, ProtocolError> {
    expect_len(raw, MAC_STR_LEN)?;
    let end = raw
        .iter()
        .position(|&b| b == 0)
        .ok_or(ProtocolError::InvalidMacString)?;
    let text = core::str::from_utf8(&raw[..end]).map_err(|_| ProtocolError::InvalidMacString)?;
    MacString::from(text).map_err(|_| ProtocolError::InvalidMacString)
}

/// Builds an ERROR_ADDRESS payload from the assigned-address list,
/// truncated to the transport MTU.
pub fn encode_address_list<I: IntoIterator<Item = u8>>(addresses: I) -> PayloadBuf {
    let mut buf = PayloadBuf::new();
    for address in addresses {
        if buf.push(address).is_err() {
            break;
        }
    }
    buf
}

fn expect_len(raw: &[u8], expected: usize) -> Result<(), ProtocolError> {
    if raw.len() != expected {
        return Err(ProtocolError::PayloadSizeMismatch {
            expected,
            actual: raw.len(),
        });
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    UnknownMessageType(u8),
    PayloadSizeMismatch { expected: usize, actual: usize },
    KeyMismatch,
    InvalidMacString,
}

impl core::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ProtocolError::UnknownMessageType(tag) => {
                write!(f, "Unknown message type 0x{:02X}", tag)
            }
            ProtocolError::PayloadSizeMismatch { expected, actual } => {
                write!(
                    f,
                    "Payload size mismatch: expected {}, got {}",
                    expected, actual
                )
            }
            ProtocolError::KeyMismatch => write!(f, "Protocol key mismatch"),
            ProtocolError::InvalidMacString => write!(f, "Malformed MAC string"),
        }
    }
}

impl std::error::Error for ProtocolError {}
