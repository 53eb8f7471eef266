//! FTMS (Fitness Machine Service) and Heart Rate protocol codec.
//!
//! Pure translation between characteristic payloads and typed values:
//! Indoor Bike Data, Heart Rate Measurement, Cycling Power Measurement,
//! Fitness Machine Feature, Device Information strings and the
//! Fitness Machine Control Point. Nothing in here performs I/O.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// FTMS Service UUID (0x1826)
pub const FTMS_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_1826_0000_1000_8000_0080_5f9b_34fb);

/// Indoor Bike Data Characteristic UUID (0x2AD2)
pub const INDOOR_BIKE_DATA_UUID: Uuid = Uuid::from_u128(0x0000_2ad2_0000_1000_8000_0080_5f9b_34fb);

/// Fitness Machine Control Point UUID (0x2AD9)
pub const FTMS_CONTROL_POINT_UUID: Uuid =
    Uuid::from_u128(0x0000_2ad9_0000_1000_8000_0080_5f9b_34fb);

/// Fitness Machine Feature UUID (0x2ACC)
pub const FTMS_FEATURE_UUID: Uuid = Uuid::from_u128(0x0000_2acc_0000_1000_8000_0080_5f9b_34fb);

/// Cycling Power Service UUID (0x1818)
pub const CYCLING_POWER_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x0000_1818_0000_1000_8000_0080_5f9b_34fb);

/// Cycling Power Measurement UUID (0x2A63)
pub const CYCLING_POWER_MEASUREMENT_UUID: Uuid =
    Uuid::from_u128(0x0000_2a63_0000_1000_8000_0080_5f9b_34fb);

/// Heart Rate Service UUID (0x180D)
pub const HEART_RATE_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x0000_180d_0000_1000_8000_0080_5f9b_34fb);

/// Heart Rate Measurement UUID (0x2A37)
pub const HEART_RATE_MEASUREMENT_UUID: Uuid =
    Uuid::from_u128(0x0000_2a37_0000_1000_8000_0080_5f9b_34fb);

/// Device Information Service UUID (0x180A)
pub const DEVICE_INFORMATION_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x0000_180a_0000_1000_8000_0080_5f9b_34fb);

/// Manufacturer Name String UUID (0x2A29)
pub const MANUFACTURER_NAME_UUID: Uuid =
    Uuid::from_u128(0x0000_2a29_0000_1000_8000_0080_5f9b_34fb);

/// Model Number String UUID (0x2A24)
pub const MODEL_NUMBER_UUID: Uuid = Uuid::from_u128(0x0000_2a24_0000_1000_8000_0080_5f9b_34fb);

/// Serial Number String UUID (0x2A25)
pub const SERIAL_NUMBER_UUID: Uuid = Uuid::from_u128(0x0000_2a25_0000_1000_8000_0080_5f9b_34fb);

/// Firmware Revision String UUID (0x2A26)
pub const FIRMWARE_REVISION_UUID: Uuid =
    Uuid::from_u128(0x0000_2a26_0000_1000_8000_0080_5f9b_34fb);

/// Errors produced while decoding a characteristic payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The payload carried no bytes at all.
    #[error("empty payload")]
    Empty,

    /// The flags promised more bytes than the payload holds.
    #[error("truncated {field}: need {needed} bytes at offset {offset}, payload has {available}")]
    Truncated {
        field: &'static str,
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// Unknown control point opcode.
    #[error("unknown control point opcode 0x{0:02x}")]
    UnknownOpcode(u8),

    /// A parameter byte held a value outside its defined range.
    #[error("invalid {field} value 0x{value:02x}")]
    InvalidParameter { field: &'static str, value: u8 },
}

/// Little-endian cursor over a payload. Every read is bounds checked and
/// reports the field it was reading on failure.
struct PayloadReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> PayloadReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn take(&mut self, field: &'static str, len: usize) -> Result<&'a [u8], DecodeError> {
        if self.offset + len > self.data.len() {
            return Err(DecodeError::Truncated {
                field,
                offset: self.offset,
                needed: len,
                available: self.data.len(),
            });
        }
        let bytes = &self.data[self.offset..self.offset + len];
        self.offset += len;
        Ok(bytes)
    }

    fn u8(&mut self, field: &'static str) -> Result<u8, DecodeError> {
        Ok(self.take(field, 1)?[0])
    }

    fn u16(&mut self, field: &'static str) -> Result<u16, DecodeError> {
        let b = self.take(field, 2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn i16(&mut self, field: &'static str) -> Result<i16, DecodeError> {
        let b = self.take(field, 2)?;
        Ok(i16::from_le_bytes([b[0], b[1]]))
    }

    fn u24(&mut self, field: &'static str) -> Result<u32, DecodeError> {
        let b = self.take(field, 3)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], 0]))
    }

    fn u32(&mut self, field: &'static str) -> Result<u32, DecodeError> {
        let b = self.take(field, 4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }
}

// ---------------------------------------------------------------------------
// Indoor Bike Data
// ---------------------------------------------------------------------------

/// "More data" flag (bit 0). When set, the speed field carries the average
/// speed rather than the instantaneous speed.
pub const MORE_DATA_FLAG: u16 = 0x0001;

/// Optional fields of an Indoor Bike Data payload, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndoorBikeField {
    Speed,
    InstantaneousCadence,
    AverageCadence,
    TotalDistance,
    ResistanceLevel,
    InstantaneousPower,
    AveragePower,
    ExpendedEnergy,
    HeartRate,
    MetabolicEquivalent,
    ElapsedTime,
    RemainingTime,
}

impl IndoorBikeField {
    /// All fields in the order they appear on the wire.
    pub const ALL: [IndoorBikeField; 12] = [
        IndoorBikeField::Speed,
        IndoorBikeField::InstantaneousCadence,
        IndoorBikeField::AverageCadence,
        IndoorBikeField::TotalDistance,
        IndoorBikeField::ResistanceLevel,
        IndoorBikeField::InstantaneousPower,
        IndoorBikeField::AveragePower,
        IndoorBikeField::ExpendedEnergy,
        IndoorBikeField::HeartRate,
        IndoorBikeField::MetabolicEquivalent,
        IndoorBikeField::ElapsedTime,
        IndoorBikeField::RemainingTime,
    ];

    /// Flag bit announcing this field.
    pub fn flag(self) -> u16 {
        match self {
            IndoorBikeField::Speed => 0x0002,
            IndoorBikeField::InstantaneousCadence => 0x0004,
            IndoorBikeField::AverageCadence => 0x0008,
            IndoorBikeField::TotalDistance => 0x0010,
            IndoorBikeField::ResistanceLevel => 0x0020,
            IndoorBikeField::InstantaneousPower => 0x0040,
            IndoorBikeField::AveragePower => 0x0080,
            IndoorBikeField::ExpendedEnergy => 0x0100,
            IndoorBikeField::HeartRate => 0x0200,
            IndoorBikeField::MetabolicEquivalent => 0x0400,
            IndoorBikeField::ElapsedTime => 0x0800,
            IndoorBikeField::RemainingTime => 0x1000,
        }
    }

    /// Encoded width in bytes.
    pub fn width(self) -> usize {
        match self {
            IndoorBikeField::TotalDistance => 3,
            // total (u16), per hour (u16), per minute (u8)
            IndoorBikeField::ExpendedEnergy => 5,
            IndoorBikeField::HeartRate | IndoorBikeField::MetabolicEquivalent => 1,
            _ => 2,
        }
    }

    /// Human-readable field name, used in decode errors.
    pub fn name(self) -> &'static str {
        match self {
            IndoorBikeField::Speed => "speed",
            IndoorBikeField::InstantaneousCadence => "instantaneous cadence",
            IndoorBikeField::AverageCadence => "average cadence",
            IndoorBikeField::TotalDistance => "total distance",
            IndoorBikeField::ResistanceLevel => "resistance level",
            IndoorBikeField::InstantaneousPower => "instantaneous power",
            IndoorBikeField::AveragePower => "average power",
            IndoorBikeField::ExpendedEnergy => "expended energy",
            IndoorBikeField::HeartRate => "heart rate",
            IndoorBikeField::MetabolicEquivalent => "metabolic equivalent",
            IndoorBikeField::ElapsedTime => "elapsed time",
            IndoorBikeField::RemainingTime => "remaining time",
        }
    }

    /// Whether `flags` announces this field.
    pub fn is_present(self, flags: u16) -> bool {
        flags & self.flag() != 0
    }
}

/// Number of bytes an Indoor Bike Data payload with these flags occupies.
pub fn indoor_bike_data_len(flags: u16) -> usize {
    2 + IndoorBikeField::ALL
        .iter()
        .filter(|f| f.is_present(flags))
        .map(|f| f.width())
        .sum::<usize>()
}

/// Expended energy triple from Indoor Bike Data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExpendedEnergy {
    /// Total energy in kcal
    pub total_kcal: u16,
    /// Energy per hour in kcal
    pub per_hour_kcal: u16,
    /// Energy per minute in kcal
    pub per_minute_kcal: u8,
}

/// Parsed data from Indoor Bike Data characteristic.
///
/// Fields the flags did not announce stay `None`, so an absent value can be
/// told apart from an observed zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndoorBikeData {
    /// Raw flag field
    pub flags: u16,
    /// Instantaneous speed in km/h
    pub speed_kmh: Option<f32>,
    /// Average speed in km/h
    pub avg_speed_kmh: Option<f32>,
    /// Instantaneous cadence in RPM
    pub cadence_rpm: Option<f32>,
    /// Average cadence in RPM
    pub avg_cadence_rpm: Option<f32>,
    /// Total distance in meters
    pub total_distance_m: Option<u32>,
    /// Resistance level (unitless)
    pub resistance_level: Option<i16>,
    /// Instantaneous power in watts
    pub power_watts: Option<i16>,
    /// Average power in watts
    pub avg_power_watts: Option<i16>,
    /// Expended energy
    pub energy: Option<ExpendedEnergy>,
    /// Heart rate in BPM
    pub heart_rate_bpm: Option<u8>,
    /// Metabolic equivalent
    pub metabolic_equivalent: Option<f32>,
    /// Elapsed time in seconds
    pub elapsed_time_s: Option<u16>,
    /// Remaining time in seconds
    pub remaining_time_s: Option<u16>,
}

impl IndoorBikeData {
    /// Whether no optional field was present.
    pub fn is_empty(&self) -> bool {
        IndoorBikeField::ALL.iter().all(|f| !f.is_present(self.flags))
    }
}

/// Decode an Indoor Bike Data notification.
///
/// The payload starts with a 16-bit little-endian flag field followed by
/// every announced field in [`IndoorBikeField::ALL`] order. Trailing bytes
/// beyond the announced fields are ignored.
pub fn decode_indoor_bike_data(data: &[u8]) -> Result<IndoorBikeData, DecodeError> {
    if data.is_empty() {
        return Err(DecodeError::Empty);
    }

    let mut reader = PayloadReader::new(data);
    let flags = reader.u16("flags")?;
    let mut result = IndoorBikeData {
        flags,
        ..Default::default()
    };

    for field in IndoorBikeField::ALL {
        if !field.is_present(flags) {
            continue;
        }
        let name = field.name();
        match field {
            IndoorBikeField::Speed => {
                // 0.01 km/h resolution
                let speed = reader.u16(name)? as f32 / 100.0;
                if flags & MORE_DATA_FLAG != 0 {
                    result.avg_speed_kmh = Some(speed);
                } else {
                    result.speed_kmh = Some(speed);
                }
            }
            IndoorBikeField::InstantaneousCadence => {
                // 0.5 RPM resolution
                result.cadence_rpm = Some(reader.u16(name)? as f32 / 2.0);
            }
            IndoorBikeField::AverageCadence => {
                result.avg_cadence_rpm = Some(reader.u16(name)? as f32 / 2.0);
            }
            IndoorBikeField::TotalDistance => {
                result.total_distance_m = Some(reader.u24(name)?);
            }
            IndoorBikeField::ResistanceLevel => {
                result.resistance_level = Some(reader.i16(name)?);
            }
            IndoorBikeField::InstantaneousPower => {
                result.power_watts = Some(reader.i16(name)?);
            }
            IndoorBikeField::AveragePower => {
                result.avg_power_watts = Some(reader.i16(name)?);
            }
            IndoorBikeField::ExpendedEnergy => {
                // Width check up front so a short triple reports the whole field.
                let bytes = reader.take(name, field.width())?;
                result.energy = Some(ExpendedEnergy {
                    total_kcal: u16::from_le_bytes([bytes[0], bytes[1]]),
                    per_hour_kcal: u16::from_le_bytes([bytes[2], bytes[3]]),
                    per_minute_kcal: bytes[4],
                });
            }
            IndoorBikeField::HeartRate => {
                result.heart_rate_bpm = Some(reader.u8(name)?);
            }
            IndoorBikeField::MetabolicEquivalent => {
                // 0.1 MET resolution
                result.metabolic_equivalent = Some(reader.u8(name)? as f32 / 10.0);
            }
            IndoorBikeField::ElapsedTime => {
                result.elapsed_time_s = Some(reader.u16(name)?);
            }
            IndoorBikeField::RemainingTime => {
                result.remaining_time_s = Some(reader.u16(name)?);
            }
        }
    }

    Ok(result)
}

// ---------------------------------------------------------------------------
// Heart Rate Measurement
// ---------------------------------------------------------------------------

/// Parsed Heart Rate Measurement notification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeartRateData {
    /// Heart rate in BPM
    pub heart_rate_bpm: u16,
    /// `Some(detected)` when the strap reports contact status
    pub sensor_contact: Option<bool>,
    /// Energy expended in kJ (if present)
    pub energy_expended_kj: Option<u16>,
    /// RR intervals in 1/1024 s units
    pub rr_intervals: Vec<u16>,
}

/// Decode a Heart Rate Measurement notification.
pub fn decode_heart_rate_measurement(data: &[u8]) -> Result<HeartRateData, DecodeError> {
    if data.is_empty() {
        return Err(DecodeError::Empty);
    }

    let mut reader = PayloadReader::new(data);
    let flags = reader.u8("flags")?;
    let hr_format_u16 = flags & 0x01 != 0;
    let sensor_contact_supported = flags & 0x04 != 0;
    let energy_expended_present = flags & 0x08 != 0;
    let rr_interval_present = flags & 0x10 != 0;

    let heart_rate_bpm = if hr_format_u16 {
        reader.u16("heart rate")?
    } else {
        reader.u8("heart rate")? as u16
    };

    let mut result = HeartRateData {
        heart_rate_bpm,
        sensor_contact: sensor_contact_supported.then_some(flags & 0x02 != 0),
        ..Default::default()
    };

    if energy_expended_present {
        result.energy_expended_kj = Some(reader.u16("energy expended")?);
    }

    if rr_interval_present {
        // A stray odd byte after the last interval is ignored
        while reader.remaining() >= 2 {
            result.rr_intervals.push(reader.u16("rr interval")?);
        }
    }

    Ok(result)
}

// ---------------------------------------------------------------------------
// Cycling Power Measurement
// ---------------------------------------------------------------------------

/// Parsed Cycling Power Measurement notification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CyclingPowerData {
    /// Instantaneous power in watts
    pub power_watts: i16,
    /// Pedal power balance in 0.5 % units (if present)
    pub power_balance: Option<u8>,
    /// Accumulated torque in 1/32 Nm (if present)
    pub accumulated_torque: Option<u16>,
    /// Cumulative wheel revolutions (if present)
    pub wheel_revolutions: Option<u32>,
    /// Last wheel event time in 1/2048 s (if present)
    pub last_wheel_event_time: Option<u16>,
    /// Cumulative crank revolutions (if present)
    pub crank_revolutions: Option<u16>,
    /// Last crank event time in 1/1024 s (if present)
    pub last_crank_event_time: Option<u16>,
}

/// Decode a Cycling Power Measurement notification.
///
/// Only the fields up to crank revolution data are read; anything after is
/// left in the payload.
pub fn decode_cycling_power_measurement(data: &[u8]) -> Result<CyclingPowerData, DecodeError> {
    if data.is_empty() {
        return Err(DecodeError::Empty);
    }

    let mut reader = PayloadReader::new(data);
    let flags = reader.u16("flags")?;
    let mut result = CyclingPowerData {
        power_watts: reader.i16("instantaneous power")?,
        ..Default::default()
    };

    if flags & 0x0001 != 0 {
        result.power_balance = Some(reader.u8("pedal power balance")?);
    }
    if flags & 0x0004 != 0 {
        result.accumulated_torque = Some(reader.u16("accumulated torque")?);
    }
    if flags & 0x0010 != 0 {
        result.wheel_revolutions = Some(reader.u32("wheel revolutions")?);
        result.last_wheel_event_time = Some(reader.u16("last wheel event time")?);
    }
    if flags & 0x0020 != 0 {
        result.crank_revolutions = Some(reader.u16("crank revolutions")?);
        result.last_crank_event_time = Some(reader.u16("last crank event time")?);
    }

    Ok(result)
}

// ---------------------------------------------------------------------------
// Fitness Machine Feature
// ---------------------------------------------------------------------------

/// Capability bits a trainer declares in its Fitness Machine Feature
/// characteristic. Read once at connect time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FeatureSet {
    machine_features: u32,
    target_settings: u32,
}

impl FeatureSet {
    pub const AVERAGE_SPEED: u32 = 1 << 0;
    pub const CADENCE: u32 = 1 << 1;
    pub const TOTAL_DISTANCE: u32 = 1 << 2;
    pub const INCLINATION: u32 = 1 << 3;
    pub const ELEVATION_GAIN: u32 = 1 << 4;
    pub const PACE: u32 = 1 << 5;
    pub const STEP_COUNT: u32 = 1 << 6;
    pub const RESISTANCE_LEVEL: u32 = 1 << 7;
    pub const STRIDE_COUNT: u32 = 1 << 8;
    pub const EXPENDED_ENERGY: u32 = 1 << 9;
    pub const HEART_RATE: u32 = 1 << 10;
    pub const METABOLIC_EQUIVALENT: u32 = 1 << 11;
    pub const ELAPSED_TIME: u32 = 1 << 12;
    pub const REMAINING_TIME: u32 = 1 << 13;
    pub const POWER_MEASUREMENT: u32 = 1 << 14;
    pub const FORCE_ON_BELT: u32 = 1 << 15;
    pub const POWER_OUTPUT: u32 = 1 << 16;

    /// Target setting: resistance level
    pub const TARGET_RESISTANCE: u32 = 1 << 2;
    /// Target setting: power
    pub const TARGET_POWER: u32 = 1 << 3;
    /// Target setting: indoor bike simulation parameters
    pub const TARGET_SIMULATION: u32 = 1 << 13;

    pub fn new(machine_features: u32, target_settings: u32) -> Self {
        Self {
            machine_features,
            target_settings,
        }
    }

    pub fn machine_features(&self) -> u32 {
        self.machine_features
    }

    pub fn target_settings(&self) -> u32 {
        self.target_settings
    }

    /// Whether every bit in `feature` is declared.
    pub fn supports(&self, feature: u32) -> bool {
        self.machine_features & feature == feature
    }

    /// Whether every bit in `setting` is declared as a target setting.
    pub fn supports_target(&self, setting: u32) -> bool {
        self.target_settings & setting == setting
    }

    /// Feature bit a given Indoor Bike Data field depends on. Instantaneous
    /// speed is mandatory and needs none.
    fn required_feature(field: IndoorBikeField, flags: u16) -> Option<u32> {
        match field {
            IndoorBikeField::Speed if flags & MORE_DATA_FLAG != 0 => Some(Self::AVERAGE_SPEED),
            IndoorBikeField::Speed => None,
            IndoorBikeField::InstantaneousCadence | IndoorBikeField::AverageCadence => {
                Some(Self::CADENCE)
            }
            IndoorBikeField::TotalDistance => Some(Self::TOTAL_DISTANCE),
            IndoorBikeField::ResistanceLevel => Some(Self::RESISTANCE_LEVEL),
            IndoorBikeField::InstantaneousPower | IndoorBikeField::AveragePower => {
                Some(Self::POWER_MEASUREMENT)
            }
            IndoorBikeField::ExpendedEnergy => Some(Self::EXPENDED_ENERGY),
            IndoorBikeField::HeartRate => Some(Self::HEART_RATE),
            IndoorBikeField::MetabolicEquivalent => Some(Self::METABOLIC_EQUIVALENT),
            IndoorBikeField::ElapsedTime => Some(Self::ELAPSED_TIME),
            IndoorBikeField::RemainingTime => Some(Self::REMAINING_TIME),
        }
    }

    /// Fields announced by `flags` that this device never declared support for.
    pub fn undeclared_fields(&self, flags: u16) -> Vec<IndoorBikeField> {
        IndoorBikeField::ALL
            .into_iter()
            .filter(|f| f.is_present(flags))
            .filter(|f| {
                Self::required_feature(*f, flags).is_some_and(|bit| !self.supports(bit))
            })
            .collect()
    }
}

/// Decode the Fitness Machine Feature characteristic: 4 bytes of machine
/// features, optionally followed by 4 bytes of target-setting features.
pub fn decode_fitness_machine_feature(data: &[u8]) -> Result<FeatureSet, DecodeError> {
    if data.is_empty() {
        return Err(DecodeError::Empty);
    }
    let mut reader = PayloadReader::new(data);
    let machine_features = reader.u32("machine features")?;
    let target_settings = if reader.remaining() >= 4 {
        reader.u32("target setting features")?
    } else {
        0
    };
    Ok(FeatureSet::new(machine_features, target_settings))
}

// ---------------------------------------------------------------------------
// Device Information
// ---------------------------------------------------------------------------

/// Decode a Device Information string characteristic (manufacturer, model,
/// serial, firmware). Trailing NULs and whitespace are dropped.
pub fn decode_device_info_string(data: &[u8]) -> String {
    String::from_utf8_lossy(data)
        .trim_end_matches('\0')
        .trim()
        .to_string()
}

// ---------------------------------------------------------------------------
// Control Point
// ---------------------------------------------------------------------------

/// FTMS Control Point opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FtmsControlOpcode {
    /// Request control of the fitness machine
    RequestControl = 0x00,
    /// Reset the fitness machine
    Reset = 0x01,
    /// Set target resistance level
    SetTargetResistanceLevel = 0x04,
    /// Set target power
    SetTargetPower = 0x05,
    /// Start or resume training
    StartOrResume = 0x07,
    /// Stop or pause training
    StopOrPause = 0x08,
    /// Set indoor bike simulation parameters
    SetIndoorBikeSimulation = 0x11,
    /// Response indication
    ResponseCode = 0x80,
}

impl TryFrom<u8> for FtmsControlOpcode {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(FtmsControlOpcode::RequestControl),
            0x01 => Ok(FtmsControlOpcode::Reset),
            0x04 => Ok(FtmsControlOpcode::SetTargetResistanceLevel),
            0x05 => Ok(FtmsControlOpcode::SetTargetPower),
            0x07 => Ok(FtmsControlOpcode::StartOrResume),
            0x08 => Ok(FtmsControlOpcode::StopOrPause),
            0x11 => Ok(FtmsControlOpcode::SetIndoorBikeSimulation),
            0x80 => Ok(FtmsControlOpcode::ResponseCode),
            other => Err(DecodeError::UnknownOpcode(other)),
        }
    }
}

/// Sub-code of the Stop or Pause command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum StopKind {
    Stop = 0x01,
    Pause = 0x02,
}

/// A command for the Fitness Machine Control Point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "command")]
pub enum ControlCommand {
    /// Ask the machine for control; must precede any target command.
    RequestControl,
    /// Reset the machine to its idle state.
    Reset,
    /// Target resistance in 0.1 units (100 = 10.0).
    SetTargetResistance { level_tenths: u16 },
    /// Target power in watts (ERG mode).
    SetTargetPower { watts: i16 },
    StartOrResume,
    StopOrPause { kind: StopKind },
    /// Indoor bike simulation: wind speed in 0.001 m/s, grade in 0.01 %,
    /// rolling resistance in 0.0001, wind resistance in 0.01 kg/m.
    SetIndoorBikeSimulation {
        wind_speed: i16,
        grade: i16,
        crr: u8,
        cw: u8,
    },
}

impl ControlCommand {
    pub fn opcode(&self) -> FtmsControlOpcode {
        match self {
            ControlCommand::RequestControl => FtmsControlOpcode::RequestControl,
            ControlCommand::Reset => FtmsControlOpcode::Reset,
            ControlCommand::SetTargetResistance { .. } => {
                FtmsControlOpcode::SetTargetResistanceLevel
            }
            ControlCommand::SetTargetPower { .. } => FtmsControlOpcode::SetTargetPower,
            ControlCommand::StartOrResume => FtmsControlOpcode::StartOrResume,
            ControlCommand::StopOrPause { .. } => FtmsControlOpcode::StopOrPause,
            ControlCommand::SetIndoorBikeSimulation { .. } => {
                FtmsControlOpcode::SetIndoorBikeSimulation
            }
        }
    }
}

/// Encode a control command: opcode byte followed by little-endian parameters.
pub fn encode_control_command(command: &ControlCommand) -> Vec<u8> {
    let mut cmd = vec![command.opcode() as u8];
    match *command {
        ControlCommand::RequestControl | ControlCommand::Reset | ControlCommand::StartOrResume => {}
        ControlCommand::SetTargetResistance { level_tenths } => {
            cmd.extend_from_slice(&level_tenths.to_le_bytes());
        }
        ControlCommand::SetTargetPower { watts } => {
            cmd.extend_from_slice(&watts.to_le_bytes());
        }
        ControlCommand::StopOrPause { kind } => cmd.push(kind as u8),
        ControlCommand::SetIndoorBikeSimulation {
            wind_speed,
            grade,
            crr,
            cw,
        } => {
            cmd.extend_from_slice(&wind_speed.to_le_bytes());
            cmd.extend_from_slice(&grade.to_le_bytes());
            cmd.push(crr);
            cmd.push(cw);
        }
    }
    cmd
}

/// Decode a control command written to the Control Point. Inverse of
/// [`encode_control_command`].
pub fn decode_control_command(data: &[u8]) -> Result<ControlCommand, DecodeError> {
    let mut reader = PayloadReader::new(data);
    let opcode = FtmsControlOpcode::try_from(reader.u8("opcode").map_err(|_| DecodeError::Empty)?)?;

    let command = match opcode {
        FtmsControlOpcode::RequestControl => ControlCommand::RequestControl,
        FtmsControlOpcode::Reset => ControlCommand::Reset,
        FtmsControlOpcode::SetTargetResistanceLevel => ControlCommand::SetTargetResistance {
            level_tenths: reader.u16("target resistance")?,
        },
        FtmsControlOpcode::SetTargetPower => ControlCommand::SetTargetPower {
            watts: reader.i16("target power")?,
        },
        FtmsControlOpcode::StartOrResume => ControlCommand::StartOrResume,
        FtmsControlOpcode::StopOrPause => {
            let kind = match reader.u8("stop or pause parameter")? {
                0x01 => StopKind::Stop,
                0x02 => StopKind::Pause,
                value => {
                    return Err(DecodeError::InvalidParameter {
                        field: "stop or pause parameter",
                        value,
                    })
                }
            };
            ControlCommand::StopOrPause { kind }
        }
        FtmsControlOpcode::SetIndoorBikeSimulation => ControlCommand::SetIndoorBikeSimulation {
            wind_speed: reader.i16("wind speed")?,
            grade: reader.i16("grade")?,
            crr: reader.u8("rolling resistance")?,
            cw: reader.u8("wind resistance")?,
        },
        FtmsControlOpcode::ResponseCode => return Err(DecodeError::UnknownOpcode(0x80)),
    };

    Ok(command)
}

/// Result code of a Control Point response indication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    Success,
    OpCodeNotSupported,
    InvalidParameter,
    OperationFailed,
    ControlNotPermitted,
    Reserved(u8),
}

impl From<u8> for ResultCode {
    fn from(value: u8) -> Self {
        match value {
            0x01 => ResultCode::Success,
            0x02 => ResultCode::OpCodeNotSupported,
            0x03 => ResultCode::InvalidParameter,
            0x04 => ResultCode::OperationFailed,
            0x05 => ResultCode::ControlNotPermitted,
            other => ResultCode::Reserved(other),
        }
    }
}

/// Control Point response indication: `[0x80, request opcode, result]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlPointResponse {
    pub request_opcode: u8,
    pub result: ResultCode,
}

impl ControlPointResponse {
    pub fn is_success(&self) -> bool {
        self.result == ResultCode::Success
    }
}

/// Decode a Control Point response indication.
pub fn decode_control_point_response(data: &[u8]) -> Result<ControlPointResponse, DecodeError> {
    let mut reader = PayloadReader::new(data);
    let opcode = reader.u8("response opcode").map_err(|_| DecodeError::Empty)?;
    if opcode != FtmsControlOpcode::ResponseCode as u8 {
        return Err(DecodeError::UnknownOpcode(opcode));
    }
    Ok(ControlPointResponse {
        request_opcode: reader.u8("request opcode")?,
        result: ResultCode::from(reader.u8("result code")?),
    })
}
