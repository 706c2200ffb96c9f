use std::{
    collections::{BTreeMap, HashMap},
    fmt,
};

use serde::Deserialize;
use serde_json::{Map, Value};
use time::OffsetDateTime;

use super::{DataValue, DeviceGid};
use crate::error::VueError;

/// Key of a usage record that carries the per-channel records instead of a scalar.
pub const CHANNELS_KEY: &str = "channels";

pub const WH_PER_KWH: f64 = 1000.0;

/// Width of the interval each usage value covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scale {
    Minute,
}

impl Scale {
    pub fn as_str(self) -> &'static str {
        match self {
            Scale::Minute => "1MIN",
        }
    }
}

impl fmt::Display for Scale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnergyUnit {
    KilowattHours,
}

impl EnergyUnit {
    pub fn as_str(self) -> &'static str {
        match self {
            EnergyUnit::KilowattHours => "KilowattHours",
        }
    }
}

impl fmt::Display for EnergyUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Usage of a single channel (circuit) over the requested interval.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChannelUsage {
    /// Energy in kWh; absent when the device has not reported for the interval.
    #[serde(default)]
    pub usage: Option<f64>,
    #[serde(default)]
    pub percentage: Option<f64>,
    #[serde(default)]
    pub channel_num: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl ChannelUsage {
    pub fn usage_wh(&self) -> Option<f64> {
        self.usage.map(|kwh| kwh * WH_PER_KWH)
    }
}

/// One device's entry in a usage snapshot, split into device-level scalars
/// and channel records.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UsageRecord {
    pub attributes: BTreeMap<String, DataValue>,
    pub channels: BTreeMap<String, ChannelUsage>,
}

impl UsageRecord {
    /// Partition a flat attribute mapping. The `channels` key holds the channel
    /// records keyed by channel number; every other scalar key becomes a
    /// device-level attribute. Non-scalar values are dropped.
    pub fn from_attributes(attributes: Map<String, Value>) -> Result<Self, VueError> {
        let mut record = UsageRecord::default();

        for (key, value) in attributes {
            if key == CHANNELS_KEY {
                let channels = match value {
                    Value::Object(channels) => channels,
                    Value::Null => continue,
                    other => {
                        return Err(VueError::Decode(format!(
                            "`{CHANNELS_KEY}` must be an object, got {other}"
                        )))
                    }
                };
                for (channel_num, raw) in channels {
                    let mut usage: ChannelUsage = serde_json::from_value(raw).map_err(|e| {
                        VueError::Decode(format!("channel {channel_num}: {e}"))
                    })?;
                    if usage.channel_num.is_empty() {
                        usage.channel_num = channel_num.clone();
                    }
                    record.channels.insert(channel_num, usage);
                }
            } else if let Some(scalar) = DataValue::from_json(&value) {
                record.attributes.insert(key, scalar);
            } else {
                tracing::trace!(attribute = %key, "skipping non-scalar usage attribute");
            }
        }

        Ok(record)
    }
}

/// Point-in-time usage of a set of devices.
#[derive(Debug, Clone)]
pub struct UsageSnapshot {
    pub instant: OffsetDateTime,
    pub scale: Scale,
    pub unit: EnergyUnit,
    records: HashMap<DeviceGid, UsageRecord>,
}

impl UsageSnapshot {
    pub fn new(instant: OffsetDateTime, scale: Scale, unit: EnergyUnit) -> Self {
        Self {
            instant,
            scale,
            unit,
            records: HashMap::new(),
        }
    }

    pub fn insert(&mut self, gid: DeviceGid, record: UsageRecord) -> Option<UsageRecord> {
        self.records.insert(gid, record)
    }

    pub fn get(&self, gid: DeviceGid) -> Option<&UsageRecord> {
        self.records.get(&gid)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("fixture must be an object"),
        }
    }

    #[test]
    fn channels_key_is_partitioned_from_scalar_attributes() {
        let record = UsageRecord::from_attributes(object(json!({
            "voltage": 120,
            "channels": {
                "1": {"usage": 2.5, "percentage": 50.0, "channel_num": "1", "name": "Kitchen"}
            }
        })))
        .unwrap();

        assert_eq!(record.attributes.len(), 1);
        assert_eq!(record.attributes["voltage"], DataValue::Int(120));
        assert!(!record.attributes.contains_key(CHANNELS_KEY));
        assert_eq!(record.channels.len(), 1);

        let ch = &record.channels["1"];
        assert_eq!(ch.usage, Some(2.5));
        assert_eq!(ch.usage_wh(), Some(2500.0));
        assert_eq!(ch.name.as_deref(), Some("Kitchen"));
    }

    #[test]
    fn channel_num_falls_back_to_record_key() {
        let record = UsageRecord::from_attributes(object(json!({
            "channels": {"1,2,3": {"usage": null, "percentage": 100.0, "name": "Main"}}
        })))
        .unwrap();

        let ch = &record.channels["1,2,3"];
        assert_eq!(ch.channel_num, "1,2,3");
        assert_eq!(ch.usage, None);
        assert_eq!(ch.usage_wh(), None);
    }

    #[test]
    fn nested_values_are_not_attributes() {
        let record = UsageRecord::from_attributes(object(json!({
            "device_gid": 7,
            "location": {"zip": "12345"},
            "tags": ["a"]
        })))
        .unwrap();

        assert_eq!(record.attributes.keys().collect::<Vec<_>>(), vec!["device_gid"]);
    }

    #[test]
    fn non_object_channels_is_a_decode_error() {
        let res = UsageRecord::from_attributes(object(json!({"channels": [1, 2]})));
        assert!(matches!(res, Err(VueError::Decode(_))));
    }
}
