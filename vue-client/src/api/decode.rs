//! Decoding of the account API's JSON bodies into domain types.

use serde::Deserialize;
use serde_json::{json, Map, Value};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::{
    domain::{Device, DeviceGid, EnergyUnit, Scale, UsageRecord, UsageSnapshot, CHANNELS_KEY},
    error::VueError,
};

#[derive(Deserialize)]
struct DevicesResponse {
    #[serde(default)]
    devices: Vec<ApiDevice>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiDevice {
    device_gid: DeviceGid,
    #[serde(default)]
    manufacturer_device_id: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    firmware: Option<String>,
    #[serde(default)]
    parent_device_gid: Option<DeviceGid>,
    #[serde(default)]
    location_properties: Option<LocationProperties>,
    #[serde(default)]
    devices: Vec<ApiDevice>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LocationProperties {
    #[serde(default)]
    device_name: Option<String>,
}

/// Flatten the device list; nested devices follow their parent.
pub fn decode_devices(body: Value) -> Result<Vec<Device>, VueError> {
    let resp: DevicesResponse =
        serde_json::from_value(body).map_err(|e| VueError::Decode(format!("device list: {e}")))?;

    let mut out = Vec::new();
    for device in resp.devices {
        push_device(device, None, &mut out);
    }
    Ok(out)
}

fn push_device(device: ApiDevice, parent: Option<DeviceGid>, out: &mut Vec<Device>) {
    let gid = device.device_gid;
    out.push(Device {
        gid,
        name: device.location_properties.and_then(|p| p.device_name),
        manufacturer_device_id: device.manufacturer_device_id,
        model: device.model,
        firmware: device.firmware,
        parent_gid: device.parent_device_gid.or(parent),
    });
    for nested in device.devices {
        push_device(nested, Some(gid), out);
    }
}

/// Decode a `getDeviceListUsages` response.
///
/// Each device becomes one record: its scalar fields (snake_cased), a
/// `timestamp` attribute carrying the requested instant, and the channel
/// records under `channels`. Devices nested under a channel are lifted into
/// the snapshot as records of their own.
pub fn decode_usage(
    body: Value,
    instant: OffsetDateTime,
    scale: Scale,
    unit: EnergyUnit,
) -> Result<UsageSnapshot, VueError> {
    let devices = body
        .get("deviceListUsages")
        .and_then(|u| u.get("devices"))
        .and_then(Value::as_array)
        .ok_or_else(|| VueError::Decode("usage response without deviceListUsages.devices".to_string()))?;

    let timestamp = instant
        .format(&Rfc3339)
        .map_err(|e| VueError::Decode(format!("instant: {e}")))?;

    let mut snapshot = UsageSnapshot::new(instant, scale, unit);
    for device in devices {
        if let Some(device) = device.as_object() {
            collect_usage_device(device, &timestamp, &mut snapshot)?;
        }
    }
    Ok(snapshot)
}

fn collect_usage_device(
    device: &Map<String, Value>,
    timestamp: &str,
    snapshot: &mut UsageSnapshot,
) -> Result<(), VueError> {
    let gid = device
        .get("deviceGid")
        .and_then(Value::as_u64)
        .map(DeviceGid)
        .ok_or_else(|| VueError::Decode("usage entry without deviceGid".to_string()))?;

    let mut attributes = Map::new();
    let mut channels = Map::new();

    for (key, value) in device {
        if key != "channelUsages" {
            attributes.insert(snake_case(key), value.clone());
            continue;
        }

        for usage in value.as_array().into_iter().flatten() {
            let Some(usage) = usage.as_object() else {
                continue;
            };

            for nested in usage
                .get("nestedDevices")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
            {
                if let Some(nested) = nested.as_object() {
                    collect_usage_device(nested, timestamp, snapshot)?;
                }
            }

            let channel_num = usage
                .get("channelNum")
                .and_then(Value::as_str)
                .ok_or_else(|| VueError::Decode(format!("device {gid}: channel usage without channelNum")))?;

            channels.insert(
                channel_num.to_string(),
                json!({
                    "usage": usage.get("usage"),
                    "percentage": usage.get("percentage"),
                    "channel_num": channel_num,
                    "name": usage.get("name"),
                }),
            );
        }
    }

    attributes.insert("timestamp".to_string(), Value::String(timestamp.to_string()));
    attributes.insert(CHANNELS_KEY.to_string(), Value::Object(channels));

    snapshot.insert(gid, UsageRecord::from_attributes(attributes)?);
    Ok(())
}

fn snake_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for ch in key.chars() {
        if ch.is_ascii_uppercase() {
            if !out.is_empty() {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}
