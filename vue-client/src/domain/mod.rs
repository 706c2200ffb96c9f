pub mod device;
pub mod usage;
pub mod value;

pub use device::{Device, DeviceGid};
pub use usage::{ChannelUsage, EnergyUnit, Scale, UsageRecord, UsageSnapshot, CHANNELS_KEY, WH_PER_KWH};
pub use value::DataValue;
