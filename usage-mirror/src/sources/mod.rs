pub mod polling;

use vue_client::{
    domain::{DeviceGid, EnergyUnit, Scale, UsageSnapshot},
    VueError, VueSession,
};

pub use polling::PollingSource;

/// Per-minute intervals, reported in kWh.
pub const SCALE: Scale = Scale::Minute;
pub const UNIT: EnergyUnit = EnergyUnit::KilowattHours;

/// Anything that can produce a usage snapshot for a fixed set of devices.
#[async_trait::async_trait]
pub trait UsageSource: Send + Sync {
    async fn fetch_usage(
        &self,
        gids: &[DeviceGid],
        scale: Scale,
        unit: EnergyUnit,
    ) -> Result<UsageSnapshot, VueError>;
}

#[async_trait::async_trait]
impl UsageSource for VueSession {
    async fn fetch_usage(
        &self,
        gids: &[DeviceGid],
        scale: Scale,
        unit: EnergyUnit,
    ) -> Result<UsageSnapshot, VueError> {
        VueSession::fetch_usage(self, gids, scale, unit).await
    }
}
