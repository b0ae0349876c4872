use std::net::ToSocketAddrs as _;
use std::time::Duration;

use anyhow::{Context as _, Result, bail, ensure};
use serde_derive::Deserialize;

use crate::beacon::BeaconUuid;
use crate::dispatch::BulbTarget;
use crate::presence::RssiBand;
use crate::wiz;

pub const DEFAULT_NEAR_RSSI: i16 = -30;
pub const DEFAULT_FAR_RSSI: i16 = -80;
pub const DEFAULT_CALL_TIMEOUT_SECONDS: u64 = 5;
pub const DEFAULT_PACING_MS: u64 = 200;

#[derive(Deserialize, Debug, Clone)]
pub struct AppConfig {
    pub beacon: BeaconConfig,
    #[serde(default)]
    pub bulbs: Vec<BulbConfig>,
    pub scan: Option<ScanConfig>,
    pub dispatch: Option<DispatchConfig>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct BeaconConfig {
    pub uuid: String,
    pub address: Option<String>,
    pub near_rssi: Option<i16>,
    pub far_rssi: Option<i16>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct BulbConfig {
    pub host: String,
    pub port: Option<u16>,
    pub name: Option<String>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct ScanConfig {
    pub duration_seconds: Option<u64>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct DispatchConfig {
    pub timeout_seconds: Option<u64>,
    pub pacing_ms: Option<u64>,
}

/// Everything validated and ready to run. Bulb hosts are resolved here so
/// a typo fails startup instead of the first trigger.
#[derive(Debug, Clone)]
pub struct Settings {
    pub target_uuid: BeaconUuid,
    pub target_address: Option<String>,
    pub band: RssiBand,
    pub bulbs: Vec<BulbTarget>,
    pub scan_window: Option<Duration>,
    pub call_timeout: Duration,
    pub pacing: Duration,
}

impl AppConfig {
    pub fn resolve(self) -> Result<Settings> {
        let target_uuid: BeaconUuid = self
            .beacon
            .uuid
            .parse()
            .context("bad [beacon] uuid")?;

        let band = RssiBand {
            far: self.beacon.far_rssi.unwrap_or(DEFAULT_FAR_RSSI),
            near: self.beacon.near_rssi.unwrap_or(DEFAULT_NEAR_RSSI),
        };
        ensure!(
            band.far <= band.near,
            "far_rssi ({}) must not exceed near_rssi ({})",
            band.far,
            band.near
        );

        ensure!(!self.bulbs.is_empty(), "at least one [[bulbs]] entry is required");
        let mut bulbs = Vec::with_capacity(self.bulbs.len());
        for bulb in &self.bulbs {
            let port = bulb.port.unwrap_or(wiz::WIZ_PORT);
            let addr = (bulb.host.as_str(), port)
                .to_socket_addrs()
                .with_context(|| format!("cannot resolve bulb host {:?}", bulb.host))?
                .next()
                .with_context(|| format!("no address for bulb host {:?}", bulb.host))?;
            bulbs.push(BulbTarget {
                name: bulb.name.clone().unwrap_or_else(|| bulb.host.clone()),
                addr,
            });
        }

        let scan_window = match self.scan.unwrap_or_default().duration_seconds {
            Some(0) => bail!("[scan] duration_seconds must be positive when set"),
            Some(seconds) => Some(Duration::from_secs(seconds)),
            None => None,
        };

        let dispatch = self.dispatch.unwrap_or_default();
        let timeout_seconds = dispatch
            .timeout_seconds
            .unwrap_or(DEFAULT_CALL_TIMEOUT_SECONDS);
        ensure!(timeout_seconds > 0, "[dispatch] timeout_seconds must be positive");

        Ok(Settings {
            target_uuid,
            target_address: self.beacon.address,
            band,
            bulbs,
            scan_window,
            call_timeout: Duration::from_secs(timeout_seconds),
            pacing: Duration::from_millis(dispatch.pacing_ms.unwrap_or(DEFAULT_PACING_MS)),
        })
    }
}
