pub mod auth;
pub mod decode;

use std::{path::PathBuf, time::Duration};

use serde::Deserialize;
use serde_json::Value;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::{
    domain::{Device, DeviceGid, EnergyUnit, Scale, UsageSnapshot},
    error::VueError,
};
pub use auth::{Credentials, TokenSet};

pub const DEFAULT_API_BASE_URL: &str = "https://api.emporiaenergy.com";
pub const DEFAULT_AUTH_URL: &str = "https://cognito-idp.us-east-2.amazonaws.com/";
pub const DEFAULT_CLIENT_ID: &str = "4qte47jbstod8apnfic0bunmrq";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VueConfig {
    pub api_base_url: String,
    pub auth_url: String,
    pub client_id: String,
    pub token_cache_path: PathBuf,
    pub request_timeout_ms: u64,
}

impl Default for VueConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            auth_url: DEFAULT_AUTH_URL.to_string(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            token_cache_path: PathBuf::from("keys.json"),
            request_timeout_ms: 30_000,
        }
    }
}

/// An authenticated connection to the account API.
pub struct VueSession {
    http: reqwest::Client,
    api_base_url: String,
    tokens: TokenSet,
}

impl VueSession {
    /// Log in once. There is no second attempt: any failure is returned as is.
    pub async fn login(cfg: &VueConfig, credentials: &Credentials) -> Result<Self, VueError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.request_timeout_ms))
            .build()?;

        let cached = auth::load_token_cache(&cfg.token_cache_path).await?;
        let flow = auth::choose_flow(credentials, cached.as_ref())?;
        let tokens = auth::authenticate(&http, cfg, flow).await?;

        if let Err(e) = auth::store_token_cache(&cfg.token_cache_path, &tokens).await {
            tracing::warn!(error = %e, "could not write token cache");
        }
        tracing::info!(username = ?tokens.username, "logged in to account API");

        Ok(Self {
            http,
            api_base_url: cfg.api_base_url.trim_end_matches('/').to_string(),
            tokens,
        })
    }

    pub async fn list_devices(&self) -> Result<Vec<Device>, VueError> {
        let url = format!("{}/customers/devices", self.api_base_url);
        let body = self.get_json(self.http.get(url)).await?;
        decode::decode_devices(body)
    }

    /// Usage of `gids` over the interval ending now.
    pub async fn fetch_usage(
        &self,
        gids: &[DeviceGid],
        scale: Scale,
        unit: EnergyUnit,
    ) -> Result<UsageSnapshot, VueError> {
        let instant = OffsetDateTime::now_utc();
        let instant_param = instant
            .format(&Rfc3339)
            .map_err(|e| VueError::Decode(format!("instant: {e}")))?;

        // The API expects the gid list joined with a literal `+`.
        let gid_list = gids
            .iter()
            .map(DeviceGid::to_string)
            .collect::<Vec<_>>()
            .join("+");
        let url = format!(
            "{}/AppAPI?apiMethod=getDeviceListUsages&deviceGids={gid_list}",
            self.api_base_url
        );

        let req = self.http.get(url).query(&[
            ("instant", instant_param.as_str()),
            ("scale", scale.as_str()),
            ("energyUnit", unit.as_str()),
        ]);
        let body = self.get_json(req).await?;
        decode::decode_usage(body, instant, scale, unit)
    }

    async fn get_json(&self, req: reqwest::RequestBuilder) -> Result<Value, VueError> {
        let id_token = self
            .tokens
            .id_token
            .as_deref()
            .ok_or_else(|| VueError::Auth("session has no id token".to_string()))?;

        let resp = req.header("authtoken", id_token).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(VueError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp.json().await?)
    }
}
