//! Azure DNS validation
//!
//! Logs in with client credentials, then creates and deletes the TXT record
//! set through the Azure Resource Manager REST API.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use certpilot_common::ChallengeKind;
use certpilot_config::{AzureDnsConfig, DnsConfig};

use super::wait_for_propagation;
use crate::challenge::{dns_record_name, ChallengeProof};
use crate::error::{ConfigurationError, PluginError};
use crate::plugins::{ValidationPlugin, AZURE_DNS};
use crate::target::Target;

const API_VERSION: &str = "2018-05-01";
const RECORD_TTL: u32 = 3600;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Serialize)]
struct RecordSet {
    properties: RecordSetProperties,
}

#[derive(Debug, Serialize)]
struct RecordSetProperties {
    #[serde(rename = "TTL")]
    ttl: u32,
    #[serde(rename = "TXTRecords")]
    txt_records: Vec<TxtRecord>,
}

#[derive(Debug, Serialize)]
struct TxtRecord {
    value: Vec<String>,
}

pub struct AzureDnsValidation {
    config: Option<AzureDnsConfig>,
    dns: DnsConfig,
    client: reqwest::Client,
    access_token: RwLock<Option<String>>,
}

impl AzureDnsValidation {
    pub fn new(config: Option<AzureDnsConfig>, dns: DnsConfig) -> Self {
        Self {
            config,
            dns,
            client: reqwest::Client::new(),
            access_token: RwLock::new(None),
        }
    }

    fn settings(&self) -> Result<&AzureDnsConfig, ConfigurationError> {
        self.config.as_ref().ok_or(ConfigurationError::MissingParameter {
            plugin: AZURE_DNS.to_string(),
            parameter: "azure-dns settings",
        })
    }

    async fn get_access_token(&self, settings: &AzureDnsConfig) -> Result<String, PluginError> {
        if let Some(ref token) = *self.access_token.read().await {
            return Ok(token.clone());
        }

        let token_url = format!(
            "{}/{}/oauth2/v2.0/token",
            settings.login_endpoint.trim_end_matches('/'),
            settings.tenant_id
        );
        let scope = format!("{}/.default", settings.management_endpoint.trim_end_matches('/'));

        let response = self
            .client
            .post(&token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", settings.client_id.as_str()),
                ("client_secret", settings.client_secret.as_str()),
                ("scope", scope.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PluginError::Http(format!(
                "Azure login failed with status {}: {}",
                status, body
            )));
        }

        let token: TokenResponse = response.json().await?;
        debug!(tenant = %settings.tenant_id, "Obtained Azure access token");
        *self.access_token.write().await = Some(token.access_token.clone());
        Ok(token.access_token)
    }

    fn record_set_url(settings: &AzureDnsConfig, record: &str) -> Result<String, ConfigurationError> {
        let relative = relative_record_name(record, &settings.zone)?;
        Ok(format!(
            "{}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Network/dnsZones/{}/TXT/{}?api-version={}",
            settings.management_endpoint.trim_end_matches('/'),
            settings.subscription_id,
            settings.resource_group,
            settings.zone,
            relative,
            API_VERSION
        ))
    }
}

/// Record name relative to `zone`; `@` for the apex
pub fn relative_record_name(record: &str, zone: &str) -> Result<String, ConfigurationError> {
    let record = record.trim_end_matches('.').to_lowercase();
    let zone = zone.trim_end_matches('.').to_lowercase();
    if record == zone {
        return Ok("@".to_string());
    }
    record
        .strip_suffix(&format!(".{}", zone))
        .map(str::to_string)
        .ok_or_else(|| ConfigurationError::Invalid(format!("record {} is not in zone {}", record, zone)))
}

#[async_trait]
impl ValidationPlugin for AzureDnsValidation {
    fn name(&self) -> &str {
        AZURE_DNS
    }

    fn challenge_kind(&self) -> ChallengeKind {
        ChallengeKind::Dns01
    }

    fn prepare(&self, target: &Target) -> Result<(), ConfigurationError> {
        let settings = self.settings()?;
        for host in target.resolved_hosts()? {
            relative_record_name(&dns_record_name(&host), &settings.zone)?;
        }
        Ok(())
    }

    async fn publish_proof(&self, _target: &Target, proof: &ChallengeProof) -> Result<(), PluginError> {
        let settings = self.settings()?;
        let url = Self::record_set_url(settings, &proof.location)?;
        let token = self.get_access_token(settings).await?;
        let body = RecordSet {
            properties: RecordSetProperties {
                ttl: RECORD_TTL,
                txt_records: vec![TxtRecord {
                    value: vec![proof.content.clone()],
                }],
            },
        };

        let response = self
            .client
            .put(&url)
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let error = response.text().await.unwrap_or_default();
            return Err(PluginError::Http(format!(
                "Azure DNS returned status {}: {}",
                status, error
            )));
        }
        info!(record = %proof.location, zone = %settings.zone, "Created TXT record");

        wait_for_propagation(&proof.location, &proof.content, &self.dns).await;
        Ok(())
    }

    async fn retract_proof(&self, _target: &Target, proof: &ChallengeProof) -> Result<(), PluginError> {
        let settings = self.settings()?;
        let url = Self::record_set_url(settings, &proof.location)?;
        let token = self.get_access_token(settings).await?;

        let response = self.client.delete(&url).bearer_auth(&token).send().await?;
        let status = response.status();
        if !status.is_success() && status != reqwest::StatusCode::NOT_FOUND {
            let error = response.text().await.unwrap_or_default();
            return Err(PluginError::Http(format!(
                "Azure DNS returned status {}: {}",
                status, error
            )));
        }
        info!(record = %proof.location, zone = %settings.zone, "Deleted TXT record");
        Ok(())
    }
}
