//! The console's own configuration file, shipped as a ConfigMap.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use serde::{Deserialize, Serialize};

use console_core::{names, Console};

use crate::{https, owned_meta};

pub const CONFIG_FILE_KEY: &str = "console-config.yaml";

const CLIENT_SECRET_FILE: &str = "/var/oauth-config/clientSecret";
const OAUTH_ENDPOINT_CA_FILE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";
const DOCUMENTATION_BASE_URL: &str = "https://docs.okd.io/4.0/";
const BRANDING: &str = "okd";
const CERT_FILE: &str = "/var/serving-cert/tls.crt";
const KEY_FILE: &str = "/var/serving-cert/tls.key";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleConfig {
    pub kind: String,
    pub api_version: String,
    pub auth: AuthConfig,
    pub cluster_info: ClusterInfo,
    pub customization: Customization,
    pub serving_info: ServingInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    #[serde(rename = "clientID")]
    pub client_id: String,
    pub client_secret_file: String,
    pub logout_redirect: String,
    pub oauth_endpoint_ca_file: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterInfo {
    /// Absent until the route has a host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub console_base_address: Option<String>,
    pub console_base_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customization {
    pub branding: String,
    #[serde(rename = "documentationBaseURL")]
    pub documentation_base_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServingInfo {
    pub bind_address: String,
    pub cert_file: String,
    pub key_file: String,
}

impl ConsoleConfig {
    pub fn for_host(host: &str) -> Self {
        ConsoleConfig {
            kind: "ConsoleConfig".into(),
            api_version: "console.openshift.io/v1beta1".into(),
            auth: AuthConfig {
                client_id: names::OAUTH_CLIENT_NAME.into(),
                client_secret_file: CLIENT_SECRET_FILE.into(),
                logout_redirect: String::new(),
                oauth_endpoint_ca_file: OAUTH_ENDPOINT_CA_FILE.into(),
            },
            cluster_info: ClusterInfo {
                console_base_address: Some(https(host)).filter(|s| !s.is_empty()),
                console_base_path: String::new(),
            },
            customization: Customization {
                branding: BRANDING.into(),
                documentation_base_url: DOCUMENTATION_BASE_URL.into(),
            },
            serving_info: ServingInfo {
                bind_address: "https://0.0.0.0:8443".into(),
                cert_file: CERT_FILE.into(),
                key_file: KEY_FILE.into(),
            },
        }
    }
}

pub fn console_config_yaml(host: &str) -> Result<String, serde_yaml::Error> {
    serde_yaml::to_string(&ConsoleConfig::for_host(host))
}

/// ConfigMap carrying the console config for `host` (may be empty).
pub fn config_map(console: &Console, host: &str) -> Result<ConfigMap, serde_yaml::Error> {
    Ok(ConfigMap {
        metadata: owned_meta(console, names::CONFIG_MAP_NAME),
        data: Some(BTreeMap::from([(CONFIG_FILE_KEY.to_string(), console_config_yaml(host)?)])),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_address_is_omitted_without_host() {
        let y = console_config_yaml("").unwrap();
        assert!(!y.contains("consoleBaseAddress"), "{y}");
        assert!(y.contains("consoleBasePath"));
        let parsed: ConsoleConfig = serde_yaml::from_str(&y).unwrap();
        assert_eq!(parsed.cluster_info.console_base_address, None);
    }

    #[test]
    fn base_address_uses_https_host() {
        let cm = config_map(&Console::default_instance(), "console.apps.example.com").unwrap();
        let y = &cm.data.unwrap()[CONFIG_FILE_KEY];
        let parsed: ConsoleConfig = serde_yaml::from_str(y).unwrap();
        assert_eq!(parsed.cluster_info.console_base_address.as_deref(), Some("https://console.apps.example.com"));
        assert_eq!(parsed.auth.client_id, "openshift-console");
        assert_eq!(parsed.serving_info.bind_address, "https://0.0.0.0:8443");
        assert!(y.starts_with("kind: ConsoleConfig\napiVersion: console.openshift.io/v1beta1\n"), "{y}");
    }
}
