//! Resource types the operator reads and writes that k8s-openapi does not ship:
//! the `Console` desired-state record and the OpenShift `Route` / `OAuthClient` kinds.

use std::borrow::Cow;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::core::ClusterResourceScope;
use kube::{CustomResource, Resource};
use serde::{Deserialize, Serialize};

use crate::{names, ManagementState};

/// Desired state of the console. Exactly one instance, named `console`.
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[kube(
    group = "console.openshift.io",
    version = "v1alpha1",
    kind = "Console",
    namespaced,
    status = "ConsoleStatus",
    derive = "PartialEq",
    derive = "Default",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleSpec {
    /// Raw lifecycle mode; parsed per pass so that unknown values surface as errors.
    #[serde(default)]
    pub management_state: String,
    /// Desired semantic version.
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleStatus {
    /// Short tag naming the sync recipe that last ran.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub task_summary: String,
    /// Last version successfully driven.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_version: Option<String>,
    /// Public hostname of the route; empty while unresolved.
    #[serde(default)]
    pub host: String,
    /// True when the Secret and the OAuth client hold the same shared secret.
    #[serde(default)]
    pub oauth_secret_valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<String>,
}

impl ConsoleStatus {
    /// Equality that ignores the write timestamp.
    pub fn same_projection(&self, other: &ConsoleStatus) -> bool {
        self.task_summary == other.task_summary
            && self.current_version == other.current_version
            && self.host == other.host
            && self.oauth_secret_valid == other.oauth_secret_valid
    }
}

impl Console {
    /// The instance seeded when none exists.
    pub fn default_instance() -> Console {
        let mut c = Console::new(
            names::RESOURCE_NAME,
            ConsoleSpec {
                management_state: ManagementState::Managed.to_string(),
                version: names::DEFAULT_VERSION.to_string(),
            },
        );
        c.metadata.namespace = Some(names::TARGET_NAMESPACE.to_string());
        c
    }
}

// ----------------- route.openshift.io/v1 Route -----------------

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[kube(
    group = "route.openshift.io",
    version = "v1",
    kind = "Route",
    namespaced,
    status = "RouteStatus",
    derive = "PartialEq",
    derive = "Default",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct RouteSpec {
    /// Assigned by the router when left empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    pub to: RouteTargetReference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<RoutePort>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wildcard_policy: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RouteTargetReference {
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoutePort {
    pub target_port: IntOrString,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TlsConfig {
    pub termination: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insecure_edge_termination_policy: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RouteStatus {
    #[serde(default)]
    pub ingress: Vec<RouteIngress>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RouteIngress {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub router_name: Option<String>,
}

impl Route {
    /// Public hostname: `spec.host`, else the first admitted ingress host, else empty.
    pub fn resolved_host(&self) -> String {
        if let Some(h) = self.spec.host.as_deref().filter(|h| !h.is_empty()) {
            return h.to_string();
        }
        self.status
            .as_ref()
            .and_then(|s| s.ingress.iter().find_map(|i| i.host.clone()))
            .filter(|h| !h.is_empty())
            .unwrap_or_default()
    }
}

// ----------------- oauth.openshift.io/v1 OAuthClient -----------------

/// Cluster-scoped OAuth client registration. Its payload lives at the top level
/// (no `spec`), so the `Resource` impl is written by hand.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OAuthClient {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub secret: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_secrets: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub respond_with_challenges: Option<bool>,
    #[serde(default, rename = "redirectURIs", skip_serializing_if = "Vec::is_empty")]
    pub redirect_uris: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grant_method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token_max_age_seconds: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token_inactivity_timeout_seconds: Option<i32>,
}

impl OAuthClient {
    pub fn new(name: &str) -> Self {
        Self {
            api_version: <Self as Resource>::api_version(&()).into_owned(),
            kind: <Self as Resource>::kind(&()).into_owned(),
            metadata: ObjectMeta { name: Some(name.to_string()), ..Default::default() },
            ..Default::default()
        }
    }
}

impl Resource for OAuthClient {
    type DynamicType = ();
    type Scope = ClusterResourceScope;

    fn kind(_: &()) -> Cow<'_, str> {
        "OAuthClient".into()
    }

    fn group(_: &()) -> Cow<'_, str> {
        "oauth.openshift.io".into()
    }

    fn version(_: &()) -> Cow<'_, str> {
        "v1".into()
    }

    fn plural(_: &()) -> Cow<'_, str> {
        "oauthclients".into()
    }

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
