//! Console templates: desired payloads for every managed object. No I/O.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Secret, Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use k8s_openapi::ByteString;
use kube::Resource;

use console_core::{names, Console, OAuthClient, Route, RoutePort, RouteSpec, RouteTargetReference, TlsConfig};

mod config;
mod deployment;

pub use config::{config_map, console_config_yaml, ConsoleConfig, CONFIG_FILE_KEY};
pub use deployment::{deployment, rollout_marker_of, spec_hash};

/// Key under which the shared OAuth secret is stored in the Secret.
pub const CLIENT_SECRET_KEY: &str = "clientSecret";
/// Bytes of entropy in a generated shared secret.
pub const SECRET_BYTES: usize = 32;

/// `app=openshift-console`, carried by every namespaced managed object.
pub fn shared_labels() -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_string(), names::CONSOLE_APP_NAME.to_string())])
}

/// Shared labels plus `component=ui`; selects the console pods.
pub fn console_labels() -> BTreeMap<String, String> {
    let mut l = shared_labels();
    l.insert("component".into(), "ui".into());
    l
}

/// Namespace of the desired-state record, which every namespaced object shares.
pub fn namespace_of(console: &Console) -> String {
    console.metadata.namespace.clone().unwrap_or_else(|| names::TARGET_NAMESPACE.to_string())
}

/// Metadata for a namespaced object owned by `console`. The owner reference is
/// only attached once the record has a uid.
pub fn owned_meta(console: &Console, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace_of(console)),
        labels: Some(shared_labels()),
        owner_references: console.controller_owner_ref(&()).map(|r| vec![r]),
        ..Default::default()
    }
}

pub fn service(console: &Console) -> Service {
    let mut meta = owned_meta(console, names::SERVICE_NAME);
    meta.annotations = Some(BTreeMap::from([(
        "service.alpha.openshift.io/serving-cert-secret-name".to_string(),
        names::SERVING_CERT_SECRET_NAME.to_string(),
    )]));
    Service {
        metadata: meta,
        spec: Some(ServiceSpec {
            ports: Some(vec![ServicePort {
                name: Some("https".into()),
                protocol: Some("TCP".into()),
                port: 443,
                target_port: Some(IntOrString::Int(8443)),
                ..Default::default()
            }]),
            selector: Some(console_labels()),
            type_: Some("ClusterIP".into()),
            session_affinity: Some("None".into()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Route to the service. `host` is left unset so the platform assigns one.
pub fn route(console: &Console) -> Route {
    let mut r = Route::new(
        names::ROUTE_NAME,
        RouteSpec {
            host: None,
            to: RouteTargetReference {
                kind: "Service".into(),
                name: names::SERVICE_NAME.into(),
                weight: Some(100),
            },
            port: Some(RoutePort { target_port: IntOrString::String("https".into()) }),
            tls: Some(TlsConfig {
                termination: "reencrypt".into(),
                insecure_edge_termination_policy: Some("Redirect".into()),
            }),
            wildcard_policy: Some("None".into()),
        },
    );
    r.metadata = owned_meta(console, names::ROUTE_NAME);
    r
}

/// Opaque secret holding the shared OAuth client secret.
pub fn secret(console: &Console, value: &str) -> Secret {
    Secret {
        metadata: owned_meta(console, names::OAUTH_SECRET_NAME),
        type_: Some("Opaque".into()),
        data: Some(BTreeMap::from([(
            CLIENT_SECRET_KEY.to_string(),
            ByteString(value.as_bytes().to_vec()),
        )])),
        ..Default::default()
    }
}

/// Stored shared secret, if present and non-empty.
pub fn secret_value(secret: &Secret) -> Option<String> {
    let from_data = secret
        .data
        .as_ref()
        .and_then(|d| d.get(CLIENT_SECRET_KEY))
        .and_then(|b| String::from_utf8(b.0.clone()).ok());
    let from_string_data = || secret.string_data.as_ref().and_then(|d| d.get(CLIENT_SECRET_KEY).cloned());
    from_data.or_else(from_string_data).filter(|s| !s.is_empty())
}

/// `https://<host>`; empty host stays empty.
pub fn https(host: &str) -> String {
    if host.is_empty() || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{}", host)
    }
}

/// Cluster-scoped OAuth client registration. No owner reference: a
/// cluster-scoped object cannot be owned by a namespaced one.
pub fn oauth_client(host: &str, secret: &str) -> OAuthClient {
    let mut c = OAuthClient::new(names::OAUTH_CLIENT_NAME);
    c.secret = secret.to_string();
    c.redirect_uris = match https(host) {
        s if s.is_empty() => Vec::new(),
        s => vec![s],
    };
    c.grant_method = Some("auto".into());
    c
}

/// `existing` with the console unhooked: no redirect targets and a throwaway secret.
pub fn deregistered_oauth_client(existing: &OAuthClient, fresh_secret: &str) -> OAuthClient {
    let mut c = existing.clone();
    c.redirect_uris.clear();
    c.secret = fresh_secret.to_string();
    c
}

/// 256 random bits from the OS generator, URL-safe base64 without padding.
pub fn random_secret() -> String {
    use base64::Engine as _;
    use rand::RngCore;
    let mut buf = [0u8; SECRET_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut buf);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owned_console() -> Console {
        let mut c = Console::default_instance();
        c.metadata.uid = Some("0b5a1c1e-7d1b-4c3e-9a43-6b8e4f0f2a11".into());
        c
    }

    #[test]
    fn namespaced_objects_carry_labels_and_controller_ref() {
        let c = owned_console();
        let svc = service(&c);
        assert_eq!(svc.metadata.namespace.as_deref(), Some("openshift-console"));
        assert_eq!(svc.metadata.labels.as_ref().unwrap()["app"], "openshift-console");
        let refs = svc.metadata.owner_references.unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].kind, "Console");
        assert_eq!(refs[0].controller, Some(true));

        let r = route(&c);
        assert!(r.spec.host.is_none());
        assert_eq!(r.metadata.owner_references.unwrap()[0].uid, c.metadata.uid.unwrap());
    }

    #[test]
    fn no_owner_ref_without_uid() {
        let c = Console::default_instance();
        assert!(secret(&c, "x").metadata.owner_references.is_none());
    }

    #[test]
    fn service_exposes_https_to_8443() {
        let svc = service(&owned_console());
        let spec = svc.spec.unwrap();
        let port = &spec.ports.unwrap()[0];
        assert_eq!(port.port, 443);
        assert_eq!(port.target_port, Some(IntOrString::Int(8443)));
        assert_eq!(spec.selector.unwrap()["component"], "ui");
        assert_eq!(
            svc.metadata.annotations.unwrap()["service.alpha.openshift.io/serving-cert-secret-name"],
            "console-serving-cert"
        );
    }

    #[test]
    fn secret_round_trips_its_value() {
        let s = secret(&owned_console(), "abc");
        assert_eq!(s.type_.as_deref(), Some("Opaque"));
        assert_eq!(secret_value(&s).as_deref(), Some("abc"));
        assert_eq!(secret_value(&Secret::default()), None);
        assert_eq!(secret_value(&secret(&owned_console(), "")), None);
    }

    #[test]
    fn oauth_client_redirect_follows_host() {
        let c = oauth_client("console.apps.example.com", "s");
        assert_eq!(c.redirect_uris, vec!["https://console.apps.example.com".to_string()]);
        assert_eq!(c.grant_method.as_deref(), Some("auto"));
        assert!(c.metadata.owner_references.is_none());
        assert!(oauth_client("", "s").redirect_uris.is_empty());
        assert_eq!(https("https://already"), "https://already");
    }

    #[test]
    fn deregistration_clears_redirects_and_rotates_secret() {
        let live = oauth_client("console.apps.example.com", "old");
        let d = deregistered_oauth_client(&live, "new");
        assert!(d.redirect_uris.is_empty());
        assert_eq!(d.secret, "new");
        assert_eq!(d.grant_method, live.grant_method);
    }

    #[test]
    fn random_secrets_are_long_and_distinct() {
        let a = random_secret();
        let b = random_secret();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
    }
}
