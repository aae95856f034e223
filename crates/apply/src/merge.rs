//! Per-kind merge of a required object onto the live one.
//!
//! Each kind copies only the fields this operator owns, so server-populated
//! values (cluster IPs, a router-assigned host, defaulted pod fields) survive.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{ConfigMap, Container, PodSpec, Secret, Service, ServiceSpec, Volume};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use console_core::{names, OAuthClient, Route};

pub trait Mergeable: Sized {
    /// Produce the object to write: `existing` with the owned parts of `required` laid over it.
    fn merge(existing: &Self, required: &Self) -> Self;
}

/// Merge labels, annotations and owner references from `required` into `existing`.
/// Keys only ever get added or overwritten; nothing is removed.
pub fn ensure_object_meta(existing: &mut ObjectMeta, required: &ObjectMeta) {
    if let Some(req) = &required.labels {
        let labels = existing.labels.get_or_insert_with(Default::default);
        for (k, v) in req {
            labels.insert(k.clone(), v.clone());
        }
    }
    if let Some(req) = &required.annotations {
        let annos = existing.annotations.get_or_insert_with(Default::default);
        for (k, v) in req {
            annos.insert(k.clone(), v.clone());
        }
    }
    if let Some(req) = &required.owner_references {
        let refs = existing.owner_references.get_or_insert_with(Vec::new);
        for r in req {
            match refs.iter_mut().find(|e| e.uid == r.uid) {
                Some(slot) => *slot = r.clone(),
                None => refs.push(r.clone()),
            }
        }
    }
}

impl Mergeable for Service {
    fn merge(existing: &Self, required: &Self) -> Self {
        let mut out = existing.clone();
        ensure_object_meta(&mut out.metadata, &required.metadata);
        if let Some(req) = &required.spec {
            let spec = out.spec.get_or_insert_with(ServiceSpec::default);
            spec.ports = req.ports.clone();
            spec.selector = req.selector.clone();
            if req.type_.is_some() {
                spec.type_ = req.type_.clone();
            }
        }
        out
    }
}

impl Mergeable for Route {
    fn merge(existing: &Self, required: &Self) -> Self {
        let mut out = existing.clone();
        ensure_object_meta(&mut out.metadata, &required.metadata);
        let assigned_host = existing.spec.host.clone();
        out.spec = required.spec.clone();
        if required.spec.host.as_deref().map(str::is_empty).unwrap_or(true) {
            out.spec.host = assigned_host;
        }
        out
    }
}

impl Mergeable for ConfigMap {
    fn merge(existing: &Self, required: &Self) -> Self {
        let mut out = existing.clone();
        ensure_object_meta(&mut out.metadata, &required.metadata);
        out.data = required.data.clone();
        out.binary_data = required.binary_data.clone();
        out
    }
}

impl Mergeable for Secret {
    fn merge(existing: &Self, required: &Self) -> Self {
        let mut out = existing.clone();
        ensure_object_meta(&mut out.metadata, &required.metadata);
        out.data = required.data.clone();
        if required.type_.is_some() {
            out.type_ = required.type_.clone();
        }
        out
    }
}

impl Mergeable for OAuthClient {
    fn merge(existing: &Self, required: &Self) -> Self {
        let mut out = existing.clone();
        ensure_object_meta(&mut out.metadata, &required.metadata);
        out.secret = required.secret.clone();
        out.additional_secrets = required.additional_secrets.clone();
        out.respond_with_challenges = required.respond_with_challenges;
        out.redirect_uris = required.redirect_uris.clone();
        out.grant_method = required.grant_method.clone();
        out.access_token_max_age_seconds = required.access_token_max_age_seconds;
        out.access_token_inactivity_timeout_seconds = required.access_token_inactivity_timeout_seconds;
        out
    }
}

fn spec_hash(meta: &ObjectMeta) -> Option<&str> {
    meta.annotations
        .as_ref()
        .and_then(|a| a.get(names::SPEC_HASH_ANNOTATION))
        .map(String::as_str)
}

/// Every key of `want` is present in `live` with the same value.
fn contains_all(live: Option<&BTreeMap<String, String>>, want: Option<&BTreeMap<String, String>>) -> bool {
    want.into_iter().flatten().all(|(k, v)| live.and_then(|l| l.get(k)) == Some(v))
}

fn container_drifted(live: &Container, want: &Container) -> bool {
    let ports = |c: &Container| c.ports.iter().flatten().map(|p| p.container_port).collect::<Vec<_>>();
    let mounts = |c: &Container| {
        c.volume_mounts.iter().flatten().map(|m| (m.name.clone(), m.mount_path.clone())).collect::<Vec<_>>()
    };
    live.image != want.image
        || live.command != want.command
        || live.args != want.args
        || live.env != want.env
        || ports(live) != ports(want)
        || mounts(live) != mounts(want)
}

fn volume_sources(spec: &PodSpec) -> Vec<(String, Option<String>, Option<String>)> {
    spec.volumes
        .iter()
        .flatten()
        .map(|v: &Volume| {
            (
                v.name.clone(),
                v.config_map.as_ref().and_then(|c| c.name.clone()),
                v.secret.as_ref().and_then(|s| s.secret_name.clone()),
            )
        })
        .collect()
}

/// Compare only what the template sets; server-defaulted fields are ignored.
fn owned_spec_drifted(live: &DeploymentSpec, want: &DeploymentSpec) -> bool {
    if live.replicas != want.replicas || live.selector.match_labels != want.selector.match_labels {
        return true;
    }
    let (lt, wt) = (live.template.metadata.as_ref(), want.template.metadata.as_ref());
    if !contains_all(lt.and_then(|m| m.labels.as_ref()), wt.and_then(|m| m.labels.as_ref()))
        || !contains_all(lt.and_then(|m| m.annotations.as_ref()), wt.and_then(|m| m.annotations.as_ref()))
    {
        return true;
    }
    match (live.template.spec.as_ref(), want.template.spec.as_ref()) {
        (_, None) => false,
        (None, Some(_)) => true,
        (Some(l), Some(w)) => {
            l.containers.len() != w.containers.len()
                || w.containers.iter().any(|wc| match l.containers.iter().find(|lc| lc.name == wc.name) {
                    Some(lc) => container_drifted(lc, wc),
                    None => true,
                })
                || volume_sources(l) != volume_sources(w)
        }
    }
}

impl Mergeable for Deployment {
    /// The server defaults many pod fields, so the spec is only replaced when
    /// the required spec digest differs from the one recorded on the live object
    /// or a field the template sets no longer matches.
    fn merge(existing: &Self, required: &Self) -> Self {
        let mut out = existing.clone();
        let unchanged = match (spec_hash(&existing.metadata), spec_hash(&required.metadata)) {
            (Some(live), Some(want)) if live == want => match (&existing.spec, &required.spec) {
                (Some(l), Some(w)) => !owned_spec_drifted(l, w),
                (Some(_), None) => true,
                (None, _) => false,
            },
            _ => false,
        };
        ensure_object_meta(&mut out.metadata, &required.metadata);
        if !unchanged {
            out.spec = required.spec.clone();
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use console_core::{RouteSpec, RouteTargetReference};
    use k8s_openapi::api::core::v1::{PodTemplateSpec, ServicePort};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

    fn labels(pairs: &[(&str, &str)]) -> Option<BTreeMap<String, String>> {
        Some(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
    }

    #[test]
    fn object_meta_merge_adds_and_overwrites_but_never_removes() {
        let mut live = ObjectMeta {
            labels: labels(&[("app", "old"), ("extra", "keep")]),
            owner_references: Some(vec![OwnerReference { uid: "u1".into(), name: "a".into(), ..Default::default() }]),
            ..Default::default()
        };
        let want = ObjectMeta {
            labels: labels(&[("app", "openshift-console")]),
            annotations: labels(&[("k", "v")]),
            owner_references: Some(vec![
                OwnerReference { uid: "u1".into(), name: "b".into(), ..Default::default() },
                OwnerReference { uid: "u2".into(), name: "c".into(), ..Default::default() },
            ]),
            ..Default::default()
        };
        ensure_object_meta(&mut live, &want);
        let l = live.labels.unwrap();
        assert_eq!(l["app"], "openshift-console");
        assert_eq!(l["extra"], "keep");
        assert_eq!(live.annotations.unwrap()["k"], "v");
        let refs = live.owner_references.unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].name, "b");
    }

    #[test]
    fn route_merge_keeps_router_assigned_host() {
        let mut live = Route::new("console", RouteSpec { host: Some("console.apps.example.com".into()), ..Default::default() });
        live.metadata.resource_version = Some("7".into());
        let want = Route::new(
            "console",
            RouteSpec {
                to: RouteTargetReference { kind: "Service".into(), name: "console".into(), weight: Some(100) },
                ..Default::default()
            },
        );
        let merged = Route::merge(&live, &want);
        assert_eq!(merged.spec.host.as_deref(), Some("console.apps.example.com"));
        assert_eq!(merged.spec.to.name, "console");
        assert_eq!(merged.metadata.resource_version.as_deref(), Some("7"));
    }

    #[test]
    fn service_merge_preserves_cluster_ip() {
        let live = Service {
            metadata: ObjectMeta { name: Some("console".into()), ..Default::default() },
            spec: Some(ServiceSpec { cluster_ip: Some("10.0.0.12".into()), ..Default::default() }),
            ..Default::default()
        };
        let want = Service {
            metadata: ObjectMeta { name: Some("console".into()), ..Default::default() },
            spec: Some(ServiceSpec {
                ports: Some(vec![ServicePort { name: Some("https".into()), port: 443, ..Default::default() }]),
                ..Default::default()
            }),
            ..Default::default()
        };
        let merged = Service::merge(&live, &want);
        let spec = merged.spec.unwrap();
        assert_eq!(spec.cluster_ip.as_deref(), Some("10.0.0.12"));
        assert_eq!(spec.ports.unwrap()[0].port, 443);
    }

    #[test]
    fn deployment_merge_skips_spec_when_digest_matches() {
        let hashed = |h: &str| ObjectMeta {
            name: Some("console".into()),
            annotations: labels(&[(names::SPEC_HASH_ANNOTATION, h)]),
            ..Default::default()
        };
        // live spec carries server defaults the template never sets
        let live = Deployment {
            metadata: hashed("abc"),
            spec: Some(DeploymentSpec { replicas: Some(2), revision_history_limit: Some(10), ..Default::default() }),
            ..Default::default()
        };
        let same = Deployment { metadata: hashed("abc"), spec: Some(DeploymentSpec { replicas: Some(2), ..Default::default() }), ..Default::default() };
        assert_eq!(Deployment::merge(&live, &same), live);

        let different = Deployment { metadata: hashed("def"), spec: Some(DeploymentSpec { replicas: Some(3), ..Default::default() }), ..Default::default() };
        let merged = Deployment::merge(&live, &different);
        assert_eq!(merged.spec.unwrap().replicas, Some(3));
        assert_eq!(merged.metadata.annotations.unwrap()[names::SPEC_HASH_ANNOTATION], "def");
    }

    #[test]
    fn deployment_merge_reverts_owned_fields_behind_an_unchanged_digest() {
        let meta = ObjectMeta {
            name: Some("console".into()),
            annotations: labels(&[(names::SPEC_HASH_ANNOTATION, "abc")]),
            ..Default::default()
        };
        let pod = |image: &str, pull: Option<&str>| PodTemplateSpec {
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "console".into(),
                    image: Some(image.into()),
                    image_pull_policy: pull.map(Into::into),
                    termination_message_path: pull.map(|_| "/dev/termination-log".into()),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            ..Default::default()
        };
        let want = Deployment {
            metadata: meta.clone(),
            spec: Some(DeploymentSpec { replicas: Some(2), template: pod("console:v1", None), ..Default::default() }),
            ..Default::default()
        };

        // server defaults alone are not drift
        let defaulted = Deployment {
            metadata: meta.clone(),
            spec: Some(DeploymentSpec {
                replicas: Some(2),
                template: pod("console:v1", Some("IfNotPresent")),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(Deployment::merge(&defaulted, &want), defaulted);

        let edited = Deployment {
            metadata: meta,
            spec: Some(DeploymentSpec { replicas: Some(7), template: pod("other:latest", Some("Always")), ..Default::default() }),
            ..Default::default()
        };
        let merged = Deployment::merge(&edited, &want).spec.unwrap();
        assert_eq!(merged.replicas, Some(2));
        assert_eq!(merged.template.spec.unwrap().containers[0].image.as_deref(), Some("console:v1"));
    }
}
