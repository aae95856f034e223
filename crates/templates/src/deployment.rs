use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, ContainerPort, HTTPGetAction, PodSpec, PodTemplateSpec, Probe,
    SecretVolumeSource, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use sha2::{Digest, Sha256};

use console_core::{names, Console};

use crate::{console_labels, owned_meta};

const REPLICAS: i32 = 2;

/// Mounted volumes: (volume name, mount path, source). `true` marks a ConfigMap source.
const MOUNTS: [(&str, &str, &str, bool); 3] = [
    ("console-serving-cert", "/var/serving-cert", names::SERVING_CERT_SECRET_NAME, false),
    ("console-oauth-config", "/var/oauth-config", names::OAUTH_SECRET_NAME, false),
    ("console-config", "/var/console-config", names::CONFIG_MAP_NAME, true),
];

/// Hex sha256 of the serialized spec.
pub fn spec_hash(spec: &DeploymentSpec) -> Result<String, serde_json::Error> {
    let bytes = serde_json::to_vec(spec)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Marker currently stamped on the pod template of `dep`.
pub fn rollout_marker_of(dep: &Deployment) -> Option<String> {
    dep.spec
        .as_ref()?
        .template
        .metadata
        .as_ref()?
        .annotations
        .as_ref()?
        .get(names::ROLLOUT_MARKER_ANNOTATION)
        .cloned()
}

/// The console workload. `marker` lands on the pod template, so a new value
/// rolls the pods.
pub fn deployment(console: &Console, image: &str, marker: &str) -> Result<Deployment, serde_json::Error> {
    let mut meta = owned_meta(console, names::DEPLOYMENT_NAME);
    meta.labels = Some(console_labels());

    let volumes = MOUNTS
        .iter()
        .map(|(vol, _, source, is_cm)| Volume {
            name: vol.to_string(),
            config_map: is_cm.then(|| ConfigMapVolumeSource {
                name: Some(source.to_string()),
                ..Default::default()
            }),
            secret: (!is_cm).then(|| SecretVolumeSource {
                secret_name: Some(source.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        })
        .collect();
    let mounts = MOUNTS
        .iter()
        .map(|(vol, path, _, _)| VolumeMount {
            name: vol.to_string(),
            mount_path: path.to_string(),
            read_only: Some(true),
            ..Default::default()
        })
        .collect();

    let container = Container {
        name: "console".into(),
        image: Some(image.to_string()),
        image_pull_policy: Some("IfNotPresent".into()),
        command: Some(vec![
            "/opt/bridge/bin/bridge".into(),
            "--public-dir=/opt/bridge/static".into(),
            format!("--config=/var/console-config/{}", crate::CONFIG_FILE_KEY),
        ]),
        ports: Some(vec![ContainerPort {
            name: Some("https".into()),
            container_port: 8443,
            protocol: Some("TCP".into()),
            ..Default::default()
        }]),
        readiness_probe: Some(Probe {
            http_get: Some(HTTPGetAction {
                path: Some("/health".into()),
                port: IntOrString::Int(8443),
                scheme: Some("HTTPS".into()),
                ..Default::default()
            }),
            ..Default::default()
        }),
        volume_mounts: Some(mounts),
        ..Default::default()
    };

    let spec = DeploymentSpec {
        replicas: Some(REPLICAS),
        selector: LabelSelector { match_labels: Some(console_labels()), ..Default::default() },
        template: PodTemplateSpec {
            metadata: Some(ObjectMeta {
                name: Some(names::DEPLOYMENT_NAME.to_string()),
                labels: Some(console_labels()),
                annotations: Some(BTreeMap::from([(
                    names::ROLLOUT_MARKER_ANNOTATION.to_string(),
                    marker.to_string(),
                )])),
                ..Default::default()
            }),
            spec: Some(PodSpec {
                containers: vec![container],
                volumes: Some(volumes),
                ..Default::default()
            }),
        },
        ..Default::default()
    };

    meta.annotations = Some(BTreeMap::from([(names::SPEC_HASH_ANNOTATION.to_string(), spec_hash(&spec)?)]));
    Ok(Deployment { metadata: meta, spec: Some(spec), ..Default::default() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_is_stamped_and_hashed() {
        let c = Console::default_instance();
        let a = deployment(&c, "quay.io/openshift/origin-console:latest", "m1").unwrap();
        assert_eq!(rollout_marker_of(&a).as_deref(), Some("m1"));
        let same = deployment(&c, "quay.io/openshift/origin-console:latest", "m1").unwrap();
        let other = deployment(&c, "quay.io/openshift/origin-console:latest", "m2").unwrap();
        let hash = |d: &Deployment| d.metadata.annotations.as_ref().unwrap()[names::SPEC_HASH_ANNOTATION].clone();
        assert_eq!(hash(&a), hash(&same));
        assert_ne!(hash(&a), hash(&other));
    }

    #[test]
    fn workload_mounts_config_secret_and_cert() {
        let d = deployment(&Console::default_instance(), "img", "m").unwrap();
        assert_eq!(d.metadata.labels.as_ref().unwrap()["component"], "ui");
        let pod = d.spec.unwrap().template.spec.unwrap();
        let vols = pod.volumes.unwrap();
        assert_eq!(vols.len(), 3);
        assert_eq!(vols[2].config_map.as_ref().unwrap().name.as_deref(), Some("console-config"));
        assert_eq!(vols[1].secret.as_ref().unwrap().secret_name.as_deref(), Some("console-oauth-config"));
        assert_eq!(pod.containers[0].image.as_deref(), Some("img"));
    }
}
