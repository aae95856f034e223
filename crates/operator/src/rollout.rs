//! Rollout gate: when the workload must be redeployed.

use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use sha2::{Digest, Sha256};

/// True iff the config bundle or the secret was written this pass.
pub fn should_force_rollout(config_changed: bool, secret_changed: bool) -> bool {
    config_changed || secret_changed
}

/// Pod-template marker for this pass.
///
/// Derived from the mounted content of the config bundle and the secret, so a
/// workload write that failed after either changed is still rolled by the next
/// pass. When either object is unknown this pass the live marker is kept.
pub fn generation_marker(existing: Option<&str>, config_map: Option<&ConfigMap>, secret: Option<&Secret>) -> String {
    match (config_map, secret, existing) {
        (Some(cm), Some(s), _) => content_digest(Some(cm), Some(s)),
        (_, _, Some(live)) if !live.is_empty() => live.to_string(),
        (cm, s, _) => content_digest(cm, s),
    }
}

fn content_digest(config_map: Option<&ConfigMap>, secret: Option<&Secret>) -> String {
    fn field(h: &mut Sha256, k: &str, v: &[u8]) {
        h.update(k.as_bytes());
        h.update([0]);
        h.update(v);
        h.update([0]);
    }

    let mut h = Sha256::new();
    h.update(b"configmap\n");
    if let Some(cm) = config_map {
        for (k, v) in cm.data.iter().flatten() {
            field(&mut h, k, v.as_bytes());
        }
        for (k, v) in cm.binary_data.iter().flatten() {
            field(&mut h, k, &v.0);
        }
    }
    h.update(b"secret\n");
    if let Some(s) = secret {
        for (k, v) in s.data.iter().flatten() {
            field(&mut h, k, &v.0);
        }
    }
    hex::encode(h.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use k8s_openapi::ByteString;
    use std::collections::BTreeMap;

    fn cm(yaml: &str, rv: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta { resource_version: Some(rv.into()), ..Default::default() },
            data: Some(BTreeMap::from([("console-config.yaml".to_string(), yaml.to_string())])),
            ..Default::default()
        }
    }

    fn secret(value: &str) -> Secret {
        Secret {
            data: Some(BTreeMap::from([("clientSecret".to_string(), ByteString(value.as_bytes().to_vec()))])),
            ..Default::default()
        }
    }

    #[test]
    fn gate_is_a_plain_or() {
        assert!(!should_force_rollout(false, false));
        assert!(should_force_rollout(true, false));
        assert!(should_force_rollout(false, true));
        assert!(should_force_rollout(true, true));
    }

    #[test]
    fn marker_follows_content_not_versions() {
        let a = generation_marker(None, Some(&cm("a: 1", "1")), Some(&secret("s")));
        let b = generation_marker(Some("stale"), Some(&cm("a: 1", "9")), Some(&secret("s")));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn changed_content_changes_marker() {
        let base = generation_marker(None, Some(&cm("a: 1", "1")), Some(&secret("s")));
        assert_ne!(base, generation_marker(Some(&base), Some(&cm("a: 2", "1")), Some(&secret("s"))));
        assert_ne!(base, generation_marker(Some(&base), Some(&cm("a: 1", "1")), Some(&secret("t"))));
    }

    #[test]
    fn unknown_input_keeps_live_marker() {
        assert_eq!(generation_marker(Some("abc"), None, Some(&secret("s"))), "abc");
        assert_eq!(generation_marker(Some("abc"), Some(&cm("a: 1", "1")), None), "abc");
        let fresh = generation_marker(None, None, Some(&secret("s")));
        assert_eq!(fresh.len(), 64);
    }
}
