//! The managed sync step and the version-ranged recipe table.

use futures::future::BoxFuture;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use kube::{Resource, ResourceExt};
use semver::{Version, VersionReq};
use tracing::{debug, info, warn};

use console_apply::{apply, Mergeable};
use console_core::{names, Console, OAuthClient, ObjectStore, ReconcileError, Route};
use console_templates as templates;

use crate::rollout::{generation_marker, should_force_rollout};
use crate::OperatorContext;

/// Latest observed object of one kind and whether this pass wrote it.
/// `object` is `None` when the apply (or a prerequisite read) failed.
#[derive(Debug, Clone, PartialEq)]
pub struct Step<K> {
    pub object: Option<K>,
    pub changed: bool,
}

impl<K> Default for Step<K> {
    fn default() -> Self {
        Self { object: None, changed: false }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncOutcome {
    pub service: Step<Service>,
    pub route: Step<Route>,
    pub config_map: Step<ConfigMap>,
    pub oauth_client: Step<OAuthClient>,
    pub secret: Step<Secret>,
    pub deployment: Step<Deployment>,
}

impl SyncOutcome {
    pub fn any_changed(&self) -> bool {
        self.service.changed
            || self.route.changed
            || self.config_map.changed
            || self.oauth_client.changed
            || self.secret.changed
            || self.deployment.changed
    }

    /// Route host, empty while the platform has not assigned one.
    pub fn host(&self) -> String {
        self.route.object.as_ref().map(Route::resolved_host).unwrap_or_default()
    }

    /// Secret and OAuth client hold the same non-empty value.
    pub fn secrets_match(&self) -> bool {
        pair_matches(self.secret.object.as_ref(), self.oauth_client.object.as_ref())
    }
}

fn pair_matches(secret: Option<&Secret>, client: Option<&OAuthClient>) -> bool {
    match (secret.and_then(templates::secret_value), client) {
        (Some(s), Some(c)) => s == c.secret,
        _ => false,
    }
}

type SyncFn = for<'a> fn(&'a OperatorContext, &'a Console) -> BoxFuture<'a, (SyncOutcome, Option<ReconcileError>)>;

/// One entry of the recipe table: desired versions in `range` run `sync`.
pub struct Recipe {
    pub range: VersionReq,
    /// Reported in status as the task summary.
    pub task: &'static str,
    pub sync: SyncFn,
}

impl std::fmt::Debug for Recipe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recipe").field("range", &self.range.to_string()).field("task", &self.task).finish()
    }
}

fn sync_v4<'a>(ctx: &'a OperatorContext, console: &'a Console) -> BoxFuture<'a, (SyncOutcome, Option<ReconcileError>)> {
    Box::pin(sync_managed(ctx, console))
}

const RECIPES: &[(&str, &str, SyncFn)] = &[("^4", "sync-4.x", sync_v4)];

/// Ordered recipe table; the first matching range wins.
pub fn recipes() -> Result<Vec<Recipe>, semver::Error> {
    RECIPES
        .iter()
        .map(|&(range, task, sync)| Ok(Recipe { range: VersionReq::parse(range)?, task, sync }))
        .collect()
}

pub fn select_recipe<'r>(table: &'r [Recipe], version: &Version) -> Option<&'r Recipe> {
    table.iter().find(|r| r.range.matches(version))
}

async fn apply_step<K>(
    store: &dyn ObjectStore<K>,
    required: &K,
    errs: &mut Vec<ReconcileError>,
) -> Step<K>
where
    K: Resource<DynamicType = ()> + Mergeable + Clone + PartialEq + serde::Serialize + Send + Sync + 'static,
{
    match apply(store, required).await {
        Ok(out) => {
            if out.changed {
                info!(kind = %K::kind(&()), name = %out.object.name_any(), "applied");
            }
            Step { object: Some(out.object), changed: out.changed }
        }
        Err(e) => {
            warn!(kind = %K::kind(&()), name = %required.name_any(), error = %e, "apply failed");
            errs.push(e.into());
            Step::default()
        }
    }
}

/// Shared OAuth secret for this pass: the live value when the Secret and the
/// client already agree, a fresh one otherwise. `None` if either read failed.
async fn shared_secret(ctx: &OperatorContext, errs: &mut Vec<ReconcileError>) -> Option<String> {
    let secret = ctx.stores.secret.get_opt(names::OAUTH_SECRET_NAME).await;
    let client = ctx.stores.oauth_client.get_opt(names::OAUTH_CLIENT_NAME).await;
    match (secret, client) {
        (Ok(secret), Ok(client)) => {
            if pair_matches(secret.as_ref(), client.as_ref()) {
                secret.as_ref().and_then(templates::secret_value)
            } else {
                info!("oauth secret missing or out of sync; generating a new one");
                Some(templates::random_secret())
            }
        }
        (secret, client) => {
            errs.extend(secret.err().into_iter().chain(client.err()).map(ReconcileError::from));
            None
        }
    }
}

/// Apply every managed object in dependency order.
///
/// Errors never stop the pass: each is collected, later steps run with
/// whatever earlier steps produced, and the collection is folded into one
/// error (not-found filtered) at the end.
pub async fn sync_managed(ctx: &OperatorContext, console: &Console) -> (SyncOutcome, Option<ReconcileError>) {
    let stores = &ctx.stores;
    let mut errs = Vec::new();
    let mut out = SyncOutcome::default();

    out.service = apply_step(stores.service.as_ref(), &templates::service(console), &mut errs).await;
    out.route = apply_step(stores.route.as_ref(), &templates::route(console), &mut errs).await;

    let host = out.host();
    if host.is_empty() {
        debug!("route host not assigned yet");
    }

    match templates::config_map(console, &host) {
        Ok(cm) => out.config_map = apply_step(stores.config_map.as_ref(), &cm, &mut errs).await,
        Err(e) => errs.push(ReconcileError::ConfigurationInvalid(format!("rendering console config: {}", e))),
    }

    if let Some(value) = shared_secret(ctx, &mut errs).await {
        let client = templates::oauth_client(&host, &value);
        out.oauth_client = apply_step(stores.oauth_client.as_ref(), &client, &mut errs).await;
        out.secret = apply_step(stores.secret.as_ref(), &templates::secret(console, &value), &mut errs).await;
    }

    let force = should_force_rollout(out.config_map.changed, out.secret.changed);
    match stores.deployment.get_opt(names::DEPLOYMENT_NAME).await {
        Ok(live) => {
            let existing = live.as_ref().and_then(templates::rollout_marker_of);
            let marker = generation_marker(existing.as_deref(), out.config_map.object.as_ref(), out.secret.object.as_ref());
            match existing.as_deref() {
                Some(prev) if prev != marker && force => {
                    info!(marker = %marker, "config or secret changed; rolling workload");
                }
                Some(prev) if prev != marker => {
                    info!(marker = %marker, "workload behind mounted config; rolling");
                }
                _ => {}
            }
            match templates::deployment(console, &ctx.config.image, &marker) {
                Ok(dep) => out.deployment = apply_step(stores.deployment.as_ref(), &dep, &mut errs).await,
                Err(e) => errs.push(ReconcileError::ConfigurationInvalid(format!("rendering workload: {}", e))),
            }
        }
        Err(e) => errs.push(e.into()),
    }

    (out, ReconcileError::aggregate(errs))
}
