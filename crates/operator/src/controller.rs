//! Control loop: the single worker that turns queue keys into convergence passes.

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use semver::Version;
use tracing::{debug, error, info, info_span, warn, Instrument};

use console_core::{names, Console, ConsoleStatus, ManagementState, ReconcileError, WorkKey};
use console_queue::WorkQueue;
use console_templates as templates;

use crate::status::{project_status, project_unrecognized, should_write, stamped};
use crate::sync::{recipes, select_recipe, Recipe};
use crate::OperatorContext;

/// The single worker: drains the queue and runs one pass per key.
pub struct Controller {
    ctx: Arc<OperatorContext>,
    queue: WorkQueue<WorkKey>,
    recipes: Vec<Recipe>,
}

impl Controller {
    pub fn new(ctx: OperatorContext, queue: WorkQueue<WorkKey>) -> Result<Self, ReconcileError> {
        let recipes =
            recipes().map_err(|e| ReconcileError::ConfigurationInvalid(format!("sync recipe range: {}", e)))?;
        Ok(Self { ctx: Arc::new(ctx), queue, recipes })
    }

    pub fn queue(&self) -> &WorkQueue<WorkKey> {
        &self.queue
    }

    /// Process keys until the queue shuts down.
    pub async fn run(self) {
        info!("worker started");
        while self.process_next().await {}
        info!("worker stopped");
    }

    /// Take one key, run a pass, settle its retry state. `false` once shut down.
    pub async fn process_next(&self) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };
        let t0 = Instant::now();
        let res = self.reconcile().instrument(info_span!("sync", key = %key)).await;
        histogram!("sync_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
        self.handle_err(key, res);
        self.queue.done(&key);
        true
    }

    fn handle_err(&self, key: WorkKey, res: Result<(), ReconcileError>) {
        match res {
            Ok(()) => {
                counter!("sync_ok", 1u64);
                self.queue.forget(&key);
            }
            Err(e) => {
                counter!("sync_err", 1u64);
                let attempts = self.queue.num_requeues(&key);
                if attempts < self.ctx.config.max_retries {
                    warn!(error = %e, attempts, "sync failed; requeueing");
                    self.queue.add_rate_limited(key);
                } else {
                    counter!("queue_drops", 1u64);
                    error!(error = %e, attempts, "sync failed; giving up until the next event");
                    self.queue.forget(&key);
                }
            }
        }
    }

    /// One convergence pass against freshly read state.
    pub async fn reconcile(&self) -> Result<(), ReconcileError> {
        let stores = &self.ctx.stores;
        let console = match stores.console.get_opt(names::RESOURCE_NAME).await? {
            Some(c) => c,
            None => {
                let mut seed = Console::default_instance();
                seed.metadata.namespace = Some(self.ctx.config.namespace.clone());
                stores.console.create(&seed).await?;
                info!(name = names::RESOURCE_NAME, "created default console record");
                return Ok(());
            }
        };

        let state: ManagementState = console.spec.management_state.parse()?;
        debug!(state = %state, version = %console.spec.version, "pass");
        match state {
            ManagementState::Managed => self.sync_managed(&console).await,
            ManagementState::Unmanaged => {
                debug!("unmanaged; nothing to do");
                Ok(())
            }
            ManagementState::Removed => self.sync_removed().await,
        }
    }

    async fn sync_managed(&self, console: &Console) -> Result<(), ReconcileError> {
        let desired = Version::parse(&console.spec.version).map_err(|e| {
            ReconcileError::ConfigurationInvalid(format!("desired version {:?}: {}", console.spec.version, e))
        })?;
        let prev = console.status.as_ref();
        if let Some(last) = prev.and_then(|s| s.current_version.as_deref()) {
            match Version::parse(last) {
                Ok(v) if v != desired => info!(from = %v, to = %desired, "version change"),
                Ok(_) => {}
                Err(e) => warn!(version = %last, error = %e, "ignoring unparseable last-known version"),
            }
        }

        let Some(recipe) = select_recipe(&self.recipes, &desired) else {
            warn!(version = %desired, "no sync recipe for desired version");
            let next = project_unrecognized(prev);
            if should_write(false, prev, &next) {
                self.write_status(console, next).await?;
            }
            return Ok(());
        };

        let (outcome, sync_err) = (recipe.sync)(self.ctx.as_ref(), console).await;
        let next = project_status(prev, &outcome, recipe.task, &desired, sync_err.is_none());
        let mut errs: Vec<ReconcileError> = sync_err.into_iter().collect();
        if should_write(outcome.any_changed(), prev, &next) {
            if let Err(e) = self.write_status(console, next).await {
                errs.push(e);
            }
        }
        match ReconcileError::aggregate(errs) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn write_status(&self, console: &Console, next: ConsoleStatus) -> Result<(), ReconcileError> {
        let mut updated = console.clone();
        updated.status = Some(stamped(next));
        self.ctx.stores.console.update_status(&updated).await?;
        debug!("status written");
        Ok(())
    }

    /// Unhook the console from OAuth: drop the Secret and de-register the
    /// client. Absent objects count as done; nothing else is touched.
    async fn sync_removed(&self) -> Result<(), ReconcileError> {
        let stores = &self.ctx.stores;
        let mut errs = Vec::new();

        let mut secret_deleted = false;
        match stores.secret.delete(names::OAUTH_SECRET_NAME).await {
            Ok(()) => {
                secret_deleted = true;
                info!(name = names::OAUTH_SECRET_NAME, "deleted oauth secret");
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => errs.push(e.into()),
        }

        // Rotate only once: an unhooked client with no Secret beside it is left alone.
        match stores.oauth_client.get_opt(names::OAUTH_CLIENT_NAME).await {
            Ok(Some(client)) if !secret_deleted && client.redirect_uris.is_empty() && !client.secret.is_empty() => {
                debug!("oauth client already de-registered");
            }
            Ok(Some(client)) => {
                let dereg = templates::deregistered_oauth_client(&client, &templates::random_secret());
                match stores.oauth_client.update(&dereg).await {
                    Ok(_) => info!(name = names::OAUTH_CLIENT_NAME, "de-registered oauth client"),
                    Err(e) => errs.push(e.into()),
                }
            }
            Ok(None) => {}
            Err(e) => errs.push(e.into()),
        }

        match ReconcileError::aggregate(errs) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
