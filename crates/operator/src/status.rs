//! Status projector.

use console_core::ConsoleStatus;
use semver::Version;

use crate::SyncOutcome;

/// Task summary written when no recipe covers the desired version.
pub const UNRECOGNIZED: &str = "unrecognized";

/// Fold a pass into the status block. `current_version` only advances on a
/// clean pass; otherwise the previous value is carried.
pub fn project_status(
    prev: Option<&ConsoleStatus>,
    outcome: &SyncOutcome,
    task: &str,
    desired: &Version,
    clean: bool,
) -> ConsoleStatus {
    let current_version = if clean {
        Some(desired.to_string())
    } else {
        prev.and_then(|p| p.current_version.clone())
    };
    ConsoleStatus {
        task_summary: task.to_string(),
        current_version,
        host: outcome.host(),
        oauth_secret_valid: outcome.secrets_match(),
        last_update_time: prev.and_then(|p| p.last_update_time.clone()),
    }
}

/// Previous block with only the task summary replaced.
pub fn project_unrecognized(prev: Option<&ConsoleStatus>) -> ConsoleStatus {
    ConsoleStatus { task_summary: UNRECOGNIZED.to_string(), ..prev.cloned().unwrap_or_default() }
}

/// Write when the pass changed something or the block would read differently.
pub fn should_write(any_changed: bool, prev: Option<&ConsoleStatus>, next: &ConsoleStatus) -> bool {
    any_changed || !prev.map(|p| p.same_projection(next)).unwrap_or(false)
}

/// Stamp the write time.
pub fn stamped(mut status: ConsoleStatus) -> ConsoleStatus {
    status.last_update_time = Some(chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true));
    status
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Step;
    use console_core::{Route, RouteSpec};

    fn outcome_with_host(host: &str) -> SyncOutcome {
        let route = Route::new("console", RouteSpec { host: Some(host.into()), ..Default::default() });
        SyncOutcome { route: Step { object: Some(route), changed: false }, ..Default::default() }
    }

    #[test]
    fn clean_pass_records_version_and_host() {
        let v = Version::new(4, 0, 0);
        let s = project_status(None, &outcome_with_host("console.apps.example.com"), "sync-4.x", &v, true);
        assert_eq!(s.current_version.as_deref(), Some("4.0.0"));
        assert_eq!(s.host, "console.apps.example.com");
        assert!(!s.oauth_secret_valid);
        assert_eq!(s.task_summary, "sync-4.x");
    }

    #[test]
    fn failed_pass_keeps_previous_version() {
        let prev = ConsoleStatus { current_version: Some("4.0.0".into()), ..Default::default() };
        let s = project_status(Some(&prev), &SyncOutcome::default(), "sync-4.x", &Version::new(4, 1, 0), false);
        assert_eq!(s.current_version.as_deref(), Some("4.0.0"));
        assert_eq!(s.host, "");
    }

    #[test]
    fn write_decision_ignores_timestamp() {
        let prev = stamped(ConsoleStatus { host: "h".into(), ..Default::default() });
        let same = ConsoleStatus { host: "h".into(), ..Default::default() };
        assert!(!should_write(false, Some(&prev), &same));
        assert!(should_write(true, Some(&prev), &same));
        assert!(should_write(false, None, &same));
        assert!(should_write(false, Some(&prev), &project_unrecognized(Some(&prev))));
    }
}
