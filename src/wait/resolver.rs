// src/wait/resolver.rs

//! Evaluation of wait conditions against external systems.

use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::store::{TaskStore, WaitCondition, WaitKind, WaitingFor};
use crate::wait::host::HostClient;
use crate::wait::reference::{parse_pr_ref, parse_timestamp};

const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(30);

/// How a single evaluation of one condition came out.
enum Evaluation {
    Resolved,
    /// Still unresolved; the string says why.
    Pending(String),
    /// Will never resolve; the string says why.
    Failed(String),
}

/// Summary of what [`WaitResolver::sweep`] did to one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepUpdate {
    pub task_id: String,
    /// Conditions that flipped to resolved in this pass.
    pub newly_resolved: usize,
    /// Whether `waiting_for` was cleared entirely.
    pub cleared: bool,
}

/// Evaluates wait conditions against an external signal provider.
///
/// Every per-condition failure (unreachable host, parse error, timeout) is
/// attached to the condition's `error` field; sibling conditions in the
/// same batch are always still evaluated.
pub struct WaitResolver<C> {
    client: C,
    check_timeout: Duration,
}

impl<C: HostClient> WaitResolver<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            check_timeout: DEFAULT_CHECK_TIMEOUT,
        }
    }

    pub fn with_timeout(client: C, check_timeout: Duration) -> Self {
        Self {
            client,
            check_timeout,
        }
    }

    /// Evaluate one condition against current external state and return the
    /// updated condition.
    ///
    /// `resolved` is monotonic: an already-resolved condition is returned
    /// unchanged, as is a terminally failed one (`failed` means no amount
    /// of polling can resolve it). Task-typed conditions pass through
    /// untouched (no error); the unblock engine owns those.
    pub async fn check_one(&self, condition: &WaitCondition) -> WaitCondition {
        let mut updated = condition.clone();
        if updated.resolved || updated.failed {
            return updated;
        }

        let evaluation = match condition.kind {
            WaitKind::Task => return updated,
            WaitKind::Time => self.check_time(condition),
            WaitKind::PrCi | WaitKind::PrMerged | WaitKind::Comment => {
                self.check_hosted(condition).await
            }
        };

        match evaluation {
            Evaluation::Resolved => {
                info!(kind = ?condition.kind, reference = %condition.reference, "condition resolved");
                updated.resolved = true;
                updated.resolved_at = Some(Utc::now());
                updated.error = None;
            }
            Evaluation::Pending(reason) => {
                debug!(
                    kind = ?condition.kind,
                    reference = %condition.reference,
                    reason = %reason,
                    "condition still pending"
                );
                updated.error = Some(reason);
            }
            Evaluation::Failed(reason) => {
                warn!(
                    kind = ?condition.kind,
                    reference = %condition.reference,
                    reason = %reason,
                    "condition can never resolve"
                );
                updated.failed = true;
                updated.error = Some(reason);
            }
        }

        updated
    }

    /// Evaluate every non-task condition in the batch.
    ///
    /// Returns `(all_resolved, updated)`, where `all_resolved` only covers
    /// the non-task conditions and is trivially true when there are none.
    /// Callers must separately confirm there are no unresolved task
    /// conditions before treating a task as fully unblocked.
    pub async fn check_all(&self, conditions: &[WaitCondition]) -> (bool, Vec<WaitCondition>) {
        let mut all_resolved = true;
        let mut updated = Vec::with_capacity(conditions.len());

        for condition in conditions {
            if condition.is_task() {
                updated.push(condition.clone());
                continue;
            }
            let checked = self.check_one(condition).await;
            if !checked.resolved {
                all_resolved = false;
            }
            updated.push(checked);
        }

        (all_resolved, updated)
    }

    /// Periodic pass over the whole store: evaluate every task's pending
    /// external conditions and persist what changed.
    ///
    /// A task's `waiting_for` (and `waiting_since`) is cleared entirely once
    /// every condition is resolved and none is task-typed.
    pub async fn sweep<S: TaskStore>(&self, store: &S) -> Result<Vec<SweepUpdate>> {
        let tasks = store.load_all()?;
        let mut updates = Vec::new();

        for task in tasks.values() {
            if task.is_terminal() {
                continue;
            }
            let Some(waiting) = &task.meta.waiting_for else {
                continue;
            };
            let conditions = waiting.conditions();
            if !conditions
                .iter()
                .any(|c| !c.is_task() && !c.resolved && !c.failed)
            {
                continue;
            }

            let (all_resolved, updated) = self.check_all(conditions).await;
            let newly_resolved = updated
                .iter()
                .zip(conditions)
                .filter(|(new, old)| new.resolved && !old.resolved)
                .count();
            let changed = updated.as_slice() != conditions;

            let clear = all_resolved && !updated.iter().any(|c| c.is_task());
            if !changed && !clear {
                continue;
            }

            let mut task = task.clone();
            if clear {
                info!(task = %task.meta.id, "all external conditions resolved; clearing waiting_for");
                task.meta.waiting_for = None;
                task.meta.waiting_since = None;
            } else {
                task.meta.waiting_for = WaitingFor::from_conditions(updated);
            }
            store.save(&task)?;

            updates.push(SweepUpdate {
                task_id: task.meta.id.clone(),
                newly_resolved,
                cleared: clear,
            });
        }

        Ok(updates)
    }

    fn check_time(&self, condition: &WaitCondition) -> Evaluation {
        match parse_timestamp(&condition.reference) {
            Ok(when) if Utc::now() >= when => Evaluation::Resolved,
            Ok(when) => Evaluation::Pending(format!("not until {}", when.to_rfc3339())),
            Err(e) => Evaluation::Pending(e),
        }
    }

    /// Evaluate a condition that needs the code host, with a bounded
    /// per-check timeout. Timeouts and host errors leave the condition
    /// unresolved with a descriptive error.
    async fn check_hosted(&self, condition: &WaitCondition) -> Evaluation {
        let pr = match parse_pr_ref(&condition.reference) {
            Ok(pr) => pr,
            Err(e) => return Evaluation::Pending(e),
        };

        let fut = async {
            match condition.kind {
                WaitKind::PrCi => self.check_pr_ci(&pr).await,
                WaitKind::PrMerged => self.check_pr_merged(&pr).await,
                WaitKind::Comment => self.check_comment(&pr, condition.pattern.as_deref()).await,
                WaitKind::Time | WaitKind::Task => unreachable!("handled by caller"),
            }
        };

        match tokio::time::timeout(self.check_timeout, fut).await {
            Ok(evaluation) => evaluation,
            Err(_) => Evaluation::Pending(format!(
                "timed out after {}s checking {}",
                self.check_timeout.as_secs(),
                pr
            )),
        }
    }

    async fn check_pr_ci(&self, pr: &crate::wait::PrRef) -> Evaluation {
        let checks = match self.client.ci_checks(pr).await {
            Ok(checks) => checks,
            Err(e) => return Evaluation::Pending(format!("failed to fetch CI checks: {e:#}")),
        };

        if checks.is_empty() {
            return Evaluation::Pending(format!("no CI checks reported on {pr}"));
        }

        let not_passing: Vec<&str> = checks
            .iter()
            .filter(|c| !c.is_passing())
            .map(|c| c.name.as_str())
            .collect();
        if not_passing.is_empty() {
            return Evaluation::Resolved;
        }

        let mut names = not_passing[..not_passing.len().min(3)].join(", ");
        if not_passing.len() > 3 {
            names.push_str(&format!(" (+{} more)", not_passing.len() - 3));
        }
        Evaluation::Pending(format!("checks not passing: {names}"))
    }

    async fn check_pr_merged(&self, pr: &crate::wait::PrRef) -> Evaluation {
        let status = match self.client.pr_status(pr).await {
            Ok(status) => status,
            Err(e) => return Evaluation::Pending(format!("failed to fetch PR status: {e:#}")),
        };

        if status.merged {
            Evaluation::Resolved
        } else if status.is_closed() {
            Evaluation::Failed(format!("{pr} closed without merge"))
        } else {
            Evaluation::Pending(format!("{pr} not merged (state {})", status.state))
        }
    }

    async fn check_comment(
        &self,
        pr: &crate::wait::PrRef,
        pattern: Option<&str>,
    ) -> Evaluation {
        let Some(pattern) = pattern.filter(|p| !p.is_empty()) else {
            return Evaluation::Pending("comment condition has no pattern".to_string());
        };

        let comments = match self.client.comments(pr).await {
            Ok(comments) => comments,
            Err(e) => return Evaluation::Pending(format!("failed to fetch comments: {e:#}")),
        };

        let needle = pattern.to_lowercase();
        if comments.iter().any(|c| c.to_lowercase().contains(&needle)) {
            Evaluation::Resolved
        } else {
            Evaluation::Pending(format!("no comment on {pr} matching \"{pattern}\""))
        }
    }
}

/// Up to `limit` human-readable reasons why a task is still blocked,
/// drawn from its unresolved non-task conditions.
pub fn pending_reasons(conditions: &[WaitCondition], limit: usize) -> Vec<String> {
    conditions
        .iter()
        .filter(|c| !c.is_task() && !c.resolved)
        .take(limit)
        .map(|c| match &c.error {
            Some(error) => format!("{}: {}", c.reference, error),
            None => format!("{}: pending", c.reference),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{
        MemoryTaskStore, Task, TaskMeta, TaskState, WaitCondition, WaitKind, WaitingFor,
    };
    use crate::wait::host::{CheckRun, HostClient, PrStatus};
    use crate::wait::reference::PrRef;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::collections::HashMap;

    /// Scripted host client: fixed answers per `owner/repo#number`.
    #[derive(Default)]
    struct FakeHost {
        checks: HashMap<String, Vec<CheckRun>>,
        statuses: HashMap<String, PrStatus>,
        comments: HashMap<String, Vec<String>>,
        /// Delay applied to every call (for timeout tests).
        delay: Option<Duration>,
    }

    impl FakeHost {
        async fn maybe_sleep(&self) {
            if let Some(d) = self.delay {
                tokio::time::sleep(d).await;
            }
        }
    }

    #[async_trait]
    impl HostClient for FakeHost {
        async fn ci_checks(&self, pr: &PrRef) -> anyhow::Result<Vec<CheckRun>> {
            self.maybe_sleep().await;
            self.checks
                .get(&pr.to_string())
                .cloned()
                .ok_or_else(|| anyhow!("unknown PR {pr}"))
        }

        async fn pr_status(&self, pr: &PrRef) -> anyhow::Result<PrStatus> {
            self.maybe_sleep().await;
            self.statuses
                .get(&pr.to_string())
                .cloned()
                .ok_or_else(|| anyhow!("unknown PR {pr}"))
        }

        async fn comments(&self, pr: &PrRef) -> anyhow::Result<Vec<String>> {
            self.maybe_sleep().await;
            self.comments
                .get(&pr.to_string())
                .cloned()
                .ok_or_else(|| anyhow!("unknown PR {pr}"))
        }
    }

    fn check(name: &str, state: &str) -> CheckRun {
        CheckRun {
            name: name.to_string(),
            state: state.to_string(),
        }
    }

    fn ci_condition() -> WaitCondition {
        WaitCondition::new(WaitKind::PrCi, "octo/widgets#1")
    }

    #[tokio::test]
    async fn pr_ci_resolves_when_all_checks_pass() {
        let mut host = FakeHost::default();
        host.checks.insert(
            "octo/widgets#1".into(),
            vec![check("build", "SUCCESS"), check("lint", "SKIPPED")],
        );
        let resolver = WaitResolver::new(host);

        let updated = resolver.check_one(&ci_condition()).await;
        assert!(updated.resolved);
        assert!(updated.resolved_at.is_some());
        assert!(updated.error.is_none());
    }

    #[tokio::test]
    async fn pr_ci_names_up_to_three_failing_checks() {
        let mut host = FakeHost::default();
        host.checks.insert(
            "octo/widgets#1".into(),
            vec![
                check("a", "FAILURE"),
                check("b", "PENDING"),
                check("c", "FAILURE"),
                check("d", "FAILURE"),
            ],
        );
        let resolver = WaitResolver::new(host);

        let updated = resolver.check_one(&ci_condition()).await;
        assert!(!updated.resolved);
        let err = updated.error.unwrap();
        assert!(err.contains("a, b, c"), "{err}");
        assert!(err.contains("+1 more"), "{err}");
        assert!(!err.contains('d'), "{err}");
    }

    #[tokio::test]
    async fn pr_ci_with_no_checks_stays_pending() {
        let mut host = FakeHost::default();
        host.checks.insert("octo/widgets#1".into(), vec![]);
        let resolver = WaitResolver::new(host);

        let updated = resolver.check_one(&ci_condition()).await;
        assert!(!updated.resolved);
        assert!(updated.error.unwrap().contains("no CI checks"));
    }

    #[tokio::test]
    async fn pr_merged_resolves() {
        let mut host = FakeHost::default();
        host.statuses.insert(
            "octo/widgets#1".into(),
            PrStatus {
                state: "MERGED".into(),
                merged: true,
            },
        );
        let resolver = WaitResolver::new(host);

        let cond = WaitCondition::new(WaitKind::PrMerged, "octo/widgets#1");
        let updated = resolver.check_one(&cond).await;
        assert!(updated.resolved);
        assert!(!updated.failed);
    }

    #[tokio::test]
    async fn closed_without_merge_is_a_terminal_failure() {
        let mut host = FakeHost::default();
        host.statuses.insert(
            "octo/widgets#1".into(),
            PrStatus {
                state: "CLOSED".into(),
                merged: false,
            },
        );
        let resolver = WaitResolver::new(host);

        let cond = WaitCondition::new(WaitKind::PrMerged, "octo/widgets#1");
        let updated = resolver.check_one(&cond).await;
        assert!(!updated.resolved);
        assert!(updated.failed);
        assert!(updated.error.unwrap().contains("closed without merge"));
    }

    #[tokio::test]
    async fn comment_match_is_case_insensitive_substring() {
        let mut host = FakeHost::default();
        host.comments.insert(
            "octo/widgets#1".into(),
            vec!["nope".into(), "Looks good, LGTM!".into()],
        );
        let resolver = WaitResolver::new(host);

        let cond = WaitCondition::comment("octo/widgets#1", "lgtm");
        let updated = resolver.check_one(&cond).await;
        assert!(updated.resolved);
    }

    #[tokio::test]
    async fn comment_without_match_stays_pending() {
        let mut host = FakeHost::default();
        host.comments
            .insert("octo/widgets#1".into(), vec!["needs work".into()]);
        let resolver = WaitResolver::new(host);

        let cond = WaitCondition::comment("octo/widgets#1", "lgtm");
        let updated = resolver.check_one(&cond).await;
        assert!(!updated.resolved);
        assert!(updated.error.unwrap().contains("lgtm"));
    }

    #[tokio::test]
    async fn time_condition_in_the_past_resolves() {
        let resolver = WaitResolver::new(FakeHost::default());
        let cond = WaitCondition::new(WaitKind::Time, "2000-01-01T00:00:00Z");
        assert!(resolver.check_one(&cond).await.resolved);
    }

    #[tokio::test]
    async fn time_condition_in_the_future_stays_pending() {
        let resolver = WaitResolver::new(FakeHost::default());
        let cond = WaitCondition::new(WaitKind::Time, "2999-01-01T00:00:00Z");
        let updated = resolver.check_one(&cond).await;
        assert!(!updated.resolved);
        assert!(updated.error.unwrap().contains("not until"));
    }

    #[tokio::test]
    async fn naive_time_reference_does_not_raise() {
        let resolver = WaitResolver::new(FakeHost::default());
        let cond = WaitCondition::new(WaitKind::Time, "2000-01-01 00:00:00");
        assert!(resolver.check_one(&cond).await.resolved);
    }

    #[tokio::test]
    async fn task_condition_is_a_pass_through() {
        let resolver = WaitResolver::new(FakeHost::default());
        let cond = WaitCondition::new(WaitKind::Task, "dep-task");
        let updated = resolver.check_one(&cond).await;
        assert!(!updated.resolved);
        assert!(updated.error.is_none());
    }

    #[tokio::test]
    async fn resolved_flag_is_monotonic() {
        // Host would now report failure, but the stored resolution wins.
        let mut host = FakeHost::default();
        host.checks
            .insert("octo/widgets#1".into(), vec![check("build", "FAILURE")]);
        let resolver = WaitResolver::new(host);

        let mut cond = ci_condition();
        cond.resolved = true;
        let updated = resolver.check_one(&cond).await;
        assert!(updated.resolved);
    }

    #[tokio::test]
    async fn bad_reference_becomes_condition_error() {
        let resolver = WaitResolver::new(FakeHost::default());
        let cond = WaitCondition::new(WaitKind::PrCi, "not a reference");
        let updated = resolver.check_one(&cond).await;
        assert!(!updated.resolved);
        assert!(updated.error.is_some());
    }

    #[tokio::test]
    async fn host_error_does_not_abort_siblings() {
        let mut host = FakeHost::default();
        host.statuses.insert(
            "octo/widgets#2".into(),
            PrStatus {
                state: "MERGED".into(),
                merged: true,
            },
        );
        let resolver = WaitResolver::new(host);

        let conditions = vec![
            WaitCondition::new(WaitKind::PrCi, "octo/widgets#1"), // unknown PR
            WaitCondition::new(WaitKind::PrMerged, "octo/widgets#2"),
        ];
        let (all_resolved, updated) = resolver.check_all(&conditions).await;
        assert!(!all_resolved);
        assert!(updated[0].error.is_some());
        assert!(updated[1].resolved);
    }

    #[tokio::test]
    async fn check_all_is_trivially_true_for_task_only_batch() {
        let resolver = WaitResolver::new(FakeHost::default());
        let conditions = vec![WaitCondition::new(WaitKind::Task, "dep-task")];
        let (all_resolved, updated) = resolver.check_all(&conditions).await;
        assert!(all_resolved);
        assert_eq!(updated, conditions);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_host_hits_the_bounded_timeout() {
        let mut host = FakeHost::default();
        host.delay = Some(Duration::from_secs(300));
        host.statuses.insert(
            "octo/widgets#1".into(),
            PrStatus {
                state: "MERGED".into(),
                merged: true,
            },
        );
        let resolver = WaitResolver::with_timeout(host, Duration::from_secs(5));

        let cond = WaitCondition::new(WaitKind::PrMerged, "octo/widgets#1");
        let updated = resolver.check_one(&cond).await;
        assert!(!updated.resolved);
        assert!(updated.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn failed_condition_is_not_rechecked() {
        // Host would now report a merge, but the terminal failure sticks
        // and no query is made for it.
        let mut host = FakeHost::default();
        host.statuses.insert(
            "octo/widgets#1".into(),
            PrStatus {
                state: "MERGED".into(),
                merged: true,
            },
        );
        let resolver = WaitResolver::new(host);

        let mut cond = WaitCondition::new(WaitKind::PrMerged, "octo/widgets#1");
        cond.failed = true;
        cond.error = Some("octo/widgets#1 closed without merge".into());

        let updated = resolver.check_one(&cond).await;
        assert!(!updated.resolved);
        assert!(updated.failed);
        assert_eq!(
            updated.error.as_deref(),
            Some("octo/widgets#1 closed without merge")
        );
    }

    fn waiting(id: &str, conditions: Vec<WaitCondition>) -> Task {
        let mut meta = TaskMeta::new(id);
        meta.waiting_since = Some(Utc::now());
        meta.waiting_for = WaitingFor::from_conditions(conditions);
        Task::new(meta)
    }

    fn seeded(tasks: Vec<Task>) -> MemoryTaskStore {
        MemoryTaskStore::new(
            tasks
                .into_iter()
                .map(|t| (t.id().to_string(), t))
                .collect(),
        )
    }

    #[tokio::test]
    async fn sweep_persists_partial_resolutions() {
        let mut host = FakeHost::default();
        host.statuses.insert(
            "octo/widgets#1".into(),
            PrStatus {
                state: "MERGED".into(),
                merged: true,
            },
        );
        host.comments
            .insert("octo/widgets#2".into(), vec!["needs work".into()]);
        let resolver = WaitResolver::new(host);

        let store = seeded(vec![waiting(
            "task-a",
            vec![
                WaitCondition::new(WaitKind::PrMerged, "octo/widgets#1"),
                WaitCondition::comment("octo/widgets#2", "lgtm"),
            ],
        )]);

        let updates = resolver.sweep(&store).await.unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].task_id, "task-a");
        assert_eq!(updates[0].newly_resolved, 1);
        assert!(!updates[0].cleared);

        let saved = store.get("task-a").unwrap();
        let waiting = saved.meta.waiting_for.as_ref().unwrap();
        let conds = waiting.conditions();
        assert!(conds[0].resolved);
        assert!(!conds[1].resolved);
        assert!(conds[1].error.is_some());
        assert!(saved.meta.waiting_since.is_some());
    }

    #[tokio::test]
    async fn sweep_clears_fully_resolved_external_waits() {
        let mut host = FakeHost::default();
        host.statuses.insert(
            "octo/widgets#1".into(),
            PrStatus {
                state: "MERGED".into(),
                merged: true,
            },
        );
        let resolver = WaitResolver::new(host);

        let store = seeded(vec![waiting(
            "task-a",
            vec![WaitCondition::new(WaitKind::PrMerged, "octo/widgets#1")],
        )]);

        let updates = resolver.sweep(&store).await.unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].newly_resolved, 1);
        assert!(updates[0].cleared);

        let saved = store.get("task-a").unwrap();
        assert!(saved.meta.waiting_for.is_none());
        assert!(saved.meta.waiting_since.is_none());
        assert_eq!(store.saved_ids(), vec!["task-a"]);
    }

    #[tokio::test]
    async fn sweep_never_clears_past_a_task_condition() {
        let mut host = FakeHost::default();
        host.statuses.insert(
            "octo/widgets#1".into(),
            PrStatus {
                state: "MERGED".into(),
                merged: true,
            },
        );
        let resolver = WaitResolver::new(host);

        let store = seeded(vec![waiting(
            "task-a",
            vec![
                WaitCondition::new(WaitKind::PrMerged, "octo/widgets#1"),
                WaitCondition::new(WaitKind::Task, "dep-task"),
            ],
        )]);

        let updates = resolver.sweep(&store).await.unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].newly_resolved, 1);
        assert!(!updates[0].cleared);

        let saved = store.get("task-a").unwrap();
        let waiting = saved.meta.waiting_for.as_ref().unwrap();
        let conds = waiting.conditions();
        assert_eq!(conds.len(), 2);
        assert!(conds[0].resolved);
        assert!(!conds[1].resolved);
        assert!(conds[1].error.is_none());
    }

    #[tokio::test]
    async fn sweep_skips_terminal_and_failed_only_tasks() {
        let mut done = waiting("done-task", vec![ci_condition()]);
        done.meta.state = TaskState::Done;

        let mut closed = WaitCondition::new(WaitKind::PrMerged, "octo/widgets#1");
        closed.failed = true;
        let stuck = waiting("stuck", vec![closed]);

        let store = seeded(vec![done, stuck]);
        let resolver = WaitResolver::new(FakeHost::default());

        let updates = resolver.sweep(&store).await.unwrap();
        assert!(updates.is_empty());
        assert!(store.saved_ids().is_empty());
    }

    #[test]
    fn pending_reasons_lists_unresolved_only() {
        let mut resolved = ci_condition();
        resolved.resolved = true;
        let mut pending = WaitCondition::new(WaitKind::PrMerged, "octo/widgets#2");
        pending.error = Some("not merged (state OPEN)".into());
        let task = WaitCondition::new(WaitKind::Task, "dep-task");

        let reasons = pending_reasons(&[resolved, pending, task], 3);
        assert_eq!(reasons.len(), 1);
        assert!(reasons[0].contains("octo/widgets#2"));
    }
}
