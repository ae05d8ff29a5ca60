use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::RegistryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: String,
    pub name: String,
    pub status: RunStatus,
    pub category: String,
    pub started_at: DateTime<Utc>,
    pub duration: Option<f64>,
    pub findings: Option<u64>,
    pub output: String,
    pub command: String,
}

/// Terminal fields written together with the status transition.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub success: bool,
    pub duration: f64,
    pub output: String,
    pub findings: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunStats {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub running: usize,
    pub total_findings: u64,
    pub last_started_at: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    order: Vec<String>,
    runs: HashMap<String, RunRecord>,
}

/// Every run started during the life of the process. Records are never removed.
#[derive(Default)]
pub struct RunRegistry {
    inner: RwLock<Inner>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates an id and stores a fresh `running` record in one step.
    pub fn create(&self, prefix: &str, name: String, category: String, command: String) -> RunRecord {
        self.create_at(Utc::now(), prefix, name, category, command)
    }

    fn create_at(
        &self,
        now: DateTime<Utc>,
        prefix: &str,
        name: String,
        category: String,
        command: String,
    ) -> RunRecord {
        let mut inner = self.inner.write();

        // Same-second starts share a base id, so suffix until free.
        let base = format!("{}_{}", prefix, now.timestamp());
        let mut id = base.clone();
        let mut n = 2u32;
        while inner.runs.contains_key(&id) {
            id = format!("{base}_{n}");
            n += 1;
        }

        let record = RunRecord {
            id: id.clone(),
            name,
            status: RunStatus::Running,
            category,
            started_at: now,
            duration: None,
            findings: None,
            output: String::new(),
            command,
        };
        inner.order.push(id.clone());
        inner.runs.insert(id, record.clone());
        record
    }

    pub fn get(&self, id: &str) -> Option<RunRecord> {
        self.inner.read().runs.get(id).cloned()
    }

    pub fn list(&self) -> Vec<RunRecord> {
        let inner = self.inner.read();
        inner.order.iter().filter_map(|id| inner.runs.get(id).cloned()).collect()
    }

    pub fn stats(&self) -> RunStats {
        let inner = self.inner.read();
        let mut stats = RunStats {
            total: inner.runs.len(),
            completed: 0,
            failed: 0,
            running: 0,
            total_findings: 0,
            last_started_at: Utc::now(),
        };
        let mut last: Option<DateTime<Utc>> = None;
        for r in inner.runs.values() {
            match r.status {
                RunStatus::Running => stats.running += 1,
                RunStatus::Completed => stats.completed += 1,
                RunStatus::Failed => stats.failed += 1,
            }
            stats.total_findings += r.findings.unwrap_or(0);
            last = Some(last.map_or(r.started_at, |l| l.max(r.started_at)));
        }
        if let Some(last) = last {
            stats.last_started_at = last;
        }
        stats
    }

    /// Applies the normal exit transition: status, duration, output and findings at once.
    pub fn finish(&self, id: &str, outcome: RunOutcome) -> Result<RunRecord, RegistryError> {
        self.transition(id, |r| {
            r.status = if outcome.success { RunStatus::Completed } else { RunStatus::Failed };
            r.duration = Some(outcome.duration);
            r.output = outcome.output;
            r.findings = Some(outcome.findings);
        })
    }

    /// Launch or stream failure. Duration and findings stay unset.
    pub fn fail(&self, id: &str, error: &str) -> Result<RunRecord, RegistryError> {
        self.transition(id, |r| {
            r.status = RunStatus::Failed;
            r.output = format!("Error: {error}");
        })
    }

    fn transition<F>(&self, id: &str, apply: F) -> Result<RunRecord, RegistryError>
    where
        F: FnOnce(&mut RunRecord),
    {
        let mut inner = self.inner.write();
        let record = inner
            .runs
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        if record.status != RunStatus::Running {
            return Err(RegistryError::AlreadyFinished(id.to_string()));
        }
        apply(record);
        Ok(record.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::{collections::HashSet, sync::Arc};

    fn outcome(success: bool, findings: u64) -> RunOutcome {
        RunOutcome { success, duration: 1.5, output: "a\nb".into(), findings }
    }

    #[test]
    fn new_record_is_running_and_visible() {
        let reg = RunRegistry::new();
        let rec = reg.create("nmap", "Nmap Scan (10.0.0.1)".into(), "Network Reconnaissance".into(), "nmap 10.0.0.1".into());
        let got = reg.get(&rec.id).unwrap();
        assert_eq!(got.status, RunStatus::Running);
        assert_eq!(got.duration, None);
        assert_eq!(got.findings, None);
        assert!(got.output.is_empty());
        assert!(got.id.starts_with("nmap_"));
    }

    #[test]
    fn same_second_ids_get_suffixes() {
        let reg = RunRegistry::new();
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let a = reg.create_at(now, "dns", "a".into(), "c".into(), "dig".into());
        let b = reg.create_at(now, "dns", "b".into(), "c".into(), "dig".into());
        let c = reg.create_at(now, "dns", "c".into(), "c".into(), "dig".into());
        assert_eq!(a.id, "dns_1700000000");
        assert_eq!(b.id, "dns_1700000000_2");
        assert_eq!(c.id, "dns_1700000000_3");
        assert_eq!(reg.list().iter().map(|r| r.name.as_str()).collect::<Vec<_>>(), ["a", "b", "c"]);
    }

    #[test]
    fn concurrent_creates_never_collide() {
        let reg = Arc::new(RunRegistry::new());
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let reg = reg.clone();
                std::thread::spawn(move || reg.create("nmap", format!("run {i}"), "x".into(), "nmap".into()).id)
            })
            .collect();
        let ids: HashSet<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(ids.len(), 16);
        assert_eq!(reg.list().len(), 16);
    }

    #[test]
    fn finish_sets_all_terminal_fields_once() {
        let reg = RunRegistry::new();
        let id = reg.create("nmap", "n".into(), "c".into(), "nmap".into()).id;
        let done = reg.finish(&id, outcome(true, 1)).unwrap();
        assert_eq!(done.status, RunStatus::Completed);
        assert_eq!(done.duration, Some(1.5));
        assert_eq!(done.findings, Some(1));
        assert_eq!(done.output, "a\nb");

        assert_eq!(reg.finish(&id, outcome(false, 0)), Err(RegistryError::AlreadyFinished(id.clone())));
        assert_eq!(reg.fail(&id, "boom"), Err(RegistryError::AlreadyFinished(id.clone())));
        assert_eq!(reg.get(&id).unwrap().status, RunStatus::Completed);
    }

    #[test]
    fn fail_leaves_duration_and_findings_unset() {
        let reg = RunRegistry::new();
        let id = reg.create("vuln", "v".into(), "c".into(), "nmap".into()).id;
        let rec = reg.fail(&id, "failed to launch nmap").unwrap();
        assert_eq!(rec.status, RunStatus::Failed);
        assert_eq!(rec.output, "Error: failed to launch nmap");
        assert_eq!(rec.duration, None);
        assert_eq!(rec.findings, None);
    }

    #[test]
    fn unknown_run_is_not_found() {
        let reg = RunRegistry::new();
        assert!(reg.get("nope").is_none());
        assert_eq!(reg.fail("nope", "x"), Err(RegistryError::NotFound("nope".into())));
    }

    #[test]
    fn empty_stats_fall_back_to_now() {
        let before = Utc::now();
        let stats = RunRegistry::new().stats();
        assert_eq!(stats.total, 0);
        assert_eq!(stats.completed + stats.failed + stats.running, 0);
        assert_eq!(stats.total_findings, 0);
        assert!(stats.last_started_at >= before);
    }

    #[test]
    fn stats_aggregate_by_status() {
        let reg = RunRegistry::new();
        let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let t1 = Utc.timestamp_opt(1_700_000_100, 0).unwrap();
        let a = reg.create_at(t0, "nmap", "a".into(), "c".into(), "nmap".into()).id;
        let b = reg.create_at(t1, "nmap", "b".into(), "c".into(), "nmap".into()).id;
        reg.create_at(t0, "dns", "c".into(), "c".into(), "dig".into());
        reg.finish(&a, outcome(true, 3)).unwrap();
        reg.finish(&b, outcome(false, 2)).unwrap();

        let stats = reg.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.running, 1);
        assert_eq!(stats.total_findings, 5);
        assert_eq!(stats.last_started_at, t1);
    }
}
