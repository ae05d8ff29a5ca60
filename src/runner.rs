use std::{io, process::Stdio, sync::Arc, time::Duration};
use tokio::{io::AsyncRead, process::Command, time::Instant};
use tokio_stream::{Stream, StreamExt};
use tokio_util::{
    codec::{AnyDelimiterCodec, AnyDelimiterCodecError, FramedRead},
    sync::CancellationToken,
    task::TaskTracker,
};
use tracing::{debug, error, info, warn};

use crate::command::CommandLine;
use crate::error::RunFailure;
use crate::events::RunEvent;
use crate::findings::{count_findings, FindingMatcher, OpenPortMatcher};
use crate::hub::ObserverHub;
use crate::registry::{RunOutcome, RunRecord, RunRegistry};

/// What to launch and how to label it.
pub struct RunSpec {
    pub prefix: String,
    pub name: String,
    pub category: String,
    pub command: CommandLine,
    pub matcher: Arc<dyn FindingMatcher>,
}

impl RunSpec {
    pub fn new(prefix: impl Into<String>, name: impl Into<String>, category: impl Into<String>, command: CommandLine) -> Self {
        Self {
            prefix: prefix.into(),
            name: name.into(),
            category: category.into(),
            command,
            matcher: Arc::new(OpenPortMatcher),
        }
    }

    pub fn with_matcher(mut self, matcher: Arc<dyn FindingMatcher>) -> Self {
        self.matcher = matcher;
        self
    }
}

/// Starts runs as tracked background tasks and owns their lifetime.
#[derive(Clone)]
pub struct JobRunner {
    registry: Arc<RunRegistry>,
    hub: Arc<ObserverHub>,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl JobRunner {
    pub fn new(registry: Arc<RunRegistry>, hub: Arc<ObserverHub>) -> Self {
        Self { registry, hub, tracker: TaskTracker::new(), cancel: CancellationToken::new() }
    }

    pub fn registry(&self) -> &Arc<RunRegistry> {
        &self.registry
    }

    pub fn hub(&self) -> &Arc<ObserverHub> {
        &self.hub
    }

    /// Registers the run, announces it, then spawns the process task.
    /// Returns as soon as the record is visible; the process may not have started yet.
    pub fn start(&self, spec: RunSpec) -> RunRecord {
        let record = self.registry.create(&spec.prefix, spec.name, spec.category, spec.command.to_string());
        info!(run_id = %record.id, command = %record.command, "starting run");

        self.hub.broadcast(RunEvent::RunStart { run_id: record.id.clone(), run: record.clone() });

        let job = RunJob {
            run_id: record.id.clone(),
            command: spec.command,
            matcher: spec.matcher,
            registry: self.registry.clone(),
            hub: self.hub.clone(),
        };
        self.tracker.spawn(job.run(self.cancel.child_token()));
        record
    }

    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Waits up to `grace` for in-flight runs, then cancels whatever is left.
    /// Cancelled runs still end with exactly one `run_error`.
    pub async fn shutdown(&self, grace: Duration) {
        self.tracker.close();
        if tokio::time::timeout(grace, self.tracker.wait()).await.is_err() {
            warn!(in_flight = self.tracker.len(), "grace period elapsed, cancelling runs");
            self.cancel.cancel();
            self.tracker.wait().await;
        }
    }
}

struct RunJob {
    run_id: String,
    command: CommandLine,
    matcher: Arc<dyn FindingMatcher>,
    registry: Arc<RunRegistry>,
    hub: Arc<ObserverHub>,
}

impl RunJob {
    async fn run(self, cancel: CancellationToken) {
        match self.execute(&cancel).await {
            Ok(outcome) => match self.registry.finish(&self.run_id, outcome) {
                Ok(rec) => {
                    info!(
                        run_id = %rec.id,
                        status = ?rec.status,
                        findings = rec.findings.unwrap_or(0),
                        duration = rec.duration.unwrap_or_default(),
                        "run finished"
                    );
                    self.hub.broadcast(RunEvent::RunComplete { run_id: self.run_id.clone(), run: rec });
                }
                Err(e) => error!(run_id = %self.run_id, "could not record run result: {e}"),
            },
            Err(failure) => {
                error!(run_id = %self.run_id, "run failed: {failure}");
                let message = failure.to_string();
                if let Err(e) = self.registry.fail(&self.run_id, &message) {
                    error!(run_id = %self.run_id, "could not record run failure: {e}");
                    return;
                }
                self.hub.broadcast(RunEvent::RunError { run_id: self.run_id.clone(), error: message });
            }
        }
    }

    async fn execute(&self, cancel: &CancellationToken) -> Result<RunOutcome, RunFailure> {
        let program = self.command.program().ok_or(RunFailure::EmptyCommand)?;

        let started = Instant::now();
        let mut child = Command::new(program)
            .args(self.command.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RunFailure::Spawn { program: program.to_string(), source })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RunFailure::Stream(io::Error::other("stdout not captured")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| RunFailure::Stream(io::Error::other("stderr not captured")))?;

        // Interleave both pipes as lines arrive.
        let mut lines = output_lines(stdout).merge(output_lines(stderr));

        let mut buffered: Vec<String> = Vec::new();
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = child.kill().await;
                    return Err(RunFailure::Cancelled);
                }
                next = lines.next() => next,
            };
            match next {
                Some(Ok(raw)) => {
                    let line = raw.trim().to_string();
                    debug!(run_id = %self.run_id, "{line}");
                    self.hub.broadcast(RunEvent::RunOutput { run_id: self.run_id.clone(), line: line.clone() });
                    buffered.push(line);
                }
                Some(Err(e)) => return Err(RunFailure::Stream(e)),
                None => break,
            }
        }

        let status = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(RunFailure::Cancelled);
            }
            status = child.wait() => status.map_err(RunFailure::Wait)?,
        };

        Ok(RunOutcome {
            success: status.success(),
            duration: started.elapsed().as_secs_f64(),
            findings: count_findings(self.matcher.as_ref(), &buffered),
            output: buffered.join("\n"),
        })
    }
}

/// Newline-framed output. Bytes that are not UTF-8 (service banners) are
/// replaced rather than failing the run.
fn output_lines<R>(pipe: R) -> impl Stream<Item = io::Result<String>> + Unpin
where
    R: AsyncRead + Unpin,
{
    FramedRead::new(pipe, AnyDelimiterCodec::new(b"\n".to_vec(), b"\n".to_vec())).map(|chunk| match chunk {
        Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Err(AnyDelimiterCodecError::Io(e)) => Err(e),
        Err(e) => Err(io::Error::other(e)),
    })
}
