use serde::{Deserialize, Serialize};

use crate::registry::RunRecord;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    RunStart { run_id: String, run: RunRecord },
    RunOutput { run_id: String, line: String },
    RunComplete { run_id: String, run: RunRecord },
    RunError { run_id: String, error: String },
}

impl RunEvent {
    pub fn run_id(&self) -> &str {
        match self {
            RunEvent::RunStart { run_id, .. }
            | RunEvent::RunOutput { run_id, .. }
            | RunEvent::RunComplete { run_id, .. }
            | RunEvent::RunError { run_id, .. } => run_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunEvent::RunComplete { .. } | RunEvent::RunError { .. })
    }
}
