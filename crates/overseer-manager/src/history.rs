//! Per-run execution history

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use overseer_core::AgentId;

/// Terminal outcome of one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TerminalStatus {
    Completed,
    Failed,
    Stopped,
}

/// One attempt's record. Append-only; the run keeps a bounded ring of these.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub terminal_status: TerminalStatus,
    pub output: Option<String>,
    pub error: Option<String>,
    pub run_number: u32,
    pub retry_attempt: u32,
    pub agent_id: AgentId,
    pub execution_time_ms: u64,
}

/// Append to the ring, evicting the oldest entry past `bound`.
pub(crate) fn push_bounded(history: &mut VecDeque<HistoryEntry>, entry: HistoryEntry, bound: usize) {
    history.push_back(entry);
    while history.len() > bound {
        history.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use overseer_core::AgentKind;

    fn entry(n: u32) -> HistoryEntry {
        HistoryEntry {
            timestamp: Utc::now(),
            terminal_status: TerminalStatus::Completed,
            output: Some(format!("poem {n}")),
            error: None,
            run_number: n,
            retry_attempt: 0,
            agent_id: AgentId::new(AgentKind::Operator, "poet", 1, 1),
            execution_time_ms: 5,
        }
    }

    #[test]
    fn ring_is_bounded_and_ordered() {
        let mut history = VecDeque::new();
        for n in 1..=5 {
            push_bounded(&mut history, entry(n), 3);
        }
        let numbers: Vec<u32> = history.iter().map(|e| e.run_number).collect();
        assert_eq!(numbers, vec![3, 4, 5]);
    }
}
