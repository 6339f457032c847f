use std::collections::HashSet;
use std::sync::Mutex;

use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Runtime set of nodes the manager is still waiting on. All mutation
/// happens under one lock; the completion signal fires exactly once,
/// when the set first becomes empty.
pub struct NodeFleet {
    inner: Mutex<FleetState>,
}

struct FleetState {
    expected: HashSet<String>,
    done: bool,
    completion: Option<oneshot::Sender<()>>,
}

impl NodeFleet {
    pub fn new() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (
            NodeFleet {
                inner: Mutex::new(FleetState {
                    expected: HashSet::new(),
                    done: false,
                    completion: Some(tx),
                }),
            },
            rx,
        )
    }

    /// Sets the node names the manager waits for. An empty set completes
    /// the node phase immediately.
    pub fn set_expected(&self, nodes: impl IntoIterator<Item = String>) {
        let mut state = self.inner.lock().unwrap();
        state.expected = nodes.into_iter().collect();
        debug!("expected bundles from nodes: {:?}", state.expected);
        if state.expected.is_empty() {
            Self::signal(&mut state);
        }
    }

    /// Records a finished upload. Duplicate or unknown node names are
    /// logged, never treated as errors.
    pub fn complete_node(&self, node: &str) {
        let mut state = self.inner.lock().unwrap();
        if state.expected.remove(node) {
            debug!("complete node {}", node);
        } else {
            warn!("complete an unknown node {}", node);
        }
        if state.expected.is_empty() {
            Self::signal(&mut state);
        }
    }

    /// Nodes still outstanding, for the timeout narrative.
    pub fn remaining(&self) -> Vec<String> {
        let state = self.inner.lock().unwrap();
        let mut remaining: Vec<String> = state.expected.iter().cloned().collect();
        remaining.sort();
        remaining
    }

    fn signal(state: &mut FleetState) {
        if !state.done {
            debug!("all nodes are completed");
            if let Some(tx) = state.completion.take() {
                let _ = tx.send(());
            }
            state.done = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_fires_when_last_node_reports() {
        let (fleet, mut rx) = NodeFleet::new();
        fleet.set_expected(["n1".to_owned(), "n2".to_owned()]);

        fleet.complete_node("n1");
        assert!(rx.try_recv().is_err());
        assert_eq!(fleet.remaining(), vec!["n2".to_owned()]);

        fleet.complete_node("n2");
        assert!(rx.try_recv().is_ok());
        assert!(fleet.remaining().is_empty());
    }

    #[test]
    fn empty_expected_set_completes_immediately() {
        let (fleet, mut rx) = NodeFleet::new();
        fleet.set_expected(Vec::new());
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn duplicates_and_unknowns_do_not_double_close() {
        let (fleet, mut rx) = NodeFleet::new();
        fleet.set_expected(["n1".to_owned()]);

        fleet.complete_node("n1");
        assert!(rx.try_recv().is_ok());

        // Channel is consumed; further completions must not panic or
        // attempt a second close.
        fleet.complete_node("n1");
        fleet.complete_node("stranger");
    }
}
