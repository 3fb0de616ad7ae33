//! Conversation flow graph — who addressed whom, per session.
//!
//! Caller-owned state: whoever owns the session lifecycle holds a
//! `session id → ConversationFlow` map and passes the graph in explicitly.
//! There is no process-wide registry.

use serde::{Deserialize, Serialize};

use crate::session::model::ADDRESSEE_ALL;

/// A directed edge with an interaction count. Counts only increase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowEdge {
    pub from: String,
    pub to: String,
    pub count: u64,
}

/// Per-session directed weighted graph, keyed by (sender, addressee).
///
/// Edges are kept in discovery order, which is also the tie-break order
/// for [`ConversationFlow::busiest_pair`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationFlow {
    pub session_id: String,
    pub edges: Vec<FlowEdge>,
}

impl ConversationFlow {
    pub fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            edges: Vec::new(),
        }
    }

    /// Record one (sender → addressee) interaction.
    ///
    /// No-op when the addressee is absent or the "everyone" sentinel.
    pub fn record(&mut self, sender: &str, addressee: Option<&str>) {
        let Some(to) = addressee else { return };
        if to == ADDRESSEE_ALL {
            return;
        }

        match self
            .edges
            .iter_mut()
            .find(|e| e.from == sender && e.to == to)
        {
            Some(edge) => edge.count += 1,
            None => self.edges.push(FlowEdge {
                from: sender.to_string(),
                to: to.to_string(),
                count: 1,
            }),
        }
    }

    /// The edge with the highest count, or `None` when the graph is empty.
    /// Ties resolve to the edge discovered first.
    pub fn busiest_pair(&self) -> Option<&FlowEdge> {
        let mut busiest: Option<&FlowEdge> = None;
        for edge in &self.edges {
            if busiest.is_none_or(|b| edge.count > b.count) {
                busiest = Some(edge);
            }
        }
        busiest
    }
}
