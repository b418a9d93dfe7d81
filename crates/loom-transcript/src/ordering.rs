//! Message ordering (spec §4.1, §9 "DAG with cycles in content").
//!
//! `parentId` forms a DAG, not a tree (subagents branch). We use an arena of
//! integer indices rather than a pointer graph, and topologically sort on
//! each read, tie-broken by file order. Messages whose parent has not yet
//! been seen are held at the end (race tolerance) rather than causing an
//! error.

use loom_core::Message;

/// Order `messages` for presentation to a client.
///
/// When `supports_dag` is false, messages are returned in file order
/// unchanged (the provider gives no parent-chain guarantee worth sorting
/// on). When true, a stable topological sort is applied: a message is only
/// emitted once its parent (if any) has been emitted, ties broken by the
/// original file-order index.
#[must_use]
pub fn order_messages(messages: Vec<Message>, supports_dag: bool) -> Vec<Message> {
    if !supports_dag {
        return messages;
    }

    let file_order: Vec<Message> = messages;
    let mut emitted: std::collections::HashSet<String> = std::collections::HashSet::new();
    let mut pending: Vec<usize> = (0..file_order.len()).collect();
    let mut out: Vec<Message> = Vec::with_capacity(file_order.len());

    // Fixed-point iteration: repeatedly sweep the pending list emitting any
    // message whose parent has already been emitted (or has none), in file
    // order. A message held back by an unseen parent stays pending for the
    // next sweep. Once a sweep makes no progress, flush the remainder in
    // file order — these are messages whose parent never appeared (e.g. a
    // stream cut mid-DAG), tolerated per spec §4.1.
    loop {
        let mut progressed = false;
        let mut still_pending = Vec::with_capacity(pending.len());
        for idx in pending {
            let msg = &file_order[idx];
            let ready = match &msg.parent_id {
                None => true,
                Some(parent) => emitted.contains(parent),
            };
            if ready {
                let _ = emitted.insert(msg.id.clone());
                out.push(msg.clone());
                progressed = true;
            } else {
                still_pending.push(idx);
            }
        }
        pending = still_pending;
        if pending.is_empty() || !progressed {
            break;
        }
    }

    // Flush stragglers (unresolved parent) in original file order.
    for idx in pending {
        out.push(file_order[idx].clone());
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use loom_core::{MessageContent, MessageSource, MessageType};

    fn msg(id: &str, parent: Option<&str>) -> Message {
        Message {
            id: id.into(),
            r#type: MessageType::User,
            parent_id: parent.map(str::to_owned),
            role: None,
            content: MessageContent::Text(id.into()),
            timestamp: "t".into(),
            is_subagent: None,
            parent_tool_use_id: None,
            source: MessageSource::Log,
        }
    }

    #[test]
    fn without_dag_support_preserves_file_order() {
        let messages = vec![msg("m2", None), msg("m1", None)];
        let ordered = order_messages(messages.clone(), false);
        assert_eq!(ordered, messages);
    }

    #[test]
    fn linear_chain_in_file_order_is_unchanged() {
        let messages = vec![msg("m1", None), msg("m2", Some("m1")), msg("m3", Some("m2"))];
        let ordered = order_messages(messages.clone(), true);
        assert_eq!(ordered, messages);
    }

    #[test]
    fn child_before_parent_in_file_is_reordered() {
        // m2's parent m1 appears second in the file — a race in arrival order.
        let messages = vec![msg("m2", Some("m1")), msg("m1", None)];
        let ordered = order_messages(messages, true);
        let ids: Vec<&str> = ordered.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2"]);
    }

    #[test]
    fn branching_dag_keeps_both_children_after_shared_parent() {
        let messages = vec![
            msg("root", None),
            msg("branch-a", Some("root")),
            msg("branch-b", Some("root")),
        ];
        let ordered = order_messages(messages, true);
        let ids: Vec<&str> = ordered.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids[0], "root");
        assert!(ids.contains(&"branch-a"));
        assert!(ids.contains(&"branch-b"));
    }

    #[test]
    fn unresolved_parent_is_tolerated_not_dropped() {
        // "orphan"'s parent never shows up in this read (race on a live tail).
        let messages = vec![msg("orphan", Some("missing-parent")), msg("m1", None)];
        let ordered = order_messages(messages, true);
        assert_eq!(ordered.len(), 2);
        assert!(ordered.iter().any(|m| m.id == "orphan"));
    }

    #[test]
    fn ordering_is_deterministic_for_same_input() {
        let messages = vec![msg("m2", Some("m1")), msg("m3", Some("m1")), msg("m1", None)];
        let a = order_messages(messages.clone(), true);
        let b = order_messages(messages, true);
        assert_eq!(a, b);
    }
}
