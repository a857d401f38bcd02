//! Integration tests for edits made while a chain is attached
//!
//! These tests validate the barrier-gated mutation engine:
//! - Batching of queued edits behind one barrier
//! - Link breaks during replace
//! - Revert mismatches, failed and stuck stages
//! - Where the barrier is requested
//! - Chain drop with a barrier outstanding
//! - Edits racing a data-flow thread

mod common;

use common::builders::{element, ChainBuilder, LinearGraph};
use common::mock_helpers::passthrough_mock;
use common::stages::{CountingStage, FailingStage, RecordingStage, StuckStage};
use filterchain_rs::graph::TapId;
use filterchain_rs::{Chain, ControlMessage, FilterChain};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

#[test]
fn test_edits_wait_for_barrier() {
    let host = LinearGraph::deferred("batch");
    let chain = ChainBuilder::new("c").element("a").build();
    host.attach(&chain);

    chain.append(element("b"));
    chain.prepend(element("z"));
    chain.append(element("c"));

    assert_eq!(chain.pending_modifications(), 3);
    assert!(chain.barrier_pending());
    assert_eq!(host.graph.pending_barriers(), 1);
    assert_eq!(host.graph.stats().barriers_requested, 1);
    assert_eq!(host.path(), vec!["a", "sink"]);

    assert_eq!(host.flow(), 1);
    assert_eq!(chain.pending_modifications(), 0);
    assert!(!chain.barrier_pending());
    assert_eq!(host.path(), vec!["z", "a", "b", "c", "sink"]);
    assert_eq!(chain.applied_list(), chain.list());

    // A later edit needs a new barrier.
    chain.remove(chain.list()[0]);
    assert_eq!(host.graph.stats().barriers_requested, 2);
    host.flow();
    assert_eq!(host.path(), vec!["a", "b", "c", "sink"]);
}

#[test]
fn test_edits_in_immediate_mode() {
    let host = LinearGraph::new("immediate");
    let chain = ChainBuilder::new("c").element("a").element("c").build();
    host.attach(&chain);

    let a = chain.list()[0];
    let b = chain.insert_after(element("b"), a).unwrap();
    assert_eq!(host.path(), vec!["a", "b", "c", "sink"]);

    assert!(chain.remove(a));
    assert_eq!(host.path(), vec!["b", "c", "sink"]);
    assert_eq!(chain.list()[0], b);
    assert_eq!(chain.pending_modifications(), 0);
}

#[test]
fn test_replace_tail_breaks_sink_link_once() {
    let host = LinearGraph::new("replace");
    let chain = ChainBuilder::new("c").element("a").element("b").build();
    host.attach(&chain);
    let b = chain.list()[1];

    let before = host.graph.stats();
    let c = chain.replace(element("c"), b).unwrap();
    let after = host.graph.stats();

    assert_eq!(after.unlinks_of(host.sink) - before.unlinks_of(host.sink), 1);
    assert_eq!(after.links_of(host.sink) - before.links_of(host.sink), 1);
    assert_eq!(host.path(), vec!["a", "c", "sink"]);
    assert_eq!(chain.list()[1], c);
    assert!(chain.get_stage(b).is_none());
    assert_eq!(chain.out_tap(), chain.applied_taps(c).map(|t| t.output));
}

#[test]
fn test_replace_middle_retargets_successor() {
    let host = LinearGraph::new("replace-mid");
    let chain = ChainBuilder::new("c")
        .element("a")
        .element("b")
        .element("c")
        .build();
    let out = host.attach(&chain);
    let [_, b, c] = chain.list()[..] else {
        panic!("expected three handles");
    };

    let b2 = chain.replace(element("b2"), b).unwrap();
    assert_eq!(host.path(), vec!["a", "b2", "c", "sink"]);
    assert_eq!(chain.applied_taps(c).unwrap().input, chain.applied_taps(b2).unwrap().output);
    assert_eq!(chain.out_tap(), Some(out));

    // Removing the successor afterwards still finds the right tap.
    chain.remove(c);
    assert_eq!(host.path(), vec!["a", "b2", "sink"]);
}

#[test]
fn test_replace_failed_stage_applies_in_slot() {
    let host = LinearGraph::new("replace-failed");
    let chain = Chain::new("c");
    chain.append(element("a"));
    let broken = chain.append(FailingStage::new("broken"));
    chain.append(element("c"));
    host.attach(&chain);
    assert_eq!(host.path(), vec!["a", "c", "sink"]);

    let b = chain.replace(element("b"), broken).unwrap();
    assert_eq!(host.path(), vec!["a", "b", "c", "sink"]);
    assert!(chain.applied_taps(b).is_some());
    assert_eq!(chain.applied_list(), chain.list());
}

#[test]
fn test_remove_failed_stage_leaves_graph_alone() {
    let host = LinearGraph::new("remove-failed");
    let chain = Chain::new("c");
    chain.append(element("a"));
    let broken = chain.append(FailingStage::new("broken"));
    host.attach(&chain);

    let before = host.graph.stats();
    assert!(chain.remove(broken));
    let after = host.graph.stats();
    assert_eq!(after.links, before.links);
    assert_eq!(after.unlinks, before.unlinks);
    assert_eq!(host.path(), vec!["a", "sink"]);
    assert_eq!(chain.len(), 1);
}

#[test]
fn test_insert_failure_keeps_handle_listed() {
    let host = LinearGraph::new("insert-failed");
    let chain = ChainBuilder::new("c").element("a").build();
    let out = host.attach(&chain);

    let failing = FailingStage::new("broken");
    let broken = chain.append(failing.clone());
    assert_eq!(failing.attempts.load(Ordering::SeqCst), 1);
    assert_eq!(chain.list().len(), 2);
    assert!(chain.applied_taps(broken).is_none());
    assert_eq!(chain.out_tap(), Some(out));
    assert_eq!(host.path(), vec!["a", "sink"]);
}

#[test]
fn test_revert_mismatch_is_tolerated() {
    let host = LinearGraph::new("mismatch");
    let bogus = TapId::output(host.sink.element(), 7);

    let mut mock = passthrough_mock("odd");
    mock.expect_revert().times(1).returning(move |_, _| Some(bogus));

    let chain = Chain::new("c");
    chain.append(Arc::new(mock));
    let out = chain.attach(host.shared(), host.source).unwrap();
    assert_eq!(out, host.source);

    // The recorded input wins over what revert reported.
    assert_eq!(chain.detach(host.graph.as_ref(), out).unwrap(), host.source);
}

#[test]
fn test_passthrough_revert_failure_relinks() {
    let host = LinearGraph::new("revert-none");
    let mut mock = passthrough_mock("ghost");
    mock.expect_revert().times(1).returning(|_, _| None);

    let chain = Chain::new("c");
    chain.append(element("a"));
    let ghost = chain.append(Arc::new(mock));
    host.attach(&chain);
    assert_eq!(host.path(), vec!["a", "sink"]);

    // Nothing of a passthrough is left in the graph, so it is gone after remove.
    assert!(chain.remove(ghost));
    assert_eq!(host.path(), vec!["a", "sink"]);
    assert_eq!(chain.applied_list(), chain.list());
    assert_eq!(chain.out_tap(), chain.applied_taps(chain.list()[0]).map(|t| t.output));
}

#[test]
fn test_stuck_stage_stays_in_path_on_remove() {
    let host = LinearGraph::new("stuck-remove");
    let chain = Chain::new("c");
    let a = chain.append(element("a"));
    let stuck_stage = StuckStage::new("stuck");
    let stuck = chain.append(stuck_stage.clone());
    let b = chain.append(element("b"));
    let out = host.attach(&chain);
    assert_eq!(host.path(), vec!["a", "stuck", "b", "sink"]);

    assert!(chain.remove(stuck));
    assert_eq!(stuck_stage.reverted.load(Ordering::SeqCst), 1);
    assert_eq!(host.path(), vec!["a", "stuck", "b", "sink"]);
    assert_eq!(chain.list(), vec![a, b]);
    assert_eq!(chain.applied_list(), vec![a, stuck, b]);
    assert!(chain.applied_taps(stuck).is_some());
    assert_eq!(chain.out_tap(), Some(out));

    // Later inserts land in the path around the stuck element.
    let d = chain.insert_after(element("d"), a).unwrap();
    assert_eq!(host.path(), vec!["a", "stuck", "d", "b", "sink"]);
    assert_eq!(chain.applied_list(), vec![a, stuck, d, b]);

    // Detach still walks back to the attach tap; the stuck element is left over.
    assert_eq!(chain.detach(host.graph.as_ref(), out).unwrap(), host.source);
    assert_eq!(host.graph.element_count(), 3);
    assert!(host.graph.find_element("stuck").is_some());
    assert_eq!(chain.list(), vec![a, d, b]);
}

#[test]
fn test_stuck_stage_on_replace_leaves_new_unapplied() {
    let host = LinearGraph::new("stuck-replace");
    let chain = Chain::new("c");
    let a = chain.append(element("a"));
    let stuck = chain.append(StuckStage::new("stuck"));
    let out = host.attach(&chain);

    let fresh = chain.replace(element("fresh"), stuck).unwrap();
    assert_eq!(host.path(), vec!["a", "stuck", "sink"]);
    assert_eq!(chain.list(), vec![a, fresh]);
    assert_eq!(chain.applied_list(), vec![a, stuck, fresh]);
    assert_eq!(chain.applied_taps(fresh), None);
    assert_eq!(chain.out_tap(), Some(out));

    chain.append(element("c"));
    assert_eq!(host.path(), vec!["a", "stuck", "c", "sink"]);
}

#[test]
fn test_stuck_stage_upstream_keeps_path() {
    let host = LinearGraph::new("stuck-upstream");
    let chain = Chain::new("c");
    chain.append(element("a"));
    let stuck = chain.append(StuckStage::new("stuck"));
    chain.append(element("b"));
    host.attach_upstream(&chain);
    assert_eq!(host.path(), vec!["a", "stuck", "b", "sink"]);

    assert!(chain.remove(stuck));
    assert_eq!(host.path(), vec!["a", "stuck", "b", "sink"]);
    assert_eq!(chain.len(), 2);
}

#[test]
fn test_barrier_requested_where_data_enters() {
    let down = LinearGraph::deferred("barrier-down");
    let chain = ChainBuilder::new("c").element("a").build();
    down.attach(&chain);
    chain.append(element("b"));
    assert_eq!(down.graph.stats().barrier_taps(), &[down.source]);
    down.flow();
    assert_eq!(down.path(), vec!["a", "b", "sink"]);

    // Upstream the producer linked to the free end is blocked, not the sink.
    let up = LinearGraph::deferred("barrier-up");
    let chain = ChainBuilder::new("c").element("a").build();
    up.attach_upstream(&chain);
    chain.prepend(element("z"));
    assert_eq!(up.graph.stats().barrier_taps(), &[up.source]);
    up.flow();
    assert_eq!(up.path(), vec!["z", "a", "sink"]);

    // With nothing feeding the free end yet, the attach tap is used.
    let loose = LinearGraph::deferred("barrier-loose");
    let chain = ChainBuilder::new("c").element("a").build();
    chain.attach(loose.shared(), loose.sink).unwrap();
    chain.append(element("b"));
    assert_eq!(loose.graph.stats().barrier_taps(), &[loose.sink]);
}

#[test]
fn test_drop_cancels_pending_barrier() {
    init();
    let host = LinearGraph::deferred("drop");
    let chain = ChainBuilder::new("c").element("a").build();
    host.attach(&chain);
    chain.append(element("b"));
    assert_eq!(host.graph.pending_barriers(), 1);

    drop(chain);
    assert_eq!(host.graph.pending_barriers(), 0);
    assert_eq!(host.graph.stats().barriers_cancelled, 1);
    assert_eq!(host.flow(), 0);
}

#[test]
fn test_barrier_after_drop_is_harmless() {
    let host = LinearGraph::deferred("late");
    let chain = ChainBuilder::new("c").element("a").build();
    host.attach(&chain);

    // A clone keeps the chain alive past the first drop.
    let clone = chain.clone();
    clone.append(element("b"));
    drop(chain);
    assert_eq!(host.flow(), 1);
    assert_eq!(host.path(), vec!["a", "b", "sink"]);
    drop(clone);
    assert_eq!(host.flow(), 0);
}

#[test]
fn test_detach_discards_pending_edits() {
    let host = LinearGraph::deferred("detach-pending");
    let chain = ChainBuilder::new("c").element("a").build();
    let out = host.attach(&chain);
    chain.append(element("b"));
    assert_eq!(chain.pending_modifications(), 1);

    assert_eq!(chain.detach(host.graph.as_ref(), out).unwrap(), host.source);
    assert_eq!(chain.pending_modifications(), 0);
    assert_eq!(host.graph.pending_barriers(), 0);
    assert_eq!(host.graph.element_count(), 2);

    // The edit is kept in the list and applied on the next attach.
    host.attach(&chain);
    assert_eq!(host.path(), vec!["a", "b", "sink"]);
}

#[test]
fn test_upstream_live_edits() {
    let host = LinearGraph::new("upstream-live");
    let chain = ChainBuilder::new("c").element("a").element("c").build();
    let out = host.attach_upstream(&chain);
    let [a, c] = chain.list()[..] else {
        panic!("expected two handles");
    };

    chain.insert_after(element("b"), a).unwrap();
    assert_eq!(host.path(), vec!["a", "b", "c", "sink"]);
    assert_eq!(chain.out_tap(), Some(out));

    // Prepending moves the free end of an upstream chain.
    chain.prepend(element("first"));
    assert_eq!(host.path(), vec!["first", "a", "b", "c", "sink"]);
    assert_ne!(chain.out_tap(), Some(out));

    chain.remove(c);
    assert_eq!(host.path(), vec!["first", "a", "b", "sink"]);
    assert_eq!(chain.applied_list(), chain.list());
}

#[test]
fn test_stages_applied_once_per_insert() {
    let host = LinearGraph::new("counts");
    let counting = CountingStage::new("counted");
    let chain = ChainBuilder::new("c").element("a").build();
    host.attach(&chain);

    let handle = chain.append(counting.clone());
    chain.remove(handle);
    assert_eq!(counting.applies(), 1);
    assert_eq!(counting.reverts(), 1);
}

#[test]
fn test_messages_offered_in_list_order() {
    let host = LinearGraph::new("messages");
    let log = Arc::new(Mutex::new(Vec::new()));
    let chain = Chain::new("c");
    chain.append(RecordingStage::new("first", "none", log.clone()));
    chain.append(RecordingStage::new("second", "level", log.clone()));
    chain.append(RecordingStage::new("third", "level", log.clone()));

    assert!(!chain.handle_message(&ControlMessage::new("level")));
    assert!(log.lock().is_empty());

    host.attach(&chain);
    assert!(chain.handle_message(&ControlMessage::new("level")));
    assert_eq!(*log.lock(), vec!["first", "second"]);

    log.lock().clear();
    assert!(!chain.handle_message(&ControlMessage::new("eos")));
    assert_eq!(*log.lock(), vec!["first", "second", "third"]);
}

#[test]
fn test_edits_race_flow_thread() {
    let host = LinearGraph::deferred("race");
    let chain = ChainBuilder::new("c").element("base").build();
    host.attach(&chain);

    let running = Arc::new(AtomicBool::new(true));
    let flow = {
        let graph = host.graph.clone();
        let running = running.clone();
        thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                graph.run_pending_barriers();
                thread::yield_now();
            }
        })
    };

    for round in 0..50 {
        let handle = chain.append(element(&format!("s{round}")));
        if round % 3 == 0 {
            chain.remove(handle);
        }
        if round % 5 == 0 {
            chain.prepend(element(&format!("p{round}")));
        }
    }

    running.store(false, Ordering::SeqCst);
    flow.join().unwrap();
    host.flow();

    assert_eq!(chain.pending_modifications(), 0);
    assert_eq!(chain.applied_list(), chain.list());
    let names: Vec<String> = chain
        .list()
        .into_iter()
        .filter_map(|h| chain.get_stage(h))
        .map(|s| s.name().to_string())
        .chain(["sink".to_string()])
        .collect();
    assert_eq!(host.path(), names);
}

fn init() {
    common::init_tracing();
}
