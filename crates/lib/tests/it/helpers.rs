use std::sync::{Arc, Mutex};

use ymirror::y_crdt::Doc;
use ymirror::{Bridge, Clock};

// ==========================
// CORE TEST FACTORIES
// ==========================

/// Creates a bridge on a fresh document, attached at "root".
pub fn test_bridge() -> Bridge {
    Bridge::attach(Doc::new(), "root")
}

/// Creates two bridges on independent documents, for replica scenarios.
pub fn test_pair() -> (Bridge, Bridge) {
    (test_bridge(), test_bridge())
}

/// Ships every update `from` is holding that `to` has not seen yet.
pub fn sync_one_way(from: &Bridge, to: &Bridge) {
    let delta = from
        .encode_update(Some(&to.state_vector()))
        .expect("state vector from a bridge always decodes");
    to.apply_update(&delta).expect("update applies");
}

/// Exchanges updates until both replicas hold the same state.
pub fn sync_both_ways(a: &Bridge, b: &Bridge) {
    sync_one_way(a, b);
    sync_one_way(b, a);
}

/// Manually advanced clock for exercising the undo capture window.
#[derive(Debug, Default)]
pub struct TestClock {
    millis: Mutex<u64>,
}

impl TestClock {
    pub fn advance(&self, ms: u64) {
        *self.millis.lock().unwrap() += ms;
    }
}

impl Clock for TestClock {
    fn now_millis(&self) -> u64 {
        *self.millis.lock().unwrap()
    }
}

/// Creates a bridge driven by a [`TestClock`].
pub fn test_bridge_with_clock() -> (Bridge, Arc<TestClock>) {
    let clock = Arc::new(TestClock::default());
    let bridge = Bridge::attach_with_clock(Doc::new(), "root", clock.clone());
    (bridge, clock)
}
