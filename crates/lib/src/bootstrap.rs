//! One-time seeding of an empty root container.
//!
//! Bootstrap races are resolved by an emptiness check inside the same
//! flow that writes the seed: a root that already has entries, whether from
//! attach-time content, an earlier bootstrap, or a concurrent peer's update
//! that arrived first, turns the call into a no-op instead of doubling the
//! seeded state.

use tracing::debug;
use yrs::{Map, Transact};

use crate::change::{ChangeRecord, OriginKind};
use crate::coordinator::{CommittedBatch, Coordinator};
use crate::errors::BridgeError;
use crate::path::Path;
use crate::value::Value;

/// Seeds the root container with `seed`, a map value.
///
/// Returns the committed batch when the seed was written, `None` when the
/// root was already populated.
pub(crate) fn bootstrap(
    coordinator: &Coordinator,
    seed: Value,
) -> Result<Option<CommittedBatch>, BridgeError> {
    let Value::Map(entries) = seed else {
        return Err(BridgeError::TypeMismatch {
            path: "<root>".to_string(),
            expected: "map".to_string(),
            actual: seed.type_name().to_string(),
        });
    };
    if coordinator.in_transaction() {
        return Err(BridgeError::UnsupportedOperation {
            path: "<root>".to_string(),
            reason: "bootstrap inside an open transaction".to_string(),
        });
    }
    let populated = {
        let txn = coordinator.doc().transact();
        coordinator.root().len(&txn) > 0
    };
    if populated {
        debug!("root already populated; bootstrap is a no-op");
        return Ok(None);
    }

    coordinator.begin_with_kind(OriginKind::Bootstrap);
    for (key, value) in entries {
        // enqueue aborts the whole batch on failure.
        coordinator.enqueue(ChangeRecord::insert(
            Path::root().child(key.as_str()),
            value,
        ))?;
    }
    coordinator.commit()
}
