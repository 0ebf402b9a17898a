//! Change records and transaction origin tags.
//!
//! A [`ChangeRecord`] describes one structural mutation at a path. Batches of
//! records flow from the proxy layer through the coordinator into the
//! adapter, and back out of the observer when remote deltas are replayed.
//!
//! An [`OriginTag`] is the opaque token attached to every native transaction
//! this bridge issues. It carries the origin kind, the issuing bridge's id,
//! and a sequence number, and is what lets the observer tell its own echo
//! apart from foreign updates.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use yrs::Origin;

use crate::path::Path;
use crate::value::Value;

/// Leading marker of every origin token this crate encodes.
const ORIGIN_PREFIX: &str = "ym";

/// One structural mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    pub path: Path,
    pub kind: ChangeKind,
}

impl ChangeRecord {
    pub fn insert(path: Path, value: Value) -> Self {
        ChangeRecord {
            path,
            kind: ChangeKind::Insert { value },
        }
    }

    pub fn update(path: Path, value: Value) -> Self {
        ChangeRecord {
            path,
            kind: ChangeKind::Update { value },
        }
    }

    pub fn delete(path: Path) -> Self {
        ChangeRecord {
            path,
            kind: ChangeKind::Delete,
        }
    }

    /// A move of the array element addressed by `path` (its final segment is
    /// the source index) to index `to` within the same array.
    pub fn r#move(path: Path, to: usize) -> Self {
        ChangeRecord {
            path,
            kind: ChangeKind::Move { to },
        }
    }

    /// Short name of the mutation kind, for logs.
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            ChangeKind::Insert { .. } => "insert",
            ChangeKind::Update { .. } => "update",
            ChangeKind::Delete => "delete",
            ChangeKind::Move { .. } => "move",
        }
    }
}

impl fmt::Display for ChangeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at '{}'", self.kind_name(), self.path)
    }
}

/// The kind of one structural mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeKind {
    Insert { value: Value },
    Update { value: Value },
    Delete,
    Move { to: usize },
}

/// Classifies who issued a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OriginKind {
    /// A mutation issued through this bridge's proxy layer.
    Local,
    /// An update applied from another replica.
    Remote,
    /// The one-time initial seeding of the root container.
    Bootstrap,
    /// An inverse batch applied by the undo integration.
    Undo,
}

impl OriginKind {
    fn as_str(&self) -> &'static str {
        match self {
            OriginKind::Local => "local",
            OriginKind::Remote => "remote",
            OriginKind::Bootstrap => "bootstrap",
            OriginKind::Undo => "undo",
        }
    }

    fn parse(s: &str) -> Option<OriginKind> {
        match s {
            "local" => Some(OriginKind::Local),
            "remote" => Some(OriginKind::Remote),
            "bootstrap" => Some(OriginKind::Bootstrap),
            "undo" => Some(OriginKind::Undo),
            _ => None,
        }
    }
}

impl fmt::Display for OriginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The origin token attached to one native transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginTag {
    pub kind: OriginKind,
    pub bridge: Uuid,
    pub seq: u64,
}

impl OriginTag {
    pub fn new(kind: OriginKind, bridge: Uuid, seq: u64) -> Self {
        OriginTag { kind, bridge, seq }
    }

    /// Encodes this tag into the engine's opaque origin representation.
    pub fn encode(&self) -> Origin {
        Origin::from(format!("{ORIGIN_PREFIX}/{}/{}/{}", self.kind, self.bridge, self.seq).as_str())
    }

    /// Parses an engine origin back into a tag.
    ///
    /// Returns `None` for origins this crate did not encode; the observer
    /// treats those as foreign (Remote) input.
    pub fn parse(origin: &Origin) -> Option<OriginTag> {
        let text = std::str::from_utf8(origin.as_ref()).ok()?;
        let mut parts = text.split('/');
        if parts.next()? != ORIGIN_PREFIX {
            return None;
        }
        let kind = OriginKind::parse(parts.next()?)?;
        let bridge = Uuid::parse_str(parts.next()?).ok()?;
        let seq = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(OriginTag { kind, bridge, seq })
    }

    /// True when this tag was minted by the given bridge.
    pub fn issued_by(&self, bridge: &Uuid) -> bool {
        self.bridge == *bridge
    }
}
