//! Flow store with atomically replaceable snapshots.
//!
//! The store holds the current set of flows behind an [`ArcSwap`]: readers
//! grab a stable reference once and never observe a partially refreshed set.

use arc_swap::ArcSwap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{has_flow_extension, Flow};

/// Holds the current flows, replaced wholesale on every refresh.
pub struct FlowStore {
    root: PathBuf,
    flows: ArcSwap<Vec<Flow>>,
}

impl FlowStore {
    /// Create an empty store rooted at the given mapping directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            flows: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Current snapshot. The returned reference stays valid and unchanged
    /// across concurrent refreshes.
    pub fn snapshot(&self) -> Arc<Vec<Flow>> {
        self.flows.load_full()
    }

    /// Replace the snapshot wholesale.
    pub fn replace(&self, flows: Vec<Flow>) {
        self.flows.store(Arc::new(flows));
    }

    /// Re-read the mapping directory and swap in the new flow set.
    ///
    /// A file that cannot be read or parsed is skipped and logged; an
    /// unreadable mapping directory fails the whole refresh and leaves the
    /// previous snapshot in place.
    pub fn refresh(&self) -> anyhow::Result<()> {
        let mut flows = Vec::new();
        collect_flows(&self.root, &mut flows)?;
        info!(flows = flows.len(), "flow snapshot refreshed");
        self.replace(flows);
        Ok(())
    }
}

fn collect_flows(dir: &Path, flows: &mut Vec<Flow>) -> anyhow::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                warn!(%error, "skipping unreadable directory entry");
                continue;
            }
        };

        let path = entry.path();
        if path.is_dir() {
            collect_flows(&path, flows)?;
            continue;
        }
        if !has_flow_extension(&path) {
            continue;
        }

        match Flow::from_file(&path) {
            Ok(flow) => {
                debug!(path = %path.display(), "loaded flow");
                flows.push(flow);
            }
            Err(error) => {
                warn!(path = %path.display(), %error, "skipping invalid flow definition");
            }
        }
    }
    Ok(())
}
