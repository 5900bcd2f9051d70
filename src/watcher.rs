//! Hot reload: refresh the flow store when definition files change.

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::config::has_flow_extension;
use crate::store::FlowStore;

/// Start watching the mapping directory. Creating, writing, renaming, or
/// removing a recognized flow file triggers a store refresh.
///
/// The returned watcher must be kept alive for the lifetime of the server.
pub fn spawn(store: Arc<FlowStore>, path: &Path) -> Result<RecommendedWatcher, notify::Error> {
    let mut watcher = RecommendedWatcher::new(
        move |result: notify::Result<Event>| match result {
            Ok(event) => {
                if !is_relevant(&event) {
                    return;
                }
                info!("flow directory change detected, refreshing");
                if let Err(error) = store.refresh() {
                    error!(%error, "failed to refresh flows after directory change");
                }
            }
            Err(error) => error!(%error, "watch error"),
        },
        Config::default().with_poll_interval(Duration::from_secs(2)),
    )?;

    watcher.watch(path, RecursiveMode::Recursive)?;
    info!(path = %path.display(), "flow watcher started");

    Ok(watcher)
}

/// Create, write, rename, and remove events on recognized files are the
/// ones that change the flow set. Renames surface as modify events.
fn is_relevant(event: &Event) -> bool {
    let kind = event.kind;
    if !(kind.is_create() || kind.is_modify() || kind.is_remove()) {
        return false;
    }
    event.paths.iter().any(|path| has_flow_extension(path))
}
