//! Filesystem watcher driving rebuilds and live reload.
//!
//! A dedicated thread drains the notify event channel. Every relevant
//! event first rebuilds the affected server state, then notifies reload
//! subscribers, preserving the event → rebuild → notification ordering.
//! Directories created while watching are subscribed to immediately.

use std::path::Path;
use std::sync::Arc;
use std::sync::mpsc;

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecursiveMode, Watcher};

use super::ServerState;
use crate::log;

/// Start the watcher thread for the server's mode.
pub fn spawn(state: Arc<ServerState>) -> Result<()> {
    let (tx, rx) = mpsc::channel();
    let mut watcher =
        notify::recommended_watcher(tx).context("failed to create file watcher")?;

    if state.context_mode {
        watch_context_dirs(&mut watcher, &state);
    } else {
        for dir in [
            &state.cfg.pages_dir,
            &state.cfg.layouts_dir,
            &state.cfg.partials_dir,
        ] {
            watch_if_dir(&mut watcher, dir, RecursiveMode::Recursive);
        }
    }

    std::thread::spawn(move || watch_loop(watcher, rx, state));
    Ok(())
}

/// Context mode watches the directories of every known template file, the
/// `pages/` subtree, and the fixture directory.
fn watch_context_dirs(watcher: &mut impl Watcher, state: &ServerState) {
    let mut dirs: Vec<std::path::PathBuf> = Vec::new();
    let mut add = |dir: Option<&Path>| {
        if let Some(dir) = dir
            && dir.is_dir()
            && !dirs.iter().any(|d| d == dir)
        {
            dirs.push(dir.to_path_buf());
        }
    };

    for file in &state.cfg.context_files {
        add(file.parent());
    }
    let model = state.context_snapshot();
    for page in &model.pages {
        add(page.file.parent());
    }
    for shared in &model.shared {
        add(shared.parent());
    }
    add(state.cfg.data_dir.as_deref());

    for dir in &dirs {
        watch_if_dir(watcher, dir, RecursiveMode::NonRecursive);
    }

    if let Some(entry) = &state.cfg.entry_file {
        let pages_subdir = entry.parent().unwrap_or(Path::new(".")).join("pages");
        watch_if_dir(watcher, &pages_subdir, RecursiveMode::Recursive);
    }
}

fn watch_if_dir(watcher: &mut impl Watcher, dir: &Path, mode: RecursiveMode) {
    if !dir.is_dir() {
        return;
    }
    if let Err(err) = watcher.watch(dir, mode) {
        log!("watch"; "failed to watch {}: {err}", dir.display());
    }
}

fn is_relevant(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

fn watch_loop(
    mut watcher: impl Watcher,
    rx: mpsc::Receiver<notify::Result<Event>>,
    state: Arc<ServerState>,
) {
    for result in rx {
        let event = match result {
            Ok(event) if is_relevant(&event) => event,
            Ok(_) => continue,
            Err(err) => {
                log!("watch"; "error: {err}");
                continue;
            }
        };

        for path in &event.paths {
            log!("watch"; "changed: {}", path.display());

            // Newly created directories must be observed immediately.
            if matches!(event.kind, EventKind::Create(_)) && path.is_dir() {
                watch_if_dir(&mut watcher, path, RecursiveMode::Recursive);
            }
        }

        // Rebuild before notifying so reconnecting clients see fresh state.
        if state.context_mode {
            let json_changed = event
                .paths
                .iter()
                .any(|p| p.extension().and_then(|e| e.to_str()) == Some("json"));
            if json_changed {
                state.reload_context_data();
            }

            let html_structural = matches!(
                event.kind,
                EventKind::Create(_) | EventKind::Remove(_) | EventKind::Modify(notify::event::ModifyKind::Name(_))
            ) && event
                .paths
                .iter()
                .any(|p| p.extension().and_then(|e| e.to_str()) == Some("html"));
            if html_structural {
                state.rebuild_context();
            }
        } else {
            state.rebuild_nav();
        }

        state.hub.notify();
    }
}
