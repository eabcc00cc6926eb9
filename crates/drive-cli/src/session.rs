//! A fixture-backed drive session.
//!
//! The fixture seeds an in-memory remote, the engine starts against it, and
//! replay events are published on the remote's change stream so they reach the
//! engine the same way live events would.

use crate::config::Config;
use crate::fixture::{Fixture, ReplayEvent, load_events};

use anyhow::{Context, Result};
use drive_core::{EngineOptions, FileRecord, InMemoryRemote, SyncEngine, normalize_browse_path};
use std::sync::Arc;
use tracing::info;

pub struct Session {
    pub remote: Arc<InMemoryRemote>,
    pub engine: SyncEngine<InMemoryRemote>,
    /// Events not yet published
    pub replay: Vec<ReplayEvent>,
}

impl Session {
    /// Load the fixture and replay file, then start the engine.
    pub async fn open(config: &Config, options: EngineOptions) -> Result<Self> {
        let fixture = Fixture::load(&config.fixture)?;
        let replay = match &config.events {
            Some(path) => load_events(path)?,
            None => Vec::new(),
        };
        info!(
            "Loaded fixture {:?} ({} replay events)",
            config.fixture,
            replay.len()
        );

        let remote = Arc::new(fixture.into_remote(&config.blob_base_url));
        let engine = SyncEngine::start(Arc::clone(&remote), options)
            .await
            .context("Failed to start session")?;

        Ok(Self {
            remote,
            engine,
            replay,
        })
    }

    /// Publish every remaining replay event and apply them. Returns the number applied.
    pub async fn replay_all(&mut self) -> usize {
        for replay in self.replay.drain(..) {
            self.remote.publish(replay.collection, replay.event);
        }
        self.engine.process_pending().await
    }

    /// Find a file by `<directory path>/<file name>`.
    pub fn find_file(&self, path: &str) -> Option<FileRecord> {
        let (directory, name) = path.trim_end_matches('/').rsplit_once('/')?;
        let directory = self
            .engine
            .resolve_by_full_path(&normalize_browse_path(directory))?;
        self.engine.file_named_in(&directory.id, name)
    }
}
