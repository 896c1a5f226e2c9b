//! Board persistence: the full board as one JSON document, rewritten on every save.

use std::path::{Path, PathBuf};

use super::board::SwarmBoard;
use crate::error::Result;
use crate::persist::{read_json, write_json_atomic};

/// Reads and writes the swarm board under a state directory.
///
/// The board lives at `<state_dir>/swarm/task-board.json`. A store assumes a
/// single writer for the lifetime of the file.
#[derive(Debug, Clone)]
pub struct BoardStore {
    path: PathBuf,
}

impl BoardStore {
    /// Creates a store rooted at the given state directory (usually `.coco`).
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: Self::board_path(state_dir),
        }
    }

    /// Board file path within a state directory.
    pub fn board_path(state_dir: &Path) -> PathBuf {
        state_dir.join("swarm").join("task-board.json")
    }

    /// Returns the path of the board file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true if a board has been saved.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Loads the persisted board.
    pub fn load(&self) -> Result<SwarmBoard> {
        let board: SwarmBoard = read_json(&self.path)?;
        tracing::debug!(
            path = %self.path.display(),
            tasks = board.tasks.len(),
            "loaded swarm board"
        );
        Ok(board)
    }

    /// Persists the board, replacing any previous version.
    pub fn save(&self, board: &SwarmBoard) -> Result<()> {
        write_json_atomic(&self.path, board)?;
        tracing::debug!(
            path = %self.path.display(),
            done = board.stats.done,
            failed = board.stats.failed,
            "saved swarm board"
        );
        Ok(())
    }
}
