use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::decode::is_supported;

/// Playlist and queue carried over between runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub playlist: Vec<PathBuf>,
    pub queue: Vec<PathBuf>,
}

pub fn default_session_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cavalcade")
        .join("session.json")
}

impl Session {
    /// Read a saved session. A missing file is `Ok(None)`.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("Failed to read {}", path.display()))
            }
        };
        let session = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse session file {}", path.display()))?;
        Ok(Some(session))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        log::debug!("Player session saved to {}", path.display());
        Ok(())
    }
}

/// Keep the playable files from command-line arguments, warning about the rest.
pub fn filter_audio(args: &[PathBuf]) -> Vec<PathBuf> {
    let (audio, rejected): (Vec<PathBuf>, Vec<PathBuf>) =
        args.iter().cloned().partition(|p| is_supported(p));
    if !rejected.is_empty() {
        let names: Vec<String> = rejected.iter().map(|p| p.display().to_string()).collect();
        log::warn!("Can't load these files:\n{}", names.join("\n"));
    }
    audio
}
