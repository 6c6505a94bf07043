use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use super::Rgba;

/// User-saved bar colors, keyed by image source (track file or default image).
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct PaletteFile {
    #[serde(default)]
    colors: BTreeMap<String, Rgba>,
}

pub struct Palette {
    path: PathBuf,
    colors: BTreeMap<String, Rgba>,
}

impl Palette {
    /// Load saved colors; a missing or unreadable file starts an empty palette.
    pub fn open(path: PathBuf) -> Self {
        let colors = match std::fs::read_to_string(&path) {
            Ok(text) => match toml::from_str::<PaletteFile>(&text) {
                Ok(file) => file.colors,
                Err(err) => {
                    log::warn!("Ignoring broken color palette {}: {}", path.display(), err);
                    BTreeMap::new()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => {
                log::warn!("Can't read color palette {}: {}", path.display(), err);
                BTreeMap::new()
            }
        };
        log::debug!("Loaded {} saved colors", colors.len());
        Self { path, colors }
    }

    pub fn get(&self, key: &str) -> Option<Rgba> {
        self.colors.get(key).copied()
    }

    pub fn insert(&mut self, key: impl Into<String>, color: Rgba) {
        self.colors.insert(key.into(), color);
    }

    pub fn remove(&mut self, key: &str) -> Option<Rgba> {
        self.colors.remove(key)
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    pub fn save(&self) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        let file = PaletteFile {
            colors: self.colors.clone(),
        };
        let text = toml::to_string_pretty(&file).context("Failed to serialize color palette")?;
        std::fs::write(&self.path, text)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("cavalcade-palette-{}-{}", std::process::id(), name))
    }

    #[test]
    fn saved_colors_survive_reload() {
        let path = scratch("roundtrip.toml");
        let _ = std::fs::remove_file(&path);

        let mut palette = Palette::open(path.clone());
        assert!(palette.is_empty());
        palette.insert("/music/a b.mp3", Rgba::new(10, 20, 30, 255));
        palette.insert("/img/default.png", Rgba::new(1, 2, 3, 4));
        palette.save().unwrap();

        let reloaded = Palette::open(path.clone());
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.get("/music/a b.mp3"), Some(Rgba::new(10, 20, 30, 255)));
        assert_eq!(reloaded.get("/img/default.png"), Some(Rgba::new(1, 2, 3, 4)));
        assert_eq!(reloaded.get("/other.mp3"), None);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn broken_file_starts_empty() {
        let path = scratch("broken.toml");
        std::fs::write(&path, "colors = 12").unwrap();
        let mut palette = Palette::open(path.clone());
        assert!(palette.is_empty());
        palette.insert("x", Rgba::TRANSPARENT);
        assert_eq!(palette.remove("x"), Some(Rgba::TRANSPARENT));
        let _ = std::fs::remove_file(&path);
    }
}
