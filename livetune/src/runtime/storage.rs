//! Best-effort local cache for the high score. Nothing here is
//! authoritative; every failure is reported to the caller to log and the
//! score keeps flowing without it.

use std::error::Error;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use directories_next::BaseDirs;
use serde::{Deserialize, Serialize};

pub const HIGH_SCORE_VERSION: &str = "1";

pub fn cache_dir() -> Option<PathBuf> {
    BaseDirs::new().map(|base| base.cache_dir().join("LiveTune"))
}

#[derive(Debug, Deserialize, Serialize)]
struct StoredHighScore {
    version: String,
    high_score: f64,
}

#[derive(Clone, Debug)]
pub struct HighScoreCache {
    path: PathBuf,
}

impl HighScoreCache {
    /// Cache file for `game_id` under `dir`, falling back to the OS cache dir
    pub fn for_game(dir: Option<&Path>, game_id: Option<&str>) -> Option<Self> {
        let dir = dir.map(Path::to_path_buf).or_else(cache_dir)?;
        let name = format!("{}_high_score.json", file_stem(game_id));
        Some(Self {
            path: dir.join(name),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<f64>, Box<dyn Error>> {
        let json = match fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let stored = serde_json::from_str::<StoredHighScore>(&json)?;

        if !stored.high_score.is_finite() {
            return Err(format!(
                "corrupt high score {} in {}",
                stored.high_score,
                self.path.display()
            )
            .into());
        }

        Ok(Some(stored.high_score))
    }

    pub fn save(&self, high_score: f64) -> Result<(), Box<dyn Error>> {
        let json = serde_json::to_string_pretty(&StoredHighScore {
            version: HIGH_SCORE_VERSION.to_string(),
            high_score,
        })?;

        if let Some(parent_dir) = self.path.parent() {
            fs::create_dir_all(parent_dir)?;
        }
        fs::write(&self.path, json)?;
        Ok(())
    }
}

fn file_stem(game_id: Option<&str>) -> String {
    let stem: String = game_id
        .unwrap_or("default")
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if stem.is_empty() {
        "default".to_string()
    } else {
        stem
    }
}
