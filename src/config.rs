use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use serde::Deserialize;

use crate::source::Author;

const CONFIG_FILE: &str = "felix-export";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// SQLite copy of the legacy database.
    pub db_path: PathBuf,
    /// Canonical origin of the old site; links under it become relative.
    pub base_url: String,
    pub output: PathBuf,
    /// Articles assembled at once.
    pub concurrency: usize,
    pub default_author: AuthorSettings,
}

/// Credited when an article has no current writers.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthorSettings {
    pub name: String,
    pub slug: String,
    pub bio: Option<String>,
}

impl From<AuthorSettings> for Author {
    fn from(a: AuthorSettings) -> Self {
        Author {
            name: a.name,
            slug: a.slug,
            bio: a.bio,
        }
    }
}

impl Settings {
    /// Defaults, then `felix-export.toml` (or `path`), then `FELIX_*` env vars.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => File::from(p).required(true),
            None => File::with_name(CONFIG_FILE).required(false),
        };
        let builder = with_defaults(Config::builder())?
            .add_source(file)
            .add_source(
                Environment::with_prefix("FELIX")
                    .prefix_separator("_")
                    .separator("__"),
            );
        builder
            .build()
            .and_then(|c| c.try_deserialize::<Settings>())
            .context("Failed to load settings")
    }
}

fn with_defaults(builder: ConfigBuilder<DefaultState>) -> Result<ConfigBuilder<DefaultState>> {
    Ok(builder
        .set_default("db_path", "data/felix.sqlite")?
        .set_default("base_url", "https://felixonline.co.uk")?
        .set_default("output", "ghost-export.json")?
        .set_default("concurrency", 8)?
        .set_default("default_author.name", "Felix")?
        .set_default("default_author.slug", "felix")?
        .set_default(
            "default_author.bio",
            "Student Newspaper of Imperial College London",
        )?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let settings: Settings = with_defaults(Config::builder())
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(settings.base_url, "https://felixonline.co.uk");
        assert_eq!(settings.concurrency, 8);
        assert_eq!(settings.output, PathBuf::from("ghost-export.json"));
        let author: Author = settings.default_author.into();
        assert_eq!(author.slug, "felix");
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = std::env::temp_dir().join(format!("felix-export-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("settings.toml");
        std::fs::write(
            &path,
            "base_url = \"https://staging.felixonline.co.uk\"\nconcurrency = 2\n\n[default_author]\nname = \"Felix Staff\"\n",
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.base_url, "https://staging.felixonline.co.uk");
        assert_eq!(settings.concurrency, 2);
        assert_eq!(settings.default_author.name, "Felix Staff");
        assert_eq!(settings.default_author.slug, "felix");

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
