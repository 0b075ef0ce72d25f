//! Runtime configuration from the environment.
//!
//! | variable | default |
//! |---|---|
//! | `CONTEXTKB_SITE` | `local` |
//! | `CONTEXTKB_DB` | `<data dir>/contextkb.db` |
//! | `CONTEXTKB_PORT` | `5050` |
//! | `CONTEXTKB_URL` | the site's entry in `sites.json`, else `http://localhost:<port>` |
//! | `CONTEXTKB_API_KEY` | none |
//!
//! `sites.json` lives in `<config dir>/contextkb/` and maps site names to
//! server URLs: `{"local": "http://localhost:5050"}`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub const DEFAULT_SITE: &str = "local";
pub const DEFAULT_PORT: u16 = 5050;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub site: String,
    pub db_path: PathBuf,
    pub port: u16,
    /// Server URL for clients, without the `/api/v1` suffix.
    pub url: String,
    pub api_key: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let sites = match SiteTable::default_path() {
            Some(path) if path.exists() => SiteTable::load(&path)?,
            _ => SiteTable::default(),
        };
        Self::from_lookup(|key| std::env::var(key).ok(), &sites)
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>, sites: &SiteTable) -> Result<Self> {
        let site = lookup("CONTEXTKB_SITE").unwrap_or_else(|| DEFAULT_SITE.to_string());
        let db_path = match lookup("CONTEXTKB_DB") {
            Some(path) => PathBuf::from(path),
            None => crate::db::default_path()?,
        };
        let port = match lookup("CONTEXTKB_PORT") {
            Some(port) => port
                .parse()
                .with_context(|| format!("CONTEXTKB_PORT '{port}' is not a port number"))?,
            None => DEFAULT_PORT,
        };
        let url = lookup("CONTEXTKB_URL")
            .or_else(|| sites.url_for(&site).map(str::to_owned))
            .unwrap_or_else(|| format!("http://localhost:{port}"));
        let api_key = lookup("CONTEXTKB_API_KEY").filter(|k| !k.is_empty());

        Ok(Self {
            site,
            db_path,
            port,
            url: url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

/// Known sites and the URLs of their servers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SiteTable {
    sites: BTreeMap<String, String>,
}

impl SiteTable {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("contextkb").join("sites.json"))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(Self {
            sites: serde_json::from_str(raw)?,
        })
    }

    pub fn url_for(&self, site: &str) -> Option<&str> {
        self.sites.get(site).map(String::as_str)
    }
}
