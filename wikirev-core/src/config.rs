//! Wiki engine configuration
//!
//! Stored as JSON, by default at `wiki-config.json`. Which pages count as
//! intentionally unreferenced and which link prefixes are synthetic is a
//! content decision, so both live here rather than in code.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{Result, WikiError};

/// Configuration for [`crate::WikiPages`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WikiConfig {
    /// Core pages that are never reported as orphans.
    pub orphan_exempt_pages: Vec<String>,
    /// Scratch page whose links are never reported as broken.
    pub sandbox_page: String,
    /// Link targets starting with one of these, in any ASCII case, are
    /// generated anchors, not pages.
    pub reserved_link_prefixes: Vec<String>,
    /// Maximum number of pages held by the default page cache.
    pub cache_capacity: usize,
}

impl Default for WikiConfig {
    fn default() -> Self {
        Self {
            orphan_exempt_pages: vec![
                "FrontPage".to_string(),
                "MediaPosts".to_string(),
                "SandBox".to_string(),
                "System".to_string(),
            ],
            sandbox_page: "SandBox".to_string(),
            reserved_link_prefixes: vec!["Subs-".to_string(), "Movies-".to_string()],
            cache_capacity: 10_000,
        }
    }
}

impl WikiConfig {
    /// Load config from a JSON file, falling back to defaults when absent.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(path)
            .map_err(|e| WikiError::Config(format!("Failed to read {:?}: {}", path, e)))?;
        serde_json::from_str(&data)
            .map_err(|e| WikiError::Config(format!("Failed to parse {:?}: {}", path, e)))
    }

    /// Save config as pretty JSON via a temp file and rename.
    pub fn save(&self, path: &Path) -> Result<()> {
        let tmp_path = path.with_extension("tmp");
        let data = serde_json::to_string_pretty(self)
            .map_err(|e| WikiError::Config(e.to_string()))?;
        fs::write(&tmp_path, &data).map_err(|e| WikiError::Config(e.to_string()))?;
        fs::rename(&tmp_path, path).map_err(|e| WikiError::Config(e.to_string()))?;
        Ok(())
    }

    pub fn is_orphan_exempt(&self, page_name: &str) -> bool {
        self.orphan_exempt_pages
            .iter()
            .any(|p| p.eq_ignore_ascii_case(page_name))
    }

    pub fn is_sandbox(&self, page_name: &str) -> bool {
        self.sandbox_page.eq_ignore_ascii_case(page_name)
    }

    /// Prefix match ignoring ASCII case, as the page-name checks above do
    pub fn is_reserved_link(&self, target: &str) -> bool {
        self.reserved_link_prefixes.iter().any(|prefix| {
            target
                .get(..prefix.len())
                .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
        })
    }
}
