use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_USER_AGENT: &str = "wikimaint/0.1";
pub const DEFAULT_WIKI_URL: &str = "https://xyy.miraheze.org";
pub const DEFAULT_API_URL: &str = "https://xyy.miraheze.org/w/api.php";
pub const DEFAULT_ARTICLE_PATH: &str = "/wiki/$1";

pub const DEFAULT_MISSING_SOURCE_CATEGORY: &str = "Category:Files_missing_source";
pub const DEFAULT_SCREENSHOT_CATEGORY: &str = "Category:Donghua_screenshots";
pub const DEFAULT_CLASSIFIER_URL: &str = "https://tuxiaobei-wesliesearch-vision.ms.show";
pub const DEFAULT_CLASSIFIER_API: &str = "submit";
pub const DEFAULT_SOURCE_FLAG: &str = "WeslieSearch-Vision";
pub const DEFAULT_AUTOSOURCE_SUMMARY: &str =
    "autofix file source with WeslieSearch-Vision (https://tuxiaobei-wesliesearch-vision.ms.show)";

/// `{season}` is replaced by the season page name with spaces as underscores.
pub const DEFAULT_SEASON_DATA_URL: &str =
    "https://xyy.fandom.com/wiki/Template:Episode/{season}.json?action=raw";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiConfig {
    #[serde(default)]
    pub wiki: WikiSection,
    #[serde(default)]
    pub cleanup: CleanupSection,
    #[serde(default)]
    pub autosource: AutoSourceSection,
    #[serde(default)]
    pub episodes: EpisodeSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiSection {
    pub url: Option<String>,
    pub api_url: Option<String>,
    pub article_path: Option<String>,
    pub user_agent: Option<String>,
}

/// Overrides for the normalizer's rule data. Absent keys keep the built-in
/// lists.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct CleanupSection {
    pub summary_templates: Option<Vec<String>>,
    pub license_templates: Option<Vec<String>>,
    pub seasons: Option<Vec<String>>,
    pub skip_title_prefixes: Option<Vec<String>>,
    pub default_license: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct AutoSourceSection {
    pub category_a: String,
    pub category_b: String,
    pub classifier_url: String,
    pub api_name: String,
    pub source_flag: String,
    pub edit_summary: String,
}

impl Default for AutoSourceSection {
    fn default() -> Self {
        Self {
            category_a: DEFAULT_MISSING_SOURCE_CATEGORY.to_string(),
            category_b: DEFAULT_SCREENSHOT_CATEGORY.to_string(),
            classifier_url: DEFAULT_CLASSIFIER_URL.to_string(),
            api_name: DEFAULT_CLASSIFIER_API.to_string(),
            source_flag: DEFAULT_SOURCE_FLAG.to_string(),
            edit_summary: DEFAULT_AUTOSOURCE_SUMMARY.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct EpisodeSection {
    pub season_data_url: String,
}

impl Default for EpisodeSection {
    fn default() -> Self {
        Self {
            season_data_url: DEFAULT_SEASON_DATA_URL.to_string(),
        }
    }
}

impl EpisodeSection {
    pub fn season_data_url_for(&self, season_name: &str) -> String {
        self.season_data_url
            .replace("{season}", &season_name.trim().replace(' ', "_"))
    }
}

impl WikiConfig {
    /// Resolve the wiki API URL: env > config > built-in default.
    pub fn api_url_owned(&self) -> String {
        env_override("WIKI_API_URL")
            .or_else(|| self.wiki.api_url.clone())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
    }

    /// Resolve the wiki base URL: env WIKI_URL > config > derived from api_url.
    pub fn wiki_url(&self) -> String {
        if let Some(url) = env_override("WIKI_URL").or_else(|| self.wiki.url.clone()) {
            return url;
        }
        derive_wiki_url(&self.api_url_owned()).unwrap_or_else(|| DEFAULT_WIKI_URL.to_string())
    }

    /// Resolve user agent: env WIKI_USER_AGENT > config > DEFAULT_USER_AGENT.
    pub fn user_agent(&self) -> String {
        env_override("WIKI_USER_AGENT")
            .or_else(|| self.wiki.user_agent.clone())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    /// Resolve article path: env WIKI_ARTICLE_PATH > config > DEFAULT_ARTICLE_PATH.
    pub fn article_path_owned(&self) -> String {
        env_override("WIKI_ARTICLE_PATH")
            .or_else(|| self.wiki.article_path.clone())
            .unwrap_or_else(|| DEFAULT_ARTICLE_PATH.to_string())
    }

    pub fn linker(&self) -> PageLinker {
        PageLinker {
            wiki_url: self.wiki_url(),
            article_path: self.article_path_owned(),
        }
    }
}

/// Resolved base URL and article path, for building page links in reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageLinker {
    pub wiki_url: String,
    pub article_path: String,
}

impl Default for PageLinker {
    fn default() -> Self {
        Self {
            wiki_url: DEFAULT_WIKI_URL.to_string(),
            article_path: DEFAULT_ARTICLE_PATH.to_string(),
        }
    }
}

impl PageLinker {
    pub fn url(&self, title: &str) -> String {
        page_url(&self.wiki_url, &self.article_path, title)
    }
}

/// Load and parse a WikiConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<WikiConfig> {
    if !config_path.exists() {
        return Ok(WikiConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: WikiConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

pub fn page_url(wiki_url: &str, article_path: &str, title: &str) -> String {
    let slug = title.trim().replace(' ', "_");
    let path = if article_path.contains("$1") {
        article_path.replace("$1", &slug)
    } else {
        format!("{}/{slug}", article_path.trim_end_matches('/'))
    };
    format!("{}{path}", wiki_url.trim_end_matches('/'))
}

/// Derive wiki base URL from an API URL by stripping `/w/api.php` or `/api.php`.
pub fn derive_wiki_url(api_url: &str) -> Option<String> {
    let trimmed = api_url.trim();
    let stripped = trimmed
        .strip_suffix("/w/api.php")
        .or_else(|| trimmed.strip_suffix("/api.php"))
        .unwrap_or(trimmed);
    let result = stripped.trim_end_matches('/').to_string();
    if result.is_empty() {
        None
    } else {
        Some(result)
    }
}

pub(crate) fn env_override(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
