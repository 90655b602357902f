use std::env;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub const STATE_DIR_NAME: &str = ".wikimaint";
pub const CONFIG_FILENAME: &str = "config.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Heuristic,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Heuristic => "heuristic",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub project_root: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
    pub executable_dir: Option<PathBuf>,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        let executable_dir = env::current_exe()
            .ok()
            .and_then(|path| path.parent().map(Path::to_path_buf));
        Ok(Self {
            cwd,
            executable_dir,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub project_root: PathBuf,
    pub state_dir: PathBuf,
    pub config_path: PathBuf,
    pub downloads_dir: PathBuf,
    pub exports_dir: PathBuf,
    pub root_source: ValueSource,
    pub config_source: ValueSource,
}

impl ResolvedPaths {
    pub fn diagnostics(&self) -> String {
        format!(
            "project_root: {} [{}]\nstate_dir: {}\nconfig_path: {} [{}]\ndownloads_dir: {}\nexports_dir: {}",
            normalize_for_display(&self.project_root),
            self.root_source.as_str(),
            normalize_for_display(&self.state_dir),
            normalize_for_display(&self.config_path),
            self.config_source.as_str(),
            normalize_for_display(&self.downloads_dir),
            normalize_for_display(&self.exports_dir),
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    pub force: bool,
}

#[derive(Debug, Clone)]
pub struct InitReport {
    pub created_dirs: Vec<PathBuf>,
    pub wrote_config: bool,
}

pub fn resolve_paths(
    context: &ResolutionContext,
    overrides: &PathOverrides,
) -> Result<ResolvedPaths> {
    resolve_paths_with_lookup(context, overrides, |key| env::var(key).ok())
}

fn resolve_paths_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: F,
) -> Result<ResolvedPaths>
where
    F: Fn(&str) -> Option<String>,
{
    let (project_root, root_source) = layered_path(
        overrides.project_root.as_deref(),
        lookup_env("WIKIMAINT_PROJECT_ROOT"),
        &context.cwd,
    )
    .or_else(|| {
        find_marked_root(&context.cwd, context.executable_dir.as_deref())
            .map(|root| (root, ValueSource::Heuristic))
    })
    .unwrap_or_else(|| (context.cwd.clone(), ValueSource::Default));

    let state_dir = project_root.join(STATE_DIR_NAME);
    let (config_path, config_source) = layered_path(
        overrides.config.as_deref(),
        lookup_env("WIKIMAINT_CONFIG"),
        &project_root,
    )
    .unwrap_or_else(|| (state_dir.join(CONFIG_FILENAME), ValueSource::Default));

    Ok(ResolvedPaths {
        downloads_dir: state_dir.join("downloads"),
        exports_dir: state_dir.join("exports"),
        project_root,
        state_dir,
        config_path,
        root_source,
        config_source,
    })
}

/// Flag, then env. Relative values are taken from `base`.
fn layered_path(
    flag: Option<&Path>,
    env_value: Option<String>,
    base: &Path,
) -> Option<(PathBuf, ValueSource)> {
    if let Some(path) = flag {
        return Some((base.join(path), ValueSource::Flag));
    }
    env_value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .map(|value| (base.join(value), ValueSource::Env))
}

/// Nearest ancestor of `cwd` (then of the executable) holding a state dir.
fn find_marked_root(cwd: &Path, executable_dir: Option<&Path>) -> Option<PathBuf> {
    cwd.ancestors()
        .chain(executable_dir.into_iter().flat_map(Path::ancestors))
        .find(|candidate| candidate.join(STATE_DIR_NAME).is_dir())
        .map(Path::to_path_buf)
}

pub fn init_layout(paths: &ResolvedPaths, options: &InitOptions) -> Result<InitReport> {
    let mut created_dirs = Vec::new();
    for dir in [&paths.state_dir, &paths.downloads_dir, &paths.exports_dir] {
        if !dir.exists() {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            created_dirs.push(dir.clone());
        }
    }

    let wrote_config =
        write_config_file(&paths.config_path, &render_materialized_config(), options.force)?;

    Ok(InitReport {
        created_dirs,
        wrote_config,
    })
}

pub fn render_materialized_config() -> String {
    format!(
        "# wikimaint configuration (materialized by `wikimaint init`)\n# Credentials come from WIKI_BOT_USER / WIKI_BOT_PASS (a .env file works).\n\n[wiki]\n# url = \"{url}\"\n# api_url = \"{api_url}\"\narticle_path = \"{article_path}\"\n# user_agent = \"{user_agent}\"\n\n[cleanup]\n# Each list replaces the built-in one when present.\n# summary_templates = [\"fi\", \"file_information\", \"file information\"]\n# license_templates = [\"fairuse\", \"pd\", \"self\"]\n# seasons = [\"xh1\", \"xh2\"]\n# skip_title_prefixes = [\"File:Act 0109\"]\n# default_license = \"{{{{Fairuse}}}}\"\n\n[autosource]\n# category_a = \"{category_a}\"\n# category_b = \"{category_b}\"\n# classifier_url = \"{classifier_url}\"\n# api_name = \"{api_name}\"\n# source_flag = \"{source_flag}\"\n\n[episodes]\n# season_data_url = \"{season_data_url}\"\n",
        url = crate::config::DEFAULT_WIKI_URL,
        api_url = crate::config::DEFAULT_API_URL,
        article_path = crate::config::DEFAULT_ARTICLE_PATH,
        user_agent = crate::config::DEFAULT_USER_AGENT,
        category_a = crate::config::DEFAULT_MISSING_SOURCE_CATEGORY,
        category_b = crate::config::DEFAULT_SCREENSHOT_CATEGORY,
        classifier_url = crate::config::DEFAULT_CLASSIFIER_URL,
        api_name = crate::config::DEFAULT_CLASSIFIER_API,
        source_flag = crate::config::DEFAULT_SOURCE_FLAG,
        season_data_url = crate::config::DEFAULT_SEASON_DATA_URL,
    )
}

/// Write `content` unless the file exists and `force` is off. Returns whether it was written.
fn write_config_file(path: &Path, content: &str, force: bool) -> Result<bool> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let mut options = OpenOptions::new();
    options.write(true);
    if force {
        options.create(true).truncate(true);
    } else {
        options.create_new(true);
    }
    let mut file = match options.open(path) {
        Ok(file) => file,
        Err(error) if error.kind() == ErrorKind::AlreadyExists => return Ok(false),
        Err(error) => {
            return Err(error).with_context(|| format!("failed to open {}", path.display()));
        }
    };
    file.write_all(content.as_bytes())
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(true)
}

pub fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::fs;

    use tempfile::tempdir;

    use super::{
        InitOptions, PathOverrides, ResolutionContext, ValueSource, init_layout,
        render_materialized_config, resolve_paths_with_lookup,
    };
    use crate::config::load_config;

    #[test]
    fn resolve_paths_prefers_flag_over_env() {
        let temp = tempdir().expect("tempdir");
        let cwd = temp.path().join("cwd");
        let from_flag = temp.path().join("flag-root");
        fs::create_dir_all(&cwd).expect("create cwd");

        let overrides = PathOverrides {
            project_root: Some(from_flag.clone()),
            ..PathOverrides::default()
        };
        let context = ResolutionContext {
            cwd: cwd.clone(),
            executable_dir: None,
        };

        let env = HashMap::from([(
            "WIKIMAINT_PROJECT_ROOT".to_string(),
            temp.path().join("env-root").to_string_lossy().to_string(),
        )]);

        let resolved = resolve_paths_with_lookup(&context, &overrides, |key| env.get(key).cloned())
            .expect("resolve paths");
        assert_eq!(resolved.project_root, from_flag);
        assert_eq!(resolved.root_source, ValueSource::Flag);
        assert_eq!(resolved.config_path, from_flag.join(".wikimaint/config.toml"));
        assert_eq!(resolved.config_source, ValueSource::Default);
    }

    #[test]
    fn resolve_paths_uses_env_config_relative_to_root() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().to_path_buf();
        let context = ResolutionContext {
            cwd: root.clone(),
            executable_dir: None,
        };
        let env = HashMap::from([("WIKIMAINT_CONFIG".to_string(), " alt.toml ".to_string())]);

        let resolved = resolve_paths_with_lookup(
            &context,
            &PathOverrides {
                project_root: Some(root.clone()),
                ..PathOverrides::default()
            },
            |key| env.get(key).cloned(),
        )
        .expect("resolve paths");
        assert_eq!(resolved.config_path, root.join("alt.toml"));
        assert_eq!(resolved.config_source, ValueSource::Env);
    }

    #[test]
    fn heuristic_finds_nearest_ancestor_with_state_dir() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("project");
        let nested = root.join("a").join("b");
        fs::create_dir_all(root.join(".wikimaint")).expect("state dir");
        fs::create_dir_all(&nested).expect("nested");

        let context = ResolutionContext {
            cwd: nested,
            executable_dir: None,
        };
        let resolved = resolve_paths_with_lookup(&context, &PathOverrides::default(), |_| None)
            .expect("resolve");
        assert_eq!(resolved.project_root, root);
        assert_eq!(resolved.root_source, ValueSource::Heuristic);
    }

    #[test]
    fn init_layout_creates_dirs_and_parsable_config() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("project");
        fs::create_dir_all(&root).expect("create root");

        let context = ResolutionContext {
            cwd: root.clone(),
            executable_dir: None,
        };
        let overrides = PathOverrides {
            project_root: Some(root.clone()),
            ..PathOverrides::default()
        };
        let paths = resolve_paths_with_lookup(&context, &overrides, |_| None).expect("resolve");

        let report = init_layout(&paths, &InitOptions::default()).expect("init");
        assert_eq!(report.created_dirs.len(), 3);
        assert!(report.wrote_config);
        assert!(paths.downloads_dir.exists());

        let config = load_config(&paths.config_path).expect("load materialized config");
        assert_eq!(config.wiki.article_path.as_deref(), Some("/wiki/$1"));

        let again = init_layout(&paths, &InitOptions::default()).expect("init again");
        assert!(again.created_dirs.is_empty());
        assert!(!again.wrote_config);
    }

    #[test]
    fn materialized_config_mentions_every_section() {
        let rendered = render_materialized_config();
        for section in ["[wiki]", "[cleanup]", "[autosource]", "[episodes]"] {
            assert!(rendered.contains(section), "missing {section}");
        }
        assert!(rendered.contains("# default_license = \"{{Fairuse}}\""));
    }
}
