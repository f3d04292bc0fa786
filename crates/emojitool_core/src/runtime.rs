use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::registry::is_image_file;

pub const DEFAULT_DB_FILENAME: &str = "statusphere.sqlite3";
pub const DEFAULT_CONFIG_FILENAME: &str = "emojitool.toml";
pub const DEFAULT_EMOJI_DIR: &str = "static/emojis";

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
    pub emoji_dir: Option<PathBuf>,
    pub db_path: Option<PathBuf>,
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
    pub emoji_dir: PathBuf,
    pub db_path: PathBuf,
    pub config_path: PathBuf,
    pub root_source: ValueSource,
    pub emoji_source: ValueSource,
    pub db_source: ValueSource,
    pub config_source: ValueSource,
}

impl ResolvedPaths {
    pub fn diagnostics(&self) -> String {
        format!(
            "project_root={} ({})\nemoji_dir={} ({})\ndb_path={} ({})\nconfig_path={} ({})",
            normalize_for_display(&self.project_root),
            self.root_source.as_str(),
            normalize_for_display(&self.emoji_dir),
            self.emoji_source.as_str(),
            normalize_for_display(&self.db_path),
            self.db_source.as_str(),
            normalize_for_display(&self.config_path),
            self.config_source.as_str(),
        )
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeStatus {
    pub project_root_exists: bool,
    pub emoji_dir_exists: bool,
    pub emoji_files: usize,
    pub db_exists: bool,
    pub db_size_bytes: Option<u64>,
    pub config_exists: bool,
    pub warnings: Vec<String>,
}

pub fn inspect_runtime(paths: &ResolvedPaths) -> Result<RuntimeStatus> {
    let project_root_exists = paths.project_root.exists();
    let emoji_dir_exists = paths.emoji_dir.is_dir();
    let config_exists = paths.config_path.exists();
    let db_exists = paths.db_path.exists();
    let db_size_bytes = if db_exists {
        let metadata = fs::metadata(&paths.db_path)
            .with_context(|| format!("failed to inspect {}", paths.db_path.display()))?;
        Some(metadata.len())
    } else {
        None
    };
    let emoji_files = if emoji_dir_exists {
        fs::read_dir(&paths.emoji_dir)
            .with_context(|| format!("failed to read {}", paths.emoji_dir.display()))?
            .flatten()
            .filter(|entry| entry.file_type().is_ok_and(|ft| ft.is_file()))
            .filter(|entry| is_image_file(&entry.file_name().to_string_lossy()))
            .count()
    } else {
        0
    };

    let mut warnings = Vec::new();
    if !db_exists {
        warnings.push(format!(
            "database is missing at {}; start the web app once to create it",
            normalize_for_display(&paths.db_path)
        ));
    }
    if !emoji_dir_exists {
        warnings.push(format!(
            "emoji directory is missing at {}; run `emojitool scrape` to populate it",
            normalize_for_display(&paths.emoji_dir)
        ));
    }

    Ok(RuntimeStatus {
        project_root_exists,
        emoji_dir_exists,
        emoji_files,
        db_exists,
        db_size_bytes,
        config_exists,
        warnings,
    })
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
    let lookup = |key: &str| {
        lookup_env(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    };

    let (project_root, root_source) = resolve_project_root(context, overrides, &lookup);

    let (emoji_dir, emoji_source) = if let Some(path) = overrides.emoji_dir.as_deref() {
        (absolutize(path, &context.cwd), ValueSource::Flag)
    } else if let Some(value) = lookup("EMOJITOOL_EMOJI_DIR") {
        (absolutize(Path::new(&value), &project_root), ValueSource::Env)
    } else {
        (project_root.join(DEFAULT_EMOJI_DIR), ValueSource::Default)
    };

    let (db_path, db_source) = if let Some(path) = overrides.db_path.as_deref() {
        (absolutize(path, &context.cwd), ValueSource::Flag)
    } else if let Some(value) = lookup("EMOJITOOL_DB_PATH") {
        (absolutize(Path::new(&value), &project_root), ValueSource::Env)
    } else if let Some(value) = lookup("DATABASE_URL").and_then(|url| sqlite_path_from_url(&url))
    {
        (absolutize(Path::new(&value), &project_root), ValueSource::Env)
    } else {
        (project_root.join(DEFAULT_DB_FILENAME), ValueSource::Default)
    };

    let (config_path, config_source) = if let Some(path) = overrides.config.as_deref() {
        (absolutize(path, &context.cwd), ValueSource::Flag)
    } else if let Some(value) = lookup("EMOJITOOL_CONFIG") {
        (absolutize(Path::new(&value), &project_root), ValueSource::Env)
    } else {
        (
            project_root.join(DEFAULT_CONFIG_FILENAME),
            ValueSource::Default,
        )
    };

    Ok(ResolvedPaths {
        project_root,
        emoji_dir,
        db_path,
        config_path,
        root_source,
        emoji_source,
        db_source,
        config_source,
    })
}

/// Accepts the web app's `DATABASE_URL` form (`sqlite://./statusphere.sqlite3`)
/// or a bare path. Other schemes are ignored.
fn sqlite_path_from_url(url: &str) -> Option<String> {
    let path = match url.split_once("://") {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("sqlite") => rest,
        Some(_) => return None,
        None => url,
    };
    let path = path.split('?').next().unwrap_or(path).trim();
    if path.is_empty() || path == ":memory:" {
        None
    } else {
        Some(path.to_string())
    }
}

fn resolve_project_root<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: &F,
) -> (PathBuf, ValueSource)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = overrides.project_root.as_deref() {
        return (absolutize(path, &context.cwd), ValueSource::Flag);
    }

    if let Some(value) = lookup_env("EMOJITOOL_PROJECT_ROOT") {
        return (absolutize(Path::new(&value), &context.cwd), ValueSource::Env);
    }

    match detect_project_root_heuristic(&context.cwd, context.executable_dir.as_deref()) {
        Some(root) => (root, ValueSource::Heuristic),
        None => (context.cwd.clone(), ValueSource::Default),
    }
}

fn detect_project_root_heuristic(cwd: &Path, executable_dir: Option<&Path>) -> Option<PathBuf> {
    let mut seen = HashSet::new();
    for candidate in candidate_roots(cwd, executable_dir) {
        let key = normalize_for_display(&candidate);
        if !seen.insert(key) {
            continue;
        }
        if candidate.join(DEFAULT_EMOJI_DIR).is_dir()
            || candidate.join(DEFAULT_DB_FILENAME).is_file()
        {
            return Some(candidate);
        }
    }
    None
}

fn candidate_roots(cwd: &Path, executable_dir: Option<&Path>) -> Vec<PathBuf> {
    let mut out = cwd.ancestors().map(Path::to_path_buf).collect::<Vec<_>>();
    if let Some(exe_dir) = executable_dir {
        out.extend(exe_dir.ancestors().map(Path::to_path_buf));
    }
    out
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

pub fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
