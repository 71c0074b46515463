use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use chrono::Duration;
use tracing::{debug, info, trace, warn};

use crate::aggregate::DEFAULT_SORT_FIELD;
use crate::completion::DEFAULT_COMPLETION_DELAY_MS;
use crate::datastore::{LocationRegistry, StoreError};
use crate::filter::MatchMode;
use crate::sort::SortOrder;

const RC_ENV: &str = "SIMPLELISTRC";
const RC_FILE: &str = ".simplelistrc";

#[derive(Debug, Clone)]
pub struct Config {
    map: HashMap<String, String>,
    pub loaded_files: Vec<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let mut map = HashMap::new();
        map.insert("color".to_string(), "on".to_string());
        map.insert("show.completed".to_string(), "no".to_string());
        map.insert("filter.match".to_string(), "any".to_string());
        map.insert("sort.field".to_string(), DEFAULT_SORT_FIELD.to_string());
        map.insert("sort.order".to_string(), "desc".to_string());
        map.insert(
            "completion.delay".to_string(),
            DEFAULT_COMPLETION_DELAY_MS.to_string(),
        );

        Self {
            map,
            loaded_files: vec![],
        }
    }
}

impl Config {
    #[tracing::instrument(skip(rc_override))]
    pub fn load(rc_override: Option<&Path>) -> anyhow::Result<Self> {
        let mut cfg = Config::default();

        let rc = resolve_rc_path(rc_override)?;
        if let Some(path) = rc {
            info!(rc = %path.display(), "loading rc file");
            cfg.load_file(&path)?;
        } else {
            debug!("no rc file found; using defaults");
        }

        Ok(cfg)
    }

    #[tracing::instrument(skip(self, overrides))]
    pub fn apply_overrides<I>(&mut self, overrides: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (k, v) in overrides {
            let key = k.strip_prefix("rc.").unwrap_or(&k).to_string();
            debug!(key = %key, value = %v, "applying override");
            self.map.insert(key, v);
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.map.get(key).cloned()
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.map.get(key).map(|v| parse_bool(v))
    }

    pub fn show_completed(&self) -> bool {
        self.get_bool("show.completed").unwrap_or(false)
    }

    pub fn match_mode(&self) -> anyhow::Result<MatchMode> {
        match self.map.get("filter.match") {
            Some(raw) => {
                MatchMode::parse(raw).ok_or_else(|| anyhow!("invalid filter.match setting: {raw}"))
            }
            None => Ok(MatchMode::default()),
        }
    }

    pub fn sort_order(&self) -> anyhow::Result<SortOrder> {
        match self.map.get("sort.order") {
            Some(raw) => {
                SortOrder::parse(raw).ok_or_else(|| anyhow!("invalid sort.order setting: {raw}"))
            }
            None => Ok(SortOrder::default()),
        }
    }

    pub fn sort_field(&self) -> String {
        self.get("sort.field")
            .filter(|field| !field.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SORT_FIELD.to_string())
    }

    pub fn completion_delay(&self) -> anyhow::Result<Duration> {
        let raw = self
            .get("completion.delay")
            .unwrap_or_else(|| DEFAULT_COMPLETION_DELAY_MS.to_string());
        let ms: i64 = raw
            .trim()
            .parse()
            .map_err(|_| anyhow!("invalid completion.delay setting: {raw}"))?;
        if ms < 0 {
            return Err(anyhow!("completion.delay cannot be negative: {ms}"));
        }
        Ok(Duration::milliseconds(ms))
    }

    #[tracing::instrument(skip(self))]
    fn load_file(&mut self, path: &Path) -> anyhow::Result<()> {
        let path = expand_tilde(path);
        let canonical = fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
        if self.loaded_files.contains(&canonical) {
            warn!(file = %path.display(), "rc file already loaded; skipping include cycle");
            return Ok(());
        }

        let text = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;

        self.loaded_files.push(canonical);

        let base_dir = path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        for (line_num, raw_line) in text.lines().enumerate() {
            let mut line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some((before, _)) = line.split_once('#') {
                line = before.trim();
            }

            if line.is_empty() {
                continue;
            }

            if let Some(include_rest) = line.strip_prefix("include ") {
                let include_path = resolve_include_path(&base_dir, include_rest.trim())?;
                debug!(
                    file = %path.display(),
                    include = %include_path.display(),
                    line = line_num + 1,
                    "processing include"
                );

                if include_path.exists() {
                    self.load_file(&include_path)?;
                } else {
                    warn!(
                        include = %include_path.display(),
                        "include file does not exist; skipping"
                    );
                }
                continue;
            }

            let (k, v) = line.split_once('=').ok_or_else(|| {
                anyhow!(
                    "invalid config line {}:{}: {}",
                    path.display(),
                    line_num + 1,
                    raw_line
                )
            })?;

            let key = k.trim().to_string();
            let value = v.trim().to_string();
            trace!(key = %key, value = %value, "loaded config key");
            self.map.insert(key, value);
        }

        Ok(())
    }
}

/// Save location in order of precedence: `--data`, `data.location`, then
/// the directory remembered by `sl location`. Nothing chosen is a
/// `StoreError::LocationNotSelected`.
#[tracing::instrument(skip(cfg, override_dir, registry))]
pub fn resolve_data_dir(
    cfg: &Config,
    override_dir: Option<&Path>,
    registry: &LocationRegistry,
) -> anyhow::Result<PathBuf> {
    let dir = if let Some(path) = override_dir {
        path.to_path_buf()
    } else if let Some(cfg_value) = cfg.get("data.location").filter(|v| !v.trim().is_empty()) {
        expand_tilde(Path::new(&cfg_value))
    } else if let Some(selected) = registry.selected()? {
        selected
    } else {
        return Err(StoreError::LocationNotSelected.into());
    };

    if !dir.exists() {
        info!(dir = %dir.display(), "creating data directory");
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }

    Ok(dir)
}

#[tracing::instrument(skip(override_path))]
fn resolve_rc_path(override_path: Option<&Path>) -> anyhow::Result<Option<PathBuf>> {
    if let Some(path) = override_path {
        return Ok(Some(path.to_path_buf()));
    }

    if let Ok(rc_env) = std::env::var(RC_ENV) {
        if rc_env == "/dev/null" {
            return Ok(None);
        }
        return Ok(Some(PathBuf::from(rc_env)));
    }

    let Some(home) = dirs::home_dir() else {
        warn!("cannot determine home directory; skipping rc file");
        return Ok(None);
    };
    let candidate = home.join(RC_FILE);
    if candidate.exists() {
        return Ok(Some(candidate));
    }

    Ok(None)
}

fn resolve_include_path(base_dir: &Path, include: &str) -> anyhow::Result<PathBuf> {
    if include.trim().is_empty() {
        return Err(anyhow!("include path cannot be empty"));
    }

    let raw = PathBuf::from(include);
    let expanded = expand_tilde(&raw);
    if expanded.is_absolute() {
        Ok(expanded)
    } else {
        Ok(base_dir.join(expanded))
    }
}

fn expand_tilde(path: &Path) -> PathBuf {
    let text = path.to_string_lossy();
    if let Some(rest) = text.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    path.to_path_buf()
}

fn parse_bool(s: &str) -> bool {
    matches!(
        s.trim().to_ascii_lowercase().as_str(),
        "1" | "y" | "yes" | "on" | "true"
    )
}
