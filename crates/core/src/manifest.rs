//! Campaign manifests: the on-disk configuration for fetch jobs.
//!
//! Each `*.json` file in the manifest directory describes one campaign and the
//! fetchers that feed it. Fetcher definitions accept several historical shapes
//! for their `cli` field; [`FetcherDef::invocations`] normalizes all of them
//! into plain [`Invocation`]s, so nothing downstream ever sees the legacy forms.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, error, warn};

use crate::error::GleanerError;
use crate::job::{FetchJob, FetchMode, Invocation, Paging, RetryPolicy, Timing};

const DEFAULT_FETCHER_TYPE: &str = "reddit-cli";
const DEFAULT_SOURCE_TABLE: &str = "reddit";
const DEFAULT_PAGE_SIZE: u32 = 25;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 300;
/// Page cap when paging until the watermark and no explicit cap is given.
const DEFAULT_MAX_PAGES_UNTIL_WATERMARK: u32 = 10;

// ── Manifest shapes ─────────────────────────────────────────────────

/// A campaign manifest as stored on disk.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignManifest {
    pub id: String,
    pub name: String,
    pub source_table: Option<String>,
    pub objective: Option<String>,
    pub qualifier: Option<String>,
    pub criteria: Option<serde_json::Value>,
    pub labels: Option<Vec<serde_json::Value>>,
    pub fetcher: Option<OneOrMany<FetcherDef>>,
    pub metadata: Option<serde_json::Value>,
    /// File the manifest was read from (set by the loader).
    #[serde(skip)]
    pub manifest_path: Option<PathBuf>,
}

/// A field that may hold a single value or a list of them.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    pub fn as_slice(&self) -> &[T] {
        match self {
            OneOrMany::One(item) => std::slice::from_ref(item),
            OneOrMany::Many(items) => items,
        }
    }
}

/// One fetcher definition inside a manifest.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetcherDef {
    pub fetcher_type: Option<String>,
    pub source_table: Option<String>,
    pub enabled: Option<bool>,
    /// Only an explicit `poll` recurs; an omitted mode runs once.
    pub mode: Option<FetchMode>,
    pub poll_interval_seconds: Option<u64>,
    pub start_delay_seconds: Option<u64>,
    pub start_immediately: Option<bool>,
    pub limit: Option<u32>,
    pub max: Option<u32>,
    pub per_page: Option<u32>,
    pub cli: Option<CliSpec>,
    /// Program for legacy argument-list `cli` values.
    pub cli_binary: Option<String>,
    #[serde(alias = "pageUntilWatermark")]
    pub page_until_last_seen: Option<bool>,
    pub max_pages_per_cycle: Option<u32>,
    pub inter_page_delay_ms: Option<u64>,
    pub retry: Option<RetryDef>,
}

/// Retry settings as written in a manifest (all optional).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryDef {
    pub base_ms: Option<u64>,
    pub max_ms: Option<u64>,
    pub max_attempts: Option<u32>,
    #[serde(alias = "jitterFraction")]
    pub jitter: Option<f64>,
}

/// Every shape the `cli` field has taken over time.
///
/// The argument-list forms are tried first: serde would otherwise accept a
/// short string array as an [`Invocation`] in sequence form.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CliSpec {
    /// Legacy: `["list", "--subreddit", "x"]` run with `cliBinary`.
    Args(Vec<String>),
    /// Legacy: `[["list", ...], ["list", ...]]` run with `cliBinary`.
    ArgLists(Vec<Vec<String>>),
    /// `{ "program": "reddit", "args": [...] }`
    Single(Invocation),
    /// `[{ "program": ..., "args": [...] }, ...]`
    Multiple(Vec<Invocation>),
}

// ── Normalization ───────────────────────────────────────────────────

impl FetcherDef {
    pub fn is_enabled(&self) -> bool {
        self.enabled != Some(false)
    }

    pub fn page_size(&self) -> u32 {
        self.per_page.or(self.limit).unwrap_or(DEFAULT_PAGE_SIZE)
    }

    /// Canonical invocation list for this fetcher.
    ///
    /// Falls back to [`default_invocation`](Self::default_invocation) when
    /// `cli` is absent or yields nothing.
    pub fn invocations(&self, default_binary: &str) -> Vec<Invocation> {
        let program = self.cli_binary.as_deref().unwrap_or(default_binary);
        let invocations = match &self.cli {
            Some(CliSpec::Single(inv)) => vec![inv.clone()],
            Some(CliSpec::Multiple(invs)) => invs.clone(),
            Some(CliSpec::Args(args)) if !args.is_empty() => {
                vec![Invocation::new(program, args.clone())]
            }
            Some(CliSpec::ArgLists(lists)) => lists
                .iter()
                .map(|args| Invocation::new(program, args.clone()))
                .collect(),
            Some(CliSpec::Args(_)) | None => Vec::new(),
        };

        if invocations.is_empty() {
            vec![self.default_invocation(default_binary)]
        } else {
            invocations
        }
    }

    /// `list --subreddit forhire --sort new --per-page N`, plus `--max` or
    /// `--limit` when configured.
    pub fn default_invocation(&self, default_binary: &str) -> Invocation {
        let mut args: Vec<String> = ["list", "--subreddit", "forhire", "--sort", "new", "--per-page"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        args.push(self.page_size().to_string());
        if let Some(max) = self.max {
            args.push("--max".to_string());
            args.push(max.to_string());
        }
        if let (Some(limit), None) = (self.limit, self.max) {
            args.push("--limit".to_string());
            args.push(limit.to_string());
        }
        let program = self.cli_binary.as_deref().unwrap_or(default_binary);
        Invocation::new(program, args)
    }

    fn timing(&self) -> Timing {
        Timing {
            poll_interval: Duration::from_secs(
                self.poll_interval_seconds.unwrap_or(DEFAULT_POLL_INTERVAL_SECS),
            ),
            start_delay: Duration::from_secs(self.start_delay_seconds.unwrap_or(0)),
            start_immediately: self.start_immediately.unwrap_or(true),
        }
    }

    fn paging(&self) -> Paging {
        let defaults = Paging::default();
        let until_watermark = self.page_until_last_seen.unwrap_or(false);
        let max_pages = self.max_pages_per_cycle.unwrap_or(if until_watermark {
            DEFAULT_MAX_PAGES_UNTIL_WATERMARK
        } else {
            defaults.max_pages
        });
        Paging {
            page_size: self.page_size(),
            max_pages,
            inter_page_delay: self
                .inter_page_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.inter_page_delay),
            until_watermark,
        }
    }

    fn retry_policy(&self) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        let def = self.retry.clone().unwrap_or_default();
        RetryPolicy {
            base_delay: def.base_ms.map(Duration::from_millis).unwrap_or(defaults.base_delay),
            max_delay: def.max_ms.map(Duration::from_millis).unwrap_or(defaults.max_delay),
            max_attempts: def.max_attempts.unwrap_or(defaults.max_attempts),
            jitter: def.jitter.unwrap_or(defaults.jitter),
        }
    }
}

impl CampaignManifest {
    pub fn fetchers(&self) -> &[FetcherDef] {
        self.fetcher.as_ref().map(OneOrMany::as_slice).unwrap_or(&[])
    }

    /// Expand every enabled fetcher into one [`FetchJob`] per invocation.
    ///
    /// Invalid parameters are a configuration error and fail the whole
    /// manifest.
    pub fn fetch_jobs(&self, default_binary: &str) -> Result<Vec<FetchJob>, GleanerError> {
        let mut jobs = Vec::new();
        for def in self.fetchers() {
            if !def.is_enabled() {
                debug!(campaign = %self.id, "skipping disabled fetcher");
                continue;
            }
            let fetcher_type = def.fetcher_type.as_deref().unwrap_or(DEFAULT_FETCHER_TYPE);
            let source_table = def
                .source_table
                .as_deref()
                .filter(|t| !t.is_empty())
                .or(self.source_table.as_deref().filter(|t| !t.is_empty()))
                .unwrap_or(DEFAULT_SOURCE_TABLE);

            for invocation in def.invocations(default_binary) {
                let job = FetchJob::builder(&self.id, invocation)
                    .fetcher_type(fetcher_type)
                    .source_table(source_table)
                    .mode(def.mode.unwrap_or(FetchMode::OneShot))
                    .timing(def.timing())
                    .paging(def.paging())
                    .retry(def.retry_policy())
                    .build()?;
                jobs.push(job);
            }
        }
        Ok(jobs)
    }
}

// ── Loading ─────────────────────────────────────────────────────────

/// Parse a single manifest file.
pub fn load_manifest(path: &Path) -> Result<CampaignManifest, GleanerError> {
    let raw = std::fs::read_to_string(path)?;
    let mut manifest: CampaignManifest =
        serde_json::from_str(&raw).map_err(|e| GleanerError::Manifest {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
    manifest.manifest_path = Some(path.to_path_buf());
    Ok(manifest)
}

/// Load every `*.json` manifest in `dir`, in file-name order.
///
/// A missing directory yields no manifests. Files that fail to parse are
/// logged and skipped so one broken campaign does not block the others.
pub fn load_manifests(dir: &Path) -> Result<Vec<CampaignManifest>, GleanerError> {
    if !dir.exists() {
        warn!(dir = %dir.display(), "manifest directory not found");
        return Ok(Vec::new());
    }

    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();

    let mut manifests = Vec::with_capacity(paths.len());
    for path in paths {
        match load_manifest(&path) {
            Ok(m) => manifests.push(m),
            Err(e) => error!(path = %path.display(), error = %e, "failed to load manifest"),
        }
    }
    Ok(manifests)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(json: serde_json::Value) -> FetcherDef {
        serde_json::from_value(json).unwrap()
    }

    fn args(inv: &Invocation) -> Vec<&str> {
        inv.args.iter().map(String::as_str).collect()
    }

    #[test]
    fn cli_object_form() {
        let d = def(serde_json::json!({
            "cli": { "program": "/usr/bin/reddit", "args": ["list", "--subreddit", "rust"] }
        }));
        let invs = d.invocations("reddit");
        assert_eq!(invs.len(), 1);
        assert_eq!(invs[0].program, "/usr/bin/reddit");
        assert_eq!(args(&invs[0]), ["list", "--subreddit", "rust"]);
    }

    #[test]
    fn cli_object_array_form() {
        let d = def(serde_json::json!({
            "cli": [
                { "program": "reddit", "args": ["list", "--subreddit", "a"] },
                { "program": "reddit" }
            ]
        }));
        let invs = d.invocations("reddit");
        assert_eq!(invs.len(), 2);
        assert!(invs[1].args.is_empty());
    }

    #[test]
    fn cli_legacy_string_array_uses_cli_binary() {
        let d = def(serde_json::json!({
            "cliBinary": "old-reddit",
            "cli": ["list", "--subreddit", "forhire"]
        }));
        let invs = d.invocations("reddit");
        assert_eq!(invs.len(), 1);
        assert_eq!(invs[0].program, "old-reddit");
    }

    #[test]
    fn cli_legacy_nested_arrays() {
        let d = def(serde_json::json!({
            "cli": [["list", "--subreddit", "a"], ["list", "--subreddit", "b"]]
        }));
        let invs = d.invocations("reddit");
        assert_eq!(invs.len(), 2);
        assert_eq!(invs[0].program, "reddit");
        assert_eq!(args(&invs[1]), ["list", "--subreddit", "b"]);
    }

    #[test]
    fn default_invocation_with_max() {
        let d = def(serde_json::json!({ "perPage": 50, "max": 200, "limit": 10 }));
        let invs = d.invocations("reddit");
        assert_eq!(
            args(&invs[0]),
            ["list", "--subreddit", "forhire", "--sort", "new", "--per-page", "50", "--max", "200"]
        );
    }

    #[test]
    fn default_invocation_with_limit_only() {
        let d = def(serde_json::json!({ "limit": 10 }));
        let invs = d.invocations("reddit");
        assert_eq!(
            args(&invs[0]),
            ["list", "--subreddit", "forhire", "--sort", "new", "--per-page", "10", "--limit", "10"]
        );
    }

    #[test]
    fn empty_cli_falls_back_to_default() {
        let d = def(serde_json::json!({ "cli": [] }));
        let invs = d.invocations("reddit");
        assert_eq!(invs.len(), 1);
        assert_eq!(invs[0].args[0], "list");
    }

    #[test]
    fn fetch_jobs_apply_defaults_and_skip_disabled() {
        let manifest: CampaignManifest = serde_json::from_value(serde_json::json!({
            "id": "ai-engineer",
            "name": "AI Engineer",
            "sourceTable": "posts",
            "fetcher": [
                {
                    "mode": "poll",
                    "pageUntilLastSeen": true,
                    "retry": { "baseMs": 500, "jitter": 0.1 },
                    "cli": [["list", "--subreddit", "a"], ["list", "--subreddit", "b"]]
                },
                { "enabled": false }
            ]
        }))
        .unwrap();

        let jobs = manifest.fetch_jobs("reddit").unwrap();
        assert_eq!(jobs.len(), 2);
        let job = &jobs[0];
        assert_eq!(job.fetcher_type, "reddit-cli");
        assert_eq!(job.source_table, "posts");
        assert!(job.paging.until_watermark);
        assert_eq!(job.paging.max_pages, 10);
        assert_eq!(job.paging.page_size, 25);
        assert_eq!(job.retry.base_delay, Duration::from_millis(500));
        assert_eq!(job.retry.max_attempts, 3);
        assert_eq!(job.timing.poll_interval, Duration::from_secs(300));
        assert_ne!(jobs[0].key, jobs[1].key);
    }

    #[test]
    fn fetch_jobs_single_page_by_default() {
        let manifest: CampaignManifest = serde_json::from_value(serde_json::json!({
            "id": "c",
            "name": "C",
            "fetcher": { "mode": "one-shot" }
        }))
        .unwrap();
        let jobs = manifest.fetch_jobs("reddit").unwrap();
        assert_eq!(jobs[0].paging.max_pages, 1);
        assert_eq!(jobs[0].source_table, "reddit");
        assert_eq!(jobs[0].mode, FetchMode::OneShot);
    }

    #[test]
    fn fetch_jobs_reject_invalid_parameters() {
        let manifest: CampaignManifest = serde_json::from_value(serde_json::json!({
            "id": "c",
            "name": "C",
            "fetcher": { "mode": "poll", "pollIntervalSeconds": 0 }
        }))
        .unwrap();
        assert!(manifest.fetch_jobs("reddit").is_err());
    }

    #[test]
    fn fetch_jobs_without_mode_run_once() {
        let manifest: CampaignManifest = serde_json::from_value(serde_json::json!({
            "id": "c",
            "name": "C",
            "fetcher": { "cli": ["list"] }
        }))
        .unwrap();
        let jobs = manifest.fetch_jobs("reddit").unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].mode, FetchMode::OneShot);
    }

    #[test]
    fn load_manifests_skips_broken_and_non_json() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("b.json"),
            r#"{ "id": "b", "name": "B", "fetcher": { "cli": ["list"] } }"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("a.json"), r#"{ "id": "a", "name": "A" }"#).unwrap();
        std::fs::write(dir.path().join("broken.json"), "{ not json").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let manifests = load_manifests(dir.path()).unwrap();
        let ids: Vec<&str> = manifests.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
        assert_eq!(
            manifests[1].manifest_path.as_deref(),
            Some(dir.path().join("b.json").as_path())
        );
        assert!(manifests[0].fetchers().is_empty());
    }

    #[test]
    fn load_manifests_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(load_manifests(&missing).unwrap().is_empty());
    }
}
