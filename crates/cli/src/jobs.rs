//! Turning loaded manifests into the set of jobs to run.

use std::collections::HashSet;

use tracing::{info, warn};

use gleaner_core::manifest::CampaignManifest;
use gleaner_core::{FetchJob, FetchMode, GleanerError};

/// Options that narrow or reshape the configured jobs.
#[derive(Debug, Default)]
pub struct Selection<'a> {
    /// Campaign ids to keep; empty keeps all.
    pub only: &'a [String],
    /// Force every job to one-shot.
    pub once: bool,
}

/// Build the jobs of every selected manifest. Jobs that resolve to the same
/// key are run once. A definition that fails validation aborts startup.
pub fn collect_jobs(
    manifests: &[CampaignManifest],
    selection: &Selection<'_>,
    default_binary: &str,
) -> Result<Vec<FetchJob>, GleanerError> {
    let mut seen = HashSet::new();
    let mut jobs = Vec::new();

    for manifest in manifests {
        if !selection.only.is_empty() && !selection.only.contains(&manifest.id) {
            continue;
        }

        let built = manifest.fetch_jobs(default_binary)?;
        info!(campaign = %manifest.id, jobs = built.len(), "campaign loaded");

        for mut job in built {
            if !seen.insert(job.key.clone()) {
                warn!(
                    campaign = %manifest.id,
                    job_key = %job.short_key(),
                    "duplicate invocation, skipping"
                );
                continue;
            }
            if selection.once {
                job.mode = FetchMode::OneShot;
            }
            jobs.push(job);
        }
    }

    Ok(jobs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(json: &str) -> CampaignManifest {
        serde_json::from_str(json).unwrap()
    }

    fn sample() -> Vec<CampaignManifest> {
        vec![
            manifest(
                r#"{
                    "id": "forhire",
                    "name": "For hire",
                    "fetcher": [
                        { "mode": "poll", "cli": ["list", "--subreddit", "forhire"] },
                        { "mode": "poll", "cli": ["list", "--subreddit", "forhire"] }
                    ]
                }"#,
            ),
            manifest(
                r#"{
                    "id": "rust-jobs",
                    "name": "Rust jobs",
                    "fetcher": { "mode": "poll", "cli": [["list", "--subreddit", "rust"], ["search", "hiring"]] }
                }"#,
            ),
        ]
    }

    #[test]
    fn duplicate_invocations_run_once() {
        let jobs = collect_jobs(&sample(), &Selection::default(), "reddit").unwrap();
        assert_eq!(jobs.len(), 3);
        let keys: HashSet<_> = jobs.iter().map(|j| j.key.as_str()).collect();
        assert_eq!(keys.len(), 3);
    }

    #[test]
    fn only_filters_campaigns() {
        let only = vec!["rust-jobs".to_string()];
        let selection = Selection {
            only: &only,
            once: false,
        };
        let jobs = collect_jobs(&sample(), &selection, "reddit").unwrap();
        assert_eq!(jobs.len(), 2);
        assert!(jobs.iter().all(|j| j.campaign_id == "rust-jobs"));
    }

    #[test]
    fn once_forces_one_shot() {
        let selection = Selection {
            only: &[],
            once: true,
        };
        let jobs = collect_jobs(&sample(), &selection, "reddit").unwrap();
        assert!(jobs.iter().all(|j| j.mode == FetchMode::OneShot));
    }

    #[test]
    fn invalid_definition_is_fatal() {
        let bad = vec![manifest(
            r#"{ "id": "bad", "name": "Bad", "fetcher": { "pollIntervalSeconds": 0 } }"#,
        )];
        assert!(collect_jobs(&bad, &Selection::default(), "reddit").is_err());
    }
}
