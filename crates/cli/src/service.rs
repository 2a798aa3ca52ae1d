//! Builds a [`ReportService`] from configuration.

use std::sync::Arc;
use std::time::Duration;

use bugflow_core::attachments::LocalScreenshotStore;
use bugflow_core::notify::LogNotifier;
use bugflow_core::tracker::{GithubTransport, IssueTracker, RetryingTracker, UnconfiguredTracker};
use bugflow_core::triage::{
    AnthropicClient, DisabledClassifier, FallbackPolicy, LlmTriageClassifier, TriageClassifier,
};
use bugflow_core::{ReportService, ServiceConfig};
use bugflow_storage::{MemoryReportStore, ReportStore, SqliteReportStore, StorageError};

use crate::config::BugflowConfig;

/// Open the configured store, or a fresh in-memory one.
pub(crate) fn open_store(
    config: &BugflowConfig,
    in_memory: bool,
) -> Result<Arc<dyn ReportStore>, StorageError> {
    if in_memory {
        tracing::warn!("using in-memory storage; reports are lost on exit");
        return Ok(Arc::new(MemoryReportStore::new()));
    }
    let store = SqliteReportStore::open(&config.storage.path)?;
    tracing::debug!(path = %config.storage.path.display(), "opened report store");
    Ok(Arc::new(store))
}

pub(crate) fn build_service(
    config: &BugflowConfig,
    in_memory: bool,
) -> Result<Arc<ReportService>, StorageError> {
    let store = open_store(config, in_memory)?;
    let service = ReportService::new(
        store,
        build_classifier(config),
        build_tracker(config),
        ServiceConfig {
            threshold: config.triage.threshold,
            claim_lease: Duration::from_secs(config.tracker.claim_lease_secs),
            max_notes_chars: config.server.max_notes_chars,
            redaction: config.diagnostics.redaction_policy(),
            issue_template: config.tracker.issue_template(),
        },
    )
    .with_notifier(Arc::new(LogNotifier));

    let service = match &config.attachments.dir {
        Some(dir) => service.with_screenshot_store(Arc::new(
            LocalScreenshotStore::new(dir, config.attachments.public_base_url.clone())
                .with_max_bytes(config.attachments.max_bytes),
        )),
        None => service,
    };
    Ok(Arc::new(service))
}

fn build_classifier(config: &BugflowConfig) -> Arc<dyn TriageClassifier> {
    let fallback = FallbackPolicy::from_fail_open(config.triage.fail_open);
    match &config.triage.api_key {
        Some(key) => {
            let mut client = AnthropicClient::new(key.clone());
            if let Some(base) = &config.triage.api_base {
                client.base_url = base.clone();
            }
            Arc::new(
                LlmTriageClassifier::new(Box::new(client), config.triage.model.clone())
                    .with_fallback(fallback),
            )
        }
        None => {
            tracing::warn!(
                ?fallback,
                "no triage model configured; every report gets the fallback verdict"
            );
            Arc::new(DisabledClassifier { fallback })
        }
    }
}

fn build_tracker(config: &BugflowConfig) -> Arc<dyn IssueTracker> {
    match (&config.tracker.repo, &config.tracker.token) {
        (Some(repo), Some(token)) => {
            let mut transport = GithubTransport::new(token.clone(), repo.clone());
            if let Some(base) = &config.tracker.api_base {
                transport = transport.with_api_base(base.clone());
            }
            Arc::new(RetryingTracker::new(
                transport,
                config.tracker.retry_policy(),
            ))
        }
        _ => {
            tracing::warn!("issue tracker not configured; escalated reports will fail until it is");
            Arc::new(UnconfiguredTracker)
        }
    }
}
