//! End-to-end mirroring of one page.
//!
//! [`PageMirror::mirror`] fetches the document, stores it raw, discovers its
//! assets, downloads them with bounded concurrency, rewrites the document to
//! point at the local copies, and reports a [`MirrorResult`]. Only a failure to
//! fetch or store the document itself fails the mirror; asset failures are
//! recorded per asset.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tracing::{debug, info, warn};
use url::Url;

use crate::cache_path::{key_for, local_path_for, relative_path_for, CacheKey};
use crate::cache_store::CacheStore;
use crate::config::MirrorConfig;
use crate::error::{Error, FetchError, FilesystemError, MirrorError, Result};
use crate::fetcher::{ContentFetcher, HttpFetcher};
use crate::html_rewriter::{AssetReference, HtmlRewriter, UnresolvedReference};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorRequest {
    pub source_url: Url,
    /// Display label only; never used for addressing.
    pub logical_name: String,
}

impl MirrorRequest {
    /// Validates that `source_url` is an absolute http(s) URL.
    pub fn new(source_url: &str, logical_name: impl Into<String>) -> Result<Self> {
        let url = Url::parse(source_url.trim())
            .map_err(|e| Error::InvalidRequest(format!("'{source_url}': {e}")))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::InvalidRequest(format!(
                "'{source_url}' is not an http(s) URL"
            )));
        }

        Ok(Self {
            source_url: url,
            logical_name: logical_name.into(),
        })
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum AssetFailure {
    #[error(transparent)]
    Fetch(FetchError),

    #[error(transparent)]
    Filesystem(FilesystemError),

    #[error("cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AssetOutcome {
    /// Downloaded during this mirror call.
    Fetched { bytes: u64 },
    /// Already present on disk; no request was made.
    Reused,
    Failed { error: AssetFailure },
}

impl AssetOutcome {
    pub fn is_available(&self) -> bool {
        !matches!(self, AssetOutcome::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetRecord {
    pub reference: AssetReference,
    pub outcome: AssetOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MirrorResult {
    pub success: bool,
    pub html_path: Option<PathBuf>,
    pub assets: Vec<AssetRecord>,
    pub unresolved: Vec<UnresolvedReference>,
    pub error: Option<MirrorError>,
}

impl MirrorResult {
    fn failed(error: MirrorError) -> Self {
        Self {
            success: false,
            html_path: None,
            assets: Vec::new(),
            unresolved: Vec::new(),
            error: Some(error),
        }
    }

    pub fn fetched_count(&self) -> usize {
        self.assets.iter().filter(|a| a.outcome.is_available()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.assets.len() - self.fetched_count()
    }

    /// Succeeded, but the offline copy may be missing some styles, scripts or images.
    pub fn is_partial(&self) -> bool {
        self.success && (self.failed_count() > 0 || !self.unresolved.is_empty())
    }
}

/// Progress notifications emitted while a mirror runs.
#[derive(Debug, Clone)]
pub enum MirrorEvent {
    DocumentFetched { bytes: usize, assets: usize },
    AssetStarted { url: Url },
    AssetFinished { url: Url, outcome: AssetOutcome },
    Finished { success: bool },
}

type ProgressFn = Arc<dyn Fn(&MirrorEvent) + Send + Sync>;

/// Sending half of a cancellation signal.
#[derive(Debug)]
pub struct CancelHandle(watch::Sender<bool>);

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.0.send(true);
    }
}

/// Observed by a running mirror between and during asset fetches.
#[derive(Debug, Clone)]
pub struct CancelSignal(watch::Receiver<bool>);

impl CancelSignal {
    pub fn pair() -> (CancelHandle, CancelSignal) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle(tx), CancelSignal(rx))
    }

    /// A signal that never fires.
    pub fn never() -> Self {
        let (_, rx) = watch::channel(false);
        CancelSignal(rx)
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once cancellation is requested; pends forever if it never is.
    pub async fn cancelled(&self) {
        let mut rx = self.0.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Mirrors pages into a [`CacheStore`] using an injected [`ContentFetcher`].
pub struct PageMirror<F: ContentFetcher = HttpFetcher> {
    fetcher: Arc<F>,
    store: CacheStore,
    config: MirrorConfig,
    key_locks: Arc<Mutex<HashMap<CacheKey, Arc<AsyncMutex<()>>>>>,
    progress: Option<ProgressFn>,
}

impl PageMirror<HttpFetcher> {
    pub fn from_config(config: MirrorConfig) -> Result<Self> {
        config.validate()?;
        let fetcher = HttpFetcher::from_config(&config)?;
        let store = CacheStore::new(&config.cache_root)?;
        Ok(Self::new(fetcher, store, config))
    }
}

impl<F: ContentFetcher> PageMirror<F> {
    pub fn new(fetcher: F, store: CacheStore, config: MirrorConfig) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            store,
            config,
            key_locks: Arc::new(Mutex::new(HashMap::new())),
            progress: None,
        }
    }

    pub fn with_progress(mut self, observer: impl Fn(&MirrorEvent) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(observer));
        self
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub async fn mirror(&self, request: &MirrorRequest) -> MirrorResult {
        self.mirror_with_cancel(request, &CancelSignal::never()).await
    }

    /// Like [`PageMirror::mirror`], stopping early once `cancel` fires.
    ///
    /// Calls for the same URL are serialized; different URLs run independently.
    pub async fn mirror_with_cancel(
        &self,
        request: &MirrorRequest,
        cancel: &CancelSignal,
    ) -> MirrorResult {
        let key = key_for(&request.source_url);
        let lock = self.lock_for(&key);

        let result = {
            let _guard = lock.lock().await;
            info!(
                "Mirroring '{}' from {} into {}",
                request.logical_name, request.source_url, key
            );
            self.run(request, &key, cancel).await
        };

        drop(lock);
        self.prune_locks();
        self.emit(&MirrorEvent::Finished {
            success: result.success,
        });

        if result.success {
            info!(
                "Mirrored {}: {} assets available, {} failed",
                request.source_url,
                result.fetched_count(),
                result.failed_count()
            );
        } else if let Some(error) = &result.error {
            warn!("Mirror of {} failed: {}", request.source_url, error);
        }
        result
    }

    async fn run(&self, request: &MirrorRequest, key: &CacheKey, cancel: &CancelSignal) -> MirrorResult {
        if let Err(e) = self.store.prepare(key) {
            return MirrorResult::failed(MirrorError::Filesystem(e));
        }
        if cancel.is_cancelled() {
            return MirrorResult::failed(MirrorError::Cancelled);
        }

        let fetched = tokio::select! {
            fetched = self.fetcher.fetch(&request.source_url, self.config.document_limits()) => fetched,
            _ = cancel.cancelled() => return MirrorResult::failed(MirrorError::Cancelled),
        };
        let document = match fetched {
            Ok(document) => document,
            Err(e) => return MirrorResult::failed(MirrorError::Fetch(e)),
        };

        // Raw copy first so an interrupted mirror still leaves a usable page
        let html_path = match self.store.write_document(key, &document) {
            Ok(path) => path,
            Err(e) => return MirrorResult::failed(MirrorError::Filesystem(e)),
        };

        let scan = HtmlRewriter::new(&request.source_url).scan(&document);
        debug!(
            "Found {} asset references ({} unresolved) with base {}",
            scan.references.len(),
            scan.unresolved.len(),
            scan.base_url
        );
        self.emit(&MirrorEvent::DocumentFetched {
            bytes: document.len(),
            assets: scan.references.len(),
        });

        let assets = self.fetch_assets(key, scan.references, cancel).await;

        let mut error = None;
        if assets.iter().any(|a| a.reference.local_relative_path.is_some()) {
            let references: Vec<AssetReference> =
                assets.iter().map(|a| a.reference.clone()).collect();
            let rewritten = HtmlRewriter::apply(&document, &references);
            if let Err(e) = self.store.write_document(key, &rewritten) {
                error = Some(MirrorError::Filesystem(e));
            }
        }
        if error.is_none() && cancel.is_cancelled() {
            error = Some(MirrorError::Cancelled);
        }

        MirrorResult {
            success: error.is_none(),
            html_path: Some(html_path),
            assets,
            unresolved: scan.unresolved,
            error,
        }
    }

    /// Fetches every distinct local file once; references sharing a file share its outcome.
    ///
    /// Every reference gets exactly one [`MirrorEvent::AssetFinished`].
    async fn fetch_assets(
        &self,
        key: &CacheKey,
        references: Vec<AssetReference>,
        cancel: &CancelSignal,
    ) -> Vec<AssetRecord> {
        let paths: Vec<PathBuf> = references
            .iter()
            .map(|r| local_path_for(self.store.root(), key, r.asset_class, &r.resolved_url))
            .collect();

        let mut owners: HashMap<&PathBuf, usize> = HashMap::new();
        let mut jobs = Vec::new();
        for (index, path) in paths.iter().enumerate() {
            if let Entry::Vacant(slot) = owners.entry(path) {
                slot.insert(index);
                jobs.push(index);
            }
        }

        let outcomes: HashMap<usize, AssetOutcome> = stream::iter(jobs)
            .map(|index| {
                let reference = &references[index];
                let path = &paths[index];
                async move { (index, self.fetch_asset(reference, path, cancel).await) }
            })
            .buffered(self.config.max_concurrent_assets.max(1))
            .collect()
            .await;

        references
            .iter()
            .enumerate()
            .map(|(index, reference)| {
                let owner = owners.get(&paths[index]).copied().unwrap_or(index);
                let outcome = match outcomes.get(&owner) {
                    Some(outcome) if owner == index => outcome.clone(),
                    Some(AssetOutcome::Failed { error }) => AssetOutcome::Failed {
                        error: error.clone(),
                    },
                    Some(_) => AssetOutcome::Reused,
                    None => AssetOutcome::Failed {
                        error: AssetFailure::Cancelled,
                    },
                };
                if owner != index {
                    self.emit(&MirrorEvent::AssetFinished {
                        url: reference.resolved_url.clone(),
                        outcome: outcome.clone(),
                    });
                }

                let mut reference = reference.clone();
                if outcome.is_available() {
                    reference.local_relative_path =
                        Some(relative_path_for(reference.asset_class, &reference.resolved_url));
                }
                AssetRecord { reference, outcome }
            })
            .collect()
    }

    async fn fetch_asset(
        &self,
        reference: &AssetReference,
        path: &Path,
        cancel: &CancelSignal,
    ) -> AssetOutcome {
        let url = &reference.resolved_url;
        let outcome = self.download(url, path, cancel).await;

        match &outcome {
            AssetOutcome::Failed { error } => warn!("Failed to mirror asset {}: {}", url, error),
            AssetOutcome::Reused => debug!("Reusing cached {} for {}", path.display(), url),
            AssetOutcome::Fetched { .. } => debug!("Mirrored asset {} -> {}", url, path.display()),
        }

        self.emit(&MirrorEvent::AssetFinished {
            url: url.clone(),
            outcome: outcome.clone(),
        });
        outcome
    }

    async fn download(&self, url: &Url, path: &Path, cancel: &CancelSignal) -> AssetOutcome {
        if cancel.is_cancelled() {
            return AssetOutcome::Failed {
                error: AssetFailure::Cancelled,
            };
        }
        if self.store.asset_exists(path) {
            return AssetOutcome::Reused;
        }

        self.emit(&MirrorEvent::AssetStarted { url: url.clone() });

        let fetched = tokio::select! {
            fetched = self.fetcher.fetch(url, self.config.asset_limits()) => fetched,
            _ = cancel.cancelled() => {
                return AssetOutcome::Failed {
                    error: AssetFailure::Cancelled,
                }
            }
        };

        match fetched {
            Ok(body) => match self.store.write_asset(path, &body) {
                Ok(()) => AssetOutcome::Fetched {
                    bytes: body.len() as u64,
                },
                Err(e) => AssetOutcome::Failed {
                    error: AssetFailure::Filesystem(e),
                },
            },
            Err(e) => AssetOutcome::Failed {
                error: AssetFailure::Fetch(e),
            },
        }
    }

    fn lock_for(&self, key: &CacheKey) -> Arc<AsyncMutex<()>> {
        let mut locks = self.key_locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(key.clone()).or_default().clone()
    }

    fn prune_locks(&self) {
        let mut locks = self.key_locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    fn emit(&self, event: &MirrorEvent) {
        if let Some(progress) = &self.progress {
            progress(event);
        }
    }
}
