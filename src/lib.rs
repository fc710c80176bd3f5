pub mod cache_path;
pub mod cache_store;
pub mod cli;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod html_rewriter;
pub mod mirror;
pub mod url_resolver;

// Re-export main types for convenience
pub use cache_path::{key_for, AssetClass, CacheKey};
pub use cache_store::{CacheEntry, CacheInfo, CacheStore};
pub use cli::{Cli, Command};
pub use config::MirrorConfig;
pub use error::{Error, FetchError, FilesystemError, MirrorError, ResolutionError, Result};
pub use fetcher::{ContentFetcher, FetchLimits, HttpFetcher};
pub use html_rewriter::{AssetReference, HtmlRewriter, Scan, UnresolvedReference};
pub use mirror::{
    AssetFailure, AssetOutcome, AssetRecord, CancelHandle, CancelSignal, MirrorEvent,
    MirrorRequest, MirrorResult, PageMirror,
};
