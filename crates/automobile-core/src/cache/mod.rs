//! Observation Cache (§4.6 Module F).
//!
//! The hard core: turns a raw screenshot + view-hierarchy dump into a cached
//! [`Observation`], keyed by the foreground app/activity fingerprint, short
//! circuiting a fresh dump whenever the new screenshot is near-identical to
//! the one already cached for that fingerprint.

pub mod phash;
pub mod pixelmatch;

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::CoreError;
use crate::probe::WindowProbe;
use crate::runner::CommandRunner;
use crate::screenshot::ScreenshotPipeline;
use crate::types::{ActiveWindow, Device, Tree};
use crate::view_tree::ViewHierarchyDump;
use crate::wda::WdaHost;

use phash::PerceptualHash;

const MAX_IN_MEMORY_ENTRIES: usize = 50;
const MAX_ON_DISK_BYTES: u64 = 128 * 1024 * 1024;
const TREE_TTL: Duration = Duration::from_secs(60);
const SCREENSHOT_TTL: Duration = Duration::from_secs(600);
const PIXELMATCH_THRESHOLD: f64 = 0.1;
const PIXELMATCH_MIN_SIMILARITY: f64 = 0.998;

/// Opaque key derived from `"{app_id}||{activity}"` via SHA-256 (§4.6 step 2).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(window: &ActiveWindow) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(window.fingerprint_source().as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A cached screenshot + view tree for one fingerprint, with independent
/// TTLs on each half (§4.6 step 7).
struct CacheEntry {
    hash: PerceptualHash,
    screenshot: Vec<u8>,
    screenshot_path: Option<PathBuf>,
    screenshot_stamp: Instant,
    tree: Tree,
    tree_stamp: Instant,
}

impl CacheEntry {
    fn tree_fresh(&self) -> bool {
        self.tree_stamp.elapsed() < TREE_TTL
    }

    fn screenshot_fresh(&self) -> bool {
        self.screenshot_stamp.elapsed() < SCREENSHOT_TTL
    }
}

/// A resolved observation: the view tree, the active window it was taken
/// against, and whether it came from cache or a fresh dump.
#[derive(Debug, Clone)]
pub struct Observation {
    pub active_window: ActiveWindow,
    pub tree: Tree,
    pub screenshot: Vec<u8>,
    pub from_cache: bool,
}

pub struct ObservationCache {
    runner: Arc<dyn CommandRunner>,
    probe: WindowProbe,
    view_tree: ViewHierarchyDump,
    screenshots: ScreenshotPipeline,
    disk_dir: PathBuf,
    entries: Mutex<LruCache<Fingerprint, CacheEntry>>,
    build_locks: Mutex<HashMap<Fingerprint, Arc<Mutex<()>>>>,
}

impl ObservationCache {
    pub fn new(runner: Arc<dyn CommandRunner>, disk_dir: PathBuf) -> Self {
        Self {
            probe: WindowProbe::new(runner.clone()),
            view_tree: ViewHierarchyDump::new(runner.clone()),
            screenshots: ScreenshotPipeline::new(runner.clone()),
            runner,
            disk_dir,
            entries: Mutex::new(LruCache::new(
                NonZeroUsize::new(MAX_IN_MEMORY_ENTRIES).unwrap(),
            )),
            build_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the current observation for `device`, reusing a cached
    /// screenshot/tree whenever the new screenshot is judged identical to
    /// the one already on file for the active window's fingerprint (§4.6).
    pub async fn observe(
        &self,
        device: &Device,
        wda: Option<&WdaHost>,
    ) -> Result<Observation, CoreError> {
        let active_window = self.probe.get_active(device, wda).await?;
        let fingerprint = Fingerprint::of(&active_window);

        let lock = self.build_lock_for(&fingerprint).await;
        let _guard = lock.lock().await;

        let screenshot = self.screenshots.capture(device, wda).await?;
        let image = image::load_from_memory(&screenshot)
            .map_err(|e| CoreError::ViewHierarchyParse(format!("invalid screenshot bytes: {e}")))?;
        let hash = PerceptualHash::compute(&image);

        if let Some(observation) = self
            .try_reuse(&fingerprint, &active_window, &screenshot, &image, &hash)
            .await?
        {
            return Ok(observation);
        }

        self.build_fresh(device, wda, fingerprint, active_window, screenshot, hash)
            .await
    }

    async fn build_lock_for(&self, fingerprint: &Fingerprint) -> Arc<Mutex<()>> {
        let mut locks = self.build_locks.lock().await;
        locks
            .entry(fingerprint.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Attempts to answer from cache without a fresh dump: a hit requires
    /// both the cached tree to be within its TTL and the new screenshot to
    /// pixel-match the cached one at `>= 99.8%` similarity (§4.6 step 3).
    async fn try_reuse(
        &self,
        fingerprint: &Fingerprint,
        active_window: &ActiveWindow,
        new_screenshot: &[u8],
        new_image: &image::DynamicImage,
        new_hash: &PerceptualHash,
    ) -> Result<Option<Observation>, CoreError> {
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get(fingerprint) else {
            return Ok(None);
        };
        if !entry.tree_fresh() || !entry.screenshot_fresh() {
            return Ok(None);
        }
        if entry.hash.similarity(new_hash) < PIXELMATCH_MIN_SIMILARITY - 0.10 {
            return Ok(None);
        }
        let cached_image = image::load_from_memory(&entry.screenshot)
            .map_err(|e| CoreError::ViewHierarchyParse(format!("invalid cached screenshot: {e}")))?;
        let similarity = pixelmatch::similarity(new_image, &cached_image, PIXELMATCH_THRESHOLD);
        if similarity < PIXELMATCH_MIN_SIMILARITY {
            return Ok(None);
        }

        debug!(fingerprint = %fingerprint.as_str(), similarity, "observation cache hit");
        Ok(Some(Observation {
            active_window: active_window.clone(),
            tree: entry.tree.clone(),
            screenshot: new_screenshot.to_vec(),
            from_cache: true,
        }))
    }

    async fn build_fresh(
        &self,
        device: &Device,
        wda: Option<&WdaHost>,
        fingerprint: Fingerprint,
        active_window: ActiveWindow,
        screenshot: Vec<u8>,
        hash: PerceptualHash,
    ) -> Result<Observation, CoreError> {
        let tree = match device.platform {
            crate::types::Platform::Android => self.view_tree.dump_android(device).await?,
            crate::types::Platform::Ios => {
                let wda = wda.ok_or_else(|| CoreError::DeviceNotReady {
                    reason: "iOS view-hierarchy dump requires a running WebDriverAgent host".into(),
                })?;
                self.view_tree.dump_ios(wda).await?
            }
        };

        let screenshot_path = self
            .persist_to_disk(&fingerprint, &screenshot)
            .await
            .ok();

        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        entries.put(
            fingerprint,
            CacheEntry {
                hash,
                screenshot: screenshot.clone(),
                screenshot_path,
                screenshot_stamp: now,
                tree: tree.clone(),
                tree_stamp: now,
            },
        );
        drop(entries);
        self.evict_disk_if_over_cap().await;

        Ok(Observation {
            active_window,
            tree,
            screenshot,
            from_cache: false,
        })
    }

    async fn persist_to_disk(
        &self,
        fingerprint: &Fingerprint,
        screenshot: &[u8],
    ) -> Result<PathBuf, CoreError> {
        tokio::fs::create_dir_all(&self.disk_dir)
            .await
            .map_err(|source| CoreError::io(&self.disk_dir, source))?;
        let path = self.disk_dir.join(format!("{}.png", fingerprint.as_str()));
        tokio::fs::write(&path, screenshot)
            .await
            .map_err(|source| CoreError::io(&path, source))?;
        Ok(path)
    }

    /// Deletes the oldest-by-mtime on-disk screenshots until the directory's
    /// total size falls back under the 128 MiB cap (§4.6 step 6).
    async fn evict_disk_if_over_cap(&self) {
        let mut files = match tokio::fs::read_dir(&self.disk_dir).await {
            Ok(mut read_dir) => {
                let mut files = Vec::new();
                while let Ok(Some(entry)) = read_dir.next_entry().await {
                    if let Ok(metadata) = entry.metadata().await {
                        if let Ok(modified) = metadata.modified() {
                            files.push((entry.path(), metadata.len(), modified));
                        }
                    }
                }
                files
            }
            Err(_) => return,
        };

        let mut total: u64 = files.iter().map(|(_, len, _)| *len).sum();
        if total <= MAX_ON_DISK_BYTES {
            return;
        }

        files.sort_by_key(|(_, _, modified)| *modified);
        for (path, len, _) in files {
            if total <= MAX_ON_DISK_BYTES {
                break;
            }
            if tokio::fs::remove_file(&path).await.is_ok() {
                total = total.saturating_sub(len);
            }
        }
    }
}
