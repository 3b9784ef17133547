use crate::media::decode::{DecodeError, DecodeResult, DecodedImage, MediaDecoder};
use crate::memory::ledger::{LedgerEntry, MemoryLedger};
use crate::memory::monitor::Evictable;
use crate::timeline::model::{MediaItem, MediaKind};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Default bound on a single video seek.
pub const DEFAULT_SEEK_TIMEOUT: Duration = Duration::from_secs(5);
/// Default number of decoded video frames kept across all sources.
pub const DEFAULT_VIDEO_FRAME_CAPACITY: usize = 64;

/// Decoded media for one export run.
///
/// Every cached image holds a [`LedgerEntry`], so evicting or dropping the cache returns the
/// ledger to the value it had before the cache was filled.
pub struct MediaCache {
    decoder: Arc<dyn MediaDecoder>,
    ledger: Arc<MemoryLedger>,
    seek_timeout: Duration,
    video_capacity: usize,
    inner: Mutex<CacheInner>,
}

struct Cached {
    image: DecodedImage,
    _entry: LedgerEntry,
}

#[derive(Default)]
struct CacheInner {
    images: HashMap<String, Cached>,
    frames: HashMap<(String, u64), Cached>,
    lru: VecDeque<(String, u64)>,
    /// Most recent successfully decoded frame per video source.
    last_good: HashMap<String, Cached>,
}

impl CacheInner {
    fn touch(&mut self, key: &(String, u64)) {
        if let Some(pos) = self.lru.iter().position(|k| k == key) {
            self.lru.remove(pos);
        }
        self.lru.push_back(key.clone());
    }

    fn drop_oldest_frames(&mut self, keep: usize) -> u64 {
        let mut freed = 0;
        while self.lru.len() > keep {
            let Some(old) = self.lru.pop_front() else {
                break;
            };
            if let Some(c) = self.frames.remove(&old) {
                freed += c.image.byte_len();
            }
        }
        freed
    }

    fn handles(&self) -> usize {
        self.images.len() + self.frames.len() + self.last_good.len()
    }
}

impl MediaCache {
    pub fn new(decoder: Arc<dyn MediaDecoder>, ledger: Arc<MemoryLedger>) -> Self {
        Self {
            decoder,
            ledger,
            seek_timeout: DEFAULT_SEEK_TIMEOUT,
            video_capacity: DEFAULT_VIDEO_FRAME_CAPACITY,
            inner: Mutex::new(CacheInner::default()),
        }
    }

    pub fn with_seek_timeout(mut self, timeout: Duration) -> Self {
        self.seek_timeout = timeout;
        self
    }

    pub fn with_video_capacity(mut self, frames: usize) -> Self {
        self.video_capacity = frames.max(1);
        self
    }

    pub fn seek_timeout(&self) -> Duration {
        self.seek_timeout
    }

    // Entries are plain values; a panic mid-insert cannot leave a half-written map.
    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn retain(&self, image: DecodedImage) -> Cached {
        let entry = self.ledger.retain(image.byte_len());
        Cached {
            image,
            _entry: entry,
        }
    }

    /// Decoded still for `item`, decoding on first use.
    pub fn image(&self, item: &MediaItem) -> DecodeResult<DecodedImage> {
        if let Some(c) = self.lock().images.get(&item.id) {
            return Ok(c.image.clone());
        }
        // Decode outside the lock so parallel workers do not serialize on it.
        let image = self.decoder.decode_image(item)?;
        let cached = self.retain(image.clone());
        self.lock().images.entry(item.id.clone()).or_insert(cached);
        Ok(image)
    }

    /// Frame of video `item` at `source_time` seconds.
    ///
    /// A seek that times out falls back to the last good frame of the same source; without
    /// one the timeout is returned.
    pub fn video_frame(&self, item: &MediaItem, source_time: f64) -> DecodeResult<DecodedImage> {
        let key = (item.id.clone(), frame_key(source_time));
        {
            let mut inner = self.lock();
            if let Some(img) = inner.frames.get(&key).map(|c| c.image.clone()) {
                inner.touch(&key);
                return Ok(img);
            }
        }

        match self
            .decoder
            .decode_video_frame(item, source_time, self.seek_timeout)
        {
            Ok(image) => {
                let cached = self.retain(image.clone());
                let last = self.retain(image.clone());
                let mut inner = self.lock();
                inner.frames.insert(key.clone(), cached);
                inner.touch(&key);
                inner.last_good.insert(item.id.clone(), last);
                let cap = self.video_capacity;
                inner.drop_oldest_frames(cap);
                Ok(image)
            }
            Err(DecodeError::Timeout(waited)) => {
                let fallback = self.lock().last_good.get(&item.id).map(|c| c.image.clone());
                match fallback {
                    Some(image) => {
                        tracing::warn!(
                            media_id = %item.id,
                            source_time,
                            ?waited,
                            "video seek timed out, reusing last good frame"
                        );
                        Ok(image)
                    }
                    None => Err(DecodeError::Timeout(waited)),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Decode every still in `items` ahead of the frame loop. Returns how many were decoded.
    pub fn preload<'a>(&self, items: impl IntoIterator<Item = &'a MediaItem>) -> DecodeResult<usize> {
        let mut n = 0;
        for item in items {
            if item.kind == MediaKind::Image {
                self.image(item)?;
                n += 1;
            }
        }
        Ok(n)
    }

    /// Number of decoded images currently retained.
    pub fn handle_count(&self) -> usize {
        self.lock().handles()
    }
}

impl Evictable for MediaCache {
    /// Halve the video frame window; stills and last good frames stay.
    fn trim(&self) -> u64 {
        let mut inner = self.lock();
        let keep = inner.lru.len() / 2;
        let freed = inner.drop_oldest_frames(keep);
        if freed > 0 {
            tracing::debug!(freed, remaining = inner.lru.len(), "media cache trimmed");
        }
        freed
    }

    fn evict_all(&self) -> u64 {
        let mut inner = self.lock();
        let freed = inner
            .images
            .values()
            .chain(inner.frames.values())
            .chain(inner.last_good.values())
            .map(|c| c.image.byte_len())
            .sum();
        *inner = CacheInner::default();
        tracing::debug!(freed, "media cache evicted");
        freed
    }
}

impl std::fmt::Debug for MediaCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaCache")
            .field("handles", &self.handle_count())
            .field("seek_timeout", &self.seek_timeout)
            .field("video_capacity", &self.video_capacity)
            .finish()
    }
}

fn frame_key(source_time: f64) -> u64 {
    (source_time.max(0.0) * 1000.0).round() as u64
}

#[cfg(test)]
#[path = "../../tests/unit/media/cache.rs"]
mod tests;
