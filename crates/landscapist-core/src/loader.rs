//! Image Loader
//!
//! Drives one request through memory cache, disk cache, fetcher, scheduled
//! decode and transformations, emitting [`ImageResult`] states as it goes.

use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use landscapist_image::{
    Bitmap, BitmapPool, DecodeError, ImageDecoder, NoopBitmapPool, ProgressiveFrame, ProgressiveFrames,
    RasterDecoder, RasterRegionDecoder, Transformation, apply_all, format,
};
use landscapist_net::{CompositeFetcher, DataSource, FetchedData};
use smol::channel::Sender;
use smol::stream::{Stream, StreamExt};

use crate::{
    CacheKey, CachedImage, DecodeScheduler, DecodeToken, DiskCache, Disposable, FileDiskCache, ImageRequest, ImageResult,
    ImmediateDisposable, LandscapistConfig, LandscapistError, MemoryCache, RequestManager, SchedulerError,
};

/// Stream of states for one load, plus the handle that cancels it
///
/// Ends after the terminal state, or without one when cancelled.
pub struct ImageLoad {
    states: Pin<Box<dyn Stream<Item = ImageResult> + Send>>,
    disposable: Arc<dyn Disposable>,
}

impl ImageLoad {
    pub fn disposable(&self) -> Arc<dyn Disposable> {
        Arc::clone(&self.disposable)
    }

    /// Cancel the load
    pub fn dispose(&self) {
        self.disposable.dispose();
    }
}

impl Stream for ImageLoad {
    type Item = ImageResult;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.states.as_mut().poll_next(cx)
    }
}

/// Image loading pipeline
///
/// Cheap to clone; clones share caches, scheduler and request manager.
#[derive(Clone)]
pub struct ImageLoader {
    inner: Arc<Inner>,
}

struct Inner {
    config: LandscapistConfig,
    memory_cache: Arc<MemoryCache>,
    disk_cache: Option<Arc<dyn DiskCache>>,
    fetcher: Arc<CompositeFetcher>,
    decoder: Arc<dyn ImageDecoder>,
    bitmap_pool: Arc<dyn BitmapPool>,
    scheduler: DecodeScheduler,
    requests: RequestManager,
    next_decode: AtomicU64,
}

/// Builder for [`ImageLoader`]; unset parts are built from the config
pub struct ImageLoaderBuilder {
    config: LandscapistConfig,
    memory_cache: Option<Arc<MemoryCache>>,
    disk_cache: Option<Arc<dyn DiskCache>>,
    fetcher: Option<CompositeFetcher>,
    decoder: Option<Arc<dyn ImageDecoder>>,
    bitmap_pool: Option<Arc<dyn BitmapPool>>,
    scheduler: Option<DecodeScheduler>,
}

impl ImageLoaderBuilder {
    pub fn memory_cache(mut self, cache: Arc<MemoryCache>) -> Self {
        self.memory_cache = Some(cache);
        self
    }

    pub fn disk_cache(mut self, cache: Arc<dyn DiskCache>) -> Self {
        self.disk_cache = Some(cache);
        self
    }

    pub fn fetcher(mut self, fetcher: CompositeFetcher) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn decoder(mut self, decoder: Arc<dyn ImageDecoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    pub fn bitmap_pool(mut self, pool: Arc<dyn BitmapPool>) -> Self {
        self.bitmap_pool = Some(pool);
        self
    }

    pub fn scheduler(mut self, scheduler: DecodeScheduler) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn build(self) -> Result<ImageLoader, LandscapistError> {
        let config = self.config;

        let memory_cache = self
            .memory_cache
            .unwrap_or_else(|| Arc::new(MemoryCache::new(config.memory_cache_size, config.weak_references_enabled)));

        let disk_cache = match (self.disk_cache, &config.disk_cache_dir) {
            (Some(cache), _) => Some(cache),
            (None, Some(dir)) => Some(Arc::new(FileDiskCache::open(dir, config.disk_cache_size)?) as Arc<dyn DiskCache>),
            (None, None) => None,
        };

        let fetcher = match self.fetcher {
            Some(fetcher) => fetcher,
            None => CompositeFetcher::with_defaults(&config.network)?,
        };

        let scheduler = self
            .scheduler
            .unwrap_or_else(|| DecodeScheduler::new(config.decode_parallelism));

        tracing::info!(
            "Image loader ready (memory {} bytes, disk {}, {} decode permits)",
            memory_cache.max_size(),
            if disk_cache.is_some() { "enabled" } else { "disabled" },
            scheduler.parallelism()
        );

        Ok(ImageLoader {
            inner: Arc::new(Inner {
                memory_cache,
                disk_cache,
                fetcher: Arc::new(fetcher),
                decoder: self.decoder.unwrap_or_else(|| Arc::new(RasterDecoder::new())),
                bitmap_pool: self.bitmap_pool.unwrap_or_else(|| Arc::new(NoopBitmapPool)),
                scheduler,
                requests: RequestManager::new(),
                next_decode: AtomicU64::new(1),
                config,
            }),
        })
    }
}

impl ImageLoader {
    pub fn new(config: LandscapistConfig) -> Result<Self, LandscapistError> {
        Self::builder(config).build()
    }

    pub fn builder(config: LandscapistConfig) -> ImageLoaderBuilder {
        ImageLoaderBuilder {
            config,
            memory_cache: None,
            disk_cache: None,
            fetcher: None,
            decoder: None,
            bitmap_pool: None,
            scheduler: None,
        }
    }

    /// Start loading `request`
    pub fn load(&self, request: ImageRequest) -> ImageLoad {
        let key = request.cache_key();

        if request.memory_cache_policy().read_enabled() {
            if let Some(cached) = self.inner.memory_cache.get(&key) {
                tracing::debug!("Memory cache hit for {}", key);
                let states = vec![
                    ImageResult::Loading,
                    ImageResult::Success {
                        bitmap: cached.bitmap,
                        data_source: DataSource::Memory,
                        original_width: cached.original_width,
                        original_height: cached.original_height,
                        raw_data: None,
                        disk_cache_path: None,
                        is_intermediate: false,
                        progress: 1.0,
                    },
                ];
                return ImageLoad {
                    states: Box::pin(smol::stream::iter(states)),
                    disposable: Arc::new(ImmediateDisposable),
                };
            }
        }

        let (tx, rx) = smol::channel::unbounded();
        let tag = request.tag().map(str::to_string);
        let model = request.model().clone();
        let inner = Arc::clone(&self.inner);

        let disposable = self.inner.requests.register(
            async move { inner.run(request, key, tx).await },
            tag,
            Some(model),
        );

        ImageLoad {
            states: Box::pin(rx),
            disposable: Arc::new(disposable),
        }
    }

    /// Load `request` and return its terminal state
    pub async fn execute(&self, request: ImageRequest) -> ImageResult {
        let mut load = self.load(request);
        let mut last = None;
        while let Some(state) = load.next().await {
            last = Some(state);
        }
        match last {
            Some(state) if state.is_terminal() => state,
            _ => ImageResult::Failure { error: None, message: Some("Request was cancelled".to_string()) },
        }
    }

    /// Fetch the encoded bytes behind `request` and open a region decoder
    /// over them, drawing output buffers from the loader's pool
    pub async fn region_decoder(&self, request: &ImageRequest) -> Result<RasterRegionDecoder, LandscapistError> {
        let key = request.cache_key();
        let cached = match (&self.inner.disk_cache, request.disk_cache_policy().read_enabled()) {
            (Some(disk), true) => {
                let disk = Arc::clone(disk);
                let lookup = key.clone();
                smol::unblock(move || disk.get(&lookup)).await
            }
            _ => None,
        };

        let data = match cached {
            Some(data) => data,
            None => match self.inner.fetcher.fetch(&request.fetch_request()).await?.data {
                FetchedData::Encoded(data) => data,
                FetchedData::Decoded(_) => return Err(DecodeError::UnsupportedFormat.into()),
            },
        };

        let pool = Arc::clone(&self.inner.bitmap_pool);
        let max_bitmap_size = self.inner.config.max_bitmap_size;
        let decoder = smol::unblock(move || RasterRegionDecoder::new(data, pool)).await?;
        Ok(decoder.with_max_bitmap_size(max_bitmap_size))
    }

    pub fn clear_memory_cache(&self) {
        self.inner.memory_cache.clear();
    }

    pub fn clear_disk_cache(&self) {
        if let Some(disk) = &self.inner.disk_cache {
            disk.clear();
        }
    }

    pub fn memory_cache(&self) -> &Arc<MemoryCache> {
        &self.inner.memory_cache
    }

    pub fn disk_cache(&self) -> Option<&Arc<dyn DiskCache>> {
        self.inner.disk_cache.as_ref()
    }

    pub fn bitmap_pool(&self) -> &Arc<dyn BitmapPool> {
        &self.inner.bitmap_pool
    }

    pub fn scheduler(&self) -> &DecodeScheduler {
        &self.inner.scheduler
    }

    pub fn request_manager(&self) -> &RequestManager {
        &self.inner.requests
    }

    pub fn config(&self) -> &LandscapistConfig {
        &self.inner.config
    }
}

/// Encoded bytes ready for decoding, with where they came from
struct Source {
    data: Arc<[u8]>,
    mime_type: Option<String>,
    data_source: DataSource,
    disk_cache_path: Option<PathBuf>,
}

impl Inner {
    async fn run(self: Arc<Self>, request: ImageRequest, key: CacheKey, tx: Sender<ImageResult>) {
        let _ = tx.try_send(ImageResult::Loading);

        match self.pipeline(&request, &key, &tx).await {
            Ok(()) => {}
            Err(err) if err.is_cancelled() => {
                tracing::debug!("Load of {} cancelled", key);
            }
            Err(err) => {
                tracing::warn!("Load of {} failed: {}", key, err);
                let _ = tx.try_send(ImageResult::failure(err));
            }
        }
    }

    async fn pipeline(
        &self,
        request: &ImageRequest,
        key: &CacheKey,
        tx: &Sender<ImageResult>,
    ) -> Result<(), LandscapistError> {
        if let Some(source) = self.read_disk(request, key).await {
            match self.decode(request, key, &source, tx).await {
                Ok(()) => return Ok(()),
                Err(LandscapistError::Decode(err)) => {
                    // Unreadable entry; drop it and refetch
                    tracing::warn!("Discarding disk cache entry for {}: {}", key, err);
                    if let Some(disk) = &self.disk_cache {
                        disk.remove(key);
                    }
                }
                Err(err) => return Err(err),
            }
        }

        tracing::debug!("Fetching {:?}", request.model());
        let fetched = self.fetcher.fetch(&request.fetch_request()).await?;

        match fetched.data {
            FetchedData::Decoded(bitmap) => self.deliver_bitmap(request, key, bitmap, fetched.data_source, tx).await,
            FetchedData::Encoded(data) => {
                let disk_cache_path = match fetched.data_source {
                    DataSource::Network => self.write_disk(request, key, &data).await,
                    _ => None,
                };
                let source = Source {
                    data: data.into(),
                    mime_type: fetched.mime_type,
                    data_source: fetched.data_source,
                    disk_cache_path,
                };
                self.decode(request, key, &source, tx).await
            }
        }
    }

    async fn read_disk(&self, request: &ImageRequest, key: &CacheKey) -> Option<Source> {
        if !request.disk_cache_policy().read_enabled() {
            return None;
        }
        let disk = Arc::clone(self.disk_cache.as_ref()?);
        let key = key.clone();

        smol::unblock(move || {
            let data = disk.get(&key)?;
            tracing::debug!("Disk cache hit for {}", key);
            Some(Source {
                data: data.into(),
                mime_type: None,
                data_source: DataSource::Disk,
                disk_cache_path: disk.path(&key),
            })
        })
        .await
    }

    async fn write_disk(&self, request: &ImageRequest, key: &CacheKey, data: &[u8]) -> Option<PathBuf> {
        if !request.disk_cache_policy().write_enabled() {
            return None;
        }
        let disk = Arc::clone(self.disk_cache.as_ref()?);
        let key = key.clone();
        let data = data.to_vec();

        smol::unblock(move || match disk.put(&key, &data) {
            Ok(()) => disk.path(&key),
            Err(err) => {
                tracing::warn!("Disk cache write failed: {}", err);
                None
            }
        })
        .await
    }

    /// Transform an already-decoded bitmap and deliver it
    async fn deliver_bitmap(
        &self,
        request: &ImageRequest,
        key: &CacheKey,
        bitmap: Arc<Bitmap>,
        data_source: DataSource,
        tx: &Sender<ImageResult>,
    ) -> Result<(), LandscapistError> {
        let (original_width, original_height) = (bitmap.width(), bitmap.height());
        let transformations = request.transformations().to_vec();
        let bitmap = if transformations.is_empty() {
            bitmap
        } else {
            let source = Arc::clone(&bitmap);
            Arc::new(smol::unblock(move || apply_all(Bitmap::clone(&source), &transformations)).await)
        };

        self.cache_in_memory(request, key, &bitmap, data_source, (original_width, original_height));
        let _ = tx.try_send(ImageResult::Success {
            bitmap,
            data_source,
            original_width,
            original_height,
            raw_data: None,
            disk_cache_path: None,
            is_intermediate: false,
            progress: 1.0,
        });
        Ok(())
    }

    /// Decode on the scheduler, streaming progressive frames as they arrive
    async fn decode(
        &self,
        request: &ImageRequest,
        key: &CacheKey,
        source: &Source,
        tx: &Sender<ImageResult>,
    ) -> Result<(), LandscapistError> {
        let (frame_tx, frame_rx) = smol::channel::unbounded::<ProgressiveFrame>();
        let decoder = Arc::clone(&self.decoder);
        let transformations = request.transformations().to_vec();
        let data = Arc::clone(&source.data);
        let mime_type = source.mime_type.clone();
        let (target_width, target_height) = (request.target_width(), request.target_height());
        let config = self.config.decode_config();
        let progressive = request.progressive();

        // The blocking decode starts only once the scheduler admits it. The
        // token rides into the blocking closure so the permit is held until
        // the decoder actually returns.
        let work = move |token: DecodeToken| async move {
            smol::unblock(move || {
                let frames = if progressive {
                    decoder.decode_progressive(data.to_vec(), mime_type, target_width, target_height, config)
                } else {
                    ProgressiveFrames::single(decoder.decode(
                        &data,
                        mime_type.as_deref(),
                        target_width,
                        target_height,
                        &config,
                    ))
                };
                for frame in frames {
                    if token.is_cancelled() {
                        tracing::debug!("Stopped cancelled decode {}", token.id());
                        break;
                    }
                    let frame = transform_frame(frame, &transformations);
                    if token.is_cancelled() || frame_tx.send_blocking(frame).is_err() {
                        break;
                    }
                }
            })
            .await
        };

        let id = format!("{}@{}", key, self.next_decode.fetch_add(1, Ordering::Relaxed));
        let handle = self
            .scheduler
            .schedule_with(id, request.priority(), request.tag().map(str::to_string), work);

        let header_size = format::read_dimensions(&source.data);
        let mut delivered = false;
        while let Ok(frame) = frame_rx.recv().await {
            if handle.is_cancelled() {
                return Err(SchedulerError::Cancelled(handle.id().to_string()).into());
            }
            match frame {
                ProgressiveFrame::Intermediate { bitmap, width, height, progress, .. } => {
                    let (original_width, original_height) = header_size.unwrap_or((width, height));
                    let _ = tx.try_send(ImageResult::Success {
                        bitmap: Arc::new(bitmap),
                        data_source: source.data_source,
                        original_width,
                        original_height,
                        raw_data: None,
                        disk_cache_path: source.disk_cache_path.clone(),
                        is_intermediate: true,
                        progress,
                    });
                }
                ProgressiveFrame::Complete { bitmap, original_width, original_height, .. } => {
                    let bitmap = Arc::new(bitmap);
                    self.cache_in_memory(request, key, &bitmap, source.data_source, (original_width, original_height));
                    let _ = tx.try_send(ImageResult::Success {
                        bitmap,
                        data_source: source.data_source,
                        original_width,
                        original_height,
                        raw_data: Some(Arc::clone(&source.data)),
                        disk_cache_path: source.disk_cache_path.clone(),
                        is_intermediate: false,
                        progress: 1.0,
                    });
                    delivered = true;
                }
                ProgressiveFrame::Error(err) => return Err(err.into()),
            }
        }

        handle.await?;
        if delivered {
            Ok(())
        } else {
            Err(DecodeError::Decoder("decoder produced no image".to_string()).into())
        }
    }

    fn cache_in_memory(
        &self,
        request: &ImageRequest,
        key: &CacheKey,
        bitmap: &Arc<Bitmap>,
        data_source: DataSource,
        (original_width, original_height): (u32, u32),
    ) {
        if request.memory_cache_policy().write_enabled() {
            let image = CachedImage::new(Arc::clone(bitmap), data_source).with_original_size(original_width, original_height);
            self.memory_cache.set(key.clone(), image);
        }
    }
}

fn transform_frame(frame: ProgressiveFrame, transformations: &[Arc<dyn Transformation>]) -> ProgressiveFrame {
    if transformations.is_empty() {
        return frame;
    }
    match frame {
        ProgressiveFrame::Intermediate { bitmap, progress, is_preview, .. } => {
            let bitmap = apply_all(bitmap, transformations);
            ProgressiveFrame::Intermediate {
                width: bitmap.width(),
                height: bitmap.height(),
                bitmap,
                progress,
                is_preview,
            }
        }
        ProgressiveFrame::Complete { bitmap, original_width, original_height, .. } => {
            let bitmap = apply_all(bitmap, transformations);
            ProgressiveFrame::Complete {
                width: bitmap.width(),
                height: bitmap.height(),
                bitmap,
                original_width,
                original_height,
            }
        }
        error => error,
    }
}
