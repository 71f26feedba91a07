//! Segmentation session: the explicit context object behind the CLI.
//!
//! A [`Session`] owns everything one user interaction accumulates: the
//! decoded input, the credential, the task mode, the interactive point
//! queue and the [`CompositeState`] of successive interactive runs.
//!
//! At most one operation is in flight. A second request arriving while
//! one is outstanding is dropped, not queued. Every reset bumps a
//! generation counter; a result computed against an older generation is
//! discarded instead of being written back.
//!
//! Remote inference is tried first when a credential is set. Any remote
//! failure is logged as a warning and the session falls back to the
//! local algorithm for the task:
//!
//! | Task | Local fallback |
//! |------|----------------|
//! | enhance | 3×3 sharpening |
//! | segment with points | seeded region growing |
//! | segment without points | k-means clustering |

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rand::SeedableRng;
use rand::rngs::StdRng;
use segmask_pipeline::decode::decode;
use segmask_pipeline::{
    CompositeState, CoverageMask, Dimensions, PromptPoint, RemoteSegmentation, RgbaImage,
    SegmentConfig, SegmentError,
};
use tokio::sync::Mutex;

use crate::client::RemoteClient;
use crate::export::Export;
use crate::transport::{Transport, TransportError};

/// Errors surfaced by [`Session`] operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Decoding, payload or configuration failure.
    #[error(transparent)]
    Segment(#[from] SegmentError),

    /// The remote request could not be completed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A blocking worker task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// No input image has been loaded.
    #[error("no input image loaded")]
    NoInput,

    /// Nothing has been produced yet to export.
    #[error("no result to export")]
    NoOutput,
}

/// Which task [`Session::run`] performs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TaskMode {
    /// Super-resolution enhancement.
    Enhance,
    /// Region segmentation.
    #[default]
    Segment,
}

/// Which path produced a [`Rendered`] result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultSource {
    /// The remote inference service.
    Remote,
    /// Local seeded region growing.
    LocalRegionGrow,
    /// Local k-means clustering.
    LocalClusters,
    /// Local sharpening.
    LocalSharpen,
}

/// A result written into the session.
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    /// The image to display.
    pub image: RgbaImage,
    /// Which path produced it.
    pub source: ResultSource,
}

// ───── State ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct LoadedInput {
    bytes: Arc<Vec<u8>>,
    image: Arc<RgbaImage>,
}

#[derive(Debug, Default)]
struct SessionState {
    input: Option<LoadedInput>,
    credential: Option<String>,
    mode: TaskMode,
    interactive: bool,
    points: Vec<PromptPoint>,
    composite: Option<CompositeState>,
    output: Option<RgbaImage>,
    generation: u64,
}

impl SessionState {
    /// Drop every result and invalidate in-flight operations.
    fn reset_results(&mut self) {
        self.composite = None;
        self.output = None;
        self.generation = self.generation.wrapping_add(1);
    }
}

/// What an in-flight operation works on, copied out of the lock.
struct Job {
    input: LoadedInput,
    credential: Option<String>,
    mode: TaskMode,
    interactive: bool,
    points: Vec<PromptPoint>,
    generation: u64,
}

impl Job {
    fn source(&self) -> Dimensions {
        Dimensions::of(&self.input.image)
    }
}

/// Result of an operation before it is written into the session.
enum Outcome {
    /// Shown as-is.
    Image(RgbaImage),
    /// One interactive run.
    Run(CoverageMask),
    /// Several simultaneous regions from one interactive run.
    Regions(Vec<CoverageMask>),
}

/// Holds the busy flag for the lifetime of one operation.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// ───── Session ──────────────────────────────────────────────────────

/// One segmentation/enhancement session.
#[derive(Debug)]
pub struct Session<T> {
    client: RemoteClient<T>,
    config: SegmentConfig,
    busy: AtomicBool,
    state: Mutex<SessionState>,
}

impl<T: Transport> Session<T> {
    /// Create an empty session in segment mode.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentError::InvalidConfig`] if `config` fails
    /// validation.
    pub fn new(client: RemoteClient<T>, config: SegmentConfig) -> Result<Self, SessionError> {
        config.validate()?;
        Ok(Self {
            client,
            config,
            busy: AtomicBool::new(false),
            state: Mutex::new(SessionState::default()),
        })
    }

    /// The engine configuration.
    #[must_use]
    pub const fn config(&self) -> &SegmentConfig {
        &self.config
    }

    /// Whether an operation is currently in flight.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Decode `bytes` as the new input image and reset the session.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentError::EmptyInput`] or
    /// [`SegmentError::ImageDecode`] if the bytes are not a readable
    /// image. The previous input is kept in that case.
    pub async fn load_input(&self, bytes: Vec<u8>) -> Result<Dimensions, SessionError> {
        let bytes = Arc::new(bytes);
        let image = {
            let bytes = Arc::clone(&bytes);
            tokio::task::spawn_blocking(move || decode(&bytes)).await??
        };
        let dims = Dimensions::of(&image);

        let mut state = self.state.lock().await;
        state.input = Some(LoadedInput {
            bytes,
            image: Arc::new(image),
        });
        state.points.clear();
        state.reset_results();
        tracing::info!(width = dims.width, height = dims.height, "loaded input image");
        Ok(dims)
    }

    /// Switch between enhancement and segmentation.
    ///
    /// Changing the mode clears the points and every result.
    pub async fn set_mode(&self, mode: TaskMode) {
        let mut state = self.state.lock().await;
        if state.mode != mode {
            state.mode = mode;
            state.points.clear();
            state.reset_results();
        }
    }

    /// The current task mode.
    pub async fn mode(&self) -> TaskMode {
        self.state.lock().await.mode
    }

    /// Turn click-to-segment on or off.
    ///
    /// Either way the point queue is cleared; enabling it in segment
    /// mode also restores the original image.
    pub async fn set_interactive(&self, enabled: bool) {
        let mut state = self.state.lock().await;
        state.interactive = enabled;
        state.points.clear();
        if enabled && state.mode == TaskMode::Segment {
            state.reset_results();
        }
    }

    /// Set the remote credential. Surrounding whitespace is trimmed and
    /// an empty credential clears it, forcing local processing.
    pub async fn set_credential(&self, credential: &str) {
        let trimmed = credential.trim();
        self.state.lock().await.credential = (!trimmed.is_empty()).then(|| trimmed.to_owned());
    }

    /// Whether a remote credential is set.
    pub async fn has_credential(&self) -> bool {
        self.state.lock().await.credential.is_some()
    }

    /// Queue a seed point and segment with the whole queue.
    ///
    /// The point is clamped into the input image. Points are only
    /// accepted in interactive segment mode; otherwise this is a no-op.
    /// Returns `Ok(None)` when the point was ignored, when another
    /// operation is in flight, or when the result went stale.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NoInput`] if no image is loaded, plus the
    /// errors of [`run`](Self::run).
    pub async fn add_point(&self, point: PromptPoint) -> Result<Option<Rendered>, SessionError> {
        self.add_points(&[point]).await
    }

    /// Queue several seed points and segment once with the whole queue.
    ///
    /// # Errors
    ///
    /// Same as [`add_point`](Self::add_point).
    pub async fn add_points(
        &self,
        points: &[PromptPoint],
    ) -> Result<Option<Rendered>, SessionError> {
        {
            let mut state = self.state.lock().await;
            let dims = Dimensions::of(&state.input.as_ref().ok_or(SessionError::NoInput)?.image);
            if !(state.interactive && state.mode == TaskMode::Segment) {
                tracing::debug!(
                    count = points.len(),
                    "ignoring points outside interactive segment mode"
                );
                return Ok(None);
            }
            state.points.extend(points.iter().map(|p| p.clamped(dims)));
        }
        self.run().await
    }

    /// The queued seed points.
    pub async fn points(&self) -> Vec<PromptPoint> {
        self.state.lock().await.points.clone()
    }

    /// Run the current task on the loaded input.
    ///
    /// In segment mode, interactive sessions with queued points grow
    /// regions from the points and accumulate them into the composite;
    /// otherwise the whole image is segmented automatically. Returns
    /// `Ok(None)` if another operation is in flight or the session was
    /// reset while this one ran.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NoInput`] if no image is loaded, and
    /// [`SessionError::Task`] if a local worker fails. Remote failures
    /// never surface here; they fall back to the local algorithm.
    pub async fn run(&self) -> Result<Option<Rendered>, SessionError> {
        let Some(_busy) = BusyGuard::acquire(&self.busy) else {
            tracing::debug!("operation already in flight, dropping request");
            return Ok(None);
        };
        let job = self.snapshot().await?;

        let (outcome, source) = match job.mode {
            TaskMode::Enhance => self.enhance(&job).await?,
            TaskMode::Segment if job.interactive && !job.points.is_empty() => {
                self.segment_points(&job).await?
            }
            TaskMode::Segment => self.segment_automatic(&job).await?,
        };
        Ok(self.commit(&job, outcome, source).await)
    }

    /// Clear the point queue, keeping the results.
    pub async fn reset_points(&self) {
        self.state.lock().await.points.clear();
    }

    /// Forget the points and every result, returning to the input image.
    pub async fn restore_original(&self) {
        let mut state = self.state.lock().await;
        state.points.clear();
        state.reset_results();
    }

    /// The latest rendered result, if any.
    pub async fn output(&self) -> Option<RgbaImage> {
        self.state.lock().await.output.clone()
    }

    /// Union of every interactive mask applied since the last reset.
    pub async fn union_mask(&self) -> Option<CoverageMask> {
        self.state
            .lock()
            .await
            .composite
            .as_ref()
            .map(|c| c.union_mask().clone())
    }

    /// Encode the result for download.
    ///
    /// Interactive segmentation with any coverage exports the cut-out;
    /// everything else exports the rendered output.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NoOutput`] if nothing has been rendered,
    /// or an encoding error.
    pub async fn export(&self) -> Result<Export, SessionError> {
        let state = self.state.lock().await;
        if state.mode == TaskMode::Segment
            && state.interactive
            && let Some(composite) = state.composite.as_ref().filter(|c| c.has_coverage())
        {
            return Ok(Export::cutout(composite)?);
        }
        let output = state.output.as_ref().ok_or(SessionError::NoOutput)?;
        Ok(Export::result(output)?)
    }

    // ───── Internals ────────────────────────────────────────────────

    async fn snapshot(&self) -> Result<Job, SessionError> {
        let state = self.state.lock().await;
        let input = state.input.clone().ok_or(SessionError::NoInput)?;
        Ok(Job {
            input,
            credential: state.credential.clone(),
            mode: state.mode,
            interactive: state.interactive,
            points: state.points.clone(),
            generation: state.generation,
        })
    }

    async fn enhance(&self, job: &Job) -> Result<(Outcome, ResultSource), SessionError> {
        if let Some(token) = job.credential.as_deref() {
            match self.client.enhance(token, &job.input.bytes).await {
                Ok(image) => return Ok((Outcome::Image(image), ResultSource::Remote)),
                Err(e) => tracing::warn!("remote enhancement failed, sharpening locally: {e}"),
            }
        }
        let image = Arc::clone(&job.input.image);
        let sharpened =
            tokio::task::spawn_blocking(move || segmask_pipeline::enhance_locally(&image)).await?;
        Ok((Outcome::Image(sharpened), ResultSource::LocalSharpen))
    }

    async fn segment_points(&self, job: &Job) -> Result<(Outcome, ResultSource), SessionError> {
        if let Some(remote) = self.remote_segment(job, &job.points).await {
            let outcome = match remote {
                RemoteSegmentation::Rendered(image) => Outcome::Image(image),
                RemoteSegmentation::Selected(mask) => Outcome::Run(mask),
                RemoteSegmentation::Regions(masks) => Outcome::Regions(masks),
            };
            return Ok((outcome, ResultSource::Remote));
        }

        let image = Arc::clone(&job.input.image);
        let points = job.points.clone();
        let config = self.config.clone();
        let mask = tokio::task::spawn_blocking(move || {
            segmask_pipeline::segment_points(&image, &points, &config)
        })
        .await?;
        Ok((Outcome::Run(mask), ResultSource::LocalRegionGrow))
    }

    async fn segment_automatic(&self, job: &Job) -> Result<(Outcome, ResultSource), SessionError> {
        let alpha = self.config.overlay_alpha;
        if let Some(remote) = self.remote_segment(job, &[]).await {
            let image = match remote {
                RemoteSegmentation::Rendered(image) => image,
                RemoteSegmentation::Selected(mask) => {
                    segmask_pipeline::render_regions(&job.input.image, &[mask], alpha)
                }
                RemoteSegmentation::Regions(masks) => {
                    segmask_pipeline::render_regions(&job.input.image, &masks, alpha)
                }
            };
            return Ok((Outcome::Image(image), ResultSource::Remote));
        }

        let image = Arc::clone(&job.input.image);
        let config = self.config.clone();
        let rendered = tokio::task::spawn_blocking(move || {
            let mut rng = config
                .kmeans
                .seed
                .map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
            let assignment = segmask_pipeline::segment_automatic(&image, &config, &mut rng);
            segmask_pipeline::render_clusters(&image, &assignment, config.overlay_alpha)
        })
        .await?;
        Ok((Outcome::Image(rendered), ResultSource::LocalClusters))
    }

    /// Ask the remote service for masks, or `None` to fall back.
    async fn remote_segment(&self, job: &Job, seeds: &[PromptPoint]) -> Option<RemoteSegmentation> {
        let token = job.credential.as_deref()?;
        match self
            .client
            .request_mask(token, &job.input.bytes, job.source(), seeds, self.config.score)
            .await
        {
            Ok(result) => Some(result),
            Err(e) => {
                tracing::warn!(
                    points = seeds.len(),
                    "remote segmentation failed, segmenting locally: {e}"
                );
                None
            }
        }
    }

    /// Write `outcome` into the session unless it went stale.
    async fn commit(&self, job: &Job, outcome: Outcome, source: ResultSource) -> Option<Rendered> {
        let alpha = self.config.overlay_alpha;
        let mut state = self.state.lock().await;
        if state.generation != job.generation {
            tracing::debug!(
                started = job.generation,
                current = state.generation,
                "discarding result computed before a reset"
            );
            return None;
        }

        let image = match outcome {
            Outcome::Image(image) => {
                // A rendered segmentation replaces the accumulated cut-out.
                if job.mode == TaskMode::Segment {
                    state.composite = None;
                }
                image
            }
            Outcome::Run(mask) => state
                .composite
                .get_or_insert_with(|| CompositeState::new((*job.input.image).clone()))
                .apply_run(&mask, alpha)
                .clone(),
            Outcome::Regions(masks) => state
                .composite
                .get_or_insert_with(|| CompositeState::new((*job.input.image).clone()))
                .apply_regions(&masks, alpha)
                .clone(),
        };
        state.output = Some(image.clone());
        tracing::info!(?source, mode = ?job.mode, "operation complete");
        Some(Rendered { image, source })
    }
}
