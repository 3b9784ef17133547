use crate::audio::mixer::{AudioMixer, MixedAudio};
use crate::encode::backend::{BackendKind, EncoderBackend, FinalBlob};
use crate::export::context::PipelineContext;
use crate::foundation::error::{ExportError, ExportResult};
use crate::media::cache::MediaCache;
use crate::memory::monitor::{Evictable, format_bytes};
use crate::timeline::job::ExportJob;
use crate::timeline::model::{ElementPayload, MediaKind};
use std::sync::Arc;

/// Per-export resources: media cache, audio mixer and encoder backend.
///
/// Released by [`ExportScope::close`] or on drop, whatever the outcome.
pub(crate) struct ExportScope {
    cache: Arc<MediaCache>,
    mixer: AudioMixer,
    backend: Option<EncoderBackend>,
    closed: bool,
}

impl ExportScope {
    pub(crate) fn open(ctx: &PipelineContext, job: &ExportJob) -> Self {
        let cache = Arc::new(ctx.media_cache());
        let evictable: Arc<dyn Evictable> = cache.clone();
        ctx.monitor().register_cache(&evictable);
        Self {
            cache,
            mixer: ctx.mixer(job),
            backend: None,
            closed: false,
        }
    }

    pub(crate) fn cache(&self) -> Arc<MediaCache> {
        Arc::clone(&self.cache)
    }

    /// Decode every still image the timeline shows. Best effort.
    pub(crate) fn preload(&self, job: &ExportJob) -> usize {
        let items = job.elements.iter().filter_map(|el| match &el.payload {
            ElementPayload::Media(m) if m.kind == MediaKind::Image => job.media.get(&m.media_id),
            _ => None,
        });
        match self.cache.preload(items) {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, "media preload failed; decoding on demand");
                0
            }
        }
    }

    /// Load and mix every audio track. `None` when nothing audible was loaded.
    pub(crate) fn mix_audio(&mut self, job: &ExportJob) -> (Option<MixedAudio>, usize) {
        self.mixer.load_all(&job.elements, &job.media, job.duration);
        let skipped = self.mixer.skipped().len();
        if self.mixer.track_count() == 0 {
            return (None, skipped);
        }
        (Some(self.mixer.mix_tracks(job.duration)), skipped)
    }

    /// Create, wire up and start the `kind` backend.
    pub(crate) fn start_backend(
        &mut self,
        ctx: &PipelineContext,
        kind: BackendKind,
        job: &ExportJob,
        audio: Option<&MixedAudio>,
    ) -> ExportResult<&mut EncoderBackend> {
        let backend = self.backend.insert(EncoderBackend::create(
            kind,
            ctx.targets(),
            &job.settings,
            ctx.config().pacing,
        )?);
        if let Some(audio) = audio {
            backend.set_audio_source(audio)?;
        }
        backend.start()?;
        tracing::debug!(backend = %kind, "encoder started");
        Ok(backend)
    }

    pub(crate) fn backend(&mut self) -> ExportResult<&mut EncoderBackend> {
        self.backend
            .as_mut()
            .ok_or_else(|| ExportError::validation("encoder backend not started"))
    }

    pub(crate) fn finish(&mut self) -> ExportResult<FinalBlob> {
        self.backend()?.stop()
    }

    pub(crate) fn frames_encoded(&self) -> u64 {
        self.backend.as_ref().map_or(0, EncoderBackend::frames_encoded)
    }

    /// Release everything. Idempotent; problems are logged, never returned.
    pub(crate) fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(mut backend) = self.backend.take() {
            backend.cleanup();
        }
        self.mixer.dispose();
        let freed = self.cache.evict_all();
        tracing::debug!(freed = %format_bytes(freed), "export resources released");
    }
}

impl Drop for ExportScope {
    fn drop(&mut self) {
        self.close();
    }
}
