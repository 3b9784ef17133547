use crate::audio::mixer::AudioMixer;
use crate::config::PipelineConfig;
use crate::encode::targets::EncoderTargets;
use crate::export::preflight::{Capabilities, available_cpus};
use crate::foundation::error::ExportResult;
use crate::media::cache::MediaCache;
use crate::media::decode::{FfmpegMediaDecoder, MediaDecoder};
use crate::memory::monitor::MemoryMonitor;
use crate::timeline::job::ExportJob;
use std::sync::{Arc, OnceLock};

/// Long-lived collaborators shared by every run of an exporter.
pub struct PipelineContext {
    config: PipelineConfig,
    monitor: Arc<MemoryMonitor>,
    targets: Arc<dyn EncoderTargets>,
    decoder: Arc<dyn MediaDecoder>,
    capabilities: OnceLock<Capabilities>,
}

impl PipelineContext {
    /// Context decoding media with [`FfmpegMediaDecoder`]; capabilities are probed on first
    /// use.
    pub fn new(
        config: PipelineConfig,
        monitor: Arc<MemoryMonitor>,
        targets: Arc<dyn EncoderTargets>,
    ) -> Self {
        Self {
            config,
            monitor,
            targets,
            decoder: Arc::new(FfmpegMediaDecoder::new()),
            capabilities: OnceLock::new(),
        }
    }

    pub fn with_decoder(mut self, decoder: Arc<dyn MediaDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    /// Use `caps` instead of probing the machine.
    pub fn with_capabilities(self, caps: Capabilities) -> Self {
        let _ = self.capabilities.set(caps);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn monitor(&self) -> &Arc<MemoryMonitor> {
        &self.monitor
    }

    pub fn targets(&self) -> &dyn EncoderTargets {
        self.targets.as_ref()
    }

    pub fn decoder(&self) -> &Arc<dyn MediaDecoder> {
        &self.decoder
    }

    pub fn capabilities(&self) -> &Capabilities {
        self.capabilities.get_or_init(Capabilities::probe)
    }

    /// Core count, without probing external tools.
    pub fn cpus(&self) -> usize {
        self.capabilities
            .get()
            .map(|c| c.cpus)
            .unwrap_or_else(available_cpus)
    }

    /// `Compatibility` error when a tool the job or the targets need is missing.
    pub(crate) fn check_capabilities(&self, job: &ExportJob) -> ExportResult<()> {
        let mut required = self.targets.required_capabilities();
        for c in self.decoder.required_capabilities(&job.media) {
            if !required.contains(&c) {
                required.push(c);
            }
        }
        if required.is_empty() {
            return Ok(());
        }
        self.capabilities().require(&required)
    }

    pub(crate) fn media_cache(&self) -> MediaCache {
        MediaCache::new(Arc::clone(&self.decoder), Arc::clone(self.monitor.ledger()))
            .with_seek_timeout(self.config.media.seek_timeout())
            .with_video_capacity(self.config.media.video_frame_cache)
    }

    pub(crate) fn mixer(&self, job: &ExportJob) -> AudioMixer {
        AudioMixer::new(Arc::clone(&self.decoder), job.settings.frame_rate)
            .with_sample_rate(self.config.media.audio_sample_rate)
    }
}

impl std::fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineContext")
            .field("config", &self.config)
            .field("monitor", &self.monitor)
            .field("capabilities", &self.capabilities.get())
            .finish_non_exhaustive()
    }
}
