use crate::encode::backend::{AudioTrackFile, FinalBlob, FrameOrder};
use crate::encode::sink::{FrameSink, SinkConfig};
use crate::foundation::core::FrameIndex;
use crate::foundation::error::{EncoderStage, ExportError, ExportResult};
use crate::render::frame::{FrameRGBA, StreamingFrame};
use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// What the sampler thread hands back when it exits.
struct SamplerExit {
    sink: Box<dyn FrameSink>,
    result: ExportResult<u64>,
}

enum SamplerState {
    Idle(Box<dyn FrameSink>),
    Running {
        tx: SyncSender<Arc<FrameRGBA>>,
        worker: JoinHandle<SamplerExit>,
    },
    Done,
}

/// Live single-slot surface sampled by a dedicated thread.
///
/// When paced, the sampler emits at the `1/fps` cadence and repeats the last frame whenever
/// the producer misses a tick. Unpaced, every fed frame is forwarded once.
pub struct RealtimeStreamBackend {
    state: SamplerState,
    cfg: SinkConfig,
    paced: bool,
    order: FrameOrder,
    audio: AudioTrackFile,
    emitted: u64,
}

impl RealtimeStreamBackend {
    pub fn new(sink: Box<dyn FrameSink>, cfg: SinkConfig, paced: bool) -> Self {
        Self {
            state: SamplerState::Idle(sink),
            cfg,
            paced,
            order: FrameOrder::default(),
            audio: AudioTrackFile::default(),
            emitted: 0,
        }
    }

    pub(crate) fn audio_mut(&mut self) -> &mut AudioTrackFile {
        &mut self.audio
    }

    pub(crate) fn start(&mut self) -> ExportResult<()> {
        let mut sink = match std::mem::replace(&mut self.state, SamplerState::Done) {
            SamplerState::Idle(sink) => sink,
            other => {
                self.state = other;
                return Err(ExportError::encoder(
                    EncoderStage::Start,
                    "realtime stream already started",
                ));
            }
        };
        let mut cfg = self.cfg.clone();
        cfg.audio = self.audio.input();
        if let Err(e) = sink.begin(cfg) {
            self.state = SamplerState::Idle(sink);
            return Err(e.into_encoder(EncoderStage::Start));
        }

        let (tx, rx) = std::sync::mpsc::sync_channel::<Arc<FrameRGBA>>(1);
        let tick = self.paced.then(|| self.cfg.fps.frame_interval());
        // The sink moves into the thread; on spawn failure it is dropped there, which aborts it.
        let worker = std::thread::Builder::new()
            .name("vexport-sampler".to_owned())
            .spawn(move || run_sampler(sink, rx, tick))
            .map_err(|e| {
                ExportError::encoder(
                    EncoderStage::Start,
                    format!("failed to spawn sampler thread: {e}"),
                )
            })?;
        tracing::debug!(paced = self.paced, "realtime sampler started");
        self.state = SamplerState::Running { tx, worker };
        Ok(())
    }

    pub(crate) fn feed_frame(&mut self, frame: StreamingFrame) -> ExportResult<()> {
        let SamplerState::Running { tx, .. } = &self.state else {
            return Err(ExportError::encoder(EncoderStage::Feed, "backend not started"));
        };
        self.order.admit(frame.index)?;
        if tx.send(frame.image).is_ok() {
            return Ok(());
        }
        // The sampler only hangs up after a sink failure.
        let exit = self.join()?;
        let err = match exit.result {
            Err(e) => e.into_encoder(EncoderStage::Feed),
            Ok(_) => ExportError::encoder(EncoderStage::Feed, "sampler exited early"),
        };
        let mut sink = exit.sink;
        sink.abort();
        Err(err)
    }

    pub(crate) fn stop(&mut self) -> ExportResult<FinalBlob> {
        if !matches!(self.state, SamplerState::Running { .. }) {
            return Err(ExportError::encoder(EncoderStage::Stop, "backend not started"));
        }
        let exit = self.join()?;
        let mut sink = exit.sink;
        match exit.result {
            Ok(n) => self.emitted = n,
            Err(e) => {
                sink.abort();
                return Err(e.into_encoder(EncoderStage::Feed));
            }
        }
        let data = sink
            .end()
            .map_err(|e| e.into_encoder(EncoderStage::Stop))?;
        tracing::debug!(emitted = self.emitted, fed = self.order.count(), "realtime stream stopped");
        FinalBlob::new(self.cfg.format.mime_type(), data)
    }

    pub(crate) fn cleanup(&mut self) {
        if matches!(self.state, SamplerState::Running { .. }) {
            match self.join() {
                Ok(mut exit) => exit.sink.abort(),
                Err(e) => tracing::warn!(error = %e, "sampler thread did not exit cleanly"),
            }
        }
        self.state = SamplerState::Done;
        self.audio.remove();
    }

    pub(crate) fn frames_encoded(&self) -> u64 {
        self.order.count()
    }

    /// Frames the sink received, repeats included. Known once stopped.
    pub fn frames_emitted(&self) -> u64 {
        self.emitted
    }

    /// Close the slot and wait for the sampler to hand the sink back.
    fn join(&mut self) -> ExportResult<SamplerExit> {
        let SamplerState::Running { tx, worker } =
            std::mem::replace(&mut self.state, SamplerState::Done)
        else {
            return Err(ExportError::encoder(EncoderStage::Stop, "sampler not running"));
        };
        drop(tx);
        worker.join().map_err(|_| {
            ExportError::encoder(EncoderStage::Feed, "sampler thread panicked")
        })
    }
}

/// Paced slots are anchored on the first frame's arrival: slot `k` closes at
/// `origin + (k + 1) * tick`. A frame that lands inside its own slot is emitted once; a slot
/// that closes empty repeats the last frame.
fn run_sampler(
    mut sink: Box<dyn FrameSink>,
    rx: Receiver<Arc<FrameRGBA>>,
    tick: Option<Duration>,
) -> SamplerExit {
    let mut emitted = 0u64;
    let mut last: Option<Arc<FrameRGBA>> = None;
    let mut closes: Option<Instant> = None;
    let result = loop {
        let frame = match (closes, &last) {
            (Some(at), Some(prev)) => {
                match rx.recv_timeout(at.saturating_duration_since(Instant::now())) {
                    Ok(f) => f,
                    Err(RecvTimeoutError::Timeout) => Arc::clone(prev),
                    Err(RecvTimeoutError::Disconnected) => break Ok(emitted),
                }
            }
            _ => match rx.recv() {
                Ok(f) => f,
                Err(_) => break Ok(emitted),
            },
        };
        if let Err(e) = sink.push_frame(FrameIndex(emitted), &frame) {
            break Err(e);
        }
        emitted += 1;
        last = Some(frame);
        closes = tick.map(|t| match closes {
            Some(at) => at + t,
            None => Instant::now() + t + t,
        });
    };
    SamplerExit { sink, result }
}

impl std::fmt::Debug for RealtimeStreamBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeStreamBackend")
            .field("paced", &self.paced)
            .field("fed", &self.order.count())
            .field("emitted", &self.emitted)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "../../tests/unit/encode/realtime.rs"]
mod tests;
