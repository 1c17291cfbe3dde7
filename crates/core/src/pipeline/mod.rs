//! Composes the stage types in this crate into a runnable dataflow: resolves
//! the simple/named/partial overloads, owns the concurrency contract, and
//! guarantees drain/flush/close on every exit path.

mod builder;
mod scheduler;
pub(crate) mod wiring;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{watch, Notify};
use tracing::info;

use crate::audio_fifo::AudioFifo;
use crate::bsf::BitStreamFilterApi;
use crate::decoder::Decoder;
use crate::encoder::Encoder;
use crate::error::Result;
use crate::filter::FilterApi;
use crate::frame::Frame;
use crate::input::MediaInput;
use crate::output::MediaOutput;
use crate::packet::Packet;

pub use builder::{OutputStreamSpec, PartialPipeline, PipelineSink, PipelineSource, PipelineSpec, TrackSpec};

/// A sealed variant of the stage kinds the orchestrator can chain. Stages
/// hold no pipeline state themselves; `scheduler::TrackRunner` owns all
/// scheduling state.
pub enum PipelineStage {
    DemuxerSource(MediaInput),
    Decoder(Decoder),
    Filter(FilterApi),
    Encoder(Encoder),
    BitstreamFilter(BitStreamFilterApi),
    MuxerSink(Arc<MediaOutput>),
    Passthrough,
    FrameSource(Box<dyn Iterator<Item = Frame> + Send>),
    PacketSource(Box<dyn Iterator<Item = Packet> + Send>),
    FrameSink(Box<dyn FnMut(Frame) + Send>),
    PacketSink(Box<dyn FnMut(Packet) + Send>),
}

/// Per-track progress, reported for the §10.5-style completion logging.
#[derive(Debug, Default, Clone, Copy)]
pub struct TrackStats {
    pub frames_processed: u64,
    pub packets_processed: u64,
}

/// `Start → Priming → Running → Draining → Finalizing → Done`, with a
/// `Cancel`/fatal-error branch to `Aborting → Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    Start,
    Priming,
    Running,
    Draining,
    Finalizing,
    Aborting,
    Done,
}

/// Returned by `pipeline(...)`. `completion` resolves once every track has
/// drained and shared sinks have written trailers; it never rejects for a
/// cooperative `stop()`, only for fatal stage errors.
pub struct Control {
    stop_flag: Arc<Notify>,
    stopped: Arc<std::sync::atomic::AtomicBool>,
    completion_rx: watch::Receiver<Option<Result<()>>>,
}

impl Control {
    pub fn stop(&self) {
        if !self.stopped.swap(true, std::sync::atomic::Ordering::SeqCst) {
            info!("pipeline stop requested");
            self.stop_flag.notify_waiters();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Resolves once, exactly once, regardless of how many times `stop()`
    /// was called beforehand (pipeline idempotent-stop property).
    pub async fn completion(&mut self) -> Result<()> {
        loop {
            if let Some(result) = self.completion_rx.borrow().clone() {
                return result;
            }
            if self.completion_rx.changed().await.is_err() {
                return Ok(());
            }
        }
    }
}

/// Builds an already-resolved `Control` for a pipeline that never got to run
/// a single track, e.g. because adjacency validation rejected it up front.
pub(crate) fn failed_control(err: crate::error::Error) -> Control {
    let (_tx, rx) = watch::channel(Some(Err(err)));
    Control {
        stop_flag: Arc::new(Notify::new()),
        stopped: Arc::new(std::sync::atomic::AtomicBool::new(true)),
        completion_rx: rx,
    }
}

/// Runs a single-track (simple) pipeline: source → stages → optional sink.
pub async fn pipeline_simple(spec: PipelineSpec) -> Control {
    if let Err(e) = builder::validate_adjacency(&spec.stages) {
        return failed_control(e);
    }
    let sink = match &spec.sink {
        PipelineSink::Muxer(output) => Some(output.clone()),
        PipelineSink::None => None,
    };
    scheduler::run_named(HashMap::from([("default".to_string(), spec.into_track())]), sink).await
}

/// Runs a named, multi-track pipeline sharing one or more sinks.
pub async fn pipeline_named(
    tracks: HashMap<String, TrackSpec>,
    shared_sink: Option<Arc<MediaOutput>>,
) -> Control {
    for track in tracks.values() {
        if let Err(e) = builder::validate_adjacency(&track.stages) {
            return failed_control(e);
        }
    }
    scheduler::run_named(tracks, shared_sink).await
}

/// Runs a sinkless (partial) pipeline, driving it to completion eagerly and
/// returning the last stage's output.
pub fn pipeline_partial(spec: PipelineSpec) -> Result<PartialPipeline> {
    builder::into_partial(spec)
}

/// Reconciles an upstream frame against an encoder's fixed frame-size
/// requirement by re-blocking through an `AudioFifo`, per the audio
/// frame-size reconciliation rule.
pub struct AudioReblocker {
    fifo: AudioFifo,
    frame_size: i32,
    accumulated_samples: i64,
    sample_rate: i32,
    sample_format: ffmpeg_next::format::Sample,
    channels: i32,
    channel_layout: ffmpeg_next::channel_layout::ChannelLayout,
    time_base: crate::rational::Rational,
}

impl AudioReblocker {
    pub fn new(
        sample_format: ffmpeg_next::format::Sample,
        channels: i32,
        channel_layout: ffmpeg_next::channel_layout::ChannelLayout,
        frame_size: i32,
        sample_rate: i32,
        time_base: crate::rational::Rational,
    ) -> Result<Self> {
        Ok(Self {
            fifo: AudioFifo::new(sample_format, channels, frame_size.max(1))?,
            frame_size,
            accumulated_samples: 0,
            sample_rate,
            sample_format,
            channels,
            channel_layout,
            time_base,
        })
    }

    pub fn size(&self) -> i32 {
        self.fifo.size()
    }

    pub fn ready(&self) -> bool {
        self.fifo.size() >= self.frame_size
    }

    pub fn next_pts(&self) -> i64 {
        let seconds = self.accumulated_samples as f64 / self.sample_rate as f64;
        crate::rational::Rational::new(1, 1).rescale((seconds * self.sample_rate as f64) as i64, self.time_base)
    }

    pub fn account_emitted(&mut self, samples: i64) {
        self.accumulated_samples += samples;
    }

    /// Queues one upstream frame's samples into the reblocking FIFO.
    pub fn push(&mut self, frame: &ffmpeg_next::frame::Audio) -> Result<()> {
        let nb_samples = frame.samples() as i32;
        if self.sample_format.is_planar() {
            let buffers: Vec<&[u8]> = (0..self.channels as usize).map(|i| frame.data(i)).collect();
            self.fifo.write(&buffers, nb_samples)?;
        } else {
            self.fifo.write(&[frame.data(0)], nb_samples)?;
        }
        Ok(())
    }

    /// Pops one reblocked frame of exactly `frame_size` samples, or `None` if
    /// the FIFO doesn't yet hold enough to fill one.
    pub fn pop(&mut self) -> Result<Option<ffmpeg_next::frame::Audio>> {
        if self.fifo.size() < self.frame_size {
            return Ok(None);
        }
        self.read_frame(self.frame_size).map(Some)
    }

    /// Pops whatever remains in the FIFO as a final, possibly short, frame.
    /// Only meaningful once the source is exhausted — mid-stream callers
    /// should use `pop`, which waits for a full `frame_size` block.
    pub fn pop_final(&mut self) -> Result<Option<ffmpeg_next::frame::Audio>> {
        let remaining = self.fifo.size();
        if remaining <= 0 {
            return Ok(None);
        }
        self.read_frame(remaining).map(Some)
    }

    fn read_frame(&mut self, nb_samples: i32) -> Result<ffmpeg_next::frame::Audio> {
        let mut out = ffmpeg_next::frame::Audio::new(self.sample_format, nb_samples as usize, self.channel_layout);
        out.set_rate(self.sample_rate as u32);

        let planar = self.sample_format.is_planar();
        let plane_count = if planar { self.channels as usize } else { 1 };
        let bytes_per_sample = self.sample_format.bytes();
        let per_plane_len = if planar {
            nb_samples as usize * bytes_per_sample
        } else {
            nb_samples as usize * bytes_per_sample * self.channels as usize
        };

        // `data_mut` borrows `out` mutably per call; collecting raw pointers
        // first (each borrow ends at `.as_mut_ptr()`) sidesteps taking
        // multiple simultaneous `&mut` borrows of one frame.
        let ptrs: Vec<*mut u8> = (0..plane_count).map(|i| out.data_mut(i).as_mut_ptr()).collect();
        let mut slices: Vec<&mut [u8]> = ptrs
            .into_iter()
            .map(|p| unsafe { std::slice::from_raw_parts_mut(p, per_plane_len) })
            .collect();
        let read = self.fifo.read(&mut slices, nb_samples)?;
        drop(slices);

        out.set_pts(Some(self.next_pts()));
        self.account_emitted(read as i64);
        Ok(out)
    }
}
