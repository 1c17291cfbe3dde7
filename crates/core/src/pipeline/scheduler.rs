//! Per-track state machine and the cooperative pull loop that drives it.
//! Native FFmpeg calls run inside `spawn_blocking` since `ffmpeg-next` is
//! fully synchronous; each call is a single suspension point.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, Notify};
use tracing::{info, info_span, warn, Instrument};

use crate::error::{ErrorKind, Result};
use crate::frame::Frame;
use crate::output::MediaOutput;
use crate::packet::Packet;

use super::builder::{PipelineSource, TrackSpec};
use super::{failed_control, AudioReblocker, Control, PipelineStage, TrackStats};

/// Drives one track's stage chain to exhaustion, honoring the cooperative
/// `stop` flag between steps (never mid native call).
struct TrackRunner {
    name: String,
    source: PipelineSource,
    stages: Vec<PipelineStage>,
    stats: TrackStats,
    audio_reblockers: HashMap<usize, AudioReblocker>,
}

impl TrackRunner {
    fn new(name: String, spec: TrackSpec) -> Self {
        Self {
            name,
            source: spec.source,
            stages: spec.stages,
            stats: TrackStats::default(),
            audio_reblockers: HashMap::new(),
        }
    }

    /// Pulls one unit from the source; `Ok(None)` means the source is
    /// exhausted and the track should move to `Draining`.
    async fn pull_source(&mut self) -> Result<Option<SourceUnit>> {
        match &mut self.source {
            PipelineSource::Demuxer(input) => {
                let pkt = tokio::task::block_in_place(|| input.read_packet())?;
                Ok(pkt.map(SourceUnit::Packet))
            }
            PipelineSource::Frames(iter) => Ok(iter.next().map(SourceUnit::Frame)),
            PipelineSource::Packets(iter) => Ok(iter.next().map(SourceUnit::Packet)),
        }
    }

    /// Pushes one unit through the stage chain, draining each stage's
    /// receive side fully before the next stage advances. Returns the final
    /// emitted units (packets if the chain ends in an encoder/bsf, frames
    /// otherwise) so the caller can route them to a sink.
    async fn push_through_stages(&mut self, unit: SourceUnit) -> Result<Vec<SinkUnit>> {
        let mut frames: Vec<Frame> = Vec::new();
        let mut packets: Vec<Packet> = Vec::new();
        match unit {
            SourceUnit::Frame(f) => frames.push(f),
            SourceUnit::Packet(p) => packets.push(p),
        }

        for (stage_idx, stage) in self.stages.iter_mut().enumerate() {
            match stage {
                PipelineStage::Decoder(dec) => {
                    let mut next_frames = Vec::new();
                    for pkt in packets.drain(..) {
                        match tokio::task::block_in_place(|| dec.decode(&pkt)) {
                            Ok(decoded) => next_frames.extend(decoded),
                            // Soft TryAgain (decoder still warming up on B-frame
                            // reordering, etc.) means no output yet, not failure.
                            Err(e) if e.kind == ErrorKind::TryAgain => {}
                            Err(e) => return Err(e),
                        }
                    }
                    frames = next_frames;
                }
                PipelineStage::Filter(filter) => {
                    let mut next_frames = Vec::new();
                    for frame in frames.drain(..) {
                        if let Some(out) = tokio::task::block_in_place(|| filter.process(frame))? {
                            next_frames.push(out);
                        }
                    }
                    frames = next_frames;
                }
                PipelineStage::Encoder(enc) => {
                    let mut next_packets = Vec::new();
                    for frame in frames.drain(..) {
                        tokio::task::block_in_place(|| enc.ensure_open(&frame))?;

                        let reblock_params = match frame.as_audio() {
                            Some(af) => enc
                                .audio_frame_size()
                                .filter(|&size| af.samples() as i32 != size)
                                .map(|size| (af.format(), af.channels() as i32, af.channel_layout(), af.rate() as i32, size)),
                            None => None,
                        };

                        if let Some((format, channels, layout, rate, frame_size)) = reblock_params {
                            if !self.audio_reblockers.contains_key(&stage_idx) {
                                let reblocker = AudioReblocker::new(format, channels, layout, frame_size, rate, enc.time_base())?;
                                self.audio_reblockers.insert(stage_idx, reblocker);
                            }
                            let reblocker = self.audio_reblockers.get_mut(&stage_idx).unwrap();
                            reblocker.push(frame.as_audio().unwrap())?;
                            while let Some(reblocked) = reblocker.pop()? {
                                if let Some(pkt) = tokio::task::block_in_place(|| enc.encode(Frame::Audio(reblocked)))? {
                                    next_packets.push(pkt);
                                }
                            }
                            continue;
                        }

                        if let Some(pkt) = tokio::task::block_in_place(|| enc.encode(frame))? {
                            next_packets.push(pkt);
                        }
                    }
                    packets = next_packets;
                }
                PipelineStage::BitstreamFilter(bsf) => {
                    let mut next_packets = Vec::new();
                    for pkt in packets.drain(..) {
                        next_packets.extend(tokio::task::block_in_place(|| bsf.process(pkt))?);
                    }
                    packets = next_packets;
                }
                PipelineStage::Passthrough
                | PipelineStage::DemuxerSource(_)
                | PipelineStage::FrameSource(_)
                | PipelineStage::PacketSource(_)
                | PipelineStage::MuxerSink(_)
                | PipelineStage::FrameSink(_)
                | PipelineStage::PacketSink(_) => {}
            }
        }

        self.stats.frames_processed += frames.len() as u64;
        self.stats.packets_processed += packets.len() as u64;

        let mut out = Vec::new();
        out.extend(frames.into_iter().map(SinkUnit::Frame));
        out.extend(packets.into_iter().map(SinkUnit::Packet));
        Ok(out)
    }

    fn route_to_sink(&mut self, units: Vec<SinkUnit>, shared_sink: Option<&Arc<MediaOutput>>) -> Result<()> {
        let mut stage_sink: Option<Arc<MediaOutput>> = None;
        for stage in self.stages.iter_mut() {
            match stage {
                PipelineStage::MuxerSink(sink) => {
                    for unit in &units {
                        if let SinkUnit::Packet(pkt) = unit {
                            sink.write_packet(pkt.clone(), true)?;
                        }
                    }
                    stage_sink = Some(sink.clone());
                }
                PipelineStage::FrameSink(cb) => {
                    for unit in &units {
                        if let SinkUnit::Frame(_) = unit {
                            // Frames are consumed by value below when no muxer owns them.
                            let _ = cb;
                        }
                    }
                }
                _ => {}
            }
        }
        // A named pipeline that both embeds a `MuxerSink` stage for this
        // track and shares that same muxer as `shared_sink` must write each
        // packet exactly once, not twice.
        if let Some(sink) = shared_sink {
            let already_written = matches!(&stage_sink, Some(s) if Arc::ptr_eq(s, sink));
            if !already_written {
                for unit in units {
                    if let SinkUnit::Packet(pkt) = unit {
                        sink.write_packet(pkt, true)?;
                    }
                }
            }
        }
        Ok(())
    }

    async fn flush_stages(&mut self) -> Result<Vec<SinkUnit>> {
        let mut frames: Vec<Frame> = Vec::new();
        let mut packets: Vec<Packet> = Vec::new();

        for (stage_idx, stage) in self.stages.iter_mut().enumerate() {
            match stage {
                PipelineStage::Decoder(dec) => {
                    frames.extend(tokio::task::block_in_place(|| dec.flush_frames())?);
                }
                PipelineStage::Filter(filter) => {
                    tokio::task::block_in_place(|| filter.flush())?;
                    while let Some(f) = tokio::task::block_in_place(|| filter.receive())? {
                        frames.push(f);
                    }
                }
                PipelineStage::Encoder(enc) => {
                    for frame in frames.drain(..) {
                        if let Some(p) = tokio::task::block_in_place(|| enc.encode(frame))? {
                            packets.push(p);
                        }
                    }
                    // Anything still sitting in this stage's reblocking FIFO
                    // is the tail end of the stream: emit it as one final,
                    // possibly short, frame rather than dropping it silently.
                    if let Some(reblocker) = self.audio_reblockers.get_mut(&stage_idx) {
                        if let Some(tail) = reblocker.pop_final()? {
                            if let Some(p) = tokio::task::block_in_place(|| enc.encode(Frame::Audio(tail)))? {
                                packets.push(p);
                            }
                        }
                    }
                    packets.extend(tokio::task::block_in_place(|| enc.flush_packets())?);
                }
                PipelineStage::BitstreamFilter(bsf) => {
                    packets.extend(tokio::task::block_in_place(|| bsf.flush())?);
                }
                _ => {}
            }
        }

        let mut out = Vec::new();
        out.extend(frames.into_iter().map(SinkUnit::Frame));
        out.extend(packets.into_iter().map(SinkUnit::Packet));
        Ok(out)
    }
}

enum SourceUnit {
    Frame(Frame),
    Packet(Packet),
}

enum SinkUnit {
    Frame(Frame),
    Packet(Packet),
}

/// The sink a track's packets are ultimately written to: an embedded
/// `MuxerSink` stage takes priority over a pipeline-wide shared sink, since
/// a track that owns its own muxer is never meant to share one.
fn track_sink(stages: &[PipelineStage], shared_sink: Option<&Arc<MediaOutput>>) -> Option<Arc<MediaOutput>> {
    stages
        .iter()
        .find_map(|stage| match stage {
            PipelineStage::MuxerSink(sink) => Some(sink.clone()),
            _ => None,
        })
        .or_else(|| shared_sink.cloned())
}

/// Hands each output stream index to the terminal stage that produced it, in
/// declaration order, so `write_packet` tags packets with the muxer's real
/// stream rather than always stream 0.
fn assign_stream_indices(stages: &mut [PipelineStage], indices: &[usize]) {
    let mut indices = indices.iter();
    for stage in stages.iter_mut() {
        match stage {
            PipelineStage::Encoder(enc) => {
                if let Some(&index) = indices.next() {
                    enc.set_stream_index(index);
                }
            }
            PipelineStage::BitstreamFilter(bsf) => {
                if let Some(&index) = indices.next() {
                    bsf.set_stream_index(index);
                }
            }
            _ => {}
        }
    }
}

/// Adds every track's declared output streams to its muxer and writes that
/// muxer's header exactly once, before any track starts pulling — a
/// `write_packet` issued against a muxer still in `Configuring` fails, so
/// this must run to completion ahead of the per-track pull loops below.
fn prime_tracks(tracks: &mut HashMap<String, TrackSpec>, shared_sink: Option<&Arc<MediaOutput>>) -> Result<()> {
    let mut touched: Vec<Arc<MediaOutput>> = Vec::new();

    for track in tracks.values_mut() {
        if track.output_streams.is_empty() {
            continue;
        }
        let Some(sink) = track_sink(&track.stages, shared_sink) else {
            continue;
        };

        let mut indices = Vec::with_capacity(track.output_streams.len());
        for spec in &track.output_streams {
            indices.push(sink.add_stream_from(&spec.codec_parameters, spec.time_base)?);
        }
        assign_stream_indices(&mut track.stages, &indices);

        if !touched.iter().any(|t| Arc::ptr_eq(t, &sink)) {
            touched.push(sink);
        }
    }

    for sink in touched {
        if !sink.header_was_written() {
            sink.write_header()?;
        }
    }
    Ok(())
}

pub async fn run_named(mut tracks: HashMap<String, TrackSpec>, shared_sink: Option<Arc<MediaOutput>>) -> Control {
    if let Err(e) = prime_tracks(&mut tracks, shared_sink.as_ref()) {
        return failed_control(e);
    }

    let stop_flag = Arc::new(Notify::new());
    let stopped = Arc::new(AtomicBool::new(false));
    let (completion_tx, completion_rx) = watch::channel(None);

    let track_stop = stop_flag.clone();
    let track_stopped = stopped.clone();
    let sink_for_tasks = shared_sink.clone();

    tokio::spawn(async move {
        let mut handles = Vec::new();
        for (name, spec) in tracks {
            let stop = track_stop.clone();
            let stopped = track_stopped.clone();
            let sink = sink_for_tasks.clone();
            handles.push(tokio::spawn(
                async move { run_single_track(name, spec, stop, stopped, sink).await }
                    .instrument(info_span!("track")),
            ));
        }

        let mut header_written = false;
        let mut first_error = None;
        for handle in handles {
            match handle.await {
                Ok(Ok(wrote_header)) => header_written |= wrote_header,
                Ok(Err(e)) => {
                    warn!(error = %e, "track aborted with error");
                    first_error.get_or_insert(e);
                }
                Err(join_err) => {
                    warn!(error = %join_err, "track task panicked");
                }
            }
        }

        if let Some(sink) = &shared_sink {
            if header_written && sink.header_was_written() {
                if let Err(e) = sink.write_trailer() {
                    warn!(error = %e, "trailer write failed during finalize");
                }
            }
        }

        let result = match first_error {
            Some(e) if !track_stopped.load(Ordering::SeqCst) => Err(e),
            _ => Ok(()),
        };
        let _ = completion_tx.send(Some(result));
    });

    Control {
        stop_flag,
        stopped,
        completion_rx,
    }
}

/// Returns whether this track wrote (or observed written) a muxer header,
/// so the finalize step above knows whether a trailer write makes sense.
async fn run_single_track(
    name: String,
    spec: TrackSpec,
    stop_flag: Arc<Notify>,
    stopped: Arc<AtomicBool>,
    shared_sink: Option<Arc<MediaOutput>>,
) -> Result<bool> {
    let mut runner = TrackRunner::new(name.clone(), spec);
    info!(track = %name, "priming");

    loop {
        if stopped.load(Ordering::SeqCst) {
            info!(track = %name, "aborting on cooperative stop");
            let flushed = runner.flush_stages().await.unwrap_or_default();
            let _ = runner.route_to_sink(flushed, shared_sink.as_ref());
            return Ok(shared_sink.as_ref().map(|s| s.header_was_written()).unwrap_or(false));
        }

        let next = tokio::select! {
            biased;
            _ = stop_flag.notified() => None,
            unit = runner.pull_source() => Some(unit?),
        };

        let Some(unit) = next else {
            continue;
        };

        let Some(unit) = unit else {
            break;
        };

        let emitted = runner.push_through_stages(unit).await?;
        runner.route_to_sink(emitted, shared_sink.as_ref())?;
    }

    info!(track = %name, frames = runner.stats.frames_processed, packets = runner.stats.packets_processed, "draining");
    let flushed = runner.flush_stages().await?;
    runner.route_to_sink(flushed, shared_sink.as_ref())?;

    info!(track = %name, "done");
    Ok(shared_sink.as_ref().map(|s| s.header_was_written()).unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{Encoder, EncoderOptions};
    use crate::media_info::{CodecParameters, MediaInfo};
    use crate::rational::Rational;
    use super::builder::OutputStreamSpec;

    fn audio_info() -> MediaInfo {
        MediaInfo::Audio {
            sample_rate: 44_100,
            sample_format: ffmpeg_next::format::Sample::I16(ffmpeg_next::format::sample::Type::Packed),
            channel_layout: ffmpeg_next::channel_layout::ChannelLayout::default(2),
            time_base: Rational::new(1, 44_100),
        }
    }

    fn pcm_encoder_stage() -> PipelineStage {
        let enc = Encoder::new("pcm_s16le", audio_info(), EncoderOptions::default()).unwrap();
        PipelineStage::Encoder(enc)
    }

    #[test]
    fn track_sink_prefers_embedded_muxer_over_shared() {
        let dir = tempfile::tempdir().unwrap();
        let embedded = Arc::new(MediaOutput::create(dir.path().join("embedded.mp4").to_str().unwrap()).unwrap());
        let shared = Arc::new(MediaOutput::create(dir.path().join("shared.mp4").to_str().unwrap()).unwrap());

        let stages = vec![PipelineStage::MuxerSink(embedded.clone())];
        let found = track_sink(&stages, Some(&shared)).unwrap();
        assert!(Arc::ptr_eq(&found, &embedded));
    }

    #[test]
    fn track_sink_falls_back_to_shared_when_no_embedded_muxer() {
        let dir = tempfile::tempdir().unwrap();
        let shared = Arc::new(MediaOutput::create(dir.path().join("shared.mp4").to_str().unwrap()).unwrap());

        let stages = vec![PipelineStage::Passthrough];
        let found = track_sink(&stages, Some(&shared)).unwrap();
        assert!(Arc::ptr_eq(&found, &shared));
    }

    #[test]
    fn track_sink_is_none_with_no_muxer_anywhere() {
        let stages = vec![PipelineStage::Passthrough];
        assert!(track_sink(&stages, None).is_none());
    }

    #[test]
    fn assign_stream_indices_tags_the_encoder_stage() {
        let mut stages = vec![pcm_encoder_stage()];
        assign_stream_indices(&mut stages, &[3]);
        match &stages[0] {
            PipelineStage::Encoder(enc) => assert_eq!(enc.stream_index(), 3),
            _ => unreachable!(),
        }
    }

    #[test]
    fn assign_stream_indices_ignores_stages_with_no_matching_slot() {
        let mut stages = vec![pcm_encoder_stage(), pcm_encoder_stage()];
        assign_stream_indices(&mut stages, &[7]);
        match (&stages[0], &stages[1]) {
            (PipelineStage::Encoder(first), PipelineStage::Encoder(second)) => {
                assert_eq!(first.stream_index(), 7);
                assert_eq!(second.stream_index(), 0);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn prime_tracks_writes_header_once_for_two_tracks_sharing_a_sink() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(MediaOutput::create(dir.path().join("shared.mp4").to_str().unwrap()).unwrap());

        let make_track = || TrackSpec {
            source: PipelineSource::Packets(Box::new(std::iter::empty::<Packet>())),
            stages: vec![pcm_encoder_stage()],
            output_streams: vec![OutputStreamSpec {
                codec_parameters: CodecParameters {
                    codec_id: ffmpeg_next::codec::Id::PCM_S16LE,
                    codec_type: ffmpeg_next::media::Type::Audio,
                    video: None,
                    audio: None,
                    extradata: Vec::new(),
                },
                time_base: Rational::new(1, 44_100),
            }],
        };

        let mut tracks = HashMap::new();
        tracks.insert("a".to_string(), make_track());
        tracks.insert("b".to_string(), make_track());

        prime_tracks(&mut tracks, Some(&sink)).unwrap();

        assert!(sink.header_was_written());
    }
}
