//! Resolves the simple/named/partial overloads and validates stage
//! adjacency before a track is handed to the scheduler.

use std::sync::Arc;

use crate::error::{Error, ErrorKind, Result};
use crate::frame::Frame;
use crate::input::MediaInput;
use crate::media_info::CodecParameters;
use crate::output::MediaOutput;
use crate::packet::Packet;
use crate::rational::Rational;

use super::PipelineStage;

pub enum PipelineSource {
    Demuxer(MediaInput),
    Frames(Box<dyn Iterator<Item = Frame> + Send>),
    Packets(Box<dyn Iterator<Item = Packet> + Send>),
}

pub enum PipelineSink {
    Muxer(Arc<MediaOutput>),
    None,
}

/// One stream this track's muxer sink must have added (and its real stream
/// index assigned to the terminal encoder/bitstream-filter stage) before the
/// track is primed, so `write_header` sees every stream the track will ever
/// write to.
pub struct OutputStreamSpec {
    pub codec_parameters: CodecParameters,
    pub time_base: Rational,
}

/// One track: a source, an ordered stage chain (or the literal passthrough
/// marker), and a sink.
pub struct PipelineSpec {
    pub source: PipelineSource,
    pub stages: Vec<PipelineStage>,
    pub sink: PipelineSink,
    pub output_streams: Vec<OutputStreamSpec>,
}

pub struct TrackSpec {
    pub source: PipelineSource,
    pub stages: Vec<PipelineStage>,
    pub output_streams: Vec<OutputStreamSpec>,
}

impl PipelineSpec {
    pub fn into_track(self) -> TrackSpec {
        TrackSpec {
            source: self.source,
            stages: self.stages,
            output_streams: self.output_streams,
        }
    }
}

/// Returned by a sinkless pipeline: the last stage's emitted items, lazily.
pub enum PartialPipeline {
    Frames(Box<dyn Iterator<Item = Frame> + Send>),
    Packets(Box<dyn Iterator<Item = Packet> + Send>),
}

/// Stage kinds, used only to validate adjacency — never stored once
/// validation passes (the real `PipelineStage` values move into the
/// scheduler).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StageShape {
    Source,
    Decoder,
    Filter,
    Encoder,
    BitstreamFilter,
    Sink,
    Passthrough,
}

fn shape_of(stage: &PipelineStage) -> StageShape {
    match stage {
        PipelineStage::DemuxerSource(_) | PipelineStage::FrameSource(_) | PipelineStage::PacketSource(_) => {
            StageShape::Source
        }
        PipelineStage::Decoder(_) => StageShape::Decoder,
        PipelineStage::Filter(_) => StageShape::Filter,
        PipelineStage::Encoder(_) => StageShape::Encoder,
        PipelineStage::BitstreamFilter(_) => StageShape::BitstreamFilter,
        PipelineStage::MuxerSink(_) | PipelineStage::FrameSink(_) | PipelineStage::PacketSink(_) => StageShape::Sink,
        PipelineStage::Passthrough => StageShape::Passthrough,
    }
}

/// Checked on the shape sequence alone so the rule table can be tested
/// directly against `PipelineStage`'s adjacency contract without building
/// real stage instances.
fn validate_shapes(shapes: &[StageShape]) -> Result<()> {
    for window in shapes.windows(2) {
        let (a, b) = (window[0], window[1]);
        let ok = matches!(
            (a, b),
            (StageShape::Decoder, StageShape::Filter)
                | (StageShape::Decoder, StageShape::Encoder)
                | (StageShape::Filter, StageShape::Filter)
                | (StageShape::Filter, StageShape::Encoder)
        );
        if !ok {
            return Err(Error::invalid_argument(format!(
                "illegal stage adjacency: {a:?} cannot feed {b:?}"
            )));
        }
    }
    Ok(())
}

/// Allowed intermediate shapes: `decoder`, `decoder → filter(s) → encoder`,
/// `bitstream_filter`, `encoder`, `filter(s)`, `filter(s) → encoder`.
/// Anything producing frames feeding a bitstream filter, or any encoder
/// feeding a decoder, is rejected.
pub fn validate_adjacency(stages: &[PipelineStage]) -> Result<()> {
    let shapes: Vec<StageShape> = stages.iter().map(shape_of).collect();
    validate_shapes(&shapes)
}

/// Drives `spec`'s source through its stage chain to exhaustion, flushing
/// every stage at the end, and returns whatever the terminal stage emitted.
/// Unlike `run_named`'s cooperative per-track loop, a sinkless pipeline has
/// no muxer to prime and nothing to interleave with, so this runs eagerly
/// and synchronously rather than through the scheduler.
pub fn into_partial(mut spec: PipelineSpec) -> Result<PartialPipeline> {
    validate_adjacency(&spec.stages)?;
    let emits_packets = matches!(
        spec.stages.last(),
        Some(PipelineStage::Encoder(_)) | Some(PipelineStage::BitstreamFilter(_))
    );

    let mut frames: Vec<Frame> = Vec::new();
    let mut packets: Vec<Packet> = Vec::new();

    loop {
        let (mut f, mut p): (Vec<Frame>, Vec<Packet>) = match &mut spec.source {
            PipelineSource::Demuxer(input) => match input.read_packet()? {
                Some(pkt) => (Vec::new(), vec![pkt]),
                None => break,
            },
            PipelineSource::Frames(iter) => match iter.next() {
                Some(frame) => (vec![frame], Vec::new()),
                None => break,
            },
            PipelineSource::Packets(iter) => match iter.next() {
                Some(pkt) => (Vec::new(), vec![pkt]),
                None => break,
            },
        };

        for stage in spec.stages.iter_mut() {
            match stage {
                PipelineStage::Decoder(dec) => {
                    let mut next_frames = Vec::new();
                    for pkt in p.drain(..) {
                        match dec.decode(&pkt) {
                            Ok(decoded) => next_frames.extend(decoded),
                            Err(e) if e.kind == ErrorKind::TryAgain => {}
                            Err(e) => return Err(e),
                        }
                    }
                    f = next_frames;
                }
                PipelineStage::Filter(filter) => {
                    let mut next_frames = Vec::new();
                    for frame in f.drain(..) {
                        if let Some(out) = filter.process(frame)? {
                            next_frames.push(out);
                        }
                    }
                    f = next_frames;
                }
                PipelineStage::Encoder(enc) => {
                    let mut next_packets = Vec::new();
                    for frame in f.drain(..) {
                        if let Some(pkt) = enc.encode(frame)? {
                            next_packets.push(pkt);
                        }
                    }
                    p = next_packets;
                }
                PipelineStage::BitstreamFilter(bsf) => {
                    let mut next_packets = Vec::new();
                    for pkt in p.drain(..) {
                        next_packets.extend(bsf.process(pkt)?);
                    }
                    p = next_packets;
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

        frames.extend(f);
        packets.extend(p);
    }

    for stage in spec.stages.iter_mut() {
        match stage {
            PipelineStage::Decoder(dec) => frames.extend(dec.flush_frames()?),
            PipelineStage::Filter(filter) => {
                filter.flush()?;
                while let Some(f) = filter.receive()? {
                    frames.push(f);
                }
            }
            PipelineStage::Encoder(enc) => packets.extend(enc.flush_packets()?),
            PipelineStage::BitstreamFilter(bsf) => packets.extend(bsf.flush()?),
            _ => {}
        }
    }

    Ok(if emits_packets {
        PartialPipeline::Packets(Box::new(packets.into_iter()))
    } else {
        PartialPipeline::Frames(Box::new(frames.into_iter()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(StageShape::Decoder, StageShape::Filter, true)]
    #[case(StageShape::Decoder, StageShape::Encoder, true)]
    #[case(StageShape::Filter, StageShape::Filter, true)]
    #[case(StageShape::Filter, StageShape::Encoder, true)]
    #[case(StageShape::Encoder, StageShape::Decoder, false)]
    #[case(StageShape::Encoder, StageShape::Filter, false)]
    #[case(StageShape::BitstreamFilter, StageShape::Decoder, false)]
    fn adjacency_rules_match_spec_table(#[case] a: StageShape, #[case] b: StageShape, #[case] expected: bool) {
        assert_eq!(validate_shapes(&[a, b]).is_ok(), expected);
    }

    #[test]
    fn single_stage_chains_are_always_allowed() {
        assert!(validate_shapes(&[StageShape::BitstreamFilter]).is_ok());
        assert!(validate_shapes(&[StageShape::Decoder]).is_ok());
    }

    #[test]
    fn three_stage_chain_checks_every_window() {
        // decoder -> filter is fine, filter -> decoder is not.
        let shapes = [StageShape::Decoder, StageShape::Filter, StageShape::Decoder];
        assert!(validate_shapes(&shapes).is_err());
    }
}
