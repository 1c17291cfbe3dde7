//! Demuxer: opens a source, probes streams, yields packets tagged with
//! their stream index.

use tracing::{debug, info};

use crate::dictionary::Dictionary;
use crate::error::{Error, ErrorKind, FFmpegErrorExt, Result};
use crate::io::{build_avio_context, CustomIo, RawAvio};
use crate::media_info::{AudioCodecFields, CodecParameters, StreamDescriptor, VideoCodecFields};
use crate::packet::Packet;
use crate::rational::Rational;

enum Handle {
    Open(ffmpeg_next::format::context::Input),
    Closed,
}

/// Opened once per source; `close()` and `Drop` both route through the same
/// `take()`-based helper so double-close and drop-without-open are no-ops.
pub struct MediaInput {
    handle: Handle,
    source_label: String,
    avio: Option<RawAvio>,
}

impl MediaInput {
    pub fn open(path: &str) -> Result<Self> {
        let ctx = ffmpeg_next::format::input(&path).map_err(Error::from)?;
        info!(source = %path, streams = ctx.streams().count(), "opened media input");
        Ok(Self {
            handle: Handle::Open(ctx),
            source_label: path.to_string(),
            avio: None,
        })
    }

    pub fn open_with_options(path: &str, options: Dictionary) -> Result<Self> {
        let ctx = ffmpeg_next::format::input_with_dictionary(&path, options.into()).map_err(Error::from)?;
        info!(source = %path, "opened media input with options");
        Ok(Self {
            handle: Handle::Open(ctx),
            source_label: path.to_string(),
            avio: None,
        })
    }

    /// Opens a demuxer reading from `io`'s callbacks instead of a filesystem
    /// path (spec §4.1's custom-byte-stream constructor).
    pub fn open_with_io(io: CustomIo) -> Result<Self> {
        let mut avio = build_avio_context(io, false)?;
        let pb = avio.as_mut_ptr();

        let mut input_ptr: *mut ffmpeg_next::ffi::AVFormatContext =
            unsafe { ffmpeg_next::ffi::avformat_alloc_context() };
        if input_ptr.is_null() {
            return Err(Error::new(ErrorKind::ResourceExhausted, "avformat_alloc_context returned null"));
        }
        unsafe {
            (*input_ptr).pb = pb;
        }

        let rc = unsafe {
            ffmpeg_next::ffi::avformat_open_input(&mut input_ptr, std::ptr::null(), std::ptr::null(), std::ptr::null_mut())
        };
        if rc < 0 {
            unsafe { ffmpeg_next::ffi::avformat_close_input(&mut input_ptr) };
            return Err(rc.to_avflow_error("avformat_open_input"));
        }

        let rc = unsafe { ffmpeg_next::ffi::avformat_find_stream_info(input_ptr, std::ptr::null_mut()) };
        if rc < 0 {
            unsafe { ffmpeg_next::ffi::avformat_close_input(&mut input_ptr) };
            return Err(rc.to_avflow_error("avformat_find_stream_info"));
        }

        let ctx = unsafe { ffmpeg_next::format::context::Input::wrap(input_ptr) };
        info!("opened media input from custom io");
        Ok(Self {
            handle: Handle::Open(ctx),
            source_label: "<custom-io>".to_string(),
            avio: Some(avio),
        })
    }

    fn ctx(&self) -> Result<&ffmpeg_next::format::context::Input> {
        match &self.handle {
            Handle::Open(ctx) => Ok(ctx),
            Handle::Closed => Err(Error::closed()),
        }
    }

    fn ctx_mut(&mut self) -> Result<&mut ffmpeg_next::format::context::Input> {
        match &mut self.handle {
            Handle::Open(ctx) => Ok(ctx),
            Handle::Closed => Err(Error::closed()),
        }
    }

    pub fn format_name(&self) -> Result<String> {
        Ok(self.ctx()?.format().name().to_string())
    }

    pub fn duration(&self) -> Result<Option<i64>> {
        let d = self.ctx()?.duration();
        Ok(if d == ffmpeg_next::ffi::AV_NOPTS_VALUE { None } else { Some(d) })
    }

    pub fn metadata(&self) -> Result<Dictionary> {
        let mut dict = Dictionary::new();
        for (k, v) in self.ctx()?.metadata().iter() {
            dict.set(k, v);
        }
        Ok(dict)
    }

    pub fn streams(&self) -> Result<Vec<StreamDescriptor>> {
        self.ctx()?.streams().map(stream_to_descriptor).collect()
    }

    /// Delegates tie-breaking entirely to `av_find_best_stream` via
    /// `ffmpeg_next`'s `best` lookup rather than reimplementing its rules.
    pub fn video(&self) -> Result<StreamDescriptor> {
        let stream = self
            .ctx()?
            .streams()
            .best(ffmpeg_next::media::Type::Video)
            .ok_or_else(|| Error::not_found("video stream"))?;
        stream_to_descriptor(stream)
    }

    pub fn audio(&self) -> Result<StreamDescriptor> {
        let stream = self
            .ctx()?
            .streams()
            .best(ffmpeg_next::media::Type::Audio)
            .ok_or_else(|| Error::not_found("audio stream"))?;
        stream_to_descriptor(stream)
    }

    pub fn subtitles(&self) -> Result<StreamDescriptor> {
        let stream = self
            .ctx()?
            .streams()
            .best(ffmpeg_next::media::Type::Subtitle)
            .ok_or_else(|| Error::not_found("subtitle stream"))?;
        stream_to_descriptor(stream)
    }

    /// Pulls the next packet. Returns `Ok(None)` on clean EOF, never an
    /// `Err(EndOfStream)` — callers treat demuxer exhaustion as a value, not
    /// a propagated soft error, since `packets()` is meant to be driven in a
    /// plain loop.
    pub fn read_packet(&mut self) -> Result<Option<Packet>> {
        let ctx = self.ctx_mut()?;
        match ctx.packets().next() {
            Some((stream, packet)) => {
                let time_base = stream.time_base().into();
                Ok(Some(Packet::from_ffmpeg(packet, stream.index()).with_time_base(time_base)))
            }
            None => Ok(None),
        }
    }

    /// Forwards both `stream_index` and `flags` to `av_seek_frame` directly;
    /// `ffmpeg_next`'s safe `seek()` only exposes a whole-container byte/time
    /// seek and drops both, which silently ignores the caller's stream
    /// scoping and seek-direction flags.
    pub fn seek(&mut self, stream_index: i32, target_ts: i64, flags: i32) -> Result<()> {
        let ctx = self.ctx_mut()?;
        let rc = unsafe { ffmpeg_next::ffi::av_seek_frame(ctx.as_mut_ptr(), stream_index, target_ts, flags) };
        if rc < 0 {
            return Err(rc.to_avflow_error("av_seek_frame"));
        }
        debug!(stream_index, target_ts, flags, "seek issued");
        Ok(())
    }

    pub fn close(&mut self) {
        if matches!(self.handle, Handle::Open(_)) {
            info!(source = %self.source_label, "closing media input");
        }
        self.handle = Handle::Closed;
    }
}

impl Drop for MediaInput {
    fn drop(&mut self) {
        self.close();
    }
}

fn stream_to_descriptor(stream: ffmpeg_next::format::stream::Stream) -> Result<StreamDescriptor> {
    let params = stream.parameters();
    let codec_type = params.medium();
    let codec_id = params.id();

    let mut sample_aspect_ratio = Rational::new(1, 1);
    let (video, audio) = match codec_type {
        ffmpeg_next::media::Type::Video => {
            let decoder = ffmpeg_next::codec::context::Context::from_parameters(params.clone())
                .map_err(Error::from)?
                .decoder();
            let video_decoder = decoder.video().map_err(Error::from)?;
            sample_aspect_ratio = video_decoder.aspect_ratio().into();
            (
                Some(VideoCodecFields {
                    width: video_decoder.width(),
                    height: video_decoder.height(),
                    pixel_format: video_decoder.format(),
                }),
                None,
            )
        }
        ffmpeg_next::media::Type::Audio => {
            let decoder = ffmpeg_next::codec::context::Context::from_parameters(params.clone())
                .map_err(Error::from)?
                .decoder();
            let audio_decoder = decoder.audio().map_err(Error::from)?;
            (
                None,
                Some(AudioCodecFields {
                    sample_rate: audio_decoder.rate(),
                    channels: audio_decoder.channels() as i32,
                    sample_format: audio_decoder.format(),
                }),
            )
        }
        _ => (None, None),
    };

    let mut metadata = Dictionary::new();
    for (k, v) in stream.metadata().iter() {
        metadata.set(k, v);
    }

    Ok(StreamDescriptor {
        index: stream.index(),
        time_base: stream.time_base().into(),
        avg_frame_rate: stream.avg_frame_rate().into(),
        real_frame_rate: stream.rate().into(),
        duration: if stream.duration() == ffmpeg_next::ffi::AV_NOPTS_VALUE {
            None
        } else {
            Some(stream.duration())
        },
        sample_aspect_ratio,
        disposition: stream.disposition().bits(),
        discard: stream.discard(),
        metadata,
        codec_parameters: CodecParameters {
            codec_id,
            codec_type,
            video,
            audio,
            extradata: params.extradata().map(|d| d.to_vec()).unwrap_or_default(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reading_from_a_closed_input_fails_with_closed() {
        let mut input = MediaInput { handle: Handle::Closed, source_label: "test".into(), avio: None };
        let err = input.read_packet().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Closed);
    }

    #[test]
    fn close_is_idempotent() {
        let mut input = MediaInput { handle: Handle::Closed, source_label: "test".into(), avio: None };
        input.close();
        input.close();
        assert!(matches!(input.handle, Handle::Closed));
    }
}
