//! Type-level contract that flows between stages describing what kind of
//! media a stage produces or expects.

use crate::rational::Rational;

/// Sealed variant distinguishing video from audio media descriptions.
#[derive(Debug, Clone, Copy)]
pub enum MediaInfo {
    Video {
        width: u32,
        height: u32,
        pixel_format: ffmpeg_next::format::Pixel,
        frame_rate: Rational,
        time_base: Rational,
        sample_aspect_ratio: Rational,
    },
    Audio {
        sample_rate: u32,
        sample_format: ffmpeg_next::format::Sample,
        channel_layout: ffmpeg_next::channel_layout::ChannelLayout,
        time_base: Rational,
    },
}

impl MediaInfo {
    pub fn is_video(&self) -> bool {
        matches!(self, MediaInfo::Video { .. })
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, MediaInfo::Audio { .. })
    }

    pub fn time_base(&self) -> Rational {
        match self {
            MediaInfo::Video { time_base, .. } => *time_base,
            MediaInfo::Audio { time_base, .. } => *time_base,
        }
    }
}

/// Codec id, type, and the media-type-specific fields the muxer/decoder need.
/// Immutable once the owning muxer's header has been written.
#[derive(Debug, Clone)]
pub struct CodecParameters {
    pub codec_id: ffmpeg_next::codec::Id,
    pub codec_type: ffmpeg_next::media::Type,
    pub video: Option<VideoCodecFields>,
    pub audio: Option<AudioCodecFields>,
    pub extradata: Vec<u8>,
}

#[derive(Debug, Clone, Copy)]
pub struct VideoCodecFields {
    pub width: u32,
    pub height: u32,
    pub pixel_format: ffmpeg_next::format::Pixel,
}

#[derive(Debug, Clone, Copy)]
pub struct AudioCodecFields {
    pub sample_rate: u32,
    pub channels: i32,
    pub sample_format: ffmpeg_next::format::Sample,
}

/// index, time base, frame rate, duration, codec parameters, and the other
/// per-stream facts a demuxer exposes and a muxer requires at add-time.
#[derive(Debug, Clone)]
pub struct StreamDescriptor {
    pub index: usize,
    pub time_base: Rational,
    pub avg_frame_rate: Rational,
    pub real_frame_rate: Rational,
    pub duration: Option<i64>,
    pub sample_aspect_ratio: Rational,
    pub disposition: i32,
    pub discard: ffmpeg_next::codec::discard::Discard,
    pub metadata: crate::dictionary::Dictionary,
    pub codec_parameters: CodecParameters,
}

impl StreamDescriptor {
    pub fn media_info(&self) -> crate::error::Result<MediaInfo> {
        match (&self.codec_parameters.video, &self.codec_parameters.audio) {
            (Some(v), None) => Ok(MediaInfo::Video {
                width: v.width,
                height: v.height,
                pixel_format: v.pixel_format,
                frame_rate: self.avg_frame_rate,
                time_base: self.time_base,
                sample_aspect_ratio: self.sample_aspect_ratio,
            }),
            (None, Some(a)) => Ok(MediaInfo::Audio {
                sample_rate: a.sample_rate,
                sample_format: a.sample_format,
                channel_layout: ffmpeg_next::channel_layout::ChannelLayout::default(a.channels),
                time_base: self.time_base,
            }),
            _ => Err(crate::error::Error::invalid_argument(
                "stream is neither video nor audio; cannot derive media info",
            )),
        }
    }
}
