//! Opaque decoded unit, produced by decoders and frame sources, consumed by
//! filters and encoders.

use crate::rational::Rational;

/// A decoded frame. Video and audio are kept as a sealed variant so stage
/// adjacency can be checked by matching on media type without downcasting.
pub enum Frame {
    Video(ffmpeg_next::frame::Video),
    Audio(ffmpeg_next::frame::Audio),
}

impl Frame {
    pub fn pts(&self) -> Option<i64> {
        match self {
            Frame::Video(f) => f.pts(),
            Frame::Audio(f) => f.pts(),
        }
    }

    pub fn set_pts(&mut self, pts: Option<i64>) {
        match self {
            Frame::Video(f) => f.set_pts(pts),
            Frame::Audio(f) => f.set_pts(pts),
        }
    }

    pub fn best_effort_timestamp(&self) -> Option<i64> {
        match self {
            Frame::Video(f) => f.timestamp(),
            Frame::Audio(f) => f.timestamp(),
        }
    }

    pub fn is_key_frame(&self) -> bool {
        match self {
            Frame::Video(f) => f.is_key(),
            Frame::Audio(f) => f.is_key(),
        }
    }

    pub fn as_video(&self) -> Option<&ffmpeg_next::frame::Video> {
        match self {
            Frame::Video(f) => Some(f),
            Frame::Audio(_) => None,
        }
    }

    pub fn as_audio(&self) -> Option<&ffmpeg_next::frame::Audio> {
        match self {
            Frame::Audio(f) => Some(f),
            Frame::Video(_) => None,
        }
    }

    pub fn into_video(self) -> Option<ffmpeg_next::frame::Video> {
        match self {
            Frame::Video(f) => Some(f),
            Frame::Audio(_) => None,
        }
    }

    pub fn into_audio(self) -> Option<ffmpeg_next::frame::Audio> {
        match self {
            Frame::Audio(f) => Some(f),
            Frame::Video(_) => None,
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, Frame::Video(_))
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, Frame::Audio(_))
    }
}

impl From<ffmpeg_next::frame::Video> for Frame {
    fn from(frame: ffmpeg_next::frame::Video) -> Self {
        Frame::Video(frame)
    }
}

impl From<ffmpeg_next::frame::Audio> for Frame {
    fn from(frame: ffmpeg_next::frame::Audio) -> Self {
        Frame::Audio(frame)
    }
}

/// Descriptive info for a video frame, used when configuring a filter graph
/// or encoder ahead of the first concrete frame.
#[derive(Debug, Clone, Copy)]
pub struct VideoFrameInfo {
    pub width: u32,
    pub height: u32,
    pub format: ffmpeg_next::format::Pixel,
    pub time_base: Rational,
    pub frame_rate: Rational,
    pub sample_aspect_ratio: Rational,
}

/// Descriptive info for an audio frame.
#[derive(Debug, Clone, Copy)]
pub struct AudioFrameInfo {
    pub sample_rate: u32,
    pub format: ffmpeg_next::format::Sample,
    pub channel_layout: ffmpeg_next::channel_layout::ChannelLayout,
    pub time_base: Rational,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_frame_info_is_copy() {
        let info = VideoFrameInfo {
            width: 1280,
            height: 720,
            format: ffmpeg_next::format::Pixel::YUV420P,
            time_base: Rational::new(1, 30),
            frame_rate: Rational::new(30, 1),
            sample_aspect_ratio: Rational::new(1, 1),
        };
        let copied = info;
        pretty_assertions::assert_eq!((copied.width, copied.height), (1280, 720));
    }
}
