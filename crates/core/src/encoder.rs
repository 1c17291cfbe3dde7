//! Turns frames into packets. Opens lazily on the first frame so pixel
//! format and audio-frame-size negotiation can see a concrete frame.

use tracing::info;

use crate::dictionary::Dictionary;
use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::media_info::MediaInfo;
use crate::packet::Packet;
use crate::rational::Rational;

/// Parses `bitrate`-style strings: a bare integer, or an integer/decimal
/// followed by a `k`/`K` (×1,000) or `m`/`M` (×1,000,000) multiplier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BitrateValue(pub i64);

impl std::str::FromStr for BitrateValue {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::invalid_argument("empty bitrate string"));
        }
        let (number_part, multiplier) = match s.chars().last().unwrap() {
            'k' | 'K' => (&s[..s.len() - 1], 1_000.0),
            'm' | 'M' => (&s[..s.len() - 1], 1_000_000.0),
            _ => (s, 1.0),
        };
        let value: f64 = number_part
            .parse()
            .map_err(|_| Error::invalid_argument(format!("unparseable bitrate `{s}`")))?;
        Ok(BitrateValue((value * multiplier).round() as i64))
    }
}

#[derive(Debug, Clone)]
pub struct EncoderOptions {
    pub bitrate: Option<BitrateValue>,
    pub gop_size: Option<u32>,
    pub max_b_frames: Option<u32>,
    pub frame_rate: Option<Rational>,
    pub time_base: Rational,
    pub threads: u32,
    pub options: Dictionary,
}

impl Default for EncoderOptions {
    fn default() -> Self {
        Self {
            bitrate: None,
            gop_size: None,
            max_b_frames: None,
            frame_rate: None,
            time_base: Rational::new(1, 1000),
            threads: 0,
            options: Dictionary::new(),
        }
    }
}

enum State {
    Unopened { codec_name: String, options: EncoderOptions },
    Video(ffmpeg_next::encoder::Video),
    Audio(ffmpeg_next::encoder::Audio),
    Closed,
}

/// Codec parameters aren't known until the first frame arrives, so the
/// orchestrator must buffer the first emitted packet across the muxer's
/// `write_header` boundary (spec's lazy-init rule).
pub struct Encoder {
    state: State,
    input_info: MediaInfo,
    stream_index: usize,
    time_base: Rational,
}

impl Encoder {
    pub fn new(codec_name: &str, input_info: MediaInfo, options: EncoderOptions) -> Result<Self> {
        if ffmpeg_next::encoder::find_by_name(codec_name).is_none() {
            return Err(Error::not_found(format!("encoder `{codec_name}`")));
        }
        let time_base = options.time_base;
        Ok(Self {
            state: State::Unopened {
                codec_name: codec_name.to_string(),
                options,
            },
            input_info,
            stream_index: 0,
            time_base,
        })
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, State::Video(_) | State::Audio(_))
    }

    /// The muxer stream this encoder's packets are tagged with; assigned by
    /// the scheduler once the track's output stream has been added.
    pub fn set_stream_index(&mut self, index: usize) {
        self.stream_index = index;
    }

    pub fn stream_index(&self) -> usize {
        self.stream_index
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    /// For audio encoders with a fixed frame size (`frame_size() > 0`),
    /// returns that size so callers can re-block upstream frames to match
    /// before calling `encode`. Video encoders and variable-frame-size audio
    /// codecs (e.g. PCM) return `None`.
    pub fn audio_frame_size(&self) -> Option<i32> {
        match &self.state {
            State::Audio(enc) => {
                let n = enc.frame_size() as i32;
                if n > 0 {
                    Some(n)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// Opens the encoder against `frame`'s format ahead of the first real
    /// `encode` call, so the scheduler can query `audio_frame_size` before
    /// deciding whether re-blocking is needed.
    pub fn ensure_open(&mut self, frame: &Frame) -> Result<()> {
        self.open_with(frame)
    }

    pub fn preferred_pixel_format(&self) -> Option<ffmpeg_next::format::Pixel> {
        match &self.state {
            State::Unopened { codec_name, .. } => {
                let codec = ffmpeg_next::encoder::find_by_name(codec_name)?;
                codec.video().ok()?.formats()?.next()
            }
            _ => None,
        }
    }

    pub fn supported_pixel_formats(&self) -> Vec<ffmpeg_next::format::Pixel> {
        match &self.state {
            State::Unopened { codec_name, .. } => ffmpeg_next::encoder::find_by_name(codec_name)
                .and_then(|c| c.video().ok())
                .and_then(|v| v.formats())
                .map(|it| it.collect())
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    fn open_with(&mut self, frame: &Frame) -> Result<()> {
        let (codec_name, options) = match &self.state {
            State::Unopened { codec_name, options } => (codec_name.clone(), options.clone()),
            _ => return Ok(()),
        };
        let codec = ffmpeg_next::encoder::find_by_name(&codec_name)
            .ok_or_else(|| Error::not_found(format!("encoder `{codec_name}`")))?;
        let ctx = ffmpeg_next::codec::context::Context::new_with_codec(codec);

        match frame {
            Frame::Video(f) => {
                let mut enc = ctx.encoder().video().map_err(Error::from)?;
                enc.set_width(f.width());
                enc.set_height(f.height());
                enc.set_format(f.format());
                enc.set_time_base(options.time_base.into());
                if let Some(fr) = options.frame_rate {
                    enc.set_frame_rate(Some(fr.into()));
                }
                if let Some(b) = options.bitrate {
                    enc.set_bit_rate(b.0 as usize);
                }
                if let Some(gop) = options.gop_size {
                    enc.set_gop(gop);
                }
                if let Some(bf) = options.max_b_frames {
                    enc.set_max_b_frames(bf as usize);
                }
                enc.set_threading(ffmpeg_next::codec::threading::Config {
                    kind: ffmpeg_next::codec::threading::Type::Frame,
                    count: options.threads as usize,
                    safe: true,
                });
                let opened = enc.open_with(options.options.into()).map_err(Error::from)?;
                info!(codec = %codec_name, width = f.width(), height = f.height(), "opened video encoder");
                self.state = State::Video(opened);
            }
            Frame::Audio(f) => {
                let mut enc = ctx.encoder().audio().map_err(Error::from)?;
                enc.set_rate(f.rate() as i32);
                enc.set_format(f.format());
                enc.set_channel_layout(f.channel_layout());
                enc.set_time_base(options.time_base.into());
                if let Some(b) = options.bitrate {
                    enc.set_bit_rate(b.0 as usize);
                }
                let opened = enc.open_with(options.options.into()).map_err(Error::from)?;
                info!(codec = %codec_name, sample_rate = f.rate(), "opened audio encoder");
                self.state = State::Audio(opened);
            }
        }
        Ok(())
    }

    /// `TryAgain` maps to `Ok(None)`; caller should continue feeding.
    pub fn encode(&mut self, frame: Frame) -> Result<Option<Packet>> {
        self.open_with(&frame)?;
        let stream_index = self.stream_index;
        let time_base = self.time_base;
        match (&mut self.state, &frame) {
            (State::Video(enc), Frame::Video(f)) => {
                enc.send_frame(f).map_err(Error::from)?;
                receive_one_video(enc, stream_index, time_base)
            }
            (State::Audio(enc), Frame::Audio(f)) => {
                enc.send_frame(f).map_err(Error::from)?;
                receive_one_audio(enc, stream_index, time_base)
            }
            (State::Closed, _) => Err(Error::closed()),
            _ => Err(Error::invalid_argument("frame media type does not match encoder")),
        }
    }

    pub fn flush_packets(&mut self) -> Result<Vec<Packet>> {
        let mut out = Vec::new();
        let stream_index = self.stream_index;
        let time_base = self.time_base;
        match &mut self.state {
            State::Video(enc) => {
                enc.send_eof().map_err(Error::from)?;
                while let Some(p) = receive_one_video(enc, stream_index, time_base)? {
                    out.push(p);
                }
            }
            State::Audio(enc) => {
                enc.send_eof().map_err(Error::from)?;
                while let Some(p) = receive_one_audio(enc, stream_index, time_base)? {
                    out.push(p);
                }
            }
            State::Unopened { .. } | State::Closed => {}
        }
        Ok(out)
    }

    /// Convenience combinator: for each frame, drain all pending packets,
    /// then flush at the end.
    pub fn packets(&mut self, frames: Vec<Frame>) -> Result<Vec<Packet>> {
        let mut out = Vec::new();
        for frame in frames {
            if let Some(p) = self.encode(frame)? {
                out.push(p);
            }
        }
        out.extend(self.flush_packets()?);
        Ok(out)
    }

    pub fn close(&mut self) {
        self.state = State::Closed;
    }

    pub fn input_info(&self) -> MediaInfo {
        self.input_info
    }
}

fn receive_one_video(enc: &mut ffmpeg_next::encoder::Video, stream_index: usize, time_base: Rational) -> Result<Option<Packet>> {
    let mut raw = ffmpeg_next::Packet::empty();
    match enc.receive_packet(&mut raw) {
        Ok(()) => Ok(Some(Packet::from_ffmpeg(raw, stream_index).with_time_base(time_base))),
        Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::ffi::EAGAIN => Ok(None),
        Err(ffmpeg_next::Error::Eof) => Ok(None),
        Err(e) => Err(Error::from(e)),
    }
}

fn receive_one_audio(enc: &mut ffmpeg_next::encoder::Audio, stream_index: usize, time_base: Rational) -> Result<Option<Packet>> {
    let mut raw = ffmpeg_next::Packet::empty();
    match enc.receive_packet(&mut raw) {
        Ok(()) => Ok(Some(Packet::from_ffmpeg(raw, stream_index).with_time_base(time_base))),
        Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::ffi::EAGAIN => Ok(None),
        Err(ffmpeg_next::Error::Eof) => Ok(None),
        Err(e) => Err(Error::from(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("500000", 500_000; "bare integer")]
    #[test_case("500k", 500_000; "k suffix")]
    #[test_case("500K", 500_000; "uppercase K suffix")]
    #[test_case("1.5M", 1_500_000; "decimal m suffix")]
    #[test_case("2m", 2_000_000; "lowercase m suffix")]
    fn parses_valid_bitrate_strings(input: &str, expected: i64) {
        let parsed: BitrateValue = input.parse().unwrap();
        assert_eq!(parsed.0, expected);
    }

    #[test_case(""; "empty string")]
    #[test_case("not-a-number"; "garbage")]
    #[test_case("k"; "suffix with no digits")]
    fn rejects_invalid_bitrate_strings(input: &str) {
        let err = input.parse::<BitrateValue>().unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
    }

    #[test]
    fn unknown_codec_name_fails_not_found() {
        let info = MediaInfo::Video {
            width: 16,
            height: 16,
            pixel_format: ffmpeg_next::format::Pixel::YUV420P,
            frame_rate: Rational::new(30, 1),
            time_base: Rational::new(1, 30),
            sample_aspect_ratio: Rational::new(1, 1),
        };
        let err = Encoder::new("definitely_not_a_real_codec", info, EncoderOptions::default()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }
}
