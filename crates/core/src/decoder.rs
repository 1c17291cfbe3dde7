//! Turns packets of one stream into decoded frames.

use tracing::{debug, info};

use crate::error::{Error, ErrorKind, Result};
use crate::frame::Frame;
use crate::media_info::CodecParameters;
use crate::packet::Packet;

#[cfg(feature = "hwaccel")]
use crate::hwcontext::HardwareDeviceContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Running,
    Flushing,
    Closed,
}

enum Inner {
    Video(ffmpeg_next::decoder::Video),
    Audio(ffmpeg_next::decoder::Audio),
}

/// `Open → Running → Flushing → Closed`. In `Running`, packets are accepted
/// until the native backend signals `TryAgain`; the caller must drain
/// frames before submitting more. `Flushing` means a null packet has been
/// sent and only receives remain.
pub struct Decoder {
    inner: Inner,
    state: State,
    #[cfg(feature = "hwaccel")]
    hardware: Option<HardwareDeviceContext>,
}

impl Decoder {
    pub fn from_codec_parameters(codec_parameters: &CodecParameters) -> Result<Self> {
        let codec = ffmpeg_next::decoder::find(codec_parameters.codec_id)
            .ok_or_else(|| Error::not_found(format!("decoder for codec id {:?}", codec_parameters.codec_id)))?;
        let ctx = ffmpeg_next::codec::context::Context::new_with_codec(codec);
        let inner = match codec_parameters.codec_type {
            ffmpeg_next::media::Type::Video => Inner::Video(ctx.decoder().video().map_err(Error::from)?),
            ffmpeg_next::media::Type::Audio => Inner::Audio(ctx.decoder().audio().map_err(Error::from)?),
            other => {
                return Err(Error::invalid_argument(format!(
                    "decoder does not support media type {other:?}"
                )))
            }
        };
        info!(codec_id = ?codec_parameters.codec_id, "opened decoder");
        Ok(Self {
            inner,
            state: State::Open,
            #[cfg(feature = "hwaccel")]
            hardware: None,
        })
    }

    #[cfg(feature = "hwaccel")]
    pub fn bind_hardware(&mut self, device: HardwareDeviceContext) {
        self.hardware = Some(device);
    }

    pub fn is_video(&self) -> bool {
        matches!(self.inner, Inner::Video(_))
    }

    /// A send-side `EAGAIN` means the decoder's output queue is full, not
    /// that the packet was rejected: drain every pending frame with
    /// `receive_frame` and retry the send, rather than bubbling `TryAgain`
    /// up as a hard error (soft `TryAgain` is transparent to callers).
    pub fn decode(&mut self, pkt: &Packet) -> Result<Vec<Frame>> {
        if self.state == State::Closed {
            return Err(Error::closed());
        }
        self.state = State::Running;
        match &mut self.inner {
            Inner::Video(dec) => {
                let mut out = Vec::new();
                loop {
                    match dec.send_packet(pkt.as_ffmpeg()) {
                        Ok(()) => break,
                        Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::ffi::EAGAIN => {
                            let mut frame = ffmpeg_next::frame::Video::empty();
                            match dec.receive_frame(&mut frame) {
                                Ok(()) => out.push(Frame::Video(frame)),
                                Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::ffi::EAGAIN => {
                                    return Err(Error::new(
                                        ErrorKind::TryAgain,
                                        "decoder reports EAGAIN on both send and receive",
                                    ));
                                }
                                Err(e) => return Err(Error::from(e)),
                            }
                        }
                        Err(e) => return Err(Error::from(e)),
                    }
                }
                loop {
                    let mut frame = ffmpeg_next::frame::Video::empty();
                    match dec.receive_frame(&mut frame) {
                        Ok(()) => out.push(Frame::Video(frame)),
                        Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::ffi::EAGAIN => break,
                        Err(e) => return Err(Error::from(e)),
                    }
                }
                Ok(out)
            }
            Inner::Audio(dec) => {
                let mut out = Vec::new();
                loop {
                    match dec.send_packet(pkt.as_ffmpeg()) {
                        Ok(()) => break,
                        Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::ffi::EAGAIN => {
                            let mut frame = ffmpeg_next::frame::Audio::empty();
                            match dec.receive_frame(&mut frame) {
                                Ok(()) => out.push(Frame::Audio(frame)),
                                Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::ffi::EAGAIN => {
                                    return Err(Error::new(
                                        ErrorKind::TryAgain,
                                        "decoder reports EAGAIN on both send and receive",
                                    ));
                                }
                                Err(e) => return Err(Error::from(e)),
                            }
                        }
                        Err(e) => return Err(Error::from(e)),
                    }
                }
                loop {
                    let mut frame = ffmpeg_next::frame::Audio::empty();
                    match dec.receive_frame(&mut frame) {
                        Ok(()) => out.push(Frame::Audio(frame)),
                        Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::ffi::EAGAIN => break,
                        Err(e) => return Err(Error::from(e)),
                    }
                }
                Ok(out)
            }
        }
    }

    /// Sends a null packet, then drains every frame the decoder still holds.
    pub fn flush_frames(&mut self) -> Result<Vec<Frame>> {
        if self.state == State::Closed {
            return Err(Error::closed());
        }
        self.state = State::Flushing;
        let mut out = Vec::new();
        match &mut self.inner {
            Inner::Video(dec) => {
                dec.send_eof().map_err(Error::from)?;
                let mut frame = ffmpeg_next::frame::Video::empty();
                loop {
                    match dec.receive_frame(&mut frame) {
                        Ok(()) => out.push(Frame::Video(std::mem::replace(&mut frame, ffmpeg_next::frame::Video::empty()))),
                        Err(ffmpeg_next::Error::Eof) => break,
                        Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::ffi::EAGAIN => break,
                        Err(e) => return Err(Error::from(e)),
                    }
                }
            }
            Inner::Audio(dec) => {
                dec.send_eof().map_err(Error::from)?;
                let mut frame = ffmpeg_next::frame::Audio::empty();
                loop {
                    match dec.receive_frame(&mut frame) {
                        Ok(()) => out.push(Frame::Audio(std::mem::replace(&mut frame, ffmpeg_next::frame::Audio::empty()))),
                        Err(ffmpeg_next::Error::Eof) => break,
                        Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::ffi::EAGAIN => break,
                        Err(e) => return Err(Error::from(e)),
                    }
                }
            }
        }
        debug!(frames = out.len(), "decoder flush drained frames");
        Ok(out)
    }

    pub fn close(&mut self) {
        if self.state != State::Closed {
            debug!("closing decoder");
        }
        self.state = State::Closed;
    }
}

impl Drop for Decoder {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_decoder_rejects_decode() {
        let codec = ffmpeg_next::decoder::find(ffmpeg_next::codec::Id::H264);
        if codec.is_none() {
            return;
        }
        let params = CodecParameters {
            codec_id: ffmpeg_next::codec::Id::H264,
            codec_type: ffmpeg_next::media::Type::Video,
            video: Some(crate::media_info::VideoCodecFields {
                width: 16,
                height: 16,
                pixel_format: ffmpeg_next::format::Pixel::YUV420P,
            }),
            audio: None,
            extradata: Vec::new(),
        };
        let mut decoder = Decoder::from_codec_parameters(&params).unwrap();
        decoder.close();
        let err = decoder.decode(&Packet::empty()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Closed);
    }
}
