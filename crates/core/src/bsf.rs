//! Packet-level transform that does not decode (e.g. `h264_mp4toannexb`).
//!
//! `ffmpeg-next` does not wrap `AVBSFContext`, so this is built directly on
//! `ffmpeg_next::ffi`, following the same pattern as other out-of-tree
//! bitstream-filter wrappers in the ecosystem.

use std::ffi::CString;
use std::ptr;

use ffmpeg_next::ffi;

use crate::error::{Error, FFmpegErrorExt, Result};
use crate::media_info::CodecParameters;
use crate::packet::Packet;
use crate::rational::Rational;

/// Bound to one stream's codec parameters at construction.
pub struct BitStreamFilterApi {
    raw: *mut ffi::AVBSFContext,
    name: String,
    input_time_base: Rational,
    output_time_base: Option<Rational>,
    stream_index: usize,
}

unsafe impl Send for BitStreamFilterApi {}

impl BitStreamFilterApi {
    pub fn new(name: &str, codec_parameters: &CodecParameters, input_time_base: Rational) -> Result<Self> {
        let cname = CString::new(name).map_err(|_| Error::invalid_argument("filter name contains NUL"))?;
        let filter = unsafe { ffi::av_bsf_get_by_name(cname.as_ptr()) };
        if filter.is_null() {
            return Err(Error::not_found(format!("bitstream filter `{name}`")));
        }

        let mut raw: *mut ffi::AVBSFContext = ptr::null_mut();
        let rc = unsafe { ffi::av_bsf_alloc(filter, &mut raw) };
        if rc < 0 {
            return Err(rc.to_avflow_error("av_bsf_alloc"));
        }

        unsafe {
            (*(*raw).par_in).codec_id = codec_parameters.codec_id.into();
            (*(*raw).par_in).codec_type = codec_parameters.codec_type.into();
            if let Some(v) = &codec_parameters.video {
                (*(*raw).par_in).width = v.width as i32;
                (*(*raw).par_in).height = v.height as i32;
            }
            (*raw).time_base_in = input_time_base.into();
        }

        let rc = unsafe { ffi::av_bsf_init(raw) };
        if rc < 0 {
            unsafe { ffi::av_bsf_free(&mut raw) };
            return Err(rc.to_avflow_error("av_bsf_init"));
        }

        Ok(Self {
            raw,
            name: name.to_string(),
            input_time_base,
            output_time_base: None,
            stream_index: 0,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn input_time_base(&self) -> Rational {
        self.input_time_base
    }

    pub fn output_time_base(&self) -> Option<Rational> {
        self.output_time_base
    }

    /// The muxer stream this filter's packets are tagged with; assigned by
    /// the scheduler once the track's output stream has been added.
    pub fn set_stream_index(&mut self, index: usize) {
        self.stream_index = index;
    }

    pub fn stream_index(&self) -> usize {
        self.stream_index
    }

    pub fn send(&mut self, pkt: &mut Packet) -> Result<()> {
        let rc = unsafe { ffi::av_bsf_send_packet(self.raw, pkt.as_ffmpeg().as_ptr() as *mut _) };
        if rc < 0 {
            return Err(rc.to_avflow_error("av_bsf_send_packet"));
        }
        if self.output_time_base.is_none() {
            self.output_time_base = Some(unsafe { (*self.raw).time_base_out }.into());
        }
        Ok(())
    }

    pub fn receive(&mut self) -> Result<Option<Packet>> {
        let mut raw_pkt = ffmpeg_next::Packet::empty();
        let rc = unsafe { ffi::av_bsf_receive_packet(self.raw, raw_pkt.as_mut_ptr()) };
        if rc == -ffi::EAGAIN || rc == ffi::AVERROR_EOF {
            return Ok(None);
        }
        if rc < 0 {
            return Err(rc.to_avflow_error("av_bsf_receive_packet"));
        }
        let time_base = self.output_time_base.unwrap_or(self.input_time_base);
        Ok(Some(Packet::from_ffmpeg(raw_pkt, self.stream_index).with_time_base(time_base)))
    }

    /// Drains all outputs the filter produces for one input packet.
    pub fn process(&mut self, mut pkt: Packet) -> Result<Vec<Packet>> {
        self.send(&mut pkt)?;
        let mut out = Vec::new();
        loop {
            match self.receive()? {
                Some(p) => out.push(p),
                None => break,
            }
        }
        Ok(out)
    }

    pub fn flush(&mut self) -> Result<Vec<Packet>> {
        let rc = unsafe { ffi::av_bsf_send_packet(self.raw, ptr::null_mut()) };
        if rc < 0 && rc != ffi::AVERROR_EOF {
            return Err(rc.to_avflow_error("av_bsf_send_packet(eof)"));
        }
        let mut out = Vec::new();
        loop {
            match self.receive()? {
                Some(p) => out.push(p),
                None => break,
            }
        }
        Ok(out)
    }
}

impl Drop for BitStreamFilterApi {
    fn drop(&mut self) {
        if !self.raw.is_null() {
            unsafe { ffi::av_bsf_free(&mut self.raw) };
            self.raw = ptr::null_mut();
        }
    }
}
