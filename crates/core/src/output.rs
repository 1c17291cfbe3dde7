//! Muxer: creates an output container, adds streams, writes header,
//! interleaved packets, and trailer.

use std::sync::Mutex;

use tracing::info;

use crate::dictionary::Dictionary;
use crate::error::{Error, ErrorKind, FFmpegErrorExt, Result};
use crate::io::{build_avio_context, CustomIo, RawAvio};
use crate::media_info::CodecParameters;
use crate::packet::Packet;
use crate::rational::Rational;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MuxerState {
    Configuring,
    Running,
    Closed,
}

struct Inner {
    ctx: ffmpeg_next::format::context::Output,
    state: MuxerState,
    stream_time_bases: Vec<Rational>,
    avio: Option<RawAvio>,
}

/// Guarded by a mutex whose critical section is one `write_packet` call, so
/// a shared sink in a named pipeline serializes writes from independent
/// track loops without serializing the rest of each track's work.
pub struct MediaOutput {
    inner: Mutex<Inner>,
    destination_label: String,
}

impl MediaOutput {
    pub fn create(path: &str) -> Result<Self> {
        let ctx = ffmpeg_next::format::output(&path).map_err(Error::from)?;
        Ok(Self {
            inner: Mutex::new(Inner {
                ctx,
                state: MuxerState::Configuring,
                stream_time_bases: Vec::new(),
                avio: None,
            }),
            destination_label: path.to_string(),
        })
    }

    pub fn create_with_format(path: &str, format_name: &str) -> Result<Self> {
        let format = ffmpeg_next::format::find_output_format(format_name)
            .ok_or_else(|| Error::not_found(format!("output format `{format_name}`")))?;
        let ctx = ffmpeg_next::format::output_as(&path, format).map_err(Error::from)?;
        Ok(Self {
            inner: Mutex::new(Inner {
                ctx,
                state: MuxerState::Configuring,
                stream_time_bases: Vec::new(),
                avio: None,
            }),
            destination_label: path.to_string(),
        })
    }

    /// Creates a muxer writing through `io`'s callbacks instead of a
    /// filesystem path (spec §4.2's custom-byte-stream constructor).
    /// `format_name` selects the container the way `create_with_format`
    /// does, since a pathless output context can't guess it from an
    /// extension.
    pub fn create_with_io(io: CustomIo, format_name: &str) -> Result<Self> {
        let mut avio = build_avio_context(io, true)?;
        let pb = avio.as_mut_ptr();

        let mut output_ptr: *mut ffmpeg_next::ffi::AVFormatContext = std::ptr::null_mut();
        let cformat = std::ffi::CString::new(format_name)
            .map_err(|_| Error::invalid_argument("format name contains NUL"))?;
        let rc = unsafe {
            ffmpeg_next::ffi::avformat_alloc_output_context2(
                &mut output_ptr,
                std::ptr::null_mut(),
                cformat.as_ptr(),
                std::ptr::null(),
            )
        };
        if rc < 0 {
            return Err(rc.to_avflow_error("avformat_alloc_output_context2"));
        }
        unsafe {
            (*output_ptr).pb = pb;
        }
        let ctx = unsafe { ffmpeg_next::format::context::Output::wrap(output_ptr) };

        Ok(Self {
            inner: Mutex::new(Inner {
                ctx,
                state: MuxerState::Configuring,
                stream_time_bases: Vec::new(),
                avio: Some(avio),
            }),
            destination_label: format!("<custom-io:{format_name}>"),
        })
    }

    pub fn add_stream_from(&self, codec_parameters: &CodecParameters, time_base: Rational) -> Result<usize> {
        let mut guard = self.inner.lock().unwrap();
        if guard.state != MuxerState::Configuring {
            return Err(Error::invalid_argument("cannot add a stream after write_header"));
        }
        let codec = ffmpeg_next::codec::Id::from(codec_parameters.codec_id);
        let mut stream = guard.ctx.add_stream(ffmpeg_next::codec::encoder::find(codec)).map_err(Error::from)?;
        stream.set_time_base(time_base);
        let index = stream.index();
        guard.stream_time_bases.push(time_base);
        Ok(index)
    }

    pub fn write_header(&self) -> Result<()> {
        self.write_header_with_options(Dictionary::new())
    }

    pub fn write_header_with_options(&self, options: Dictionary) -> Result<()> {
        let mut guard = self.inner.lock().unwrap();
        if guard.state != MuxerState::Configuring {
            return Err(Error::invalid_argument("write_header called more than once"));
        }
        guard.ctx.write_header_with(options.into()).map_err(Error::from)?;
        guard.state = MuxerState::Running;
        info!(destination = %self.destination_label, "wrote muxer header");
        Ok(())
    }

    pub fn write_packet(&self, mut pkt: Packet, use_interleaving: bool) -> Result<()> {
        let mut guard = self.inner.lock().unwrap();
        if guard.state != MuxerState::Running {
            return Err(Error::closed());
        }
        let stream_index = pkt.stream_index();
        let dest_tb = *guard
            .stream_time_bases
            .get(stream_index)
            .ok_or_else(|| Error::invalid_argument("packet stream index out of bounds"))?;
        if let (Some(pts), Some(dts)) = (pkt.pts(), pkt.dts()) {
            if dts > pts {
                return Err(Error::invalid_argument("packet dts must not exceed pts"));
            }
        }
        pkt.set_stream_index(stream_index);
        let source_tb = pkt.time_base();
        let pkt = crate::pipeline::wiring::rescale_packet_into_muxer(pkt, source_tb, dest_tb);
        let mut raw = pkt.into_ffmpeg();
        if use_interleaving {
            raw.write_interleaved(&mut guard.ctx).map_err(Error::from)
        } else {
            raw.write(&mut guard.ctx).map(|_| ()).map_err(Error::from)
        }
    }

    pub fn write_trailer(&self) -> Result<()> {
        let mut guard = self.inner.lock().unwrap();
        if guard.state == MuxerState::Closed {
            return Ok(());
        }
        if guard.state != MuxerState::Running {
            return Err(Error::new(ErrorKind::InvalidArgument, "write_trailer before write_header"));
        }
        guard.ctx.write_trailer().map_err(Error::from)?;
        guard.state = MuxerState::Closed;
        info!(destination = %self.destination_label, "wrote muxer trailer");
        Ok(())
    }

    pub fn header_was_written(&self) -> bool {
        let guard = self.inner.lock().unwrap();
        matches!(guard.state, MuxerState::Running | MuxerState::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_header_twice_fails() {
        let output = MediaOutput::create("/tmp/avflow_test_output_nonexistent_dir/x.mp4");
        assert!(output.is_err());
    }

    #[test]
    fn create_against_a_writable_scratch_path_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.mp4");
        let output = MediaOutput::create(path.to_str().unwrap());
        assert!(output.is_ok());
    }
}
