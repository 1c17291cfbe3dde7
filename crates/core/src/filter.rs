//! Wraps a filter graph described by a textual expression, lazily built on
//! the first frame so the buffer source can be configured with a concrete
//! format.

use crate::error::{Error, ErrorKind, Result};
use crate::frame::Frame;
use crate::media_info::MediaInfo;

/// State machine mirrors the encoder's lazy-open: the graph doesn't exist
/// until the first frame arrives, then it's either reused or rebuilt if the
/// input format changed underneath it.
enum State {
    Unconfigured,
    Configured {
        graph: ffmpeg_next::filter::Graph,
        input: MediaInfo,
        description: String,
    },
}

pub struct FilterApi {
    expression: String,
    input_info: MediaInfo,
    state: State,
}

impl FilterApi {
    /// Built from a textual filter graph expression plus the `MediaInfo` the
    /// caller's frames will carry — the description of the configuration
    /// frame-derived fields (frame rate, time base, sample aspect ratio) fall
    /// back to when the producing stage doesn't stamp them itself.
    pub fn new(expression: impl Into<String>, input_info: MediaInfo) -> Self {
        Self {
            expression: expression.into(),
            input_info,
            state: State::Unconfigured,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, State::Configured { .. })
    }

    pub fn graph_description(&self) -> Option<&str> {
        match &self.state {
            State::Configured { description, .. } => Some(description),
            State::Unconfigured => None,
        }
    }

    fn ensure_configured(&mut self, info: MediaInfo) -> Result<()> {
        let needs_rebuild = match &self.state {
            State::Unconfigured => true,
            State::Configured { input, .. } => !media_info_matches(input, &info),
        };
        if !needs_rebuild {
            return Ok(());
        }

        let mut graph = ffmpeg_next::filter::Graph::new();
        let (src_args, src_name, sink_name) = match info {
            MediaInfo::Video {
                width,
                height,
                pixel_format,
                time_base,
                sample_aspect_ratio,
                ..
            } => {
                let args = format!(
                    "video_size={width}x{height}:pix_fmt={}:time_base={}/{}:pixel_aspect={}/{}",
                    pixel_format.descriptor().map(|d| d.name().to_string()).unwrap_or_default(),
                    time_base.numerator(),
                    time_base.denominator(),
                    sample_aspect_ratio.numerator(),
                    sample_aspect_ratio.denominator(),
                );
                (args, "buffer", "buffersink")
            }
            MediaInfo::Audio {
                sample_rate,
                sample_format,
                channel_layout,
                time_base,
            } => {
                let args = format!(
                    "time_base={}/{}:sample_rate={sample_rate}:sample_fmt={}:channel_layout=0x{:x}",
                    time_base.numerator(),
                    time_base.denominator(),
                    sample_format.name(),
                    channel_layout.bits(),
                );
                (args, "abuffer", "abuffersink")
            }
        };

        graph
            .add(&ffmpeg_next::filter::find(src_name).ok_or_else(|| Error::not_found(src_name))?, "in", &src_args)
            .map_err(Error::from)?;
        graph
            .add(&ffmpeg_next::filter::find(sink_name).ok_or_else(|| Error::not_found(sink_name))?, "out", "")
            .map_err(Error::from)?;

        graph
            .output("in", 0)?
            .input("out", 0)?
            .parse(&self.expression)
            .map_err(Error::from)?;
        graph.validate().map_err(Error::from)?;

        let description = graph.dump();
        self.state = State::Configured {
            graph,
            input: info,
            description,
        };
        Ok(())
    }

    pub fn process(&mut self, frame: Frame) -> Result<Option<Frame>> {
        let info = self.frame_media_info(&frame)?;
        self.ensure_configured(info)?;
        self.send_frame(frame)?;
        self.receive()
    }

    pub fn process_multiple(&mut self, frames: Vec<Frame>) -> Result<Vec<Frame>> {
        let mut out = Vec::new();
        for frame in frames {
            if let Some(f) = self.process(frame)? {
                out.push(f);
            }
            while let Some(f) = self.receive()? {
                out.push(f);
            }
        }
        Ok(out)
    }

    /// Convenience combinator: runs every input frame through the graph,
    /// draining pending output after each send, then flushes at the end.
    pub fn frames(&mut self, input: impl IntoIterator<Item = Frame>) -> Result<Vec<Frame>> {
        let mut out = self.process_multiple(input.into_iter().collect())?;
        self.flush()?;
        while let Some(f) = self.receive()? {
            out.push(f);
        }
        Ok(out)
    }

    fn send_frame(&mut self, frame: Frame) -> Result<()> {
        let graph = self.graph_mut()?;
        let mut src = graph.get("in").ok_or_else(|| Error::closed())?;
        match frame {
            Frame::Video(f) => src.source().add(&f).map_err(Error::from),
            Frame::Audio(f) => src.source().add(&f).map_err(Error::from),
        }
    }

    pub fn receive(&mut self) -> Result<Option<Frame>> {
        let is_video = matches!(
            &self.state,
            State::Configured { input: MediaInfo::Video { .. }, .. }
        );
        let graph = self.graph_mut()?;
        let mut sink = graph.get("out").ok_or_else(|| Error::closed())?;
        if is_video {
            let mut frame = ffmpeg_next::frame::Video::empty();
            match sink.sink().frame(&mut frame) {
                Ok(()) => Ok(Some(Frame::Video(frame))),
                Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::ffi::EAGAIN => Ok(None),
                Err(ffmpeg_next::Error::Eof) => Ok(None),
                Err(e) => Err(Error::from(e)),
            }
        } else {
            let mut frame = ffmpeg_next::frame::Audio::empty();
            match sink.sink().frame(&mut frame) {
                Ok(()) => Ok(Some(Frame::Audio(frame))),
                Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::ffi::EAGAIN => Ok(None),
                Err(ffmpeg_next::Error::Eof) => Ok(None),
                Err(e) => Err(Error::from(e)),
            }
        }
    }

    pub fn flush(&mut self) -> Result<()> {
        let graph = self.graph_mut()?;
        let mut src = graph.get("in").ok_or_else(|| Error::closed())?;
        src.source().flush().map_err(Error::from)
    }

    pub fn send_command(&mut self, target: &str, cmd: &str, arg: &str) -> Result<String> {
        use crate::error::FFmpegErrorExt;
        use std::ffi::CString;

        let graph = self.graph_mut()?;
        let target = CString::new(target).map_err(|_| Error::invalid_argument("target contains NUL"))?;
        let cmd = CString::new(cmd).map_err(|_| Error::invalid_argument("command contains NUL"))?;
        let arg = CString::new(arg).map_err(|_| Error::invalid_argument("argument contains NUL"))?;
        let mut response = vec![0u8; 512];
        let rc = unsafe {
            ffmpeg_next::ffi::avfilter_graph_send_command(
                graph.as_mut_ptr(),
                target.as_ptr(),
                cmd.as_ptr(),
                arg.as_ptr(),
                response.as_mut_ptr() as *mut i8,
                response.len() as i32,
                0,
            )
        };
        if rc < 0 {
            return Err(rc.to_avflow_error("avfilter_graph_send_command"));
        }
        let nul = response.iter().position(|&b| b == 0).unwrap_or(response.len());
        Ok(String::from_utf8_lossy(&response[..nul]).into_owned())
    }

    pub fn queue_command(&mut self, target: &str, cmd: &str, arg: &str, at_seconds: f64) -> Result<()> {
        use crate::error::FFmpegErrorExt;
        use std::ffi::CString;

        let graph = self.graph_mut()?;
        let target = CString::new(target).map_err(|_| Error::invalid_argument("target contains NUL"))?;
        let cmd = CString::new(cmd).map_err(|_| Error::invalid_argument("command contains NUL"))?;
        let arg = CString::new(arg).map_err(|_| Error::invalid_argument("argument contains NUL"))?;
        let rc = unsafe {
            ffmpeg_next::ffi::avfilter_graph_queue_command(
                graph.as_mut_ptr(),
                target.as_ptr(),
                cmd.as_ptr(),
                arg.as_ptr(),
                0,
                at_seconds,
            )
        };
        if rc < 0 {
            return Err(rc.to_avflow_error("avfilter_graph_queue_command"));
        }
        Ok(())
    }

    fn graph_mut(&mut self) -> Result<&mut ffmpeg_next::filter::Graph> {
        match &mut self.state {
            State::Configured { graph, .. } => Ok(graph),
            State::Unconfigured => Err(Error::new(ErrorKind::InvalidArgument, "filter graph not yet configured")),
        }
    }

    /// Builds the configuration `MediaInfo` for an incoming frame, filling
    /// fields the frame itself doesn't carry (frame rate, time base, sample
    /// aspect ratio) from the caller-supplied input info rather than
    /// fabricating placeholders.
    fn frame_media_info(&self, frame: &Frame) -> Result<MediaInfo> {
        match (frame, self.input_info) {
            (
                Frame::Video(f),
                MediaInfo::Video {
                    frame_rate,
                    time_base,
                    sample_aspect_ratio,
                    ..
                },
            ) => Ok(MediaInfo::Video {
                width: f.width(),
                height: f.height(),
                pixel_format: f.format(),
                frame_rate,
                time_base,
                sample_aspect_ratio,
            }),
            (Frame::Audio(f), MediaInfo::Audio { time_base, .. }) => Ok(MediaInfo::Audio {
                sample_rate: f.rate(),
                sample_format: f.format(),
                channel_layout: f.channel_layout(),
                time_base,
            }),
            _ => Err(Error::invalid_argument("frame media type does not match filter's configured input")),
        }
    }
}

fn media_info_matches(a: &MediaInfo, b: &MediaInfo) -> bool {
    match (a, b) {
        (
            MediaInfo::Video { width: w1, height: h1, pixel_format: p1, .. },
            MediaInfo::Video { width: w2, height: h2, pixel_format: p2, .. },
        ) => w1 == w2 && h1 == h2 && p1 == p2,
        (
            MediaInfo::Audio { sample_rate: r1, sample_format: f1, .. },
            MediaInfo::Audio { sample_rate: r2, sample_format: f2, .. },
        ) => r1 == r2 && f1 == f2,
        _ => false,
    }
}

