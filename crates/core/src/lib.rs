//! `avflow` — declarative dataflow pipelines over FFmpeg.
//!
//! Composes demuxing, decoding, filtering, encoding, and muxing into a
//! single typed pipeline. The orchestrator in [`pipeline`] is the crate's
//! core: it chains the stage types below (demuxer → decoder → filter(s) →
//! encoder → muxer, or any suffix of that chain), enforces format
//! compatibility across stage boundaries, and drives both halves of
//! FFmpeg's send/receive codec APIs to deterministic shutdown.
//!
//! Consumers own their own `tracing` subscriber; this crate only emits
//! spans and events, it never installs a global one.

pub mod audio_fifo;
pub mod bsf;
pub mod decoder;
pub mod dictionary;
pub mod encoder;
pub mod error;
pub mod filter;
pub mod frame;
#[cfg(feature = "hwaccel")]
pub mod hwcontext;
pub mod input;
pub mod io;
pub mod media_info;
pub mod output;
pub mod packet;
pub mod pipeline;
pub mod rational;

pub use dictionary::Dictionary;
pub use error::{Error, ErrorKind, Result};
pub use frame::Frame;
pub use input::MediaInput;
pub use media_info::MediaInfo;
pub use output::MediaOutput;
pub use packet::Packet;
pub use pipeline::{Control, PipelineStage};
pub use rational::Rational;

/// Initializes FFmpeg's global codec/filter/format registry. Must be called
/// once per process before any other function in this crate is used; safe
/// to call more than once (subsequent calls are no-ops), but callers that
/// might race their first call should serialize it themselves, e.g. behind
/// a `std::sync::Once`.
pub fn init() -> Result<()> {
    ffmpeg_next::init().map_err(Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn init_is_idempotent() {
        init().unwrap();
        init().unwrap();
    }
}
