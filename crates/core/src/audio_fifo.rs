//! Per-format, per-channel-count sample queue that reconciles encoders
//! requiring a fixed frame size with upstream frames of varying size.
//!
//! `ffmpeg-next`'s safe layer doesn't wrap `AVAudioFifo`, so this goes
//! through `ffmpeg_next::ffi` directly, same as the hardware-context façade.

use ffmpeg_next::ffi;

use crate::error::{Error, ErrorKind, Result};

/// Invariant: `size() + space() >= initial_capacity` always holds; samples
/// are FIFO; planar buffers have one slice per channel, interleaved have one.
pub struct AudioFifo {
    raw: *mut ffi::AVAudioFifo,
    sample_format: ffmpeg_next::format::Sample,
    channels: i32,
    initial_capacity: i32,
}

unsafe impl Send for AudioFifo {}

impl AudioFifo {
    pub fn new(sample_format: ffmpeg_next::format::Sample, channels: i32, initial_capacity: i32) -> Result<Self> {
        let raw = unsafe { ffi::av_audio_fifo_alloc(sample_format.into(), channels, initial_capacity) };
        if raw.is_null() {
            return Err(Error::new(ErrorKind::ResourceExhausted, "av_audio_fifo_alloc returned null"));
        }
        Ok(Self {
            raw,
            sample_format,
            channels,
            initial_capacity,
        })
    }

    /// planar: `buffers.len() == channels`; interleaved: `buffers.len() == 1`.
    pub fn write(&mut self, buffers: &[&[u8]], nb_samples: i32) -> Result<i32> {
        self.check_buffer_shape(buffers.len())?;
        let mut ptrs: Vec<*mut std::ffi::c_void> =
            buffers.iter().map(|b| b.as_ptr() as *mut std::ffi::c_void).collect();
        let rc = unsafe { ffi::av_audio_fifo_write(self.raw, ptrs.as_mut_ptr(), nb_samples) };
        if rc < 0 {
            return Err(rc.to_ffi_error("av_audio_fifo_write"));
        }
        Ok(rc)
    }

    pub fn read(&mut self, buffers: &mut [&mut [u8]], nb_samples: i32) -> Result<i32> {
        self.check_buffer_shape(buffers.len())?;
        let mut ptrs: Vec<*mut std::ffi::c_void> =
            buffers.iter_mut().map(|b| b.as_mut_ptr() as *mut std::ffi::c_void).collect();
        let rc = unsafe { ffi::av_audio_fifo_read(self.raw, ptrs.as_mut_ptr(), nb_samples) };
        if rc < 0 {
            return Err(rc.to_ffi_error("av_audio_fifo_read"));
        }
        Ok(rc)
    }

    pub fn peek(&self, buffers: &mut [&mut [u8]], nb_samples: i32) -> Result<i32> {
        self.check_buffer_shape(buffers.len())?;
        let mut ptrs: Vec<*mut std::ffi::c_void> =
            buffers.iter_mut().map(|b| b.as_mut_ptr() as *mut std::ffi::c_void).collect();
        let rc = unsafe { ffi::av_audio_fifo_peek(self.raw, ptrs.as_mut_ptr(), nb_samples) };
        if rc < 0 {
            return Err(rc.to_ffi_error("av_audio_fifo_peek"));
        }
        Ok(rc)
    }

    pub fn drain(&mut self, nb_samples: i32) -> Result<()> {
        let rc = unsafe { ffi::av_audio_fifo_drain(self.raw, nb_samples) };
        if rc < 0 {
            return Err(rc.to_ffi_error("av_audio_fifo_drain"));
        }
        Ok(())
    }

    pub fn reset(&mut self) {
        unsafe { ffi::av_audio_fifo_reset(self.raw) };
    }

    pub fn realloc(&mut self, new_capacity: i32) -> Result<()> {
        let rc = unsafe { ffi::av_audio_fifo_realloc(self.raw, new_capacity) };
        if rc < 0 {
            return Err(rc.to_ffi_error("av_audio_fifo_realloc"));
        }
        Ok(())
    }

    pub fn size(&self) -> i32 {
        unsafe { ffi::av_audio_fifo_size(self.raw) }
    }

    pub fn space(&self) -> i32 {
        unsafe { ffi::av_audio_fifo_space(self.raw) }
    }

    pub fn initial_capacity(&self) -> i32 {
        self.initial_capacity
    }

    pub fn sample_format(&self) -> ffmpeg_next::format::Sample {
        self.sample_format
    }

    fn check_buffer_shape(&self, len: usize) -> Result<()> {
        let is_planar = self.sample_format.is_planar();
        let expected = if is_planar { self.channels as usize } else { 1 };
        if len != expected {
            return Err(Error::invalid_argument(format!(
                "audio fifo expects {expected} buffer(s) for this format, got {len}"
            )));
        }
        Ok(())
    }
}

impl Drop for AudioFifo {
    fn drop(&mut self) {
        if !self.raw.is_null() {
            unsafe { ffi::av_audio_fifo_free(self.raw) };
            self.raw = std::ptr::null_mut();
        }
    }
}

trait ToFfiError {
    fn to_ffi_error(self, context: &str) -> Error;
}

impl ToFfiError for i32 {
    fn to_ffi_error(self, context: &str) -> Error {
        crate::error::FFmpegErrorExt::to_avflow_error(self, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_reports_initial_capacity() {
        let fifo = AudioFifo::new(ffmpeg_next::format::Sample::I16(ffmpeg_next::format::sample::Type::Packed), 2, 1024).unwrap();
        assert_eq!(fifo.initial_capacity(), 1024);
        assert_eq!(fifo.size(), 0);
    }

    #[test]
    fn interleaved_write_rejects_planar_shaped_buffers() {
        let mut fifo = AudioFifo::new(ffmpeg_next::format::Sample::I16(ffmpeg_next::format::sample::Type::Packed), 2, 1024).unwrap();
        let left = [0u8; 8];
        let right = [0u8; 8];
        let err = fifo.write(&[&left, &right], 2).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InvalidArgument);
    }

    proptest::proptest! {
        #[test]
        fn interleaved_round_trip_preserves_bytes(samples in proptest::collection::vec(0u8..=255, 2..512)) {
            // One mono I16 sample is two bytes; truncate to a whole number of samples.
            let nb_samples = samples.len() / 2;
            let bytes = &samples[..nb_samples * 2];

            let mut fifo = AudioFifo::new(
                ffmpeg_next::format::Sample::I16(ffmpeg_next::format::sample::Type::Packed),
                1,
                (nb_samples as i32).max(1),
            ).unwrap();
            fifo.write(&[bytes], nb_samples as i32).unwrap();

            let mut out = vec![0u8; bytes.len()];
            let read = fifo.read(&mut [&mut out[..]], nb_samples as i32).unwrap();

            proptest::prop_assert_eq!(read, nb_samples as i32);
            proptest::prop_assert_eq!(out, bytes.to_vec());
        }
    }
}
