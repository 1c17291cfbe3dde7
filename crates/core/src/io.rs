//! Custom I/O adapter so a caller can supply read/write/seek callbacks
//! instead of a filesystem path, per spec §6's `(read_cb, write_cb?,
//! seek_cb?)` contract.

use std::io::{Read, Seek, SeekFrom, Write};

use crate::error::{Error, ErrorKind, Result};

/// Configuration for a custom I/O adapter: the callbacks plus the buffer
/// size FFmpeg's `AVIOContext` should allocate for them.
pub struct CustomIoConfig {
    pub buffer_size: usize,
}

impl Default for CustomIoConfig {
    fn default() -> Self {
        Self { buffer_size: 32 * 1024 }
    }
}

/// Adapts a boxed reader into the `Read + Seek` boundary FFmpeg's AVIO glue
/// is built on. Held behind `Box<dyn>` because the caller's source (a
/// network socket, an in-memory cursor, a FUSE handle) is not known to this
/// crate.
pub struct CustomIo {
    reader: Option<Box<dyn Read + Send>>,
    writer: Option<Box<dyn Write + Send>>,
    seeker: Option<Box<dyn Fn(SeekFrom) -> std::io::Result<u64> + Send>>,
    config: CustomIoConfig,
}

impl CustomIo {
    pub fn reader(reader: impl Read + Send + 'static, config: CustomIoConfig) -> Self {
        Self {
            reader: Some(Box::new(reader)),
            writer: None,
            seeker: None,
            config,
        }
    }

    pub fn writer(writer: impl Write + Send + 'static, config: CustomIoConfig) -> Self {
        Self {
            reader: None,
            writer: Some(Box::new(writer)),
            seeker: None,
            config,
        }
    }

    pub fn with_seek(mut self, seeker: impl Fn(SeekFrom) -> std::io::Result<u64> + Send + 'static) -> Self {
        self.seeker = Some(Box::new(seeker));
        self
    }

    pub fn buffer_size(&self) -> usize {
        self.config.buffer_size
    }

    pub fn is_seekable(&self) -> bool {
        self.seeker.is_some()
    }

    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| Error::invalid_argument("custom io has no reader configured"))?;
        reader.read(buf).map_err(Error::from)
    }

    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| Error::invalid_argument("custom io has no writer configured"))?;
        writer.write(buf).map_err(Error::from)
    }

    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let seeker = self
            .seeker
            .as_ref()
            .ok_or_else(|| Error::new(ErrorKind::InvalidArgument, "custom io is not seekable"))?;
        seeker(pos).map_err(Error::from)
    }
}

/// A concrete `Read + Seek` wrapper over an in-memory buffer, useful for
/// tests and for `CustomIo` sources that are fully materialized up front.
pub struct CursorIo {
    cursor: std::io::Cursor<Vec<u8>>,
}

impl CursorIo {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            cursor: std::io::Cursor::new(data),
        }
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.cursor.into_inner()
    }
}

impl Read for CursorIo {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.cursor.read(buf)
    }
}

impl Write for CursorIo {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.cursor.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.cursor.flush()
    }
}

impl Seek for CursorIo {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.cursor.seek(pos)
    }
}

/// Owns the `AVIOContext` built around a [`CustomIo`] and the boxed callback
/// state it points at. `ffmpeg_next::format::context::{Input,Output}::wrap`
/// takes ownership of the format context but not of a custom `pb`, so this
/// type's `Drop` frees the IO buffer and context itself once the format
/// context using it has already been dropped by the caller.
pub(crate) struct RawAvio {
    ctx: *mut ffmpeg_next::ffi::AVIOContext,
    // Kept alive for as long as `ctx` may invoke its callbacks.
    _io: Box<CustomIo>,
}

unsafe impl Send for RawAvio {}

impl RawAvio {
    pub(crate) fn as_mut_ptr(&mut self) -> *mut ffmpeg_next::ffi::AVIOContext {
        self.ctx
    }
}

impl Drop for RawAvio {
    fn drop(&mut self) {
        if self.ctx.is_null() {
            return;
        }
        unsafe {
            let buffer = (*self.ctx).buffer;
            if !buffer.is_null() {
                ffmpeg_next::ffi::av_free(buffer as *mut std::ffi::c_void);
            }
            ffmpeg_next::ffi::av_free(self.ctx as *mut std::ffi::c_void);
        }
        self.ctx = std::ptr::null_mut();
    }
}

/// Bridges `CustomIo::read` into FFmpeg's `avio_alloc_context` read callback.
/// The buffer-pointer constness in this signature varies across FFmpeg major
/// versions, so the caller casts this through `std::mem::transmute` rather
/// than passing it directly, matching the workaround other out-of-tree
/// `ffmpeg-next` callback sites use for the same reason.
extern "C" fn read_trampoline(opaque: *mut std::ffi::c_void, buffer: *mut u8, buffer_size: i32) -> i32 {
    let io: &mut CustomIo = unsafe { &mut *(opaque as *mut CustomIo) };
    let buf = unsafe { std::slice::from_raw_parts_mut(buffer, buffer_size.max(0) as usize) };
    match io.read(buf) {
        Ok(0) => ffmpeg_next::ffi::AVERROR_EOF,
        Ok(n) => n as i32,
        Err(_) => ffmpeg_next::ffi::AVERROR_EOF,
    }
}

extern "C" fn write_trampoline(opaque: *mut std::ffi::c_void, buffer: *const u8, buffer_size: i32) -> i32 {
    let io: &mut CustomIo = unsafe { &mut *(opaque as *mut CustomIo) };
    let buf = unsafe { std::slice::from_raw_parts(buffer, buffer_size.max(0) as usize) };
    match io.write(buf) {
        Ok(n) => n as i32,
        Err(_) => ffmpeg_next::ffi::AVERROR_EOF,
    }
}

extern "C" fn seek_trampoline(opaque: *mut std::ffi::c_void, offset: i64, whence: i32) -> i64 {
    const AVSEEK_FORCE: i32 = 0x20000;
    let io: &mut CustomIo = unsafe { &mut *(opaque as *mut CustomIo) };
    let pos = match whence & !AVSEEK_FORCE {
        w if w == libc_seek_set() => SeekFrom::Start(offset.max(0) as u64),
        w if w == libc_seek_cur() => SeekFrom::Current(offset),
        w if w == libc_seek_end() => SeekFrom::End(offset),
        _ => return -1,
    };
    match io.seek(pos) {
        Ok(pos) => pos as i64,
        Err(_) => -1,
    }
}

fn libc_seek_set() -> i32 {
    0
}

fn libc_seek_cur() -> i32 {
    1
}

fn libc_seek_end() -> i32 {
    2
}

/// Builds an `AVIOContext` around `io`'s callbacks. `write_flag` selects
/// read vs. write mode exactly as `avio_alloc_context`'s own parameter does.
pub(crate) fn build_avio_context(io: CustomIo, write_flag: bool) -> Result<RawAvio> {
    let buffer_size = io.buffer_size();
    let mut boxed = Box::new(io);
    let opaque = boxed.as_mut() as *mut CustomIo as *mut std::ffi::c_void;

    let buffer = unsafe { ffmpeg_next::ffi::av_malloc(buffer_size) as *mut u8 };
    if buffer.is_null() {
        return Err(Error::new(ErrorKind::ResourceExhausted, "failed to allocate AVIO buffer"));
    }

    let seekable = boxed.is_seekable();
    let ctx = unsafe {
        ffmpeg_next::ffi::avio_alloc_context(
            buffer,
            buffer_size as i32,
            write_flag as i32,
            opaque,
            if write_flag {
                None
            } else {
                Some(std::mem::transmute::<*const (), _>(read_trampoline as *const ()))
            },
            if write_flag {
                Some(std::mem::transmute::<*const (), _>(write_trampoline as *const ()))
            } else {
                None
            },
            if seekable {
                Some(seek_trampoline)
            } else {
                None
            },
        )
    };
    if ctx.is_null() {
        unsafe { ffmpeg_next::ffi::av_free(buffer as *mut std::ffi::c_void) };
        return Err(Error::new(ErrorKind::ResourceExhausted, "avio_alloc_context returned null"));
    }

    Ok(RawAvio { ctx, _io: boxed })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_without_writer_rejects_write() {
        let mut io = CustomIo::reader(CursorIo::new(vec![1, 2, 3]), CustomIoConfig::default());
        let err = io.write(&[1]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
    }

    #[test]
    fn reader_reads_configured_bytes() {
        let mut io = CustomIo::reader(CursorIo::new(vec![9, 9, 9]), CustomIoConfig::default());
        let mut buf = [0u8; 3];
        let n = io.read(&mut buf).unwrap();
        assert_eq!(n, 3);
        assert_eq!(buf, [9, 9, 9]);
    }

    #[test]
    fn unseekable_io_rejects_seek() {
        let mut io = CustomIo::reader(CursorIo::new(vec![]), CustomIoConfig::default());
        assert!(!io.is_seekable());
        let err = io.seek(SeekFrom::Start(0)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
    }
}
