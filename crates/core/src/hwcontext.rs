//! Hardware device/frames context façade.
//!
//! `ffmpeg-next`'s safe layer does not wrap `AVHWDeviceContext` or
//! `AVHWFramesContext`, so this module goes through `ffmpeg_next::ffi`
//! directly, the same escape hatch the hardware-accelerated decoder example
//! in the retrieval pack uses.

#![cfg(feature = "hwaccel")]

use std::ptr;
use std::sync::Arc;

use ffmpeg_next::ffi;

use crate::error::{Error, ErrorKind, Result};

/// Mirrors `AVHWDeviceType`; only the types spec.md names are exposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareDeviceType {
    VideoToolbox,
    Cuda,
    Vaapi,
    Qsv,
    D3d11va,
}

impl HardwareDeviceType {
    fn to_ffi(self) -> ffi::AVHWDeviceType {
        match self {
            HardwareDeviceType::VideoToolbox => ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_VIDEOTOOLBOX,
            HardwareDeviceType::Cuda => ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_CUDA,
            HardwareDeviceType::Vaapi => ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_VAAPI,
            HardwareDeviceType::Qsv => ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_QSV,
            HardwareDeviceType::D3d11va => ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_D3D11VA,
        }
    }
}

struct RawDeviceContext(ptr::NonNull<ffi::AVBufferRef>);

unsafe impl Send for RawDeviceContext {}
unsafe impl Sync for RawDeviceContext {}

impl Drop for RawDeviceContext {
    fn drop(&mut self) {
        unsafe {
            let mut ptr = self.0.as_ptr();
            ffi::av_buffer_unref(&mut ptr);
        }
    }
}

/// A GPU/accelerator session. Shared by reference-count between the decoder
/// that opens it and any filter/encoder that consumes its frames.
#[derive(Clone)]
pub struct HardwareDeviceContext {
    inner: Arc<RawDeviceContext>,
    device_type: HardwareDeviceType,
}

impl HardwareDeviceContext {
    pub fn create(device_type: HardwareDeviceType, device: Option<&str>) -> Result<Self> {
        let device_cstr = device.map(|d| std::ffi::CString::new(d).unwrap());
        let mut ctx: *mut ffi::AVBufferRef = ptr::null_mut();
        let rc = unsafe {
            ffi::av_hwdevice_ctx_create(
                &mut ctx,
                device_type.to_ffi(),
                device_cstr.as_ref().map_or(ptr::null(), |c| c.as_ptr()),
                ptr::null_mut(),
                0,
            )
        };
        if rc < 0 {
            return Err(Error::with_code(
                ErrorKind::HardwareUnavailable,
                rc,
                format!("av_hwdevice_ctx_create failed for {device_type:?}"),
            ));
        }
        let ctx = ptr::NonNull::new(ctx).ok_or_else(|| {
            Error::new(ErrorKind::HardwareUnavailable, "hw device context allocation returned null")
        })?;
        Ok(Self {
            inner: Arc::new(RawDeviceContext(ctx)),
            device_type,
        })
    }

    pub fn device_type(&self) -> HardwareDeviceType {
        self.device_type
    }

    pub fn as_raw(&self) -> *mut ffi::AVBufferRef {
        self.inner.0.as_ptr()
    }
}

struct RawFramesContext(ptr::NonNull<ffi::AVBufferRef>);

unsafe impl Send for RawFramesContext {}
unsafe impl Sync for RawFramesContext {}

impl Drop for RawFramesContext {
    fn drop(&mut self) {
        unsafe {
            let mut ptr = self.0.as_ptr();
            ffi::av_buffer_unref(&mut ptr);
        }
    }
}

/// Pool of device-resident frames. Invalid once its owning device context is
/// dropped; the `_device` field keeps that context alive for exactly as long
/// as this pool is reachable.
#[derive(Clone)]
pub struct HardwareFramesContext {
    inner: Arc<RawFramesContext>,
    _device: HardwareDeviceContext,
    width: u32,
    height: u32,
}

impl HardwareFramesContext {
    pub fn new(
        device: HardwareDeviceContext,
        hw_format: ffmpeg_next::format::Pixel,
        sw_format: ffmpeg_next::format::Pixel,
        width: u32,
        height: u32,
        initial_pool_size: i32,
    ) -> Result<Self> {
        unsafe {
            let frames_ref = ffi::av_hwframe_ctx_alloc(device.as_raw());
            let frames_ref = ptr::NonNull::new(frames_ref).ok_or_else(|| {
                Error::new(ErrorKind::ResourceExhausted, "av_hwframe_ctx_alloc returned null")
            })?;
            let frames_ctx = (*frames_ref.as_ptr()).data as *mut ffi::AVHWFramesContext;
            (*frames_ctx).format = hw_format.into();
            (*frames_ctx).sw_format = sw_format.into();
            (*frames_ctx).width = width as i32;
            (*frames_ctx).height = height as i32;
            (*frames_ctx).initial_pool_size = initial_pool_size;

            let mut raw = frames_ref.as_ptr();
            let rc = ffi::av_hwframe_ctx_init(raw);
            if rc < 0 {
                ffi::av_buffer_unref(&mut raw);
                return Err(Error::with_code(
                    ErrorKind::HardwareUnavailable,
                    rc,
                    "av_hwframe_ctx_init failed",
                ));
            }
            Ok(Self {
                inner: Arc::new(RawFramesContext(frames_ref)),
                _device: device,
                width,
                height,
            })
        }
    }

    pub fn as_raw(&self) -> *mut ffi::AVBufferRef {
        self.inner.0.as_ptr()
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}
