use ffmpeg_next as ffmpeg;
use ffmpeg::{codec, ffi};
use log::{debug, info, warn};
use std::ffi::CString;
use std::ptr;

/// 硬件解码器类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HWAccelType {
    VideoToolbox, // macOS VideoToolbox
    CUDA,         // NVIDIA CUDA
    VAAPI,        // Linux Video Acceleration API
    VDPAU,        // Linux VDPAU
    D3D11VA,      // Windows Direct3D 11 (推荐)
    DXVA2,        // Windows DirectX Video Acceleration 2
}

impl HWAccelType {
    /// FFmpeg 中的设备类型名称（av_hwdevice_find_type_by_name 使用）
    pub fn name(&self) -> &'static str {
        match self {
            HWAccelType::VideoToolbox => "videotoolbox",
            HWAccelType::CUDA => "cuda",
            HWAccelType::VAAPI => "vaapi",
            HWAccelType::VDPAU => "vdpau",
            HWAccelType::D3D11VA => "d3d11va",
            HWAccelType::DXVA2 => "dxva2",
        }
    }

    /// 当前平台的候选硬件类型（按优先级排序）
    pub fn preferred() -> &'static [HWAccelType] {
        #[cfg(target_os = "macos")]
        {
            &[HWAccelType::VideoToolbox]
        }
        #[cfg(target_os = "linux")]
        {
            &[HWAccelType::CUDA, HWAccelType::VAAPI, HWAccelType::VDPAU]
        }
        #[cfg(target_os = "windows")]
        {
            &[HWAccelType::D3D11VA, HWAccelType::DXVA2, HWAccelType::CUDA]
        }
        #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
        {
            &[]
        }
    }

    fn device_type(&self) -> ffi::AVHWDeviceType {
        // 名称都是静态 ASCII，不会包含 NUL
        match CString::new(self.name()) {
            Ok(name) => unsafe { ffi::av_hwdevice_find_type_by_name(name.as_ptr()) },
            Err(_) => ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_NONE,
        }
    }
}

/// AV_CODEC_HW_CONFIG_METHOD_HW_DEVICE_CTX
const HW_CONFIG_METHOD_DEVICE_CTX: u32 = 0x01;

/// 硬件设备上下文（AVBufferRef 的 RAII 包装）
pub struct HwDevice {
    ctx: *mut ffi::AVBufferRef,
    pix_fmt: ffi::AVPixelFormat,
    kind: HWAccelType,
}

// AVBufferRef 是引用计数的，设备上下文本身线程安全；
// 这里只在拥有解码器的线程里使用
unsafe impl Send for HwDevice {}

impl HwDevice {
    /// 按优先级依次尝试，只考虑解码器声明支持（HW_DEVICE_CTX 方式）的类型
    pub fn probe(codec: &codec::Codec, candidates: &[HWAccelType]) -> Option<HwDevice> {
        for &kind in candidates {
            let device_type = kind.device_type();
            if device_type == ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_NONE {
                debug!("FFmpeg 未编译 {} 支持", kind.name());
                continue;
            }

            let Some(pix_fmt) = Self::codec_hw_format(codec, device_type) else {
                debug!("解码器 {} 不支持 {}", codec.name(), kind.name());
                continue;
            };

            let mut ctx: *mut ffi::AVBufferRef = ptr::null_mut();
            let ret = unsafe {
                ffi::av_hwdevice_ctx_create(&mut ctx, device_type, ptr::null(), ptr::null_mut(), 0)
            };
            if ret < 0 || ctx.is_null() {
                warn!("✗ {} 设备创建失败: {}", kind.name(), ffmpeg::Error::from(ret));
                continue;
            }

            info!("✓ 硬件设备就绪: {}", kind.name());
            return Some(HwDevice { ctx, pix_fmt, kind });
        }
        None
    }

    /// 查找解码器在该设备类型下输出的硬件像素格式
    fn codec_hw_format(codec: &codec::Codec, device_type: ffi::AVHWDeviceType) -> Option<ffi::AVPixelFormat> {
        let mut index = 0;
        loop {
            let config = unsafe { ffi::avcodec_get_hw_config(codec.as_ptr(), index) };
            if config.is_null() {
                return None;
            }
            index += 1;

            let (methods, config_type, pix_fmt) =
                unsafe { ((*config).methods as u32, (*config).device_type, (*config).pix_fmt) };
            if methods & HW_CONFIG_METHOD_DEVICE_CTX != 0 && config_type == device_type {
                return Some(pix_fmt);
            }
        }
    }

    /// 新的引用（交给 AVCodecContext.hw_device_ctx，由 FFmpeg 负责释放）
    pub fn new_ref(&self) -> *mut ffi::AVBufferRef {
        unsafe { ffi::av_buffer_ref(self.ctx) }
    }

    /// 帧是否位于该设备的硬件表面上
    pub fn owns_frame(&self, frame: &ffmpeg::frame::Video) -> bool {
        unsafe { (*frame.as_ptr()).format == self.pix_fmt as i32 }
    }

    /// 把硬件帧传输到 CPU 内存
    pub fn transfer(&self, hw_frame: &ffmpeg::frame::Video) -> Result<ffmpeg::frame::Video, ffmpeg::Error> {
        let mut sw_frame = ffmpeg::frame::Video::empty();
        let ret = unsafe { ffi::av_hwframe_transfer_data(sw_frame.as_mut_ptr(), hw_frame.as_ptr(), 0) };
        if ret < 0 {
            return Err(ffmpeg::Error::from(ret));
        }
        Ok(sw_frame)
    }

    pub fn kind(&self) -> HWAccelType {
        self.kind
    }
}

impl Drop for HwDevice {
    fn drop(&mut self) {
        if !self.ctx.is_null() {
            unsafe { ffi::av_buffer_unref(&mut self.ctx) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preference_list_matches_platform() {
        let list = HWAccelType::preferred();
        #[cfg(target_os = "linux")]
        assert_eq!(list, &[HWAccelType::CUDA, HWAccelType::VAAPI, HWAccelType::VDPAU]);
        #[cfg(target_os = "macos")]
        assert_eq!(list, &[HWAccelType::VideoToolbox]);
        #[cfg(target_os = "windows")]
        assert_eq!(list, &[HWAccelType::D3D11VA, HWAccelType::DXVA2, HWAccelType::CUDA]);
        let _ = list;
    }

    #[test]
    fn names_are_ffmpeg_device_names() {
        assert_eq!(HWAccelType::VAAPI.name(), "vaapi");
        assert_eq!(HWAccelType::D3D11VA.name(), "d3d11va");
        assert_eq!(HWAccelType::VideoToolbox.name(), "videotoolbox");
    }
}
