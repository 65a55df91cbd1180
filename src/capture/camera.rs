//! # 摄像头采集
//!
//! ## 设计思路
//!
//! 摄像头是整条链路中唯一需要独占的外部资源。平台相关的取流细节藏在
//! `CameraDevice` / `VideoStream` 两个 trait 之后，本模块只负责“作用域内持有”：
//!
//! - `CameraSession::request_camera_stream` 打开设备，得到唯一持有者
//! - `capture_instant` 定格当前帧，立即停止全部轨道，再编码为 JPEG
//! - `release` 显式释放；`Drop` 兜底，任何退出路径（成功、取消、错误、panic 展开）都会停轨
//!
//! 设备打开失败时不会产生任何持有者，因此无需清理。

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use image::{DynamicImage, ImageBuffer, Rgba};

use super::crop::encode_jpeg;
use super::source::{RawImage, SourceKind};
use super::CaptureError;

/// 一帧 RGBA 画面。
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

/// 已打开的视频流。
pub trait VideoStream: Send {
    /// 读取当前帧。
    fn grab_frame(&mut self) -> Result<Frame, CaptureError>;
    /// 仍在运行的轨道数量。
    fn live_track_count(&self) -> usize;
    /// 停止所有轨道；重复调用必须是无害的。
    fn stop_all_tracks(&mut self);
}

/// 摄像头设备（平台边界）。
pub trait CameraDevice: Send + Sync {
    /// 申请访问权限并打开视频流。
    ///
    /// 用户拒绝授权返回 `PermissionDenied`，没有硬件返回 `DeviceUnavailable`。
    fn open(&self) -> Result<Box<dyn VideoStream>, CaptureError>;
}

type SharedStream = Arc<Mutex<Option<Box<dyn VideoStream>>>>;

fn lock_stream(stream: &SharedStream) -> MutexGuard<'_, Option<Box<dyn VideoStream>>> {
    // 停轨必须在任何情况下执行，锁中毒时直接取回内部数据
    stream.lock().unwrap_or_else(PoisonError::into_inner)
}

fn stop_stream(stream: &SharedStream) -> bool {
    let taken = lock_stream(stream).take();
    match taken {
        Some(mut stream) => {
            stream.stop_all_tracks();
            log::info!("📷 摄像头已释放 - remaining_tracks={}", stream.live_track_count());
            true
        }
        None => false,
    }
}

/// 摄像头的唯一持有者。
pub struct CameraSession {
    stream: SharedStream,
    frame_quality: u8,
}

/// 可在持有者之外释放摄像头的句柄（界面被强制关闭时使用）。
#[derive(Clone)]
pub struct CameraReleaseHandle {
    stream: SharedStream,
}

impl CameraReleaseHandle {
    /// 停止全部轨道；返回本次调用是否真的释放了设备。
    pub fn release(&self) -> bool {
        stop_stream(&self.stream)
    }
}

impl CameraSession {
    /// 打开摄像头。失败时不持有任何资源。
    pub fn request_camera_stream(device: &dyn CameraDevice, frame_quality: u8) -> Result<Self, CaptureError> {
        let mut stream = device.open()?;

        if stream.live_track_count() == 0 {
            stream.stop_all_tracks();
            return Err(CaptureError::DeviceUnavailable("视频流没有可用轨道".to_string()));
        }

        log::info!("📷 摄像头已打开 - tracks={}", stream.live_track_count());

        Ok(Self {
            stream: Arc::new(Mutex::new(Some(stream))),
            frame_quality,
        })
    }

    pub fn release_handle(&self) -> CameraReleaseHandle {
        CameraReleaseHandle {
            stream: Arc::clone(&self.stream),
        }
    }

    pub fn is_live(&self) -> bool {
        lock_stream(&self.stream)
            .as_ref()
            .map(|stream| stream.live_track_count() > 0)
            .unwrap_or(false)
    }

    /// 捕获瞬间：定格当前帧并释放摄像头，再把帧编码为 `RawImage`。
    ///
    /// 无论读帧是否成功，返回前摄像头都已释放。
    pub fn capture_instant(mut self) -> Result<RawImage, CaptureError> {
        let frame = match lock_stream(&self.stream).as_mut() {
            Some(stream) => stream.grab_frame(),
            None => Err(CaptureError::DeviceUnavailable("摄像头已释放".to_string())),
        };
        self.release();

        let frame = frame?;
        let expected_len = (frame.width as usize)
            .checked_mul(frame.height as usize)
            .and_then(|pixels| pixels.checked_mul(4));
        if frame.width == 0 || frame.height == 0 || expected_len != Some(frame.rgba.len()) {
            return Err(CaptureError::DeviceUnavailable(format!(
                "摄像头返回的帧数据异常：{}x{} len={}",
                frame.width,
                frame.height,
                frame.rgba.len()
            )));
        }

        let (width, height) = (frame.width, frame.height);
        let buffer = ImageBuffer::<Rgba<u8>, Vec<u8>>::from_raw(width, height, frame.rgba)
            .ok_or_else(|| CaptureError::DeviceUnavailable("帧缓冲长度异常".to_string()))?;
        let rgb = DynamicImage::ImageRgba8(buffer).to_rgb8();
        let jpeg = encode_jpeg(&rgb, self.frame_quality)?;

        log::info!("📸 已定格摄像头画面 - {}x{} {} bytes", width, height, jpeg.len());

        Ok(RawImage::new(jpeg, "image/jpeg", SourceKind::Camera))
    }

    /// 停止全部轨道。可重复调用。
    pub fn release(&mut self) {
        stop_stream(&self.stream);
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::test_support::FakeCamera;

    #[test]
    fn capture_releases_stream_and_yields_jpeg() {
        let camera = FakeCamera::new(64, 48);
        let session = CameraSession::request_camera_stream(&camera, 95).expect("open failed");
        assert_eq!(camera.live_tracks(), 2);

        let raw = session.capture_instant().expect("capture failed");

        assert_eq!(camera.live_tracks(), 0);
        assert_eq!(raw.source_kind, SourceKind::Camera);
        assert_eq!(raw.mime_type, "image/jpeg");
        assert_eq!(infer::get(raw.bytes()).map(|kind| kind.mime_type()), Some("image/jpeg"));
    }

    #[test]
    fn dropping_session_releases_stream() {
        let camera = FakeCamera::new(32, 32);
        {
            let session = CameraSession::request_camera_stream(&camera, 95).expect("open failed");
            assert!(session.is_live());
        }
        assert_eq!(camera.live_tracks(), 0);
    }

    #[test]
    fn denied_permission_holds_nothing() {
        let camera = FakeCamera::denied();
        let result = CameraSession::request_camera_stream(&camera, 95);

        assert!(matches!(result, Err(CaptureError::PermissionDenied(_))));
        assert_eq!(camera.live_tracks(), 0);
    }

    #[test]
    fn release_handle_stops_tracks_from_outside() {
        let camera = FakeCamera::new(32, 32);
        let session = CameraSession::request_camera_stream(&camera, 95).expect("open failed");
        let handle = session.release_handle();

        assert!(handle.release());
        assert_eq!(camera.live_tracks(), 0);
        assert!(!session.is_live());
        assert!(!handle.release());

        let result = session.capture_instant();
        assert!(matches!(result, Err(CaptureError::DeviceUnavailable(_))));
    }

    #[test]
    fn failed_grab_still_releases() {
        let camera = FakeCamera::new(16, 16).failing_grab();
        let session = CameraSession::request_camera_stream(&camera, 95).expect("open failed");

        let result = session.capture_instant();

        assert!(matches!(result, Err(CaptureError::DeviceUnavailable(_))));
        assert_eq!(camera.live_tracks(), 0);
    }
}
