//! 单元测试共用的替身与样图构造。

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgba};

use super::camera::{CameraDevice, Frame, VideoStream};
use super::upload::{ProfileRepr, UploadAdapter, UploadRequest};
use super::CaptureError;

pub(crate) fn create_image_bytes(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let img = ImageBuffer::from_fn(width, height, |x, y| {
        Rgba([(x % 255) as u8, (y % 255) as u8, ((x + y) % 255) as u8, 255])
    });

    let mut cursor = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(img)
        .to_rgb8()
        .write_to(&mut cursor, format)
        .expect("failed to encode test image");
    cursor.into_inner()
}

pub(crate) fn create_png_bytes(width: u32, height: u32) -> Vec<u8> {
    create_image_bytes(width, height, ImageFormat::Png)
}

#[derive(Clone, Copy, PartialEq)]
enum CameraMode {
    Working,
    Denied,
    Absent,
    FailingGrab,
}

/// 可观测轨道数量的假摄像头。
pub(crate) struct FakeCamera {
    width: u32,
    height: u32,
    mode: CameraMode,
    live_tracks: Arc<AtomicUsize>,
}

impl FakeCamera {
    pub(crate) fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            mode: CameraMode::Working,
            live_tracks: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn denied() -> Self {
        Self { mode: CameraMode::Denied, ..Self::new(1, 1) }
    }

    pub(crate) fn absent() -> Self {
        Self { mode: CameraMode::Absent, ..Self::new(1, 1) }
    }

    pub(crate) fn failing_grab(self) -> Self {
        Self { mode: CameraMode::FailingGrab, ..self }
    }

    pub(crate) fn live_tracks(&self) -> usize {
        self.live_tracks.load(Ordering::SeqCst)
    }
}

struct FakeStream {
    width: u32,
    height: u32,
    fail_grab: bool,
    live_tracks: Arc<AtomicUsize>,
    stopped: bool,
}

impl VideoStream for FakeStream {
    fn grab_frame(&mut self) -> Result<Frame, CaptureError> {
        if self.fail_grab {
            return Err(CaptureError::DeviceUnavailable("frame grab failed".to_string()));
        }
        let rgba = ImageBuffer::from_fn(self.width, self.height, |x, y| {
            Rgba([(x % 255) as u8, (y % 255) as u8, 128, 255])
        })
        .into_raw();
        Ok(Frame {
            width: self.width,
            height: self.height,
            rgba,
        })
    }

    fn live_track_count(&self) -> usize {
        if self.stopped { 0 } else { self.live_tracks.load(Ordering::SeqCst) }
    }

    fn stop_all_tracks(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.live_tracks.store(0, Ordering::SeqCst);
        }
    }
}

impl CameraDevice for FakeCamera {
    fn open(&self) -> Result<Box<dyn VideoStream>, CaptureError> {
        match self.mode {
            CameraMode::Denied => Err(CaptureError::PermissionDenied("user denied".to_string())),
            CameraMode::Absent => Err(CaptureError::DeviceUnavailable("no camera".to_string())),
            CameraMode::Working | CameraMode::FailingGrab => {
                // 视频 + 音频两条轨道
                self.live_tracks.store(2, Ordering::SeqCst);
                Ok(Box::new(FakeStream {
                    width: self.width,
                    height: self.height,
                    fail_grab: self.mode == CameraMode::FailingGrab,
                    live_tracks: Arc::clone(&self.live_tracks),
                    stopped: false,
                }))
            }
        }
    }
}

/// 记录所有请求的上传替身，可预置失败次数。
#[derive(Default)]
pub(crate) struct RecordingUploader {
    pub(crate) requests: Mutex<Vec<UploadRequest>>,
    failures_left: AtomicUsize,
}

impl RecordingUploader {
    pub(crate) fn failing(times: usize) -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            failures_left: AtomicUsize::new(times),
        }
    }

    pub(crate) fn sent(&self) -> Vec<UploadRequest> {
        self.requests.lock().expect("uploader lock poisoned").clone()
    }
}

#[async_trait]
impl UploadAdapter for RecordingUploader {
    async fn send(&self, request: UploadRequest) -> Result<ProfileRepr, CaptureError> {
        let is_remove = matches!(request, UploadRequest::Remove);
        self.requests.lock().expect("uploader lock poisoned").push(request);

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(CaptureError::UploadFailed("HTTP 503".to_string()));
        }

        Ok(serde_json::json!({
            "username": "patient",
            "profile_picture": if is_remove { serde_json::Value::Null } else { "/media/profile.jpg".into() },
        }))
    }
}
