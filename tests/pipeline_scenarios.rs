// End-to-end scenarios driven through the public pipeline API.
use std::io::{Cursor, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use derma_capture::capture::{
    CameraDevice, CaptureConfig, CaptureError, CapturePipeline, ErrorKind, FixedPathPicker, Frame, GeometryDelta,
    PipelineState, ProfileRepr, UploadAdapter, UploadRequest, VideoStream, DEFAULT_OUTPUT_SIZE,
};
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgba};

struct StubCamera {
    permission: bool,
    live_tracks: Arc<AtomicUsize>,
}

impl StubCamera {
    fn granted() -> Self {
        Self {
            permission: true,
            live_tracks: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn denied() -> Self {
        Self {
            permission: false,
            ..Self::granted()
        }
    }

    fn live_tracks(&self) -> usize {
        self.live_tracks.load(Ordering::SeqCst)
    }
}

struct StubStream {
    live_tracks: Arc<AtomicUsize>,
}

impl VideoStream for StubStream {
    fn grab_frame(&mut self) -> Result<Frame, CaptureError> {
        let (width, height) = (640, 480);
        let rgba = ImageBuffer::from_fn(width, height, |x, y| Rgba([(x % 256) as u8, (y % 256) as u8, 64, 255]))
            .into_raw();
        Ok(Frame { width, height, rgba })
    }

    fn live_track_count(&self) -> usize {
        self.live_tracks.load(Ordering::SeqCst)
    }

    fn stop_all_tracks(&mut self) {
        self.live_tracks.store(0, Ordering::SeqCst);
    }
}

impl CameraDevice for StubCamera {
    fn open(&self) -> Result<Box<dyn VideoStream>, CaptureError> {
        if !self.permission {
            return Err(CaptureError::PermissionDenied("NotAllowedError".to_string()));
        }
        self.live_tracks.store(1, Ordering::SeqCst);
        Ok(Box::new(StubStream {
            live_tracks: Arc::clone(&self.live_tracks),
        }))
    }
}

#[derive(Default)]
struct ScriptedUploader {
    failures_left: AtomicUsize,
    requests: Mutex<Vec<UploadRequest>>,
}

impl ScriptedUploader {
    fn failing_once() -> Self {
        Self {
            failures_left: AtomicUsize::new(1),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn requests(&self) -> Vec<UploadRequest> {
        self.requests.lock().expect("lock poisoned").clone()
    }
}

#[async_trait]
impl UploadAdapter for ScriptedUploader {
    async fn send(&self, request: UploadRequest) -> Result<ProfileRepr, CaptureError> {
        self.requests.lock().expect("lock poisoned").push(request);

        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
        {
            return Err(CaptureError::UploadFailed("connection reset".to_string()));
        }

        Ok(serde_json::json!({ "profile_picture": "/media/profile_pictures/me.jpg" }))
    }
}

fn recorded_pipeline(uploader: Arc<ScriptedUploader>) -> (CapturePipeline, Arc<Mutex<Vec<PipelineState>>>) {
    let states = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&states);
    let pipeline = CapturePipeline::new(CaptureConfig::default(), uploader)
        .with_transition_listener(move |_, to| recorder.lock().expect("lock poisoned").push(to));
    (pipeline, states)
}

fn png_file(width: u32, height: u32) -> tempfile::NamedTempFile {
    let img = ImageBuffer::from_fn(width, height, |x, _| {
        if x < width / 2 { Rgba([255, 0, 0, 255]) } else { Rgba([0, 0, 255, 255]) }
    });
    let mut cursor = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(img)
        .write_to(&mut cursor, ImageFormat::Png)
        .expect("encode failed");

    let mut file = tempfile::Builder::new().suffix(".png").tempfile().expect("tempfile failed");
    file.write_all(cursor.get_ref()).expect("write failed");
    file
}

#[tokio::test]
async fn camera_capture_crop_and_upload() {
    let camera = StubCamera::granted();
    let uploader = Arc::new(ScriptedUploader::default());
    let (mut pipeline, states) = recorded_pipeline(Arc::clone(&uploader));

    pipeline.start_camera(&camera).expect("camera open failed");
    assert_eq!(camera.live_tracks(), 1);
    assert!(pipeline.camera_active());

    pipeline.capture_frame().expect("capture failed");
    assert_eq!(camera.live_tracks(), 0);
    assert!(!pipeline.camera_active());
    assert_eq!(pipeline.state(), PipelineState::Cropping);

    pipeline.update_geometry(GeometryDelta::ZoomTo(1.0)).expect("zoom failed");
    let profile = pipeline.confirm_crop().await.expect("confirm failed");

    assert_eq!(profile["profile_picture"], "/media/profile_pictures/me.jpg");
    assert_eq!(pipeline.state(), PipelineState::Success);

    let result = pipeline.result().expect("result missing");
    assert_eq!(result.mime_type(), "image/jpeg");
    assert_eq!(
        result.decoded_dimensions().expect("decode failed"),
        (DEFAULT_OUTPUT_SIZE, DEFAULT_OUTPUT_SIZE)
    );

    let states = states.lock().expect("lock poisoned").clone();
    assert_eq!(
        states,
        vec![
            PipelineState::Capturing,
            PipelineState::Validating,
            PipelineState::Cropping,
            PipelineState::Encoding,
            PipelineState::Uploading,
            PipelineState::Success,
        ]
    );
    assert_eq!(uploader.requests().len(), 1);
}

#[test]
fn oversized_file_is_rejected_then_dismissed() {
    let mut file = tempfile::NamedTempFile::new().expect("tempfile failed");
    let mut payload = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(ImageBuffer::from_pixel(8, 8, Rgba([1, 2, 3, 255])))
        .write_to(&mut payload, ImageFormat::Png)
        .expect("encode failed");
    let mut bytes = payload.into_inner();
    bytes.resize(6 * 1024 * 1024, 0);
    file.write_all(&bytes).expect("write failed");

    let uploader = Arc::new(ScriptedUploader::default());
    let (mut pipeline, _) = recorded_pipeline(Arc::clone(&uploader));

    let result = pipeline.select_file(&FixedPathPicker(Some(file.path().to_path_buf())));

    assert!(matches!(result, Err(CaptureError::TooLarge { size, .. }) if size == 6 * 1024 * 1024));
    assert_eq!(pipeline.state(), PipelineState::Error(ErrorKind::TooLarge));
    assert!(pipeline.session().raw().is_none());

    pipeline.reset().expect("dismiss failed");
    assert_eq!(pipeline.state(), PipelineState::Idle);
    assert!(uploader.requests().is_empty());
}

#[test]
fn cancel_before_capture_releases_camera() {
    let camera = StubCamera::granted();
    let (mut pipeline, states) = recorded_pipeline(Arc::new(ScriptedUploader::default()));

    pipeline.start_camera(&camera).expect("camera open failed");
    pipeline.cancel().expect("cancel failed");

    assert_eq!(pipeline.state(), PipelineState::Cancelled);
    assert_eq!(camera.live_tracks(), 0);
    assert!(pipeline.session().raw().is_none());
    assert!(
        !states
            .lock()
            .expect("lock poisoned")
            .contains(&PipelineState::Validating)
    );
}

#[test]
fn permission_denied_leaves_nothing_running() {
    let camera = StubCamera::denied();
    let (mut pipeline, _) = recorded_pipeline(Arc::new(ScriptedUploader::default()));

    let result = pipeline.start_camera(&camera);

    assert!(matches!(result, Err(CaptureError::PermissionDenied(_))));
    assert_eq!(pipeline.state(), PipelineState::Idle);
    assert_eq!(pipeline.last_error(), Some(ErrorKind::PermissionDenied));
    assert_eq!(camera.live_tracks(), 0);
    assert!(!pipeline.camera_active());
}

#[tokio::test]
async fn failed_upload_keeps_result_and_retry_resends_it() {
    let file = png_file(300, 200);
    let uploader = Arc::new(ScriptedUploader::failing_once());
    let (mut pipeline, states) = recorded_pipeline(Arc::clone(&uploader));

    pipeline
        .select_file(&FixedPathPicker(Some(file.path().to_path_buf())))
        .expect("select failed");
    let first = pipeline.confirm_crop().await;

    assert!(matches!(first, Err(CaptureError::UploadFailed(_))));
    assert_eq!(pipeline.state(), PipelineState::Error(ErrorKind::UploadFailed));
    let kept = pipeline.result().cloned().expect("result should be retained");

    states.lock().expect("lock poisoned").clear();
    pipeline.retry_upload().await.expect("retry failed");

    assert_eq!(pipeline.state(), PipelineState::Success);
    assert_eq!(
        states.lock().expect("lock poisoned").as_slice(),
        &[PipelineState::Uploading, PipelineState::Success]
    );

    let requests = uploader.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0], requests[1]);
    assert_eq!(requests[1], UploadRequest::Replace(kept));
}

#[test]
fn zero_deltas_are_idempotent() {
    let file = png_file(120, 90);
    let (mut pipeline, _) = recorded_pipeline(Arc::new(ScriptedUploader::default()));
    pipeline
        .select_file(&FixedPathPicker(Some(file.path().to_path_buf())))
        .expect("select failed");
    pipeline.update_geometry(GeometryDelta::ZoomTo(1.7)).expect("zoom failed");
    let before = *pipeline.session().geometry().expect("geometry missing");

    for _ in 0..5 {
        assert!(!pipeline.update_geometry(GeometryDelta::Drag { dx: 0.0, dy: 0.0 }).expect("drag failed"));
        assert!(!pipeline.update_geometry(GeometryDelta::ZoomBy(0.0)).expect("zoom failed"));
    }

    assert_eq!(pipeline.session().geometry(), Some(&before));
}

#[tokio::test]
async fn crop_window_selects_requested_half() {
    let file = png_file(400, 200);
    let (mut pipeline, _) = recorded_pipeline(Arc::new(ScriptedUploader::default()));
    pipeline
        .select_file(&FixedPathPicker(Some(file.path().to_path_buf())))
        .expect("select failed");
    pipeline
        .update_geometry(GeometryDelta::Drag { dx: 1.0, dy: 0.0 })
        .expect("drag failed");

    pipeline.confirm_crop().await.expect("confirm failed");

    let bytes = pipeline.result().expect("result missing").to_bytes().expect("base64 failed");
    let decoded = image::load_from_memory(&bytes).expect("decode failed").to_rgb8();
    let center = decoded.get_pixel(DEFAULT_OUTPUT_SIZE / 2, DEFAULT_OUTPUT_SIZE / 2);
    assert!(center[2] > 200 && center[0] < 60, "expected blue, got {:?}", center);
}
