//! # 采集流水线状态机
//!
//! ## 设计思路
//!
//! 整个“采集 → 校验 → 裁剪 → 编码 → 上传”过程由一个显式的 `CaptureSession` 值加状态切换描述，
//! 不再散落在回调闭包里。
//!
//! ```text
//! Idle ─┬─ start_camera ──▶ Capturing ── capture_frame ─┐
//!       └─ start_file_pick ▶ FileSelecting ─ file_chosen ┤
//!                                                        ▼
//!                                                   Validating ──✗──▶ Error(kind)
//!                                                        │
//!                                                        ▼
//!             cancel ◀──────────────────────────── Cropping ◀─┐ update_geometry
//!               │                                        │    │
//!               ▼                                        └────┘
//!           Cancelled                             confirm_crop
//!                                                        ▼
//!                                                    Encoding ──✗──▶ Error(DecodeFailed)
//!                                                        ▼
//!                             retry_upload ──▶ Uploading ──✗──▶ Error(UploadFailed)（保留结果）
//!                                                        ▼
//!                                                     Success
//! Error / Cancelled / Success ── reset ──▶ Idle
//! ```
//!
//! ## 实现思路
//!
//! - 摄像头只在 `Capturing` 中被 `CameraSession` 持有，离开该状态的每条路径都先释放再报告结果。
//! - 编码在阻塞线程池执行，不占用交互线程；编码与上传都发生在离开 `Cropping` 之后。
//! - `confirm_crop` / `retry_upload` 持有 `&mut self` 直到上传结束，上传期间在类型层面无法取消。
//! - 界面被外部关闭时通过 `AbortHandle` 立即停轨，不需要拿到流水线本身；
//!   流水线在下一次被调用时完成拆除。
//! - 每次状态切换都记录日志并通知可选的监听器，调试构建下校验会话不变量。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use super::camera::{CameraDevice, CameraReleaseHandle, CameraSession};
use super::crop::{CropEngine, PreviewSource};
use super::file_input::{select_local_file, FilePicker};
use super::geometry::{CropGeometry, GeometryDelta, ZoomLimits};
use super::source::{EncodedImage, PreviewFrame, RawImage};
use super::upload::{ProfileRepr, UploadAdapter, UploadRequest};
use super::validator::ImageValidator;
use super::{CaptureConfig, CaptureError, ErrorKind};

/// 流水线状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Capturing,
    FileSelecting,
    Validating,
    Cropping,
    Encoding,
    Uploading,
    Success,
    Error(ErrorKind),
    Cancelled,
}

impl PipelineState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Capturing => "Capturing",
            Self::FileSelecting => "FileSelecting",
            Self::Validating => "Validating",
            Self::Cropping => "Cropping",
            Self::Encoding => "Encoding",
            Self::Uploading => "Uploading",
            Self::Success => "Success",
            Self::Error(_) => "Error",
            Self::Cancelled => "Cancelled",
        }
    }

    /// 会话已结束，只能 `reset` 回到 `Idle`。
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Error(_) | Self::Cancelled)
    }
}

/// 一次“采集 → 上传”尝试的完整上下文。
#[derive(Debug, Clone)]
pub struct CaptureSession {
    state: PipelineState,
    raw: Option<RawImage>,
    geometry: Option<CropGeometry>,
    result: Option<EncodedImage>,
    error: Option<ErrorKind>,
}

impl CaptureSession {
    fn idle() -> Self {
        Self {
            state: PipelineState::Idle,
            raw: None,
            geometry: None,
            result: None,
            error: None,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn raw(&self) -> Option<&RawImage> {
        self.raw.as_ref()
    }

    pub fn geometry(&self) -> Option<&CropGeometry> {
        self.geometry.as_ref()
    }

    pub fn result(&self) -> Option<&EncodedImage> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<ErrorKind> {
        self.error
    }

    fn invariants_hold(&self) -> bool {
        use PipelineState::*;

        let raw_ok = self.raw.is_none() || matches!(self.state, Validating | Cropping | Encoding);
        let geometry_ok = self.geometry.is_some() == (self.state == Cropping);
        let result_ok = self.result.is_none()
            || matches!(self.state, Uploading | Success | Error(ErrorKind::UploadFailed));
        let error_ok = match self.state {
            Error(kind) => self.error == Some(kind),
            _ => self.error.is_none(),
        };

        raw_ok && geometry_ok && result_ok && error_ok
    }
}

#[derive(Default)]
struct AbortSignal {
    requested: AtomicBool,
    camera: Mutex<Option<CameraReleaseHandle>>,
}

/// 从流水线之外终止当前会话的句柄。
///
/// `abort` 立即释放摄像头并登记终止请求，不等待流水线的持有者；
/// 流水线在下一次被调用时拆除会话回到 `Idle`。
#[derive(Clone, Default)]
pub struct AbortHandle {
    signal: Arc<AbortSignal>,
}

impl AbortHandle {
    pub fn abort(&self) {
        self.signal.requested.store(true, Ordering::SeqCst);
        let camera = self
            .signal
            .camera
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(camera) = camera {
            camera.release();
        }
    }

    pub fn is_requested(&self) -> bool {
        self.signal.requested.load(Ordering::SeqCst)
    }

    fn arm_camera(&self, camera: CameraReleaseHandle) {
        *self.signal.camera.lock().unwrap_or_else(PoisonError::into_inner) = Some(camera);
    }

    fn disarm_camera(&self) {
        self.signal.camera.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    fn clear(&self) {
        self.signal.requested.store(false, Ordering::SeqCst);
        self.disarm_camera();
    }
}

/// 状态切换监听器：`(from, to)`。
pub type TransitionListener = Box<dyn Fn(PipelineState, PipelineState) + Send + Sync>;

/// 采集流水线。每个 UI 界面持有一个实例，同一时刻只有一个会话。
pub struct CapturePipeline {
    config: CaptureConfig,
    validator: ImageValidator,
    engine: CropEngine,
    zoom_limits: ZoomLimits,
    uploader: Arc<dyn UploadAdapter>,
    session: CaptureSession,
    camera: Option<CameraSession>,
    preview: Option<PreviewSource>,
    last_error: Option<ErrorKind>,
    profile: Option<ProfileRepr>,
    listener: Option<TransitionListener>,
    abort_handle: AbortHandle,
}

impl CapturePipeline {
    pub fn new(config: CaptureConfig, uploader: Arc<dyn UploadAdapter>) -> Self {
        Self {
            validator: ImageValidator::from_config(&config),
            engine: CropEngine::from_config(&config),
            zoom_limits: ZoomLimits::from_config(&config),
            config,
            uploader,
            session: CaptureSession::idle(),
            camera: None,
            preview: None,
            last_error: None,
            profile: None,
            listener: None,
            abort_handle: AbortHandle::default(),
        }
    }

    pub fn with_transition_listener<F>(mut self, listener: F) -> Self
    where
        F: Fn(PipelineState, PipelineState) + Send + Sync + 'static,
    {
        self.listener = Some(Box::new(listener));
        self
    }

    /// 替换配置快照。只允许在 `Idle` 下进行，进行中的会话不受影响。
    pub fn reconfigure(&mut self, config: CaptureConfig) -> Result<(), CaptureError> {
        self.require(|s| *s == PipelineState::Idle, "reconfigure")?;
        self.validator = ImageValidator::from_config(&config);
        self.engine = CropEngine::from_config(&config);
        self.zoom_limits = ZoomLimits::from_config(&config);
        self.config = config;
        Ok(())
    }

    pub fn state(&self) -> PipelineState {
        self.session.state
    }

    pub fn session(&self) -> &CaptureSession {
        &self.session
    }

    pub fn result(&self) -> Option<&EncodedImage> {
        self.session.result.as_ref()
    }

    /// 最近一次失败的分类（包括不会进入 `Error` 状态的权限拒绝与取消选择）。
    pub fn last_error(&self) -> Option<ErrorKind> {
        self.last_error
    }

    /// 最近一次上传成功后适配器返回的资料。
    pub fn profile(&self) -> Option<&ProfileRepr> {
        self.profile.as_ref()
    }

    /// 供界面层在流水线之外终止会话。
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort_handle.clone()
    }

    pub fn camera_active(&self) -> bool {
        self.camera.as_ref().map(CameraSession::is_live).unwrap_or(false)
    }

    // ------------------------------------------------------------------
    // 采集
    // ------------------------------------------------------------------

    /// Idle → Capturing：打开摄像头。授权被拒或无设备时回到 `Idle` 并返回错误。
    pub fn start_camera(&mut self, device: &dyn CameraDevice) -> Result<(), CaptureError> {
        self.require(|s| *s == PipelineState::Idle, "start_camera")?;
        self.last_error = None;
        self.transition(PipelineState::Capturing);

        match CameraSession::request_camera_stream(device, self.config.camera_frame_quality) {
            Ok(camera) => {
                self.abort_handle.arm_camera(camera.release_handle());
                self.camera = Some(camera);
                Ok(())
            }
            Err(err) => {
                log::warn!("⚠️ 摄像头打开失败：{}", err);
                self.last_error = err.kind();
                self.transition(PipelineState::Idle);
                Err(err)
            }
        }
    }

    /// 捕获瞬间：Capturing → Validating → Cropping | Error。摄像头在校验前已释放。
    pub fn capture_frame(&mut self) -> Result<(), CaptureError> {
        self.require(|s| *s == PipelineState::Capturing, "capture_frame")?;

        self.abort_handle.disarm_camera();
        let outcome = match self.camera.take() {
            Some(camera) => camera.capture_instant(),
            None => Err(CaptureError::DeviceUnavailable("摄像头未打开".to_string())),
        };

        match outcome {
            Ok(raw) => self.accept_raw(raw),
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Idle → FileSelecting。
    pub fn start_file_pick(&mut self) -> Result<(), CaptureError> {
        self.require(|s| *s == PipelineState::Idle, "start_file_pick")?;
        self.last_error = None;
        self.transition(PipelineState::FileSelecting);
        Ok(())
    }

    /// FileSelecting → Validating → Cropping | Error。
    pub fn file_chosen(&mut self, raw: RawImage) -> Result<(), CaptureError> {
        self.require(|s| *s == PipelineState::FileSelecting, "file_chosen")?;
        self.accept_raw(raw)
    }

    /// FileSelecting → Idle（用户关闭选择器）。
    pub fn file_dismissed(&mut self) -> Result<(), CaptureError> {
        self.require(|s| *s == PipelineState::FileSelecting, "file_dismissed")?;
        self.last_error = Some(ErrorKind::NoFileSelected);
        self.transition(PipelineState::Idle);
        Ok(())
    }

    /// 打开选择器并处理结果；关闭选择器时回到 `Idle` 并返回 `NoFileSelected`。
    pub fn select_file(&mut self, picker: &dyn FilePicker) -> Result<(), CaptureError> {
        self.start_file_pick()?;
        match select_local_file(picker, self.config.max_raw_bytes) {
            Ok(raw) => self.file_chosen(raw),
            Err(err) => {
                self.file_dismissed()?;
                self.last_error = err.kind();
                Err(err)
            }
        }
    }

    fn accept_raw(&mut self, raw: RawImage) -> Result<(), CaptureError> {
        log::debug!(
            "🔎 校验原始图片 - source={:?} mime={} size={} captured_at={}",
            raw.source_kind,
            raw.mime_type,
            raw.byte_size,
            raw.captured_at.to_rfc3339()
        );
        self.session.raw = Some(raw);
        self.transition(PipelineState::Validating);

        let verdict = match self.session.raw.as_ref() {
            Some(raw) => self.validator.validate(raw),
            None => Err(CaptureError::NoFileSelected),
        };

        match verdict {
            Ok(()) => {
                self.session.geometry = Some(CropGeometry::default());
                self.preview = None;
                self.transition(PipelineState::Cropping);
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    // ------------------------------------------------------------------
    // 裁剪
    // ------------------------------------------------------------------

    /// 应用一次几何变化；返回几何是否改变。只重绘，不改变状态。
    pub fn update_geometry(&mut self, delta: GeometryDelta) -> Result<bool, CaptureError> {
        self.require(|s| *s == PipelineState::Cropping, "update_geometry")?;
        let limits = self.zoom_limits;
        Ok(self
            .session
            .geometry
            .as_mut()
            .map(|geometry| geometry.apply(delta, &limits))
            .unwrap_or(false))
    }

    /// 以预览视口中的像素位移拖动裁剪窗口。
    pub fn drag_by_pixels(&mut self, dx: f32, dy: f32, viewport_px: u32) -> Result<bool, CaptureError> {
        self.require(|s| *s == PipelineState::Cropping, "drag_by_pixels")?;
        let source = self.ensure_preview()?;
        let delta = self
            .session
            .geometry
            .map(|geometry| geometry.drag_from_pixels(dx, dy, viewport_px, source))
            .unwrap_or(GeometryDelta::Drag { dx: 0.0, dy: 0.0 });
        self.update_geometry(delta)
    }

    /// 渲染当前几何的预览帧。解码失败不改变状态，确认时会以 `DecodeFailed` 结束。
    pub fn render_preview(&mut self, size: u32) -> Result<PreviewFrame, CaptureError> {
        self.require(|s| *s == PipelineState::Cropping, "render_preview")?;
        let geometry = self.session.geometry.unwrap_or_default();
        self.ensure_preview()?;
        match self.preview.as_ref() {
            Some(source) => self.engine.render_preview(source, &geometry, size),
            None => Err(CaptureError::DecodeFailed("预览不可用".to_string())),
        }
    }

    /// 懒加载预览底图，返回原图尺寸。
    fn ensure_preview(&mut self) -> Result<(u32, u32), CaptureError> {
        if let Some(preview) = &self.preview {
            return Ok(preview.source_dimensions());
        }

        let raw = self.session.raw.as_ref().ok_or(CaptureError::InvalidTransition {
            state: self.session.state.name(),
            action: "render_preview",
        })?;
        let preview = self.engine.prepare_preview(raw)?;
        let dimensions = preview.source_dimensions();
        self.preview = Some(preview);
        Ok(dimensions)
    }

    // ------------------------------------------------------------------
    // 取消 / 重置
    // ------------------------------------------------------------------

    /// 用户取消：Capturing → Cancelled（释放摄像头），FileSelecting → Idle，Cropping → Cancelled。
    /// 编码与上传开始后不提供取消。
    pub fn cancel(&mut self) -> Result<(), CaptureError> {
        self.apply_pending_abort();
        match self.session.state {
            PipelineState::Capturing => {
                self.release_camera();
                self.transition(PipelineState::Cancelled);
                Ok(())
            }
            PipelineState::FileSelecting => self.file_dismissed(),
            PipelineState::Cropping => {
                self.session.raw = None;
                self.session.geometry = None;
                self.preview = None;
                self.transition(PipelineState::Cancelled);
                Ok(())
            }
            state => Err(CaptureError::InvalidTransition {
                state: state.name(),
                action: "cancel",
            }),
        }
    }

    /// Error / Cancelled / Success → Idle，完整拆除会话。
    pub fn reset(&mut self) -> Result<(), CaptureError> {
        self.require(PipelineState::is_terminal, "reset")?;
        self.teardown();
        Ok(())
    }

    /// 界面被直接关闭或导航离开：任意状态立即拆除会话并释放摄像头。
    pub fn abort(&mut self) {
        self.abort_handle.clear();
        if self.session.state != PipelineState::Idle {
            log::info!("🧹 界面关闭，终止会话 - state={}", self.session.state.name());
            self.teardown();
        }
    }

    // ------------------------------------------------------------------
    // 编码 / 上传
    // ------------------------------------------------------------------

    /// 确认裁剪：Cropping → Encoding → Uploading → Success | Error。
    pub async fn confirm_crop(&mut self) -> Result<ProfileRepr, CaptureError> {
        self.require(|s| *s == PipelineState::Cropping, "confirm_crop")?;

        let geometry = self.session.geometry.take().unwrap_or_default();
        let raw = match self.session.raw.clone() {
            Some(raw) => raw,
            None => {
                return Err(self.fail(CaptureError::DecodeFailed("缺少原始图片".to_string())));
            }
        };
        self.preview = None;
        self.transition(PipelineState::Encoding);

        let engine = self.engine.clone();
        let start = Instant::now();
        let outcome = tokio::task::spawn_blocking(move || engine.extract(&raw, &geometry))
            .await
            .unwrap_or_else(|e| Err(CaptureError::DecodeFailed(format!("编码任务异常终止：{}", e))));

        let encoded = match outcome {
            Ok(encoded) => encoded,
            Err(err) => {
                let err = match err {
                    CaptureError::DecodeFailed(_) => err,
                    other => CaptureError::DecodeFailed(other.to_string()),
                };
                return Err(self.fail(err));
            }
        };
        log::info!("✅ 编码完成 - {}ms", start.elapsed().as_millis());

        self.session.raw = None;
        self.session.result = Some(encoded);
        self.transition(PipelineState::Uploading);
        self.upload_result().await
    }

    /// 上传失败后重发同一份结果，不重新裁剪。
    pub async fn retry_upload(&mut self) -> Result<ProfileRepr, CaptureError> {
        self.require(
            |s| matches!(s, PipelineState::Error(kind) if kind.is_retryable()),
            "retry_upload",
        )?;
        if self.session.result.is_none() {
            return Err(CaptureError::InvalidTransition {
                state: self.session.state.name(),
                action: "retry_upload",
            });
        }

        self.session.error = None;
        self.transition(PipelineState::Uploading);
        self.upload_result().await
    }

    async fn upload_result(&mut self) -> Result<ProfileRepr, CaptureError> {
        let payload = match self.session.result.clone() {
            Some(payload) => payload,
            None => return Err(self.fail(CaptureError::UploadFailed("没有可上传的结果".to_string()))),
        };

        let start = Instant::now();
        match self.uploader.send(UploadRequest::Replace(payload)).await {
            Ok(profile) => {
                log::info!("✅ 上传完成 - {}ms", start.elapsed().as_millis());
                self.profile = Some(profile.clone());
                self.transition(PipelineState::Success);
                Ok(profile)
            }
            Err(err) => {
                let err = match err {
                    CaptureError::UploadFailed(_) => err,
                    other => CaptureError::UploadFailed(other.to_string()),
                };
                Err(self.fail(err))
            }
        }
    }

    /// 移除已上传的头像。仅在没有进行中的会话时可用；成功后回到 `Idle`。
    pub async fn remove_image(&mut self) -> Result<ProfileRepr, CaptureError> {
        self.require(
            |s| matches!(s, PipelineState::Idle | PipelineState::Success),
            "remove_image",
        )?;

        match self.uploader.send(UploadRequest::Remove).await {
            Ok(profile) => {
                log::info!("🗑️ 已移除资料图片");
                self.profile = Some(profile.clone());
                self.last_error = None;
                self.teardown();
                Ok(profile)
            }
            Err(err) => {
                log::warn!("⚠️ 移除资料图片失败：{}", err);
                self.last_error = Some(ErrorKind::UploadFailed);
                Err(match err {
                    CaptureError::UploadFailed(_) => err,
                    other => CaptureError::UploadFailed(other.to_string()),
                })
            }
        }
    }

    // ------------------------------------------------------------------
    // 内部工具
    // ------------------------------------------------------------------

    /// 处理外部登记的终止请求；返回是否发生了拆除。
    pub(crate) fn apply_pending_abort(&mut self) -> bool {
        if !self.abort_handle.is_requested() {
            return false;
        }
        log::info!("🧹 收到外部终止请求 - state={}", self.session.state.name());
        self.abort_handle.clear();
        if self.session.state == PipelineState::Idle {
            self.release_camera();
            return false;
        }
        self.teardown();
        true
    }

    fn require(&mut self, allowed: impl Fn(&PipelineState) -> bool, action: &'static str) -> Result<(), CaptureError> {
        self.apply_pending_abort();
        if allowed(&self.session.state) {
            Ok(())
        } else {
            Err(CaptureError::InvalidTransition {
                state: self.session.state.name(),
                action,
            })
        }
    }

    /// 进入 `Error(kind)`：先释放资源、丢弃原始图片，再报告错误。
    fn fail(&mut self, err: CaptureError) -> CaptureError {
        let kind = err.kind().unwrap_or(ErrorKind::DecodeFailed);
        log::warn!("❌ 会话失败 - stage={} code={} {}", kind.stage(), kind.code(), err);

        self.release_camera();
        self.preview = None;
        self.session.raw = None;
        self.session.geometry = None;
        if kind != ErrorKind::UploadFailed {
            self.session.result = None;
        }
        self.session.error = Some(kind);
        self.last_error = Some(kind);
        self.transition(PipelineState::Error(kind));
        err
    }

    fn release_camera(&mut self) {
        if let Some(mut camera) = self.camera.take() {
            camera.release();
        }
        self.abort_handle.disarm_camera();
    }

    fn teardown(&mut self) {
        self.release_camera();
        self.preview = None;
        let from = self.session.state;
        self.session = CaptureSession::idle();
        self.notify(from, PipelineState::Idle);
    }

    fn transition(&mut self, to: PipelineState) {
        let from = self.session.state;
        self.session.state = to;
        self.notify(from, to);
    }

    fn notify(&self, from: PipelineState, to: PipelineState) {
        log::debug!("🔁 状态切换 {} → {} ({:?})", from.name(), to.name(), to);
        debug_assert!(
            self.session.invariants_hold(),
            "会话不变量被破坏：{:?}",
            self.session
        );
        debug_assert!(self.camera.is_none() || to == PipelineState::Capturing);
        if let Some(listener) = &self.listener {
            listener(from, to);
        }
    }
}
