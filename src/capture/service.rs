//! # 服务层（可注入状态）
//!
//! ## 设计思路
//!
//! 资料图片的入口分布在患者资料、医生资料和账户设置三个界面，各自独立，互不干扰。
//! `CaptureService` 为每个界面懒创建一条流水线，并集中持有可热更新的配置。
//!
//! ## 实现思路
//!
//! - 配置放在 `RwLock` 中；新会话开始时取一次快照，进行中的会话不受后续修改影响。
//! - 每条流水线包在 `tokio::sync::Mutex` 中，同一界面同一时刻只有一个会话在推进。
//! - `session` 返回 `SurfaceSession` 守卫：界面放开守卫时，未结束的会话会被终止并释放摄像头。
//! - `close_surface` 通过 `AbortHandle` 立即停轨，不等待守卫的持有者。

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use super::pipeline::{AbortHandle, CapturePipeline, PipelineState};
use super::upload::UploadAdapter;
use super::{CaptureConfig, ConfigError, CropQualityProfile};

/// 提供资料图片入口的界面。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProfileSurface {
    Patient,
    Dermatologist,
    Account,
}

impl ProfileSurface {
    pub fn parse(surface: &str) -> Result<Self, ConfigError> {
        match surface.trim().to_ascii_lowercase().as_str() {
            "patient" => Ok(Self::Patient),
            "dermatologist" => Ok(Self::Dermatologist),
            "account" => Ok(Self::Account),
            other => Err(ConfigError::Invalid(format!("未知的资料界面：{}", other))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Patient => "patient",
            Self::Dermatologist => "dermatologist",
            Self::Account => "account",
        }
    }
}

/// 某个界面上独占的流水线。
///
/// 放开守卫等同于界面关闭：尚未结束的会话（非 `Idle`、非终态）会被终止。
pub struct SurfaceSession {
    surface: ProfileSurface,
    guard: OwnedMutexGuard<CapturePipeline>,
}

impl SurfaceSession {
    pub fn surface(&self) -> ProfileSurface {
        self.surface
    }
}

impl Deref for SurfaceSession {
    type Target = CapturePipeline;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl DerefMut for SurfaceSession {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

impl Drop for SurfaceSession {
    fn drop(&mut self) {
        self.guard.apply_pending_abort();
        let state = self.guard.state();
        if state != PipelineState::Idle && !state.is_terminal() {
            log::info!("🧹 界面 {} 已放开，终止未完成的会话", self.surface.as_str());
            self.guard.abort();
        }
    }
}

#[derive(Clone)]
struct SurfaceEntry {
    pipeline: Arc<AsyncMutex<CapturePipeline>>,
    abort: AbortHandle,
}

/// 采集服务状态。
pub struct CaptureService {
    config: Arc<RwLock<CaptureConfig>>,
    uploader: Arc<dyn UploadAdapter>,
    pipelines: Mutex<HashMap<ProfileSurface, SurfaceEntry>>,
}

impl CaptureService {
    pub fn new(config: CaptureConfig, uploader: Arc<dyn UploadAdapter>) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            uploader,
            pipelines: Mutex::new(HashMap::new()),
        })
    }

    /// 当前配置的快照。
    pub fn config_snapshot(&self) -> Result<CaptureConfig, ConfigError> {
        self.config
            .read()
            .map(|guard| guard.clone())
            .map_err(|_| ConfigError::Invalid("配置锁已中毒".to_string()))
    }

    /// 整体替换配置，校验失败时保持原配置。
    pub fn update_config(&self, config: CaptureConfig) -> Result<(), ConfigError> {
        config.validate()?;
        let mut guard = self
            .config
            .write()
            .map_err(|_| ConfigError::Invalid("配置锁已中毒".to_string()))?;
        *guard = config;
        Ok(())
    }

    /// 设置裁剪质量档位（`quality` / `balanced` / `speed`），下一次会话生效。
    pub fn set_quality_profile(&self, profile: &str) -> Result<(), ConfigError> {
        let profile = CropQualityProfile::parse(profile)?;
        let mut guard = self
            .config
            .write()
            .map_err(|_| ConfigError::Invalid("配置锁已中毒".to_string()))?;
        guard.apply_quality_profile(profile);
        log::info!("⚙️ 裁剪质量档位已切换为 {}", profile.as_str());
        Ok(())
    }

    pub fn quality_profile(&self) -> Result<&'static str, ConfigError> {
        Ok(self.config_snapshot()?.quality_profile().as_str())
    }

    /// 取得某个界面的流水线并独占它。
    ///
    /// 流水线处于 `Idle` 时会载入最新配置快照，保证新会话使用最新配置。
    pub async fn session(&self, surface: ProfileSurface) -> Result<SurfaceSession, ConfigError> {
        let entry = self.entry_for(surface)?;
        let mut guard = entry.pipeline.lock_owned().await;
        guard.apply_pending_abort();

        if guard.state() == PipelineState::Idle {
            let snapshot = self.config_snapshot()?;
            guard
                .reconfigure(snapshot)
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }

        Ok(SurfaceSession { surface, guard })
    }

    /// 界面关闭：立即释放该界面的摄像头并终止会话。
    ///
    /// 不等待当前守卫的持有者；流水线被占用时，拆除在持有者下一次调用或放开守卫时完成。
    pub async fn close_surface(&self, surface: ProfileSurface) -> Result<(), ConfigError> {
        let existing = {
            let guard = self
                .pipelines
                .lock()
                .map_err(|_| ConfigError::Invalid("流水线表锁已中毒".to_string()))?;
            guard.get(&surface).cloned()
        };

        if let Some(entry) = existing {
            entry.abort.abort();
            if let Ok(mut pipeline) = entry.pipeline.try_lock() {
                pipeline.abort();
            }
            log::debug!("🧹 已关闭界面 {}", surface.as_str());
        }
        Ok(())
    }

    fn entry_for(&self, surface: ProfileSurface) -> Result<SurfaceEntry, ConfigError> {
        let mut guard = self
            .pipelines
            .lock()
            .map_err(|_| ConfigError::Invalid("流水线表锁已中毒".to_string()))?;

        if let Some(entry) = guard.get(&surface) {
            return Ok(entry.clone());
        }

        let snapshot = self.config_snapshot()?;
        let surface_name = surface.as_str();
        let pipeline = CapturePipeline::new(snapshot, Arc::clone(&self.uploader)).with_transition_listener(
            move |from, to| {
                log::debug!("[{}] {} → {}", surface_name, from.name(), to.name());
            },
        );
        let entry = SurfaceEntry {
            abort: pipeline.abort_handle(),
            pipeline: Arc::new(AsyncMutex::new(pipeline)),
        };
        guard.insert(surface, entry.clone());
        log::info!("🆕 为界面 {} 创建采集流水线", surface_name);
        Ok(entry)
    }
}
