//! # 资料图片采集 — 命令行入口
//!
//! 本文件只负责参数解析、日志初始化与适配器装配，
//! 流程本身完全交给 `CapturePipeline`，详见 `lib.rs` 架构文档。

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;

use derma_capture::capture::{
    redact_url_for_log, CaptureConfig, CaptureError, CaptureService, CropQualityProfile, EnvToken, FixedPathPicker,
    GeometryDelta, HttpProfileUploader, ProfileRepr, ProfileSurface, UploadAdapter, UploadRequest,
};
use derma_capture::error::AppError;

const TOKEN_ENV: &str = "DERMA_ACCESS_TOKEN";

/// 将本地图片裁剪为方形资料图片，并上传到资料服务或写入本地文件。
#[derive(Debug, Parser)]
#[command(name = "derma-capture", version)]
struct Cli {
    /// 源图片路径
    #[arg(long, required_unless_present = "remove")]
    input: Option<PathBuf>,

    /// 缩放倍数（会按配置的步长取整并钳制）
    #[arg(long, default_value_t = 1.0)]
    zoom: f32,

    /// 水平偏移，-1 为最左，1 为最右
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    offset_x: f32,

    /// 垂直偏移，-1 为最上，1 为最下
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    offset_y: f32,

    /// 画质档位：quality / balanced / speed
    #[arg(long)]
    profile: Option<String>,

    /// JSON 配置文件
    #[arg(long, env = "DERMA_CAPTURE_CONFIG")]
    config: Option<PathBuf>,

    /// 资料界面：patient / dermatologist / account
    #[arg(long, default_value = "account")]
    surface: String,

    /// 写入本地 JPEG 而不是上传
    #[arg(long, conflicts_with = "endpoint")]
    output: Option<PathBuf>,

    /// 资料更新接口地址（覆盖配置文件）
    #[arg(long)]
    endpoint: Option<String>,

    /// 移除现有资料图片
    #[arg(long, conflicts_with_all = ["input", "output"])]
    remove: bool,
}

/// 把结果写到本地文件的适配器。
struct LocalFileUploader {
    path: PathBuf,
}

#[async_trait]
impl UploadAdapter for LocalFileUploader {
    async fn send(&self, request: UploadRequest) -> Result<ProfileRepr, CaptureError> {
        let UploadRequest::Replace(image) = request else {
            return Err(CaptureError::UploadFailed("本地输出不支持移除操作".to_string()));
        };

        tokio::fs::write(&self.path, image.to_bytes()?).await.map_err(|e| {
            CaptureError::UploadFailed(format!("写入 {} 失败：{}", self.path.display(), e))
        })?;
        log::info!("💾 已写入 {}", self.path.display());

        Ok(serde_json::json!({
            "profile_picture": self.path.display().to_string(),
            "width": image.width(),
            "height": image.height(),
        }))
    }
}

async fn run(cli: Cli) -> Result<ProfileRepr, AppError> {
    let mut config = match &cli.config {
        Some(path) => CaptureConfig::from_json_file(path)?,
        None => CaptureConfig::default(),
    };
    if let Some(endpoint) = &cli.endpoint {
        config.upload.endpoint = endpoint.clone();
    }
    if let Some(profile) = &cli.profile {
        config.apply_quality_profile(CropQualityProfile::parse(profile)?);
    }
    config.validate()?;

    let uploader: Arc<dyn UploadAdapter> = match &cli.output {
        Some(path) => Arc::new(LocalFileUploader { path: path.clone() }),
        None => {
            log::info!("🌐 上传目标：{}", redact_url_for_log(&config.upload.endpoint));
            Arc::new(HttpProfileUploader::new(
                config.upload.clone(),
                Arc::new(EnvToken(TOKEN_ENV.to_string())),
            )?)
        }
    };

    let service = CaptureService::new(config, uploader)?;
    let surface = ProfileSurface::parse(&cli.surface)?;
    let mut pipeline = service.session(surface).await?;

    if cli.remove {
        return Ok(pipeline.remove_image().await?);
    }

    pipeline.select_file(&FixedPathPicker(cli.input))?;
    pipeline.update_geometry(GeometryDelta::ZoomTo(cli.zoom))?;
    pipeline.update_geometry(GeometryDelta::Drag {
        dx: cli.offset_x,
        dy: cli.offset_y,
    })?;

    Ok(pipeline.confirm_crop().await?)
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(profile) => {
            println!("{:#}", profile);
            ExitCode::SUCCESS
        }
        Err(err) => {
            match err.kind() {
                Some(kind) => log::error!("❌ [{}] {}：{}", kind.code(), kind.user_message(), err),
                None => log::error!("❌ {}", err),
            }
            ExitCode::FAILURE
        }
    }
}
