//! # 上传适配器
//!
//! ## 设计思路
//!
//! 核心只依赖 `UploadAdapter::send(request) -> Ok(profile) | Err(reason)` 这一契约，
//! 网络细节、超时、重试全部由适配器负责。
//!
//! “移除头像”是独立的 `UploadRequest::Remove`，不再用空负载充当哨兵；
//! 只有 HTTP 适配器在线上协议层把它编码为空的 `profile_picture` 字段。
//!
//! ## 实现思路（HttpProfileUploader）
//!
//! - `PUT` multipart，`Authorization: Bearer <token>`，凭证每次请求时从 `CredentialProvider` 读取，核心从不保存
//! - 408/429/5xx 与连接/超时错误按指数退避 + 抖动重试，其余失败立即返回
//! - 日志中的 URL 去掉 query 与 fragment

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};

use super::config::UploadConfig;
use super::source::EncodedImage;
use super::CaptureError;

/// 资料更新接口返回的最新资料表示，核心不解析其内容。
pub type ProfileRepr = serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum UploadRequest {
    /// 用新图片替换头像。
    Replace(EncodedImage),
    /// 移除现有头像。
    Remove,
}

#[async_trait]
pub trait UploadAdapter: Send + Sync {
    async fn send(&self, request: UploadRequest) -> Result<ProfileRepr, CaptureError>;
}

/// 登录会话协作方：提供上传所需的凭证。
pub trait CredentialProvider: Send + Sync {
    fn bearer_token(&self) -> Option<String>;
}

/// 固定令牌。
pub struct StaticToken(pub String);

impl CredentialProvider for StaticToken {
    fn bearer_token(&self) -> Option<String> {
        Some(self.0.clone()).filter(|token| !token.trim().is_empty())
    }
}

/// 每次请求时读取环境变量中的令牌。
pub struct EnvToken(pub String);

impl CredentialProvider for EnvToken {
    fn bearer_token(&self) -> Option<String> {
        std::env::var(&self.0).ok().filter(|token| !token.trim().is_empty())
    }
}

pub struct HttpProfileUploader {
    client: reqwest::Client,
    config: UploadConfig,
    credentials: Arc<dyn CredentialProvider>,
}

impl HttpProfileUploader {
    pub fn new(config: UploadConfig, credentials: Arc<dyn CredentialProvider>) -> Result<Self, CaptureError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| CaptureError::UploadFailed(format!("无法创建 HTTP 客户端：{}", e)))?;

        Ok(Self {
            client,
            config,
            credentials,
        })
    }

    fn build_form(&self, request: &UploadRequest) -> Result<Form, CaptureError> {
        let field = self.config.field_name.clone();
        match request {
            UploadRequest::Replace(image) => {
                let part = Part::bytes(image.to_bytes()?)
                    .file_name("profile.jpg")
                    .mime_str(image.mime_type())
                    .map_err(|e| CaptureError::UploadFailed(format!("无效的 MIME：{}", e)))?;
                Ok(Form::new().part(field, part))
            }
            UploadRequest::Remove => Ok(Form::new().text(field, "")),
        }
    }

    async fn send_once(&self, form: Form, token: &str) -> Result<reqwest::Response, reqwest::Error> {
        self.client
            .put(&self.config.endpoint)
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await
    }
}

#[async_trait]
impl UploadAdapter for HttpProfileUploader {
    async fn send(&self, request: UploadRequest) -> Result<ProfileRepr, CaptureError> {
        let token = self
            .credentials
            .bearer_token()
            .ok_or_else(|| CaptureError::UploadFailed("缺少登录凭证".to_string()))?;

        let endpoint = redact_url_for_log(&self.config.endpoint);
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt: u8 = 1;

        loop {
            log::debug!("📤 上传资料图片 - {} 第 {}/{} 次", endpoint, attempt, max_attempts);

            // multipart 表单不可复用，每次尝试重新构建
            let form = self.build_form(&request)?;
            let outcome = self.send_once(form, &token).await;
            let can_retry = attempt < max_attempts;

            match outcome {
                Ok(response) if response.status().is_success() => {
                    let profile = response
                        .json::<ProfileRepr>()
                        .await
                        .map_err(|e| CaptureError::UploadFailed(format!("响应不是有效 JSON：{}", e)))?;
                    log::info!("✅ 资料图片已更新 - {}", endpoint);
                    return Ok(profile);
                }
                Ok(response) => {
                    let status = response.status();
                    if can_retry && is_retryable_http_status(status) {
                        let delay_ms = compute_retry_delay_with_jitter(self.config.retry_base_delay_ms, attempt);
                        log::warn!(
                            "⚠️ HTTP {}（第 {}/{} 次，可重试）；{}ms 后重试",
                            status.as_u16(),
                            attempt,
                            max_attempts,
                            delay_ms
                        );
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                        attempt = attempt.saturating_add(1);
                        continue;
                    }

                    let body = response.text().await.unwrap_or_default();
                    let snippet: String = body.chars().take(200).collect();
                    return Err(CaptureError::UploadFailed(format!("HTTP {}: {}", status.as_u16(), snippet)));
                }
                Err(err) => {
                    let message = err.to_string().replace(&self.config.endpoint, &endpoint);
                    if can_retry && (err.is_timeout() || err.is_connect()) {
                        let delay_ms = compute_retry_delay_with_jitter(self.config.retry_base_delay_ms, attempt);
                        log::warn!(
                            "⚠️ 上传请求失败（第 {}/{} 次，可重试）：{}；{}ms 后重试",
                            attempt,
                            max_attempts,
                            message,
                            delay_ms
                        );
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                        attempt = attempt.saturating_add(1);
                        continue;
                    }

                    return Err(if err.is_timeout() {
                        CaptureError::UploadFailed(format!("上传超时（{}秒）", self.config.timeout_secs))
                    } else {
                        CaptureError::UploadFailed(message)
                    });
                }
            }
        }
    }
}

fn is_retryable_http_status(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

fn compute_retry_delay_with_jitter(base_delay_ms: u64, attempt: u8) -> u64 {
    let exp = base_delay_ms.saturating_mul(1_u64 << (attempt.saturating_sub(1).min(8) as u32));
    let jitter_bound = (exp / 2).max(1);
    let seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    exp.saturating_add(seed % (jitter_bound + 1))
}

pub fn redact_url_for_log(url: &str) -> String {
    let Ok(parsed) = reqwest::Url::parse(url) else {
        return "<invalid-url>".to_string();
    };

    let host = parsed.host_str().unwrap_or("<unknown-host>");
    let port = parsed.port().map(|p| format!(":{}", p)).unwrap_or_default();
    format!("{}://{}{}{}", parsed.scheme(), host, port, parsed.path())
}
