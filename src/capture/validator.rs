//! # 原始图片校验
//!
//! 在任何解码/裁剪之前拒绝不可接受的输入。规则按顺序执行，第一条失败的规则决定错误：
//! 1. MIME 必须是图片类型，否则 `UnsupportedType`
//! 2. 体积不得超过上限，否则 `TooLarge`
//!
//! 两条规则都是纯函数，不读取像素、不触发解码。

use super::source::RawImage;
use super::{CaptureConfig, CaptureError};

#[derive(Debug, Clone, Copy)]
pub struct ImageValidator {
    max_bytes: u64,
}

impl ImageValidator {
    pub fn new(max_bytes: u64) -> Self {
        Self { max_bytes }
    }

    pub fn from_config(config: &CaptureConfig) -> Self {
        Self::new(config.max_raw_bytes)
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    pub fn validate(&self, raw: &RawImage) -> Result<(), CaptureError> {
        if !is_image_mime_type(&raw.mime_type) {
            return Err(CaptureError::UnsupportedType(raw.mime_type.clone()));
        }

        if raw.byte_size > self.max_bytes {
            return Err(CaptureError::TooLarge {
                size: raw.byte_size,
                limit: self.max_bytes,
            });
        }

        Ok(())
    }
}

/// 判断 MIME 是否为图片类型（忽略参数与大小写）。
pub fn is_image_mime_type(mime_type: &str) -> bool {
    mime_type
        .split(';')
        .next()
        .map(|base| {
            let base = base.trim().to_ascii_lowercase();
            base.starts_with("image/") && base.len() > "image/".len()
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::SourceKind;
    use crate::capture::config::MAX_RAW_BYTES;
    use proptest::prelude::*;

    fn raw(mime: &str, byte_size: u64) -> RawImage {
        RawImage::header_only(vec![0_u8; 4], byte_size, mime, SourceKind::FileInput)
    }

    #[test]
    fn accepts_image_within_limit() {
        let validator = ImageValidator::new(MAX_RAW_BYTES);
        assert!(validator.validate(&raw("image/jpeg", 1024)).is_ok());
        assert!(validator.validate(&raw("image/png", MAX_RAW_BYTES)).is_ok());
    }

    #[test]
    fn type_rule_runs_before_size_rule() {
        let validator = ImageValidator::new(MAX_RAW_BYTES);
        let result = validator.validate(&raw("application/pdf", MAX_RAW_BYTES * 4));
        assert!(matches!(result, Err(CaptureError::UnsupportedType(_))));
    }

    #[test]
    fn rejects_one_byte_over_limit() {
        let validator = ImageValidator::new(MAX_RAW_BYTES);
        let result = validator.validate(&raw("image/webp", MAX_RAW_BYTES + 1));
        assert_eq!(
            result,
            Err(CaptureError::TooLarge {
                size: MAX_RAW_BYTES + 1,
                limit: MAX_RAW_BYTES
            })
        );
    }

    #[test]
    fn mime_parser_handles_params_and_case() {
        assert!(is_image_mime_type("IMAGE/JPEG"));
        assert!(is_image_mime_type("image/png; charset=binary"));
        assert!(!is_image_mime_type("image/"));
        assert!(!is_image_mime_type("text/html"));
        assert!(!is_image_mime_type(""));
    }

    proptest! {
        #[test]
        fn oversized_images_are_always_too_large(extra in 1_u64..(64 * 1024 * 1024)) {
            let validator = ImageValidator::new(MAX_RAW_BYTES);
            let result = validator.validate(&raw("image/jpeg", MAX_RAW_BYTES + extra));
            let is_too_large = matches!(result, Err(CaptureError::TooLarge { .. }));
            prop_assert!(is_too_large);
        }
    }
}
