//! 裁剪窗口几何。
//!
//! 偏移量按轴归一化到 `[-1, 1]`：`0` 表示方框居中，`±1` 表示方框贴住图片边缘。
//! 因此钳制与图片尺寸无关，缩放变化后窗口也始终落在图片内部。
//! 所有计算都是纯函数。

use super::CaptureConfig;

const OFFSET_LIMIT: f32 = 1.0;

/// 当前裁剪窗口（仅在 Cropping 状态存在）。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropGeometry {
    pub offset_x: f32,
    pub offset_y: f32,
    pub zoom: f32,
}

impl Default for CropGeometry {
    fn default() -> Self {
        Self {
            offset_x: 0.0,
            offset_y: 0.0,
            zoom: 1.0,
        }
    }
}

/// 用户输入产生的几何变化。
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GeometryDelta {
    /// 相对拖拽（归一化偏移增量）。
    Drag { dx: f32, dy: f32 },
    /// 缩放滑杆的绝对值，按步进对齐。
    ZoomTo(f32),
    /// 滚轮/捏合的相对缩放增量。
    ZoomBy(f32),
}

/// 缩放范围与滑杆步进。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoomLimits {
    pub min: f32,
    pub max: f32,
    pub step: f32,
}

impl ZoomLimits {
    pub fn from_config(config: &CaptureConfig) -> Self {
        Self {
            min: config.min_zoom,
            max: config.max_zoom,
            step: config.zoom_step,
        }
    }

    fn clamp(&self, zoom: f32) -> f32 {
        zoom.clamp(self.min, self.max)
    }

    fn snap(&self, zoom: f32) -> f32 {
        if self.step <= f32::EPSILON {
            return self.clamp(zoom);
        }
        let steps = ((zoom - self.min) / self.step).round();
        self.clamp(self.min + steps * self.step)
    }
}

impl Default for ZoomLimits {
    fn default() -> Self {
        Self::from_config(&CaptureConfig::default())
    }
}

/// 源图中的正方形区域（像素坐标，可含小数）。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropRect {
    pub x: f64,
    pub y: f64,
    pub side: f64,
}

impl CropRect {
    /// 取整到像素网格，并保证不越出源图。
    pub fn to_pixels(self, width: u32, height: u32) -> (u32, u32, u32) {
        let side = (self.side.round() as u32).clamp(1, width.min(height).max(1));
        let x = (self.x.round() as u32).min(width.saturating_sub(side));
        let y = (self.y.round() as u32).min(height.saturating_sub(side));
        (x, y, side)
    }

    /// 按比例映射到缩放后的底图坐标系。
    pub(crate) fn scaled(self, factor: f64) -> Self {
        Self {
            x: self.x * factor,
            y: self.y * factor,
            side: self.side * factor,
        }
    }
}

impl CropGeometry {
    /// 应用一次输入变化；越界值静默钳制。返回几何是否真的发生了变化。
    pub fn apply(&mut self, delta: GeometryDelta, limits: &ZoomLimits) -> bool {
        let before = *self;

        match delta {
            GeometryDelta::Drag { dx, dy } => {
                if dx.is_finite() {
                    self.offset_x = (self.offset_x + dx).clamp(-OFFSET_LIMIT, OFFSET_LIMIT);
                }
                if dy.is_finite() {
                    self.offset_y = (self.offset_y + dy).clamp(-OFFSET_LIMIT, OFFSET_LIMIT);
                }
            }
            GeometryDelta::ZoomTo(value) => {
                if value.is_finite() {
                    self.zoom = limits.snap(value);
                }
            }
            GeometryDelta::ZoomBy(step) => {
                if step.is_finite() {
                    self.zoom = limits.clamp(self.zoom + step);
                }
            }
        }

        *self != before
    }

    /// 计算源图中被选中的正方形：边长 = 短边 / zoom，位置由归一化偏移决定。
    pub fn source_rect(&self, width: u32, height: u32) -> CropRect {
        let width = width as f64;
        let height = height as f64;
        let zoom = (self.zoom as f64).max(1.0);
        let side = width.min(height) / zoom;

        let slack_x = (width - side).max(0.0) / 2.0;
        let slack_y = (height - side).max(0.0) / 2.0;

        CropRect {
            x: slack_x * (1.0 + self.offset_x as f64),
            y: slack_y * (1.0 + self.offset_y as f64),
            side,
        }
    }

    /// 将预览视口中的指针位移（像素）换算为归一化拖拽增量。
    ///
    /// 向右拖动图片意味着窗口向左移动，因此符号取反。
    /// 某一轴没有可移动空间时，该轴增量为 0。
    pub fn drag_from_pixels(
        &self,
        dx_px: f32,
        dy_px: f32,
        viewport_px: u32,
        source: (u32, u32),
    ) -> GeometryDelta {
        let rect = self.source_rect(source.0, source.1);
        let source_per_view = rect.side / viewport_px.max(1) as f64;

        let slack_x = (source.0 as f64 - rect.side).max(0.0) / 2.0;
        let slack_y = (source.1 as f64 - rect.side).max(0.0) / 2.0;

        let normalise = |px: f32, slack: f64| -> f32 {
            if slack <= f64::EPSILON {
                0.0
            } else {
                (-(px as f64) * source_per_view / slack) as f32
            }
        };

        GeometryDelta::Drag {
            dx: normalise(dx_px, slack_x),
            dy: normalise(dy_px, slack_y),
        }
    }
}
