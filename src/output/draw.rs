// 该文件是 Tancha （探查） 项目的一部分。
// src/output/draw.rs - 检测结果可视化与文本记录
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut},
  rect::Rect,
};
use tracing::debug;

use crate::{
  frame::RgbFrame,
  model::Detection,
  processor::{DetectionSnapshot, SnapshotOrigin},
};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_HEIGHT: i32 = 24;
const LABEL_CHAR_WIDTH: f32 = 11.0; // 每字符平均宽度（粗略估计）
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const LABEL_COLOR: [u8; 3] = [0, 0, 255]; // 蓝色
const BORDER_THICKNESS: i32 = 2;
const TIMEOUT_BANNER: &str = "Inference timed out";
const TIMEOUT_COLOR: [u8; 3] = [255, 0, 0]; // 红色

/// 在帧的副本上绘制检测框与标签
///
/// 未提供字体时只绘制边框与标签底色。
pub struct Draw {
  font_size: f32,
  label_text_height: i32,
  label_char_width: f32,
  label_text_vertical_padding: i32,
  font: Option<FontVec>,
  label_color: [u8; 3],
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      font_size: LABEL_FONT_SIZE,
      label_text_height: LABEL_TEXT_HEIGHT,
      label_char_width: LABEL_CHAR_WIDTH,
      label_text_vertical_padding: LABEL_TEXT_VERTICAL_PADDING,
      label_color: LABEL_COLOR,
      font: None,
    }
  }
}

#[derive(thiserror::Error, Debug)]
pub enum FontLoadError {
  #[error("字体文件读取错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("字体文件无效: {0}")]
  InvalidFont(#[from] ab_glyph::InvalidFont),
}

impl Draw {
  pub fn with_font_file(mut self, path: impl AsRef<Path>) -> Result<Self, FontLoadError> {
    let path = path.as_ref();
    let data = std::fs::read(path)?;
    self.font = Some(FontVec::try_from_vec(data)?);
    debug!("加载标注字体: {}", path.display());
    Ok(self)
  }

  pub fn with_label_color(mut self, color: [u8; 3]) -> Self {
    self.label_color = color;
    self
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  /// 帧本身不被修改
  pub fn draw_snapshot(&self, frame: &RgbFrame, snapshot: &DetectionSnapshot) -> RgbImage {
    let mut image = frame.to_rgb_image();
    for det in snapshot.detections.iter() {
      self.draw_bbox_with_label(&mut image, det);
    }
    if let SnapshotOrigin::Fallback(_) = snapshot.origin {
      self.draw_timeout_banner(&mut image);
    }
    image
  }

  // 左上角的超时提示条
  fn draw_timeout_banner(&self, image: &mut RgbImage) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    let width = ((TIMEOUT_BANNER.len() as f32 * self.label_char_width) as i32).min(w);
    let height = self.label_text_height.min(h);
    if width <= 0 || height <= 0 {
      return;
    }

    let rect = Rect::at(0, 0).of_size(width as u32, height as u32);
    draw_filled_rect_mut(image, rect, Rgb(TIMEOUT_COLOR));

    if let Some(font) = &self.font {
      draw_text_mut(
        image,
        Rgb([255u8, 255u8, 255u8]),
        0,
        self.label_text_vertical_padding,
        PxScale::from(self.font_size),
        font,
        TIMEOUT_BANNER,
      );
    }
  }

  // 检测框已是帧像素坐标
  fn draw_bbox_with_label(&self, image: &mut RgbImage, det: &Detection) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    let [x1, y1, x2, y2] = det.bbox.to_xyxy();

    let x_min = (x1.floor() as i32).clamp(0, w - 1);
    let y_min = (y1.floor() as i32).clamp(0, h - 1);
    let x_max = (x2.ceil() as i32).clamp(0, w - 1);
    let y_max = (y2.ceil() as i32).clamp(0, h - 1);

    if x_min >= x_max || y_min >= y_max {
      return;
    }

    let color = Rgb(self.label_color);
    for t in 0..BORDER_THICKNESS {
      let width = x_max - x_min - 2 * t;
      let height = y_max - y_min - 2 * t;
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(x_min + t, y_min + t).of_size(width as u32 + 1, height as u32 + 1);
      draw_hollow_rect_mut(image, rect, color);
    }

    let label = format!("{} {:.2}", det.label, det.confidence);

    let text_width = (label.chars().count() as f32 * self.label_char_width) as i32;
    let label_x = x_min;
    let label_y = (y_min - self.label_text_height).max(0);
    let label_width = text_width.min(w - label_x);

    if label_width <= 0 {
      return;
    }
    let rect = Rect::at(label_x, label_y).of_size(label_width as u32, self.label_text_height as u32);
    draw_filled_rect_mut(image, rect, color);

    if let Some(font) = &self.font {
      draw_text_mut(
        image,
        Rgb([255u8, 255u8, 255u8]),
        label_x,
        label_y + self.label_text_vertical_padding,
        PxScale::from(self.font_size),
        font,
        &label,
      );
    }
  }
}

/// 把检测结果写成与图像同名的 txt 文件
pub struct Record {
  pub label_with_name: bool,
}

impl Record {
  pub fn format(&self, snapshot: &DetectionSnapshot) -> String {
    let mut records = Vec::with_capacity(snapshot.detections.len());
    for det in snapshot.detections.iter() {
      let name = if self.label_with_name {
        det.label.to_string()
      } else {
        det.class_id.to_string()
      };
      let [x1, y1, x2, y2] = det.bbox.to_xyxy();
      records.push(format!(
        "{}, {:.4}, {:.4}, {:.4}, {:.4}, {:.4}",
        name, det.confidence, x1, y1, x2, y2
      ));
    }
    records.join("\n")
  }

  pub fn record(&self, snapshot: &DetectionSnapshot, path: &Path) -> Result<(), std::io::Error> {
    std::fs::write(path.with_extension("txt"), self.format(snapshot))
  }
}
