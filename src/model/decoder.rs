// 该文件是 Tancha （探查） 项目的一部分。
// src/model/decoder.rs - 原始输出行解码
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

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
  geometry::{BBox, GeometryError},
  model::{Detection, LabelSet},
};

/// 行首固定字段数：四个框坐标与 objectness
const ROW_HEADER_LEN: usize = 5;
const CONFIDENCE_INDEX: usize = 4;

/// 原始行中框坐标的约定，必须显式配置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinateConvention {
  /// `[0, 1]` 区间的相对坐标，按帧宽高缩放
  #[default]
  Normalized,
  /// 帧像素坐标，原样使用
  Pixel,
  /// 模型输入（`input_size x input_size`）像素坐标，按帧与输入的比例缩放
  InputPixel,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
  #[error("输出行长度不匹配: 期望 {expected}, 实际 {actual}")]
  ShapeMismatch { expected: usize, actual: usize },
  #[error("置信度无效: {0}")]
  Confidence(f32),
  #[error("边界框无效: {0}")]
  Geometry(#[from] GeometryError),
}

/// 把一行 `[x1, y1, x2, y2, objectness, scores..]` 解码为带标签的检测结果
#[derive(Debug, Clone)]
pub struct DetectionDecoder {
  labels: LabelSet,
  convention: CoordinateConvention,
  input_size: f32,
}

impl DetectionDecoder {
  pub fn new(labels: LabelSet, convention: CoordinateConvention, input_size: u32) -> Self {
    Self {
      labels,
      convention,
      input_size: input_size as f32,
    }
  }

  pub fn row_len(&self) -> usize {
    ROW_HEADER_LEN + self.labels.len()
  }

  pub fn labels(&self) -> &LabelSet {
    &self.labels
  }

  pub fn convention(&self) -> CoordinateConvention {
    self.convention
  }

  /// 只校验行长并读取 objectness，不做几何解码
  pub fn confidence_of(&self, row: &[f32]) -> Result<f32, DecodeError> {
    self.check_shape(row)?;
    Ok(row[CONFIDENCE_INDEX])
  }

  pub fn decode(
    &self,
    row: &[f32],
    frame_width: u32,
    frame_height: u32,
  ) -> Result<Detection, DecodeError> {
    self.check_shape(row)?;

    let confidence = row[CONFIDENCE_INDEX];
    if !(0.0..=1.0).contains(&confidence) {
      return Err(DecodeError::Confidence(confidence));
    }

    let (scale_x, scale_y) = match self.convention {
      CoordinateConvention::Normalized => (frame_width as f32, frame_height as f32),
      CoordinateConvention::Pixel => (1.0, 1.0),
      CoordinateConvention::InputPixel => (
        frame_width as f32 / self.input_size,
        frame_height as f32 / self.input_size,
      ),
    };
    let bbox = BBox::from_xyxy(row[0], row[1], row[2], row[3])?.scale(scale_x, scale_y)?;

    // 取最大类别分数，相等时保留较小下标
    let scores = &row[ROW_HEADER_LEN..];
    let mut class_id = 0usize;
    let mut best = scores[0];
    for (idx, &score) in scores.iter().enumerate().skip(1) {
      if score > best {
        best = score;
        class_id = idx;
      }
    }

    let label = self
      .labels
      .get(class_id)
      .cloned()
      .ok_or(DecodeError::ShapeMismatch {
        expected: self.row_len(),
        actual: row.len(),
      })?;

    Ok(Detection {
      bbox,
      class_id,
      label,
      confidence,
    })
  }

  fn check_shape(&self, row: &[f32]) -> Result<(), DecodeError> {
    let expected = self.row_len();
    if row.len() != expected || self.labels.is_empty() {
      return Err(DecodeError::ShapeMismatch {
        expected,
        actual: row.len(),
      });
    }
    Ok(())
  }
}
