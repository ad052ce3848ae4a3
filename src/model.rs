// 该文件是 Tancha （探查） 项目的一部分。
// src/model.rs - 模型接口与检测结果
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

use std::sync::Arc;

use crate::geometry::BBox;

const RGB_CHANNELS: usize = 3;

/// 不透明的推理模型
///
/// 模型被移交给推理工作线程独占持有，因此需要 `Send + 'static`。
pub trait Model: Send + 'static {
  type Error: std::error::Error + Send + Sync + 'static;

  fn infer(&mut self, input: &InputTensor) -> Result<RawOutput, Self::Error>;
}

/// `1 x S x S x 3` 的 NHWC 浮点输入张量
#[derive(Debug, Clone, PartialEq)]
pub struct InputTensor {
  size: usize,
  data: Box<[f32]>,
}

impl InputTensor {
  pub fn zeros(size: usize) -> Self {
    Self {
      size,
      data: vec![0.0; size * size * RGB_CHANNELS].into_boxed_slice(),
    }
  }

  pub fn shape(&self) -> [usize; 4] {
    [1, self.size, self.size, RGB_CHANNELS]
  }

  pub fn size(&self) -> usize {
    self.size
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.data
  }

  pub fn as_mut_slice(&mut self) -> &mut [f32] {
    &mut self.data
  }
}

/// 模型原始输出 `(1, N, 5+K)`，按行展平存储
///
/// 每行布局为 `[x1, y1, x2, y2, objectness, class_score_0 .. class_score_{K-1}]`。
/// 若数据长度不是行长的整数倍，最后会产生一个不完整的短行。
#[derive(Debug, Clone, PartialEq)]
pub struct RawOutput {
  row_len: usize,
  data: Box<[f32]>,
}

impl RawOutput {
  pub fn new(row_len: usize, data: Vec<f32>) -> Self {
    Self {
      row_len: row_len.max(1),
      data: data.into_boxed_slice(),
    }
  }

  pub fn empty(row_len: usize) -> Self {
    Self::new(row_len, Vec::new())
  }

  pub fn row_len(&self) -> usize {
    self.row_len
  }

  pub fn num_rows(&self) -> usize {
    self.data.len().div_ceil(self.row_len)
  }

  pub fn rows(&self) -> std::slice::Chunks<'_, f32> {
    self.data.chunks(self.row_len)
  }
}

/// 有序标签集合，下标即类别编号
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSet {
  names: Arc<[Arc<str>]>,
}

impl LabelSet {
  pub fn new<I, S>(names: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    Self {
      names: names.into_iter().map(|name| Arc::from(name.as_ref())).collect(),
    }
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  pub fn get(&self, class_id: usize) -> Option<&Arc<str>> {
    self.names.get(class_id)
  }

  pub fn position(&self, name: &str) -> Option<usize> {
    self.names.iter().position(|n| n.as_ref() == name)
  }

  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.names.iter().map(|n| n.as_ref())
  }
}

/// 单帧内的一个检测结果
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  /// 像素空间的边界框
  pub bbox: BBox,
  /// 类别编号（标签集合下标）
  pub class_id: usize,
  /// 类别名称
  pub label: Arc<str>,
  /// 置信度，范围 [0, 1]
  pub confidence: f32,
}

mod decoder;
mod replay;
mod suppression;

pub use self::decoder::{CoordinateConvention, DecodeError, DetectionDecoder};
pub use self::replay::{ReplayModel, ReplayModelError};
pub use self::suppression::{SuppressionEngine, SuppressionMode};
