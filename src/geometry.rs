// 该文件是 Tancha （探查） 项目的一部分。
// src/geometry.rs - 边界框几何运算
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

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
  #[error("边界框构造错误: {field} = {value}，必须为非负有限值")]
  Construction { field: &'static str, value: f32 },
}

fn non_negative(field: &'static str, value: f32) -> Result<f32, GeometryError> {
  if value.is_finite() && value >= 0.0 {
    Ok(value)
  } else {
    Err(GeometryError::Construction { field, value })
  }
}

/// 轴对齐边界框，以左上角为锚点
///
/// 所有字段在构造时校验为非负有限值，之后不可变。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
  /// 左上角 x 坐标
  x: f32,
  /// 左上角 y 坐标
  y: f32,
  /// 宽度
  width: f32,
  /// 高度
  height: f32,
}

impl BBox {
  pub fn new(x: f32, y: f32, width: f32, height: f32) -> Result<Self, GeometryError> {
    Ok(Self {
      x: non_negative("x", x)?,
      y: non_negative("y", y)?,
      width: non_negative("width", width)?,
      height: non_negative("height", height)?,
    })
  }

  /// 由角点坐标 `[x_min, y_min, x_max, y_max]` 构造
  pub fn from_xyxy(x1: f32, y1: f32, x2: f32, y2: f32) -> Result<Self, GeometryError> {
    Self::new(x1, y1, x2 - x1, y2 - y1)
  }

  /// 由中心点与宽高 `[cx, cy, w, h]` 构造
  pub fn from_cxcywh(cx: f32, cy: f32, width: f32, height: f32) -> Result<Self, GeometryError> {
    Self::new(cx - width / 2.0, cy - height / 2.0, width, height)
  }

  pub fn x(&self) -> f32 {
    self.x
  }

  pub fn y(&self) -> f32 {
    self.y
  }

  pub fn width(&self) -> f32 {
    self.width
  }

  pub fn height(&self) -> f32 {
    self.height
  }

  pub fn right(&self) -> f32 {
    self.x + self.width
  }

  pub fn bottom(&self) -> f32 {
    self.y + self.height
  }

  pub fn area(&self) -> f32 {
    self.width * self.height
  }

  pub fn center(&self) -> (f32, f32) {
    (self.x + self.width / 2.0, self.y + self.height / 2.0)
  }

  pub fn to_xyxy(&self) -> [f32; 4] {
    [self.x, self.y, self.right(), self.bottom()]
  }

  pub fn to_cxcywh(&self) -> [f32; 4] {
    let (cx, cy) = self.center();
    [cx, cy, self.width, self.height]
  }

  /// 两框的交集
  ///
  /// 两框不相交时重叠宽高被截断为 0，返回面积为 0 的合法框而不是错误。
  pub fn intersect(&self, other: &BBox) -> BBox {
    let x1 = self.x.max(other.x);
    let y1 = self.y.max(other.y);
    let x2 = self.right().min(other.right());
    let y2 = self.bottom().min(other.bottom());

    BBox {
      x: x1,
      y: y1,
      width: (x2 - x1).max(0.0),
      height: (y2 - y1).max(0.0),
    }
  }

  /// 同时覆盖两框的最小外接框
  pub fn union(&self, other: &BBox) -> BBox {
    let x1 = self.x.min(other.x);
    let y1 = self.y.min(other.y);
    let x2 = self.right().max(other.right());
    let y2 = self.bottom().max(other.bottom());

    BBox {
      x: x1,
      y: y1,
      width: x2 - x1,
      height: y2 - y1,
    }
  }

  /// 交并比，分母为 0（两框均退化）时定义为 0
  pub fn iou(&self, other: &BBox) -> f32 {
    let intersection = self.intersect(other).area();
    let denominator = self.area() + other.area() - intersection;

    if denominator > 0.0 {
      (intersection / denominator).clamp(0.0, 1.0)
    } else {
      0.0
    }
  }

  /// 按两个方向分别缩放四个字段，用于把归一化坐标映射到像素空间
  pub fn scale(&self, scale_x: f32, scale_y: f32) -> Result<BBox, GeometryError> {
    non_negative("scale_x", scale_x)?;
    non_negative("scale_y", scale_y)?;
    BBox::new(
      self.x * scale_x,
      self.y * scale_y,
      self.width * scale_x,
      self.height * scale_y,
    )
  }

  pub fn scale_uniform(&self, scale: f32) -> Result<BBox, GeometryError> {
    self.scale(scale, scale)
  }

  /// `other` 是否完全落在本框内（含边界）
  pub fn contains(&self, other: &BBox) -> bool {
    other.x >= self.x
      && other.y >= self.y
      && other.right() <= self.right()
      && other.bottom() <= self.bottom()
  }
}
