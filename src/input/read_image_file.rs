// 该文件是 Tancha （探查） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use image::ImageReader;
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{FrameShapeError, RgbFrame},
};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI 方案不匹配: 期望 '{expected}', 实际 '{actual}'")]
  SchemeMismatch {
    expected: &'static str,
    actual: String,
  },
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像加载错误: {0}")]
  ImageLoadError(#[from] image::ImageError),
  #[error("图像尺寸无效: {0}")]
  FrameError(#[from] FrameShapeError),
  #[error("查询参数无效: {key}={value}")]
  InvalidQuery { key: String, value: String },
}

pub(super) fn load_frame(path: &Path) -> Result<RgbFrame, ImageFileInputError> {
  let image = ImageReader::open(path)?.with_guessed_format()?.decode()?;
  Ok(RgbFrame::try_from(image.into_rgb8())?)
}

/// 单张图像，可重复产出多次
///
/// `image:///path/to/frame.png[?repeat=N]`
pub struct ImageFileInput {
  frame: RgbFrame,
  remaining: usize,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemeMismatch {
        expected: Self::SCHEME,
        actual: url.scheme().to_string(),
      });
    }

    let mut repeat = 1;
    for (k, v) in url.query_pairs() {
      if k == "repeat" {
        repeat = v.parse().map_err(|_| ImageFileInputError::InvalidQuery {
          key: k.to_string(),
          value: v.to_string(),
        })?;
      }
    }

    let input = Self::open(url.path())?.with_repeat(repeat);
    Ok(input)
  }
}

impl ImageFileInput {
  pub fn open(path: impl AsRef<Path>) -> Result<Self, ImageFileInputError> {
    let path = path.as_ref();
    let frame = load_frame(path)?;
    info!(
      "读取图像文件: {} ({}x{})",
      path.display(),
      frame.width(),
      frame.height()
    );
    Ok(Self::from_frame(frame))
  }

  pub fn from_frame(frame: RgbFrame) -> Self {
    Self {
      frame,
      remaining: 1,
    }
  }

  pub fn with_repeat(mut self, repeat: usize) -> Self {
    self.remaining = repeat;
    self
  }
}

impl Iterator for ImageFileInput {
  type Item = RgbFrame;

  fn next(&mut self) -> Option<Self::Item> {
    if self.remaining == 0 {
      return None;
    }
    self.remaining -= 1;
    Some(self.frame.clone())
  }

  fn size_hint(&self) -> (usize, Option<usize>) {
    (self.remaining, Some(self.remaining))
  }
}
