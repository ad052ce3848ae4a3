// 该文件是 Tancha （探查） 项目的一部分。
// src/processor/arena.rs - 预处理缓冲区
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

use fast_image_resize as fr;
use thiserror::Error;
use tracing::debug;

use crate::{frame::RgbFrame, model::InputTensor};

/// 张量池大小：工作线程正在执行的一份、排队中的一份、本帧正在填充的一份
const TENSOR_POOL_SIZE: usize = 3;

#[derive(Error, Debug)]
pub enum PreprocessError {
  #[error("源图像无效: {0}")]
  Source(#[from] fr::ImageBufferError),
  #[error("图像缩放失败: {0}")]
  Resize(#[from] fr::ResizeError),
  #[error("输入张量缓冲区全部被占用")]
  Exhausted,
}

/// 启动时按配置一次性分配的预处理缓冲区，逐帧复用
pub(crate) struct FrameArena {
  resizer: fr::Resizer,
  options: fr::ResizeOptions,
  resized: fr::images::Image<'static>,
  tensors: Vec<Arc<InputTensor>>,
  normalize_pixels: bool,
}

impl FrameArena {
  pub(crate) fn new(input_size: u32, normalize_pixels: bool) -> Self {
    let tensors = (0..TENSOR_POOL_SIZE)
      .map(|_| Arc::new(InputTensor::zeros(input_size as usize)))
      .collect();

    debug!(
      "分配预处理缓冲区: {}x{}, 张量池 {} 份",
      input_size, input_size, TENSOR_POOL_SIZE
    );

    Self {
      resizer: fr::Resizer::new(),
      options: fr::ResizeOptions::new()
        .resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear)),
      resized: fr::images::Image::new(input_size, input_size, fr::PixelType::U8x3),
      tensors,
      normalize_pixels,
    }
  }

  /// 把帧缩放到方形输入并写入一份空闲张量
  ///
  /// 仍被推理线程持有的张量不会被覆盖。
  pub(crate) fn prepare(&mut self, frame: &RgbFrame) -> Result<Arc<InputTensor>, PreprocessError> {
    let src = fr::images::ImageRef::new(
      frame.width(),
      frame.height(),
      frame.as_hwc(),
      fr::PixelType::U8x3,
    )?;
    self
      .resizer
      .resize(&src, &mut self.resized, &self.options)?;

    let slot = self
      .tensors
      .iter()
      .position(|t| Arc::strong_count(t) == 1)
      .ok_or(PreprocessError::Exhausted)?;
    let tensor = Arc::get_mut(&mut self.tensors[slot]).ok_or(PreprocessError::Exhausted)?;

    let pixels = self.resized.buffer();
    let values = tensor.as_mut_slice();
    if self.normalize_pixels {
      for (dst, &src) in values.iter_mut().zip(pixels) {
        *dst = src as f32 / 255.0;
      }
    } else {
      for (dst, &src) in values.iter_mut().zip(pixels) {
        *dst = src as f32;
      }
    }

    Ok(Arc::clone(&self.tensors[slot]))
  }
}
