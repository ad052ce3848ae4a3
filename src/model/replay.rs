// 该文件是 Tancha （探查） 项目的一部分。
// src/model/replay.rs - 回放模型，重放录制的原始输出张量
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

use std::{path::Path, time::Duration};

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{InputTensor, Model, RawOutput},
};

#[derive(Error, Debug)]
pub enum ReplayModelError {
  #[error("URI 方案不匹配: 期望 '{expected}', 实际 '{actual}'")]
  SchemeMismatch { expected: &'static str, actual: String },
  #[error("录制文件读取错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("录制文件解析错误: {0}")]
  ParseError(#[from] serde_json::Error),
  #[error("录制文件中各行长度不一致: 第 {row} 行长度 {actual}, 期望 {expected}")]
  RaggedRows {
    row: usize,
    expected: usize,
    actual: usize,
  },
  #[error("参数 {key} 无效: {value}")]
  InvalidQuery { key: String, value: String },
}

/// 录制文件格式，支持逐行嵌套或展平两种写法
#[derive(Deserialize)]
#[serde(untagged)]
enum Recording {
  Rows { rows: Vec<Vec<f32>> },
  Flat { row_len: usize, data: Vec<f32> },
}

impl Recording {
  fn into_raw_output(self) -> Result<RawOutput, ReplayModelError> {
    match self {
      Recording::Flat { row_len, data } => Ok(RawOutput::new(row_len, data)),
      Recording::Rows { rows } => {
        let row_len = rows.first().map(Vec::len).unwrap_or(1);
        let mut data = Vec::with_capacity(row_len * rows.len());
        for (row, values) in rows.into_iter().enumerate() {
          if values.len() != row_len {
            return Err(ReplayModelError::RaggedRows {
              row,
              expected: row_len,
              actual: values.len(),
            });
          }
          data.extend(values);
        }
        Ok(RawOutput::new(row_len, data))
      }
    }
  }
}

/// 每次推理都返回同一份录制输出，可选地模拟推理耗时
#[derive(Debug, Clone)]
pub struct ReplayModel {
  output: RawOutput,
  delay: Duration,
}

impl ReplayModel {
  pub fn new(output: RawOutput) -> Self {
    Self {
      output,
      delay: Duration::ZERO,
    }
  }

  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = delay;
    self
  }

  pub fn from_json_str(json: &str) -> Result<Self, ReplayModelError> {
    let recording: Recording = serde_json::from_str(json)?;
    Ok(Self::new(recording.into_raw_output()?))
  }

  pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ReplayModelError> {
    let path = path.as_ref();
    info!("加载录制输出: {}", path.display());
    let json = std::fs::read_to_string(path)?;
    Self::from_json_str(&json)
  }

  pub fn output(&self) -> &RawOutput {
    &self.output
  }
}

impl FromUrlWithScheme for ReplayModel {
  const SCHEME: &'static str = "replay";
}

impl FromUrl for ReplayModel {
  type Error = ReplayModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ReplayModelError::SchemeMismatch {
        expected: Self::SCHEME,
        actual: url.scheme().to_string(),
      });
    }

    let mut model = Self::from_json_file(url.path())?;
    for (key, value) in url.query_pairs() {
      if key == "delay_ms" {
        let ms = value
          .parse::<u64>()
          .map_err(|_| ReplayModelError::InvalidQuery {
            key: key.to_string(),
            value: value.to_string(),
          })?;
        model.delay = Duration::from_millis(ms);
      }
    }

    debug!(
      "回放模型: {} 行, 行长 {}, 模拟耗时 {:?}",
      model.output.num_rows(),
      model.output.row_len(),
      model.delay
    );
    Ok(model)
  }
}

impl Model for ReplayModel {
  type Error = std::convert::Infallible;

  fn infer(&mut self, input: &InputTensor) -> Result<RawOutput, Self::Error> {
    debug!("回放推理, 输入形状 {:?}", input.shape());
    if !self.delay.is_zero() {
      std::thread::sleep(self.delay);
    }
    Ok(self.output.clone())
  }
}
