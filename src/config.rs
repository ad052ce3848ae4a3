// 该文件是 Tancha （探查） 项目的一部分。
// src/config.rs - 流水线配置
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

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::{
  classify::UNKNOWN_LABEL,
  model::{CoordinateConvention, LabelSet, SuppressionMode},
  processor::TimeoutFallback,
};

const DEFAULT_MIN_CONFIDENCE: f32 = 0.5;
const DEFAULT_IOU_THRESHOLD: f32 = 0.5;
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_INFERENCE_DEADLINE_MS: u64 = 500;
const DEFAULT_INVOCATION_FAILURE_LIMIT: u32 = 5;
const DEFAULT_LABELS: [&str; 3] = ["Dragon", "Robot", "Console"];

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("配置文件读取错误: {path}: {source}")]
  IoError {
    path: String,
    #[source]
    source: std::io::Error,
  },
  #[error("配置解析错误: {0}")]
  ParseError(#[from] serde_json::Error),
  #[error("配置项 {field} 超出范围: {value}, 期望 {expected}")]
  OutOfRange {
    field: &'static str,
    value: String,
    expected: &'static str,
  },
  #[error("标签集合为空")]
  EmptyLabels,
  #[error("标签重复: {0}")]
  DuplicateLabel(String),
  #[error("标签 {0} 与未知分类的输出冲突")]
  ReservedLabel(String),
}

/// 流水线配置，构造时提供一次，之后不可变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
  /// 置信度下限，低于或等于该值的候选被丢弃
  pub min_confidence: f32,
  /// NMS IoU 阈值
  pub iou_threshold: f32,
  /// 模型输入边长
  pub input_size: u32,
  /// 单次推理时限（毫秒）
  pub inference_deadline_ms: u64,
  /// 有序标签集合
  pub labels: Vec<String>,
  /// 像素是否归一化到 0-1，否则保留 0-255
  pub normalize_pixels: bool,
  pub coordinates: CoordinateConvention,
  pub timeout_fallback: TimeoutFallback,
  pub suppression: SuppressionMode,
  /// 连续提交失败达到该次数时由调用方升级处理
  pub invocation_failure_limit: u32,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      min_confidence: DEFAULT_MIN_CONFIDENCE,
      iou_threshold: DEFAULT_IOU_THRESHOLD,
      input_size: DEFAULT_INPUT_SIZE,
      inference_deadline_ms: DEFAULT_INFERENCE_DEADLINE_MS,
      labels: DEFAULT_LABELS.iter().map(|s| s.to_string()).collect(),
      normalize_pixels: true,
      coordinates: CoordinateConvention::default(),
      timeout_fallback: TimeoutFallback::default(),
      suppression: SuppressionMode::default(),
      invocation_failure_limit: DEFAULT_INVOCATION_FAILURE_LIMIT,
    }
  }
}

fn unit_interval(field: &'static str, value: f32) -> Result<(), ConfigError> {
  if (0.0..=1.0).contains(&value) {
    Ok(())
  } else {
    Err(ConfigError::OutOfRange {
      field,
      value: value.to_string(),
      expected: "[0, 1]",
    })
  }
}

impl PipelineConfig {
  pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
    let config: Self = serde_json::from_str(json)?;
    config.validate()?;
    Ok(config)
  }

  pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    info!("加载配置文件: {}", path.display());
    let json = std::fs::read_to_string(path).map_err(|source| ConfigError::IoError {
      path: path.display().to_string(),
      source,
    })?;
    Self::from_json_str(&json)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    unit_interval("min_confidence", self.min_confidence)?;
    unit_interval("iou_threshold", self.iou_threshold)?;

    if self.input_size == 0 {
      return Err(ConfigError::OutOfRange {
        field: "input_size",
        value: self.input_size.to_string(),
        expected: "> 0",
      });
    }
    if self.inference_deadline_ms == 0 {
      return Err(ConfigError::OutOfRange {
        field: "inference_deadline_ms",
        value: self.inference_deadline_ms.to_string(),
        expected: "> 0",
      });
    }

    if self.labels.is_empty() {
      return Err(ConfigError::EmptyLabels);
    }
    for (idx, label) in self.labels.iter().enumerate() {
      if label == UNKNOWN_LABEL {
        return Err(ConfigError::ReservedLabel(label.clone()));
      }
      if self.labels[..idx].contains(label) {
        return Err(ConfigError::DuplicateLabel(label.clone()));
      }
    }

    Ok(())
  }

  pub fn inference_deadline(&self) -> Duration {
    Duration::from_millis(self.inference_deadline_ms)
  }

  pub fn label_set(&self) -> LabelSet {
    LabelSet::new(&self.labels)
  }

  pub fn with_min_confidence(mut self, min_confidence: f32) -> Self {
    self.min_confidence = min_confidence;
    self
  }

  pub fn with_iou_threshold(mut self, iou_threshold: f32) -> Self {
    self.iou_threshold = iou_threshold;
    self
  }

  pub fn with_input_size(mut self, input_size: u32) -> Self {
    self.input_size = input_size;
    self
  }

  pub fn with_inference_deadline(mut self, deadline: Duration) -> Self {
    self.inference_deadline_ms = deadline.as_millis() as u64;
    self
  }

  pub fn with_labels<I, S>(mut self, labels: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.labels = labels.into_iter().map(Into::into).collect();
    self
  }

  pub fn with_normalize_pixels(mut self, normalize_pixels: bool) -> Self {
    self.normalize_pixels = normalize_pixels;
    self
  }

  pub fn with_coordinates(mut self, coordinates: CoordinateConvention) -> Self {
    self.coordinates = coordinates;
    self
  }

  pub fn with_timeout_fallback(mut self, timeout_fallback: TimeoutFallback) -> Self {
    self.timeout_fallback = timeout_fallback;
    self
  }

  pub fn with_suppression(mut self, suppression: SuppressionMode) -> Self {
    self.suppression = suppression;
    self
  }

  pub fn with_invocation_failure_limit(mut self, limit: u32) -> Self {
    self.invocation_failure_limit = limit;
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn default_is_valid() {
    let config = PipelineConfig::default();
    config.validate().unwrap();
    assert_eq!(config.label_set().len(), 3);
    assert_eq!(config.inference_deadline(), Duration::from_millis(500));
  }

  #[test]
  fn partial_json_fills_defaults() {
    let config = PipelineConfig::from_json_str(
      r#"{
        "min_confidence": 0.25,
        "labels": ["a", "b"],
        "timeout_fallback": "sticky",
        "suppression": "class_aware",
        "coordinates": "pixel"
      }"#,
    )
    .unwrap();
    assert_eq!(config.min_confidence, 0.25);
    assert_eq!(config.labels, ["a", "b"]);
    assert_eq!(config.timeout_fallback, TimeoutFallback::Sticky);
    assert_eq!(config.suppression, SuppressionMode::ClassAware);
    assert_eq!(config.coordinates, CoordinateConvention::Pixel);
    assert_eq!(config.input_size, DEFAULT_INPUT_SIZE);
  }

  #[test]
  fn input_pixel_convention_parses() {
    let config = PipelineConfig::from_json_str(r#"{"coordinates": "input_pixel"}"#).unwrap();
    assert_eq!(config.coordinates, CoordinateConvention::InputPixel);
  }

  #[test]
  fn unknown_fields_are_rejected() {
    assert!(matches!(
      PipelineConfig::from_json_str(r#"{"min_confidnce": 0.3}"#),
      Err(ConfigError::ParseError(_))
    ));
  }

  #[test]
  fn out_of_range_values_are_rejected() {
    let bad = PipelineConfig::default().with_min_confidence(1.5);
    assert!(matches!(
      bad.validate(),
      Err(ConfigError::OutOfRange {
        field: "min_confidence",
        ..
      })
    ));

    let bad = PipelineConfig::default().with_iou_threshold(-0.1);
    assert!(matches!(
      bad.validate(),
      Err(ConfigError::OutOfRange {
        field: "iou_threshold",
        ..
      })
    ));

    let bad = PipelineConfig::default().with_input_size(0);
    assert!(bad.validate().is_err());

    let bad = PipelineConfig::default().with_inference_deadline(Duration::ZERO);
    assert!(bad.validate().is_err());
  }

  #[test]
  fn labels_must_be_present_and_unique() {
    let empty = PipelineConfig::default().with_labels(Vec::<String>::new());
    assert!(matches!(empty.validate(), Err(ConfigError::EmptyLabels)));

    let dup = PipelineConfig::default().with_labels(["a", "b", "a"]);
    assert!(matches!(dup.validate(), Err(ConfigError::DuplicateLabel(l)) if l == "a"));

    let reserved = PipelineConfig::default().with_labels(["Robot", "unknown"]);
    assert!(matches!(reserved.validate(), Err(ConfigError::ReservedLabel(_))));
  }

  #[test]
  fn loads_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pipeline.json");
    std::fs::write(&path, r#"{"inference_deadline_ms": 120}"#).unwrap();
    let config = PipelineConfig::from_json_file(&path).unwrap();
    assert_eq!(config.inference_deadline(), Duration::from_millis(120));

    assert!(matches!(
      PipelineConfig::from_json_file(dir.path().join("missing.json")),
      Err(ConfigError::IoError { .. })
    ));
  }
}
