// 该文件是 Tancha （探查） 项目的一部分。
// src/args.rs - 项目参数配置
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

use std::{path::PathBuf, time::Duration};

use clap::Parser;
use url::Url;

use tancha::config::{ConfigError, PipelineConfig};

/// Tancha 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型来源，例如 replay:///path/to/output.json?delay_ms=20
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 输入来源: image:///path/to/frame.png[?repeat=N] 或 folder:///path/to/frames
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,

  /// 标注输出: image:///path/to/out.png 或 folder:///path/to/records[?record=name|id][&always]
  #[arg(long, value_name = "OUTPUT")]
  pub output: Option<Url>,

  /// JSON 配置文件，未给出时使用默认配置
  #[arg(long, value_name = "FILE")]
  pub config: Option<PathBuf>,

  /// 覆盖置信度下限 (0.0 - 1.0)
  #[arg(long, value_name = "THRESHOLD")]
  pub min_confidence: Option<f32>,

  /// 覆盖 NMS IoU 阈值 (0.0 - 1.0)
  #[arg(long, value_name = "THRESHOLD")]
  pub iou_threshold: Option<f32>,

  /// 覆盖单次推理时限（毫秒）
  #[arg(long, value_name = "MS")]
  pub deadline_ms: Option<u64>,

  /// 最大处理帧数，不指定则处理全部输入
  #[arg(long, value_name = "COUNT")]
  pub frames: Option<usize>,

  /// 多数表决窗口（帧数）
  #[arg(long, value_name = "FRAMES")]
  pub vote_window: Option<usize>,
}

impl Args {
  pub fn pipeline_config(&self) -> Result<PipelineConfig, ConfigError> {
    let mut config = match &self.config {
      Some(path) => PipelineConfig::from_json_file(path)?,
      None => PipelineConfig::default(),
    };

    if let Some(min_confidence) = self.min_confidence {
      config = config.with_min_confidence(min_confidence);
    }
    if let Some(iou_threshold) = self.iou_threshold {
      config = config.with_iou_threshold(iou_threshold);
    }
    if let Some(deadline_ms) = self.deadline_ms {
      config = config.with_inference_deadline(Duration::from_millis(deadline_ms));
    }

    config.validate()?;
    Ok(config)
  }
}
