// 该文件是 Tancha （探查） 项目的一部分。
// src/processor.rs - 单帧处理流水线
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

use std::{sync::Arc, time::Duration};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::{
  classify::{Classification, ClassificationReducer},
  config::{ConfigError, PipelineConfig},
  executor::{BoundedInferenceExecutor, ExecutorError, InvocationError},
  frame::RgbFrame,
  model::{Detection, DetectionDecoder, Model, RawOutput, SuppressionEngine},
  observer::{PipelineObserver, TracingObserver},
};

mod arena;

use self::arena::FrameArena;
pub use self::arena::PreprocessError;

/// 推理超时时对外发布的内容
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutFallback {
  /// 发布空结果
  #[default]
  Cleared,
  /// 沿用上一帧发布的结果
  Sticky,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOrigin {
  /// 流水线刚创建，尚未处理任何帧
  Initial,
  Inference,
  Fallback(TimeoutFallback),
}

/// 对外可见的最新检测结果，整体替换发布
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionSnapshot {
  pub frame_index: u64,
  pub generation: Option<u64>,
  pub origin: SnapshotOrigin,
  pub detections: Arc<[Detection]>,
  pub classification: Classification,
}

impl DetectionSnapshot {
  fn initial() -> Self {
    Self {
      frame_index: 0,
      generation: None,
      origin: SnapshotOrigin::Initial,
      detections: Arc::from(Vec::new()),
      classification: Classification::Unknown,
    }
  }
}

/// 最新检测结果的只读句柄，可在任意线程克隆与轮询
#[derive(Debug, Clone)]
pub struct DetectionFeed {
  latest: Arc<RwLock<Arc<DetectionSnapshot>>>,
}

impl DetectionFeed {
  pub fn latest(&self) -> Arc<DetectionSnapshot> {
    self.latest.read().clone()
  }

  pub fn classification(&self) -> Classification {
    self.latest().classification.clone()
  }
}

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("配置错误: {0}")]
  Config(#[from] ConfigError),
  #[error("无法启动推理工作线程: {0}")]
  Spawn(#[from] std::io::Error),
}

/// 单帧失败，均只影响当前帧
#[derive(Error, Debug)]
pub enum FrameError {
  #[error("预处理失败: {0}")]
  Preprocess(#[from] PreprocessError),
  #[error("第 {generation} 代推理超时 (时限 {deadline:?}), 回退策略 {fallback:?}")]
  Timeout {
    generation: u64,
    deadline: Duration,
    fallback: TimeoutFallback,
  },
  #[error("推理提交失败 (连续 {consecutive} 次): {source}")]
  Invocation {
    #[source]
    source: InvocationError,
    consecutive: u32,
  },
  #[error("第 {generation} 代推理失败: {source}")]
  Model {
    generation: u64,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
  },
}

/// 成功处理一帧后的统计
#[derive(Debug, Clone)]
pub struct FrameReport {
  pub frame_index: u64,
  pub generation: u64,
  /// 原始输出行数
  pub rows: usize,
  /// 因格式错误被丢弃的行数
  pub rejected_rows: usize,
  /// 通过置信度过滤、进入 NMS 的候选数
  pub candidates: usize,
  pub inference_time: Duration,
  pub snapshot: Arc<DetectionSnapshot>,
}

/// 帧处理器
///
/// 逐帧执行 预处理 → 限时推理 → 解码 → 置信度过滤 → NMS → 发布。
/// 帧严格串行处理，唯一的并发是推理工作线程。
pub struct FrameProcessor {
  config: PipelineConfig,
  decoder: DetectionDecoder,
  suppressor: SuppressionEngine,
  executor: BoundedInferenceExecutor,
  arena: FrameArena,
  latest: Arc<RwLock<Arc<DetectionSnapshot>>>,
  observer: Arc<dyn PipelineObserver>,
  frame_index: u64,
  consecutive_invocation_failures: u32,
}

impl FrameProcessor {
  pub fn new<M: Model>(config: PipelineConfig, model: M) -> Result<Self, PipelineError> {
    Self::with_observer(config, model, Arc::new(TracingObserver))
  }

  pub fn with_observer<M: Model>(
    config: PipelineConfig,
    model: M,
    observer: Arc<dyn PipelineObserver>,
  ) -> Result<Self, PipelineError> {
    config.validate()?;

    info!(
      "创建帧处理器: 输入 {}x{}, 置信度下限 {}, IoU 阈值 {}, 时限 {:?}",
      config.input_size,
      config.input_size,
      config.min_confidence,
      config.iou_threshold,
      config.inference_deadline()
    );
    debug!(
      "标签 {:?}, 坐标 {:?}, 归一化 {}, 超时回退 {:?}, NMS {:?}",
      config.labels,
      config.coordinates,
      config.normalize_pixels,
      config.timeout_fallback,
      config.suppression
    );

    let decoder = DetectionDecoder::new(config.label_set(), config.coordinates, config.input_size);
    let suppressor = SuppressionEngine::new(config.iou_threshold, config.suppression);
    let executor =
      BoundedInferenceExecutor::spawn(model, config.inference_deadline(), observer.clone())?;
    let arena = FrameArena::new(config.input_size, config.normalize_pixels);

    Ok(Self {
      config,
      decoder,
      suppressor,
      executor,
      arena,
      latest: Arc::new(RwLock::new(Arc::new(DetectionSnapshot::initial()))),
      observer,
      frame_index: 0,
      consecutive_invocation_failures: 0,
    })
  }

  pub fn config(&self) -> &PipelineConfig {
    &self.config
  }

  pub fn feed(&self) -> DetectionFeed {
    DetectionFeed {
      latest: self.latest.clone(),
    }
  }

  pub fn latest(&self) -> Arc<DetectionSnapshot> {
    self.latest.read().clone()
  }

  pub fn consecutive_invocation_failures(&self) -> u32 {
    self.consecutive_invocation_failures
  }

  /// 处理一帧
  ///
  /// 超时时先按配置的回退策略发布，再把超时返回给调用方；提交失败时本帧
  /// 不发布任何内容。
  pub fn process_frame(&mut self, frame: &RgbFrame) -> Result<FrameReport, FrameError> {
    self.frame_index += 1;
    let frame_index = self.frame_index;
    self.observer.frame_started(frame_index);

    let tensor = self.arena.prepare(frame)?;

    let inference = match self.executor.run(tensor) {
      Ok(inference) => inference,
      Err(ExecutorError::Timeout {
        generation,
        deadline,
      }) => {
        self.consecutive_invocation_failures = 0;
        let fallback = self.config.timeout_fallback;
        self.publish_fallback(frame_index, generation, fallback);
        return Err(FrameError::Timeout {
          generation,
          deadline,
          fallback,
        });
      }
      Err(ExecutorError::Invocation(source)) => {
        self.consecutive_invocation_failures += 1;
        let consecutive = self.consecutive_invocation_failures;
        self.observer.invocation_failed(&source, consecutive);
        return Err(FrameError::Invocation {
          source,
          consecutive,
        });
      }
      Err(ExecutorError::Model { generation, source }) => {
        self.consecutive_invocation_failures = 0;
        return Err(FrameError::Model { generation, source });
      }
    };
    self.consecutive_invocation_failures = 0;

    let (candidates, rejected_rows) = self.decode_rows(&inference.output, frame, frame_index);
    let candidate_count = candidates.len();
    let kept = self.suppressor.suppress(candidates);
    let classification = ClassificationReducer.reduce(&kept);
    debug!(
      "第 {} 帧: {} 行, 丢弃 {} 行, 候选 {}, 保留 {}",
      frame_index,
      inference.output.num_rows(),
      rejected_rows,
      candidate_count,
      kept.len()
    );

    let snapshot = self.publish(DetectionSnapshot {
      frame_index,
      generation: Some(inference.generation),
      origin: SnapshotOrigin::Inference,
      detections: Arc::from(kept),
      classification,
    });

    Ok(FrameReport {
      frame_index,
      generation: inference.generation,
      rows: inference.output.num_rows(),
      rejected_rows,
      candidates: candidate_count,
      inference_time: inference.elapsed,
      snapshot,
    })
  }

  /// 逐行解码并做置信度过滤，格式错误的行单独丢弃
  fn decode_rows(
    &self,
    output: &RawOutput,
    frame: &RgbFrame,
    frame_index: u64,
  ) -> (Vec<Detection>, usize) {
    let mut candidates = Vec::new();
    let mut rejected = 0usize;

    for (row_index, row) in output.rows().enumerate() {
      // 置信度等于 objectness 字段，低于下限的行无需几何解码
      let confidence = match self.decoder.confidence_of(row) {
        Ok(confidence) => confidence,
        Err(e) => {
          rejected += 1;
          self.observer.row_rejected(frame_index, row_index, &e);
          continue;
        }
      };
      if confidence <= self.config.min_confidence {
        continue;
      }

      match self.decoder.decode(row, frame.width(), frame.height()) {
        Ok(detection) => candidates.push(detection),
        Err(e) => {
          rejected += 1;
          self.observer.row_rejected(frame_index, row_index, &e);
        }
      }
    }

    (candidates, rejected)
  }

  fn publish_fallback(&self, frame_index: u64, generation: u64, fallback: TimeoutFallback) {
    let (detections, classification) = match fallback {
      TimeoutFallback::Cleared => (Arc::from(Vec::new()), Classification::Unknown),
      TimeoutFallback::Sticky => {
        let previous = self.latest();
        (previous.detections.clone(), previous.classification.clone())
      }
    };

    self.publish(DetectionSnapshot {
      frame_index,
      generation: Some(generation),
      origin: SnapshotOrigin::Fallback(fallback),
      detections,
      classification,
    });
  }

  fn publish(&self, snapshot: DetectionSnapshot) -> Arc<DetectionSnapshot> {
    let snapshot = Arc::new(snapshot);
    *self.latest.write() = snapshot.clone();
    self.observer.published(&snapshot);
    snapshot
  }
}
