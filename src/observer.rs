// 该文件是 Tancha （探查） 项目的一部分。
// src/observer.rs - 流水线事件观察者
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

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::{executor::InvocationError, model::DecodeError, processor::DetectionSnapshot};

/// 由调用方在构造时注入各组件的观察能力
///
/// 所有方法都有空的默认实现，只需覆盖关心的事件。
pub trait PipelineObserver: Send + Sync {
  fn frame_started(&self, _frame_index: u64) {}

  fn row_rejected(&self, _frame_index: u64, _row: usize, _error: &DecodeError) {}

  fn inference_timed_out(&self, _generation: u64, _deadline: Duration) {}

  fn stale_result_discarded(&self, _stale: u64, _current: u64) {}

  fn invocation_failed(&self, _error: &InvocationError, _consecutive: u32) {}

  fn published(&self, _snapshot: &DetectionSnapshot) {}
}

/// 把事件转成 `tracing` 日志，订阅器由进程入口安装
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl PipelineObserver for TracingObserver {
  fn frame_started(&self, frame_index: u64) {
    debug!("开始处理第 {} 帧", frame_index);
  }

  fn row_rejected(&self, frame_index: u64, row: usize, error: &DecodeError) {
    warn!("第 {} 帧第 {} 行被丢弃: {}", frame_index, row, error);
  }

  fn inference_timed_out(&self, generation: u64, deadline: Duration) {
    warn!("第 {} 代推理超时 (时限 {:?})", generation, deadline);
  }

  fn stale_result_discarded(&self, stale: u64, current: u64) {
    debug!("丢弃过期推理结果: 第 {} 代 (当前第 {} 代)", stale, current);
  }

  fn invocation_failed(&self, error: &InvocationError, consecutive: u32) {
    warn!("推理提交失败 (连续 {} 次): {}", consecutive, error);
  }

  fn published(&self, snapshot: &DetectionSnapshot) {
    info!(
      "第 {} 帧发布 {} 个检测结果, 分类: {}",
      snapshot.frame_index,
      snapshot.detections.len(),
      snapshot.classification
    );
  }
}
