// 该文件是 Tancha （探查） 项目的一部分。
// src/model/suppression.rs - 非极大值抑制
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

use crate::model::Detection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressionMode {
  /// 不区分类别，任何重叠过大的低分框都会被抑制
  #[default]
  ClassAgnostic,
  /// 只在同一类别内抑制
  ClassAware,
}

/// 贪心 NMS，无状态
#[derive(Debug, Clone, Copy)]
pub struct SuppressionEngine {
  iou_threshold: f32,
  mode: SuppressionMode,
}

impl SuppressionEngine {
  pub fn new(iou_threshold: f32, mode: SuppressionMode) -> Self {
    Self {
      iou_threshold,
      mode,
    }
  }

  pub fn iou_threshold(&self) -> f32 {
    self.iou_threshold
  }

  pub fn mode(&self) -> SuppressionMode {
    self.mode
  }

  /// 按置信度降序（稳定排序）贪心保留，丢弃与已保留框 IoU 超过阈值的候选
  ///
  /// 结果是输入的子集，且按置信度降序排列。
  pub fn suppress(&self, mut detections: Vec<Detection>) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut suppressed = vec![false; detections.len()];
    for i in 0..detections.len() {
      if suppressed[i] {
        continue;
      }
      let kept = &detections[i];
      for j in (i + 1)..detections.len() {
        if !suppressed[j] && self.overlaps(kept, &detections[j]) {
          suppressed[j] = true;
        }
      }
    }

    detections
      .into_iter()
      .zip(suppressed)
      .filter_map(|(det, dropped)| (!dropped).then_some(det))
      .collect()
  }

  fn overlaps(&self, kept: &Detection, candidate: &Detection) -> bool {
    if self.mode == SuppressionMode::ClassAware && kept.class_id != candidate.class_id {
      return false;
    }
    kept.bbox.iou(&candidate.bbox) > self.iou_threshold
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use super::*;
  use crate::geometry::BBox;

  fn det(x: f32, y: f32, w: f32, h: f32, class_id: usize, confidence: f32) -> Detection {
    Detection {
      bbox: BBox::new(x, y, w, h).unwrap(),
      class_id,
      label: Arc::from(format!("class-{class_id}")),
      confidence,
    }
  }

  #[test]
  fn identical_boxes_keep_highest_confidence() {
    let engine = SuppressionEngine::new(0.5, SuppressionMode::ClassAgnostic);
    let result = engine.suppress(vec![
      det(10.0, 10.0, 20.0, 20.0, 0, 0.4),
      det(10.0, 10.0, 20.0, 20.0, 0, 0.9),
    ]);
    assert_eq!(result.len(), 1);
    assert_eq!(result[0].confidence, 0.9);
  }

  #[test]
  fn single_input_is_unchanged() {
    let engine = SuppressionEngine::new(0.5, SuppressionMode::ClassAgnostic);
    let input = vec![det(1.0, 2.0, 3.0, 4.0, 2, 0.3)];
    assert_eq!(engine.suppress(input.clone()), input);
  }

  #[test]
  fn empty_input_is_empty() {
    let engine = SuppressionEngine::new(0.5, SuppressionMode::ClassAgnostic);
    assert!(engine.suppress(Vec::new()).is_empty());
  }

  #[test]
  fn result_is_confidence_descending_with_stable_ties() {
    let engine = SuppressionEngine::new(0.5, SuppressionMode::ClassAgnostic);
    let result = engine.suppress(vec![
      det(0.0, 0.0, 10.0, 10.0, 0, 0.5),
      det(100.0, 0.0, 10.0, 10.0, 1, 0.8),
      det(200.0, 0.0, 10.0, 10.0, 2, 0.5),
    ]);
    let classes: Vec<usize> = result.iter().map(|d| d.class_id).collect();
    assert_eq!(classes, [1, 0, 2]);
  }

  #[test]
  fn threshold_is_strict() {
    // IoU 恰为 1/3: 交集 50, 面积各 100
    let a = det(0.0, 0.0, 10.0, 10.0, 0, 0.9);
    let b = det(5.0, 0.0, 10.0, 10.0, 0, 0.8);
    let iou = a.bbox.iou(&b.bbox);
    assert!((iou - 1.0 / 3.0).abs() < 1e-6);

    let at_threshold = SuppressionEngine::new(iou, SuppressionMode::ClassAgnostic);
    assert_eq!(at_threshold.suppress(vec![a.clone(), b.clone()]).len(), 2);

    let below = SuppressionEngine::new(0.3, SuppressionMode::ClassAgnostic);
    assert_eq!(below.suppress(vec![a, b]).len(), 1);
  }

  #[test]
  fn suppressed_boxes_do_not_suppress_others() {
    // b 被 a 抑制，c 只与 b 重叠，因此必须保留
    let engine = SuppressionEngine::new(0.3, SuppressionMode::ClassAgnostic);
    let result = engine.suppress(vec![
      det(0.0, 0.0, 10.0, 10.0, 0, 0.9),
      det(4.0, 0.0, 10.0, 10.0, 0, 0.8),
      det(9.0, 0.0, 10.0, 10.0, 0, 0.7),
    ]);
    let confidences: Vec<f32> = result.iter().map(|d| d.confidence).collect();
    assert_eq!(confidences, [0.9, 0.7]);
  }

  #[test]
  fn class_agnostic_ignores_labels() {
    let engine = SuppressionEngine::new(0.5, SuppressionMode::ClassAgnostic);
    let result = engine.suppress(vec![
      det(0.0, 0.0, 10.0, 10.0, 0, 0.9),
      det(0.0, 0.0, 10.0, 10.0, 1, 0.8),
    ]);
    assert_eq!(result.len(), 1);
    assert_eq!(result[0].class_id, 0);
  }

  #[test]
  fn class_aware_only_suppresses_same_class() {
    let engine = SuppressionEngine::new(0.5, SuppressionMode::ClassAware);
    let result = engine.suppress(vec![
      det(0.0, 0.0, 10.0, 10.0, 0, 0.9),
      det(0.0, 0.0, 10.0, 10.0, 1, 0.8),
      det(0.0, 0.0, 10.0, 10.0, 0, 0.7),
    ]);
    let classes: Vec<usize> = result.iter().map(|d| d.class_id).collect();
    assert_eq!(classes, [0, 1]);
  }
}
