// 该文件是 Tancha （探查） 项目的一部分。
// tests/geometry_props.rs - 几何与 NMS 性质测试
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

use proptest::prelude::*;

use tancha::{
  geometry::BBox,
  model::{Detection, SuppressionEngine, SuppressionMode},
};

const EPS: f32 = 1e-3;

fn bbox() -> impl Strategy<Value = BBox> {
  (0.0f32..1000.0, 0.0f32..1000.0, 1.0f32..500.0, 1.0f32..500.0)
    .prop_map(|(x, y, w, h)| BBox::new(x, y, w, h).unwrap())
}

fn detection() -> impl Strategy<Value = Detection> {
  (bbox(), 0usize..3, 0.0f32..=1.0).prop_map(|(bbox, class_id, confidence)| Detection {
    bbox,
    class_id,
    label: Arc::from(["Dragon", "Robot", "Console"][class_id]),
    confidence,
  })
}

/// 允许浮点误差的包含关系
fn roughly_contains(outer: &BBox, inner: &BBox) -> bool {
  inner.x() + EPS >= outer.x()
    && inner.y() + EPS >= outer.y()
    && inner.right() <= outer.right() + EPS
    && inner.bottom() <= outer.bottom() + EPS
}

proptest! {
  #[test]
  fn xyxy_round_trip(b in bbox()) {
    let [x1, y1, x2, y2] = b.to_xyxy();
    let back = BBox::from_xyxy(x1, y1, x2, y2).unwrap();
    prop_assert!((back.x() - b.x()).abs() < EPS);
    prop_assert!((back.y() - b.y()).abs() < EPS);
    prop_assert!((back.width() - b.width()).abs() < EPS);
    prop_assert!((back.height() - b.height()).abs() < EPS);
  }

  #[test]
  fn cxcywh_round_trip(b in bbox()) {
    let [cx, cy, w, h] = b.to_cxcywh();
    let back = BBox::from_cxcywh(cx, cy, w, h).unwrap();
    prop_assert!((back.x() - b.x()).abs() < EPS);
    prop_assert!((back.y() - b.y()).abs() < EPS);
  }

  #[test]
  fn iou_is_bounded_and_symmetric(a in bbox(), b in bbox()) {
    let iou = a.iou(&b);
    prop_assert!((0.0..=1.0).contains(&iou));
    prop_assert!((iou - b.iou(&a)).abs() < 1e-6);
  }

  #[test]
  fn iou_with_self_is_one(a in bbox()) {
    prop_assert!((a.iou(&a) - 1.0).abs() < 1e-4);
  }

  #[test]
  fn intersection_and_union_containment(a in bbox(), b in bbox()) {
    let union = a.union(&b);
    prop_assert!(roughly_contains(&union, &a));
    prop_assert!(roughly_contains(&union, &b));

    let inter = a.intersect(&b);
    prop_assert!(inter.width() >= 0.0 && inter.height() >= 0.0);
    if inter.area() > 0.0 {
      prop_assert!(roughly_contains(&a, &inter));
      prop_assert!(roughly_contains(&b, &inter));
    } else {
      prop_assert_eq!(a.iou(&b), 0.0);
    }
  }

  #[test]
  fn suppression_output_is_a_non_overlapping_subset(
    dets in prop::collection::vec(detection(), 0..24),
    threshold in 0.0f32..=1.0,
  ) {
    let engine = SuppressionEngine::new(threshold, SuppressionMode::ClassAgnostic);
    let kept = engine.suppress(dets.clone());

    prop_assert!(kept.len() <= dets.len());
    prop_assert!(dets.is_empty() || !kept.is_empty());
    for k in &kept {
      prop_assert!(dets.contains(k));
    }
    for pair in kept.windows(2) {
      prop_assert!(pair[0].confidence >= pair[1].confidence);
    }
    for (i, a) in kept.iter().enumerate() {
      for b in &kept[i + 1..] {
        prop_assert!(a.bbox.iou(&b.bbox) <= threshold);
      }
    }
  }

  #[test]
  fn class_aware_only_suppresses_within_class(
    dets in prop::collection::vec(detection(), 0..24),
    threshold in 0.0f32..=1.0,
  ) {
    let engine = SuppressionEngine::new(threshold, SuppressionMode::ClassAware);
    let kept = engine.suppress(dets.clone());

    for k in &kept {
      prop_assert!(dets.contains(k));
    }
    for (i, a) in kept.iter().enumerate() {
      for b in &kept[i + 1..] {
        if a.class_id == b.class_id {
          prop_assert!(a.bbox.iou(&b.bbox) <= threshold);
        }
      }
    }
  }

  #[test]
  fn single_detection_is_kept(det in detection(), threshold in 0.0f32..=1.0) {
    let engine = SuppressionEngine::new(threshold, SuppressionMode::ClassAgnostic);
    prop_assert_eq!(engine.suppress(vec![det.clone()]), vec![det]);
  }
}
