// 该文件是 Tancha （探查） 项目的一部分。
// src/classify.rs - 检测结果归约为分类标签
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

use std::{collections::VecDeque, fmt, sync::Arc, time::Duration};

use tracing::{debug, info};

use crate::{model::Detection, processor::DetectionFeed};

/// 无法确定分类时对外输出的字符串
pub const UNKNOWN_LABEL: &str = "unknown";

/// 交给下游（底盘）的唯一值
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Classification {
  Label(Arc<str>),
  Unknown,
}

impl Classification {
  pub fn as_str(&self) -> &str {
    match self {
      Self::Label(label) => label,
      Self::Unknown => UNKNOWN_LABEL,
    }
  }

  pub fn is_unknown(&self) -> bool {
    matches!(self, Self::Unknown)
  }
}

impl fmt::Display for Classification {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// 取面积最大的检测框的标签
#[derive(Debug, Default, Clone, Copy)]
pub struct ClassificationReducer;

impl ClassificationReducer {
  /// 面积相同时保留输入中靠前的一个，空输入得到 `Unknown`
  pub fn reduce(&self, detections: &[Detection]) -> Classification {
    let mut largest: Option<&Detection> = None;
    for det in detections {
      match largest {
        Some(best) if det.bbox.area() <= best.bbox.area() => {}
        _ => largest = Some(det),
      }
    }

    largest.map_or(Classification::Unknown, |det| {
      Classification::Label(det.label.clone())
    })
  }
}

/// 最近 N 帧分类结果的多数表决
#[derive(Debug, Clone)]
pub struct MajorityVote {
  window: usize,
  history: VecDeque<Classification>,
}

impl MajorityVote {
  pub fn new(window: usize) -> Self {
    let window = window.max(1);
    Self {
      window,
      history: VecDeque::with_capacity(window),
    }
  }

  pub fn window(&self) -> usize {
    self.window
  }

  /// 记录一帧的分类并返回表决结果
  pub fn push(&mut self, classification: Classification) -> Classification {
    if self.history.len() == self.window {
      self.history.pop_front();
    }
    self.history.push_back(classification);
    self.current()
  }

  /// `Unknown` 占用窗口但不参与计票，票数相同取最近出现的标签
  pub fn current(&self) -> Classification {
    // (标签, 票数, 最近一次出现的位置)
    let mut tally: Vec<(&Arc<str>, usize, usize)> = Vec::new();
    for (pos, classification) in self.history.iter().enumerate() {
      let Classification::Label(label) = classification else {
        continue;
      };
      match tally.iter_mut().find(|(l, _, _)| *l == label) {
        Some(entry) => {
          entry.1 += 1;
          entry.2 = pos;
        }
        None => tally.push((label, 1, pos)),
      }
    }

    tally
      .into_iter()
      .max_by_key(|&(_, votes, last)| (votes, last))
      .map_or(Classification::Unknown, |(label, _, _)| {
        Classification::Label(label.clone())
      })
  }

  pub fn clear(&mut self) {
    self.history.clear();
  }
}

/// 轮询已发布的结果，直到出现确定的分类或次数用尽
pub fn await_classification(
  feed: &DetectionFeed,
  interval: Duration,
  max_attempts: u32,
) -> Classification {
  for attempt in 1..=max_attempts {
    let classification = feed.classification();
    if !classification.is_unknown() {
      info!("第 {} 次轮询得到分类: {}", attempt, classification);
      return classification;
    }
    debug!("第 {} 次轮询尚无分类", attempt);
    if attempt < max_attempts {
      std::thread::sleep(interval);
    }
  }
  Classification::Unknown
}
