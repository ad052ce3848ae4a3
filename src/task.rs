// 该文件是 Tancha （探查） 项目的一部分。
// src/task.rs - 单次、重复与连续任务驱动
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

use std::{
  sync::mpsc::{self, Receiver},
  thread,
  time::{Duration, Instant},
};

use anyhow::Context;
use tracing::{error, info, warn};

use crate::{
  classify::{Classification, MajorityVote},
  config::PipelineConfig,
  frame::RgbFrame,
  model::Model,
  output::Render,
  processor::{DetectionSnapshot, FrameError, FrameProcessor},
};

/// 预热帧不计入平均推理时间
const WARMUP_FRAMES: usize = 2;
const DEFAULT_REPEAT_TIMES: usize = 100;
const FORCE_EXIT_AFTER: Duration = Duration::from_secs(30);

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<Classification, Self::Error>;
}

/// 超时已按回退策略发布，其余帧级错误只记录
fn log_frame_error(error: &FrameError) {
  match error {
    FrameError::Timeout { .. } => warn!("{}", error),
    _ => error!("{}", error),
  }
}

fn render<O, RE>(output: &O, frame: &RgbFrame, snapshot: &DetectionSnapshot) -> anyhow::Result<()>
where
  O: Render<RgbFrame, DetectionSnapshot, Error = RE>,
  RE: std::error::Error + Send + Sync + 'static,
{
  let now = Instant::now();
  output
    .render_result(frame, snapshot)
    .with_context(|| format!("第 {} 帧渲染失败", snapshot.frame_index))?;
  info!("渲染完成，耗时: {:.2?}", now.elapsed());
  Ok(())
}

/// 处理输入的第一帧
pub struct OneShotTask {
  config: PipelineConfig,
}

impl OneShotTask {
  pub fn new(config: PipelineConfig) -> Self {
    Self { config }
  }
}

impl<I, M, O, RE> Task<I, M, O> for OneShotTask
where
  I: Iterator<Item = RgbFrame>,
  M: Model,
  O: Render<RgbFrame, DetectionSnapshot, Error = RE>,
  RE: std::error::Error + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: M, output: O) -> Result<Classification, Self::Error> {
    info!("开始任务...");
    let mut processor = FrameProcessor::new(self.config, model)?;
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理...");

    let snapshot = match processor.process_frame(&frame) {
      Ok(report) => {
        info!(
          "推理完成，耗时: {:.2?}, 候选 {} 个, 保留 {} 个",
          report.inference_time,
          report.candidates,
          report.snapshot.detections.len()
        );
        report.snapshot
      }
      Err(e @ FrameError::Timeout { .. }) => {
        log_frame_error(&e);
        processor.latest()
      }
      Err(e) => return Err(e.into()),
    };

    render(&output, &frame, &snapshot)?;
    info!("分类结果: {}", snapshot.classification);
    Ok(snapshot.classification.clone())
  }
}

/// 对同一帧重复推理，统计平均耗时
pub struct RepeatShotTask {
  config: PipelineConfig,
  repeat_times: usize,
}

impl RepeatShotTask {
  pub fn new(config: PipelineConfig) -> Self {
    Self {
      config,
      repeat_times: DEFAULT_REPEAT_TIMES,
    }
  }

  pub fn with_repeat_times(mut self, repeat_times: usize) -> Self {
    self.repeat_times = repeat_times;
    self
  }
}

impl<I, M, O, RE> Task<I, M, O> for RepeatShotTask
where
  I: Iterator<Item = RgbFrame>,
  M: Model,
  O: Render<RgbFrame, DetectionSnapshot, Error = RE>,
  RE: std::error::Error + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: M, output: O) -> Result<Classification, Self::Error> {
    info!("开始任务...");
    let mut processor = FrameProcessor::new(self.config, model)?;
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理...");

    let mut times = Vec::with_capacity(self.repeat_times);
    let mut failures = 0usize;
    for i in 0..self.repeat_times {
      match processor.process_frame(&frame) {
        Ok(report) => {
          info!("({})推理完成，耗时: {:.2?}", i, report.inference_time);
          times.push(report.inference_time);
          render(&output, &frame, &report.snapshot)?;
        }
        Err(e) => {
          failures += 1;
          log_frame_error(&e);
        }
      }
    }

    if times.len() > WARMUP_FRAMES {
      let measured = &times[WARMUP_FRAMES..];
      warn!(
        "平均推理时间: {:.2?} ({} 次成功, {} 次失败)",
        measured.iter().sum::<Duration>() / measured.len() as u32,
        times.len(),
        failures
      );
    } else {
      warn!("成功推理次数不足, 无法统计平均推理时间");
    }

    let classification = processor.latest().classification.clone();
    info!("分类结果: {}", classification);
    Ok(classification)
  }
}

/// 逐帧处理输入直到输入结束、达到帧数或收到中断
#[derive(Debug)]
pub struct ContinuousTask {
  config: PipelineConfig,
  frame_number: Option<usize>,
  vote_window: Option<usize>,
  interrupt_handler: bool,
}

impl ContinuousTask {
  pub fn new(config: PipelineConfig) -> Self {
    Self {
      config,
      frame_number: None,
      vote_window: None,
      interrupt_handler: true,
    }
  }

  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  /// 用最近若干帧的多数表决作为最终分类
  pub fn with_vote_window(mut self, vote_window: Option<usize>) -> Self {
    self.vote_window = vote_window;
    self
  }

  /// Ctrl-C 处理器每个进程只能安装一次
  pub fn with_interrupt_handler(mut self, enabled: bool) -> Self {
    self.interrupt_handler = enabled;
    self
  }

  fn install_interrupt_handler(&self) -> anyhow::Result<Option<Receiver<()>>> {
    if !self.interrupt_handler {
      return Ok(None);
    }

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      let _ = tx.send(());
      thread::spawn(|| {
        thread::sleep(FORCE_EXIT_AFTER);
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })
    .context("无法设置 Ctrl-C 处理器")?;
    Ok(Some(rx))
  }
}

impl<I, M, O, RE> Task<I, M, O> for ContinuousTask
where
  I: Iterator<Item = RgbFrame>,
  M: Model,
  O: Render<RgbFrame, DetectionSnapshot, Error = RE>,
  RE: std::error::Error + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, model: M, output: O) -> Result<Classification, Self::Error> {
    info!("开始任务...");
    let interrupt = self.install_interrupt_handler()?;
    let failure_limit = self.config.invocation_failure_limit;
    let mut vote = self.vote_window.map(MajorityVote::new);
    let mut processor = FrameProcessor::new(self.config, model)?;

    let mut frame_count = 0usize;
    let mut now = Instant::now();
    for frame in input {
      frame_count += 1;
      info!("处理第 {} 帧图像", frame_count);

      let snapshot = match processor.process_frame(&frame) {
        Ok(report) => Some(report.snapshot),
        Err(e) => {
          log_frame_error(&e);
          match e {
            FrameError::Timeout { .. } => Some(processor.latest()),
            FrameError::Invocation { consecutive, .. } if consecutive >= failure_limit => {
              anyhow::bail!("推理连续 {} 次无法提交, 终止任务", consecutive);
            }
            _ => None,
          }
        }
      };

      if let Some(snapshot) = snapshot {
        let elapsed_a = now.elapsed();
        render(&output, &frame, &snapshot)?;
        if let Some(vote) = vote.as_mut() {
          vote.push(snapshot.classification.clone());
        }
        info!(
          "第 {} 帧完成，耗时: {:.2?} / {:.2?}, 分类: {}",
          frame_count,
          elapsed_a,
          now.elapsed(),
          snapshot.classification
        );
      }
      now = Instant::now();

      if self.frame_number.is_some_and(|n| frame_count >= n) {
        info!("达到指定帧数 {}, 退出任务循环", frame_count);
        break;
      }
      if interrupt.as_ref().is_some_and(|rx| rx.try_recv().is_ok()) {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }

    let classification = match &vote {
      Some(vote) => vote.current(),
      None => processor.latest().classification.clone(),
    };
    info!("任务完成，共 {} 帧, 分类结果: {}", frame_count, classification);
    Ok(classification)
  }
}

#[cfg(test)]
mod tests {
  use std::{cell::RefCell, convert::Infallible};

  use super::*;
  use crate::model::{InputTensor, RawOutput, ReplayModel};

  #[derive(Default)]
  struct Collect {
    frames: RefCell<Vec<u64>>,
  }

  impl Render<RgbFrame, DetectionSnapshot> for Collect {
    type Error = Infallible;

    fn render_result(&self, _frame: &RgbFrame, result: &DetectionSnapshot) -> Result<(), Infallible> {
      self.frames.borrow_mut().push(result.frame_index);
      Ok(())
    }
  }

  impl Render<RgbFrame, DetectionSnapshot> for &Collect {
    type Error = Infallible;

    fn render_result(&self, frame: &RgbFrame, result: &DetectionSnapshot) -> Result<(), Infallible> {
      (**self).render_result(frame, result)
    }
  }

  fn config() -> PipelineConfig {
    PipelineConfig::default().with_input_size(8)
  }

  fn frames(n: usize) -> impl Iterator<Item = RgbFrame> {
    (0..n).map(|_| RgbFrame::filled(16, 16, [0, 0, 0]).unwrap())
  }

  fn robot() -> ReplayModel {
    ReplayModel::new(RawOutput::new(
      8,
      vec![0.1, 0.1, 0.6, 0.6, 0.9, 0.0, 1.0, 0.0],
    ))
  }

  #[test]
  fn one_shot_classifies_first_frame() {
    let output = Collect::default();
    let classification = OneShotTask::new(config())
      .run_task(frames(3), robot(), &output)
      .unwrap();
    assert_eq!(classification.as_str(), "Robot");
    assert_eq!(*output.frames.borrow(), [1]);
  }

  #[test]
  fn one_shot_without_frames_fails() {
    let result = OneShotTask::new(config()).run_task(frames(0), robot(), None::<Collect>);
    assert!(result.is_err());
  }

  #[test]
  fn repeat_shot_runs_the_same_frame() {
    let output = Collect::default();
    let classification = RepeatShotTask::new(config())
      .with_repeat_times(4)
      .run_task(frames(1), robot(), &output)
      .unwrap();
    assert_eq!(classification.as_str(), "Robot");
    assert_eq!(*output.frames.borrow(), [1, 2, 3, 4]);
  }

  #[test]
  fn continuous_stops_at_frame_number() {
    let output = Collect::default();
    ContinuousTask::new(config())
      .with_interrupt_handler(false)
      .with_frame_number(Some(2))
      .run_task(frames(5), robot(), &output)
      .unwrap();
    assert_eq!(*output.frames.borrow(), [1, 2]);
  }

  struct Stuck;

  impl Model for Stuck {
    type Error = Infallible;

    fn infer(&mut self, _input: &InputTensor) -> Result<RawOutput, Self::Error> {
      thread::sleep(Duration::from_secs(3));
      Ok(RawOutput::empty(8))
    }
  }

  #[test]
  fn continuous_escalates_repeated_invocation_failures() {
    let config = config()
      .with_inference_deadline(Duration::from_millis(20))
      .with_invocation_failure_limit(2);
    let result = ContinuousTask::new(config)
      .with_interrupt_handler(false)
      .run_task(frames(10), Stuck, None::<Collect>);
    let err = result.unwrap_err();
    assert!(err.to_string().contains("2"));
  }
}
