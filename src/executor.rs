// 该文件是 Tancha （探查） 项目的一部分。
// src/executor.rs - 限时推理执行器
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

//! 在单个常驻工作线程上执行不透明的推理调用。
//!
//! 每次提交都带有单调递增的代号。超时后调用方放弃等待，但工作线程上的计算
//! 不会被中断，迟到的结果会因代号不匹配而被丢弃。提交队列只有一个槽位，
//! 被放弃的计算最多再积压一个排队任务，之后的提交直接失败。

use std::{
  sync::Arc,
  thread::{self, JoinHandle},
  time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::{
  model::{InputTensor, Model, RawOutput},
  observer::PipelineObserver,
};

const SUBMISSION_QUEUE_DEPTH: usize = 1;
const WORKER_THREAD_NAME: &str = "tancha-inference";

type ModelFailure = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvocationError {
  #[error("推理工作线程繁忙, 第 {generation} 代提交被拒绝")]
  Saturated { generation: u64 },
  #[error("推理工作线程已退出")]
  WorkerGone,
}

#[derive(Error, Debug)]
pub enum ExecutorError {
  #[error("第 {generation} 代推理超时 (时限 {deadline:?})")]
  Timeout { generation: u64, deadline: Duration },
  #[error("推理提交失败: {0}")]
  Invocation(#[from] InvocationError),
  #[error("第 {generation} 代推理失败: {source}")]
  Model {
    generation: u64,
    #[source]
    source: ModelFailure,
  },
}

/// 一次成功推理的结果
#[derive(Debug)]
pub struct Inference {
  pub generation: u64,
  pub output: RawOutput,
  pub elapsed: Duration,
}

struct Job {
  generation: u64,
  tensor: Arc<InputTensor>,
}

struct JobResult {
  generation: u64,
  output: Result<RawOutput, ModelFailure>,
}

pub struct BoundedInferenceExecutor {
  jobs: Option<Sender<Job>>,
  results: Receiver<JobResult>,
  deadline: Duration,
  next_generation: u64,
  worker: Option<JoinHandle<()>>,
  observer: Arc<dyn PipelineObserver>,
}

impl BoundedInferenceExecutor {
  /// 启动工作线程并把模型移交给它
  pub fn spawn<M: Model>(
    model: M,
    deadline: Duration,
    observer: Arc<dyn PipelineObserver>,
  ) -> Result<Self, std::io::Error> {
    let (job_tx, job_rx) = crossbeam_channel::bounded::<Job>(SUBMISSION_QUEUE_DEPTH);
    let (result_tx, result_rx) = crossbeam_channel::unbounded::<JobResult>();

    let worker = thread::Builder::new()
      .name(WORKER_THREAD_NAME.to_string())
      .spawn(move || worker_loop(model, job_rx, result_tx))?;

    info!("推理工作线程已启动, 时限 {:?}", deadline);

    Ok(Self {
      jobs: Some(job_tx),
      results: result_rx,
      deadline,
      next_generation: 1,
      worker: Some(worker),
      observer,
    })
  }

  pub fn deadline(&self) -> Duration {
    self.deadline
  }

  /// 下一次提交将使用的代号
  pub fn next_generation(&self) -> u64 {
    self.next_generation
  }

  /// 提交一次推理并在时限内阻塞等待对应代号的结果
  pub fn run(&mut self, tensor: Arc<InputTensor>) -> Result<Inference, ExecutorError> {
    let generation = self.next_generation;
    self.next_generation += 1;

    let jobs = self.jobs.as_ref().ok_or(InvocationError::WorkerGone)?;
    match jobs.try_send(Job { generation, tensor }) {
      Ok(()) => {}
      Err(TrySendError::Full(_)) => return Err(InvocationError::Saturated { generation }.into()),
      Err(TrySendError::Disconnected(_)) => return Err(InvocationError::WorkerGone.into()),
    }

    let started = Instant::now();
    let deadline_at = started + self.deadline;
    loop {
      match self.results.recv_deadline(deadline_at) {
        Ok(result) if result.generation == generation => {
          let elapsed = started.elapsed();
          debug!("第 {} 代推理完成, 耗时 {:.2?}", generation, elapsed);
          return match result.output {
            Ok(output) => Ok(Inference {
              generation,
              output,
              elapsed,
            }),
            Err(source) => Err(ExecutorError::Model { generation, source }),
          };
        }
        Ok(stale) => {
          self.observer.stale_result_discarded(stale.generation, generation);
        }
        Err(RecvTimeoutError::Timeout) => {
          self.observer.inference_timed_out(generation, self.deadline);
          return Err(ExecutorError::Timeout {
            generation,
            deadline: self.deadline,
          });
        }
        Err(RecvTimeoutError::Disconnected) => {
          return Err(InvocationError::WorkerGone.into());
        }
      }
    }
  }
}

fn worker_loop<M: Model>(mut model: M, jobs: Receiver<Job>, results: Sender<JobResult>) {
  for Job { generation, tensor } in jobs.iter() {
    let output = model
      .infer(&tensor)
      .map_err(|e| Box::new(e) as ModelFailure);
    // 先归还张量，调用方拿到结果时缓冲区已可复用
    drop(tensor);

    if let Err(e) = &output {
      error!("第 {} 代推理失败: {}", generation, e);
    }
    if results.send(JobResult { generation, output }).is_err() {
      break;
    }
  }
  debug!("推理工作线程退出");
}

impl Drop for BoundedInferenceExecutor {
  fn drop(&mut self) {
    // 关闭提交队列，工作线程在当前任务结束后退出
    self.jobs.take();
    if let Some(worker) = self.worker.take() {
      if worker.is_finished() {
        if worker.join().is_err() {
          error!("推理工作线程异常退出");
        }
      } else {
        debug!("推理仍在进行, 不等待工作线程退出");
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Mutex;

  use super::*;
  use crate::observer::TracingObserver;

  /// 每次推理睡眠指定时长，并返回以代号区分的一行输出
  struct SleepyModel {
    delays: Vec<Duration>,
    calls: usize,
  }

  impl Model for SleepyModel {
    type Error = std::convert::Infallible;

    fn infer(&mut self, _input: &InputTensor) -> Result<RawOutput, Self::Error> {
      let delay = self.delays.get(self.calls).copied().unwrap_or_default();
      self.calls += 1;
      thread::sleep(delay);
      Ok(RawOutput::new(1, vec![self.calls as f32]))
    }
  }

  #[derive(Debug, thiserror::Error)]
  #[error("模拟模型故障")]
  struct Broken;

  struct BrokenModel;

  impl Model for BrokenModel {
    type Error = Broken;

    fn infer(&mut self, _input: &InputTensor) -> Result<RawOutput, Self::Error> {
      Err(Broken)
    }
  }

  struct PanickingModel;

  impl Model for PanickingModel {
    type Error = std::convert::Infallible;

    fn infer(&mut self, _input: &InputTensor) -> Result<RawOutput, Self::Error> {
      panic!("模型崩溃");
    }
  }

  #[derive(Default)]
  struct StaleRecorder {
    stale: Mutex<Vec<(u64, u64)>>,
  }

  impl PipelineObserver for StaleRecorder {
    fn stale_result_discarded(&self, stale: u64, current: u64) {
      self.stale.lock().unwrap().push((stale, current));
    }
  }

  fn tensor() -> Arc<InputTensor> {
    Arc::new(InputTensor::zeros(2))
  }

  fn executor<M: Model>(model: M, deadline_ms: u64) -> BoundedInferenceExecutor {
    BoundedInferenceExecutor::spawn(
      model,
      Duration::from_millis(deadline_ms),
      Arc::new(TracingObserver),
    )
    .unwrap()
  }

  #[test]
  fn fast_inference_succeeds() {
    let mut exec = executor(
      SleepyModel {
        delays: vec![],
        calls: 0,
      },
      500,
    );
    let inference = exec.run(tensor()).unwrap();
    assert_eq!(inference.generation, 1);
    assert_eq!(inference.output.rows().next(), Some(&[1.0][..]));
    assert_eq!(exec.next_generation(), 2);
  }

  #[test]
  fn slow_inference_times_out_near_deadline() {
    let mut exec = executor(
      SleepyModel {
        delays: vec![Duration::from_millis(1500)],
        calls: 0,
      },
      100,
    );
    let started = Instant::now();
    let err = exec.run(tensor()).unwrap_err();
    let waited = started.elapsed();

    assert!(matches!(err, ExecutorError::Timeout { generation: 1, .. }));
    assert!(waited >= Duration::from_millis(100));
    assert!(waited < Duration::from_millis(1000), "waited {waited:?}");
  }

  #[test]
  fn late_result_is_discarded_by_generation() {
    let recorder = Arc::new(StaleRecorder::default());
    let mut exec = BoundedInferenceExecutor::spawn(
      SleepyModel {
        delays: vec![Duration::from_millis(300), Duration::ZERO],
        calls: 0,
      },
      Duration::from_millis(100),
      recorder.clone(),
    )
    .unwrap();

    assert!(matches!(
      exec.run(tensor()),
      Err(ExecutorError::Timeout { generation: 1, .. })
    ));

    // 等第一代的迟到结果落入结果队列
    thread::sleep(Duration::from_millis(400));

    let second = exec.run(tensor()).unwrap();
    assert_eq!(second.generation, 2);
    // 返回的是第二代自己的输出，而不是第一代的
    assert_eq!(second.output.rows().next(), Some(&[2.0][..]));

    let stale = recorder.stale.lock().unwrap();
    assert_eq!(stale.as_slice(), &[(1, 2)]);
  }

  #[test]
  fn saturated_queue_rejects_submission() {
    let mut exec = executor(
      SleepyModel {
        delays: vec![Duration::from_millis(800), Duration::from_millis(800)],
        calls: 0,
      },
      50,
    );

    // 第一代开始执行后超时，第二代排队后超时，第三代无处可放
    assert!(matches!(exec.run(tensor()), Err(ExecutorError::Timeout { .. })));
    assert!(matches!(exec.run(tensor()), Err(ExecutorError::Timeout { .. })));
    assert!(matches!(
      exec.run(tensor()),
      Err(ExecutorError::Invocation(InvocationError::Saturated { generation: 3 }))
    ));
  }

  #[test]
  fn model_errors_are_reported() {
    let mut exec = executor(BrokenModel, 500);
    assert!(matches!(
      exec.run(tensor()),
      Err(ExecutorError::Model { generation: 1, .. })
    ));
  }

  #[test]
  fn panicked_worker_is_gone() {
    let mut exec = executor(PanickingModel, 500);
    let first = exec.run(tensor()).unwrap_err();
    assert!(matches!(
      first,
      ExecutorError::Invocation(InvocationError::WorkerGone)
    ));
    assert!(matches!(
      exec.run(tensor()),
      Err(ExecutorError::Invocation(InvocationError::WorkerGone))
    ));
  }

  #[test]
  fn tensor_is_released_after_inference() {
    let mut exec = executor(
      SleepyModel {
        delays: vec![],
        calls: 0,
      },
      500,
    );
    let input = tensor();
    exec.run(input.clone()).unwrap();
    assert_eq!(Arc::strong_count(&input), 1);
  }
}
