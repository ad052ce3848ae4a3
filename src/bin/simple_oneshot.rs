// 该文件是 Tancha （探查） 项目的一部分。
// src/bin/simple_oneshot.rs - 单帧分类
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

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use url::Url;

use tancha::{
  FromUrl,
  classify::await_classification,
  config::PipelineConfig,
  input::InputWrapper,
  model::ReplayModel,
  output::{OutputWrapper, Render},
  processor::FrameProcessor,
};

/// 处理一帧并等待分类结果
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型来源
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径
  #[arg(long, value_name = "OUTPUT")]
  pub output: Option<Url>,
  /// 轮询间隔（毫秒）
  #[arg(long, default_value = "50", value_name = "MS")]
  pub poll_interval_ms: u64,
  /// 最大轮询次数
  #[arg(long, default_value = "10", value_name = "COUNT")]
  pub poll_attempts: u32,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型来源: {}", args.model);
  info!("输入来源: {}", args.input);

  let mut input = InputWrapper::from_url(&args.input)?;
  let model = ReplayModel::from_url(&args.model)?;
  let output = args
    .output
    .as_ref()
    .map(OutputWrapper::from_url)
    .transpose()?;

  let mut processor = FrameProcessor::new(PipelineConfig::default(), model)?;
  let feed = processor.feed();

  let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
  // 在另一线程处理，主线程只通过发布的结果获取分类
  let worker = std::thread::spawn(move || {
    let result = processor.process_frame(&frame);
    (frame, result)
  });

  let classification = await_classification(
    &feed,
    Duration::from_millis(args.poll_interval_ms),
    args.poll_attempts,
  );

  let (frame, result) = worker
    .join()
    .map_err(|_| anyhow::anyhow!("处理线程异常退出"))?;
  if let Err(e) = result {
    warn!("{}", e);
  }
  if let Some(output) = output {
    output.render_result(&frame, &feed.latest())?;
  }

  println!("{}", classification);
  Ok(())
}
