// 该文件是 Tancha （探查） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use tancha::{
  FromUrl,
  input::InputWrapper,
  model::ReplayModel,
  output::OutputWrapper,
  task::{ContinuousTask, Task},
};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  info!("Tancha 目标检测后处理");
  info!("模型来源: {}", args.model);
  info!("输入来源: {}", args.input);
  match &args.output {
    Some(output) => info!("输出路径: {}", output),
    None => info!("未指定输出, 不保存标注结果"),
  }

  let config = args.pipeline_config()?;
  let input = InputWrapper::from_url(&args.input)?;
  let model = ReplayModel::from_url(&args.model)?;
  let output = args
    .output
    .as_ref()
    .map(OutputWrapper::from_url)
    .transpose()?;

  let classification = ContinuousTask::new(config)
    .with_frame_number(args.frames)
    .with_vote_window(args.vote_window)
    .run_task(input, model, output)?;

  // 交给底盘的唯一输出
  println!("{}", classification);

  Ok(())
}
