// 该文件是 Zhunxing （准星） 项目的一部分。
// src/bin/guided_capture.rs - 连续引导拍摄
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

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use url::Url;

use zhunxing::{
  FromUrl,
  args::{ModelArgs, PipelineArgs},
  input::InputWrapper,
  pipeline::Pipeline,
  storage::DirectoryStore,
  task::{ContinuousTask, Task},
};

/// 准星：连续引导拍摄
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  #[command(flatten)]
  pub model: ModelArgs,

  #[command(flatten)]
  pub pipeline: PipelineArgs,

  /// 输入来源，例如 v4l:///dev/video0 或 image:///tmp/a.jpg?repeat=0
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,

  /// 拍摄结果目录，例如 folder:///tmp/captures
  #[arg(long, value_name = "STORE")]
  pub store: Url,

  /// 预览图像输出，例如 image:///tmp/preview.png
  #[arg(long, value_name = "OUTPUT")]
  pub preview: Option<Url>,

  /// 引导就绪时自动拍摄
  #[arg(long)]
  pub auto_capture: bool,

  /// 最大读取帧数
  #[arg(long, value_name = "FRAME_NUMBER")]
  pub max_frames: Option<u64>,

  /// 两帧之间的间隔（毫秒），回放文件时使用
  #[arg(long, value_name = "MILLIS")]
  pub frame_interval: Option<u64>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = Args::parse();

  info!("模型地址: {}", args.model.model);
  info!("输入来源: {}", args.input);
  info!("存储位置: {}", args.store);

  let config = args.pipeline.resolve().context("配置无效")?;
  let detector = args.model.load(&config);
  let store = DirectoryStore::from_url(&args.store).context("无法打开存储目录")?;
  let input = InputWrapper::from_url(&args.input).context("无法打开输入")?;

  #[cfg(feature = "save_image_file")]
  let output = args
    .preview
    .as_ref()
    .map(|url| {
      zhunxing::output::PreviewOutput::from_url(url)
        .map(|o| o.with_required_stable_frames(config.guidance.required_stable_frames))
    })
    .transpose()
    .context("无法创建预览输出")?;
  #[cfg(not(feature = "save_image_file"))]
  let output = {
    if args.preview.is_some() {
      tracing::warn!("未启用 save_image_file 特性, 忽略预览输出");
    }
    zhunxing::output::NullOutput
  };

  let pipeline = Pipeline::new(config, detector, Box::new(store));
  let summary = ContinuousTask::default()
    .with_frame_number(args.max_frames)
    .with_auto_capture(args.auto_capture)
    .with_frame_interval(args.frame_interval.map(Duration::from_millis))
    .with_ctrlc()?
    .run_task(input, pipeline, output)?;

  info!(
    "共读取 {} 帧, 处理 {} 帧, 保存 {} 张, 失败 {} 次",
    summary.frames,
    summary.stats.admitted,
    summary.captures.len(),
    summary.failed_captures
  );
  for asset in &summary.captures {
    println!("{}", asset.path.display());
  }

  Ok(())
}
