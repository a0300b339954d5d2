// 该文件是 Zhunxing （准星） 项目的一部分。
// src/task.rs - 拍摄任务
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

use std::sync::mpsc::{self, Receiver};
use std::{thread, time::Duration};

use anyhow::Context;
use tracing::{debug, info, warn};

use crate::{
  capture::{CaptureLatch, CaptureOutcome},
  guidance::GuidanceMessage,
  input::FrameSource,
  output::Render,
  pipeline::{Pipeline, PipelineUpdate},
  scheduler::SchedulerStats,
  service::{DetectionService, ServiceError},
  storage::SavedAsset,
};

pub trait Task<I, O>: Sized {
  type Output;
  type Error;
  fn run_task(self, input: I, pipeline: Pipeline, output: O) -> Result<Self::Output, Self::Error>;
}

/// 对单帧执行一次同步处理
#[derive(Default, Debug)]
pub struct OneShotTask {
  capture: bool,
}

impl OneShotTask {
  /// 检测到目标时同时裁剪保存
  pub fn with_capture(mut self, capture: bool) -> Self {
    self.capture = capture;
    self
  }
}

impl<I, O> Task<I, O> for OneShotTask
where
  I: FrameSource,
  O: Render,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  type Output = PipelineUpdate;
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, mut pipeline: Pipeline, output: O) -> Result<Self::Output, Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    let orientation = input.orientation();
    info!("输入帧获取成功 ({}x{}), 开始处理...", frame.width, frame.height);

    let latch = CaptureLatch::new();
    if self.capture {
      latch.request();
    }
    let update = pipeline.process(frame, orientation, &latch);
    info!(
      "处理完成, {} 个检测结果, 耗时: {:.2?}",
      update.detections.len(),
      update.inference_time
    );
    output.render(&update).context("渲染失败")?;

    Ok(update)
  }
}

/// 连续任务的统计结果
#[derive(Debug, Default)]
pub struct TaskSummary {
  pub frames: u64,
  pub updates: u64,
  pub captures: Vec<SavedAsset>,
  pub failed_captures: u64,
  pub stats: SchedulerStats,
}

/// 从帧源连续取帧交给后台服务，直到帧源结束、达到帧数或收到停止信号
#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<u64>,
  auto_capture: bool,
  frame_interval: Option<Duration>,
  stop: Option<Receiver<()>>,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<u64>) -> Self {
    self.frame_number = frame_number;
    self
  }

  /// 引导就绪时自动发起拍摄
  pub fn with_auto_capture(mut self, auto_capture: bool) -> Self {
    self.auto_capture = auto_capture;
    self
  }

  /// 两帧之间的最小间隔，用于回放文件时模拟相机帧率
  pub fn with_frame_interval(mut self, interval: Option<Duration>) -> Self {
    self.frame_interval = interval;
    self
  }

  pub fn with_stop_signal(mut self, stop: Receiver<()>) -> Self {
    self.stop = Some(stop);
    self
  }

  /// 安装 Ctrl-C 处理，收到信号后结束任务循环
  pub fn with_ctrlc(self) -> anyhow::Result<Self> {
    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      let _ = tx.send(());
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })
    .context("无法设置 Ctrl-C 处理")?;
    Ok(self.with_stop_signal(rx))
  }

  fn stop_requested(&self) -> bool {
    self
      .stop
      .as_ref()
      .map(|rx| rx.try_recv().is_ok())
      .unwrap_or(false)
  }

  fn handle_update<O>(
    &self,
    service: &DetectionService,
    output: &O,
    update: &PipelineUpdate,
    last_message: &mut Option<GuidanceMessage>,
    summary: &mut TaskSummary,
  ) -> anyhow::Result<()>
  where
    O: Render,
    O::Error: std::error::Error + Send + Sync + 'static,
  {
    summary.updates += 1;
    let guidance = update.guidance;
    if *last_message != Some(guidance.message) {
      info!("第 {} 帧: {}", update.frame_index, guidance.message);
      *last_message = Some(guidance.message);
    }
    debug!(
      "第 {} 帧: {} 个检测结果, 耗时 {:.2?}",
      update.frame_index,
      update.detections.len(),
      update.inference_time
    );

    match &update.capture {
      Some(CaptureOutcome::Saved(asset)) => {
        info!("已保存: {}", asset.path.display());
        summary.captures.push(asset.clone());
      }
      Some(CaptureOutcome::Failed(reason)) => {
        warn!("拍摄失败: {}", reason);
        summary.failed_captures += 1;
      }
      None => {}
    }

    if self.auto_capture && guidance.ready_to_capture && !service.capture_pending() {
      info!("引导就绪, 自动拍摄");
      service.request_capture();
    }

    output.render(update).context("渲染失败")?;
    Ok(())
  }
}

impl<I, O> Task<I, O> for ContinuousTask
where
  I: FrameSource,
  O: Render,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  type Output = TaskSummary;
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, pipeline: Pipeline, output: O) -> Result<Self::Output, Self::Error> {
    info!("开始任务...");
    let mut service = DetectionService::spawn(pipeline).context("无法启动检测服务")?;
    let mut summary = TaskSummary::default();
    let mut last_message = None;

    while let Some(frame) = input.next() {
      summary.frames += 1;
      // 设备可能在采集过程中旋转
      let orientation = input.orientation();
      match service.submit(frame, orientation) {
        Ok(_) | Err(ServiceError::Skipped(_)) => {}
        Err(e) => return Err(e).context("提交帧失败"),
      }

      while let Ok(update) = service.updates().try_recv() {
        self.handle_update(&service, &output, &update, &mut last_message, &mut summary)?;
      }

      if self.frame_number.is_some_and(|n| summary.frames >= n) {
        info!("达到指定帧数 {}, 退出任务循环", summary.frames);
        break;
      }
      if self.stop_requested() {
        warn!("中断信号接收，退出任务循环");
        break;
      }
      if let Some(interval) = self.frame_interval {
        thread::sleep(interval);
      }
    }

    service.shutdown();
    while let Ok(update) = service.updates().try_recv() {
      self.handle_update(&service, &output, &update, &mut last_message, &mut summary)?;
    }
    summary.stats = service.stats();

    info!(
      "任务完成: {} 帧, {} 次处理, {} 次拍摄",
      summary.frames,
      summary.updates,
      summary.captures.len()
    );
    Ok(summary)
  }
}
