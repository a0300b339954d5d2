// 该文件是 Zhunxing （准星） 项目的一部分。
// src/service.rs - 后台检测服务
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

//! 相机线程只做调度判断，被放行的帧交给工作线程处理。
//!
//! 工作线程独占 [`Pipeline`]，处理结果通过通道与最新快照两种方式发布。

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use crate::{
  capture::CaptureLatch,
  frame::{Frame, Orientation},
  pipeline::{Pipeline, PipelineUpdate},
  scheduler::{FrameScheduler, InFlightPermit, SchedulerStats, SkipReason},
};

const WORKER_NAME: &str = "zhunxing-worker";
const UPDATE_CAPACITY: usize = 16;

#[derive(Error, Debug)]
pub enum ServiceError {
  #[error("无法启动工作线程: {0}")]
  SpawnError(#[from] std::io::Error),
  #[error("帧被跳过: {0:?}")]
  Skipped(SkipReason),
  #[error("工作线程已停止")]
  Stopped,
}

impl From<SkipReason> for ServiceError {
  fn from(reason: SkipReason) -> Self {
    ServiceError::Skipped(reason)
  }
}

/// 发往工作线程的请求
pub enum WorkerRequest {
  Process {
    frame: Frame,
    orientation: Option<Orientation>,
    permit: InFlightPermit,
  },
}

type Latest = Arc<Mutex<Option<PipelineUpdate>>>;

pub struct DetectionService {
  scheduler: FrameScheduler,
  latch: CaptureLatch,
  requests: Option<SyncSender<WorkerRequest>>,
  updates: Receiver<PipelineUpdate>,
  latest: Latest,
  worker: Option<JoinHandle<()>>,
}

impl DetectionService {
  /// 启动工作线程，调度间隔取自流水线配置
  pub fn spawn(pipeline: Pipeline) -> Result<Self, ServiceError> {
    let scheduler = FrameScheduler::new(pipeline.config().skip_interval);
    let latch = CaptureLatch::new();
    let latest: Latest = Arc::new(Mutex::new(None));
    let (request_tx, request_rx) = mpsc::sync_channel(1);
    let (update_tx, update_rx) = mpsc::sync_channel(UPDATE_CAPACITY);

    let worker = {
      let latch = latch.clone();
      let latest = Arc::clone(&latest);
      thread::Builder::new()
        .name(WORKER_NAME.to_string())
        .spawn(move || worker_loop(pipeline, request_rx, latch, update_tx, latest))?
    };
    info!(
      "检测服务已启动, 每 {} 帧处理一帧",
      scheduler.skip_interval()
    );

    Ok(Self {
      scheduler,
      latch,
      requests: Some(request_tx),
      updates: update_rx,
      latest,
      worker: Some(worker),
    })
  }

  /// 提交一帧，返回被放行帧的调度序号
  ///
  /// 不会阻塞调用线程；未被放行的帧立即丢弃。
  pub fn submit(&self, frame: Frame, orientation: Option<Orientation>) -> Result<u64, ServiceError> {
    let requests = self.requests.as_ref().ok_or(ServiceError::Stopped)?;
    let permit = self.scheduler.try_admit()?;
    let frame_number = permit.frame_number();
    trace!("放行第 {} 帧 (源序号 {})", frame_number, frame.index);

    match requests.try_send(WorkerRequest::Process {
      frame,
      orientation,
      permit,
    }) {
      Ok(()) => Ok(frame_number),
      // 失败时请求连同许可一起被丢弃，在途标志随之释放
      Err(TrySendError::Full(_)) => Err(ServiceError::Skipped(SkipReason::Busy)),
      Err(TrySendError::Disconnected(_)) => Err(ServiceError::Stopped),
    }
  }

  /// 请求在下一个有检测结果的帧上拍摄，重复请求无副作用
  pub fn request_capture(&self) {
    debug!("收到拍摄请求");
    self.latch.request();
  }

  pub fn capture_pending(&self) -> bool {
    self.latch.is_requested()
  }

  /// 按处理顺序接收的结果，接收方处理不及时时新结果会被丢弃
  pub fn updates(&self) -> &Receiver<PipelineUpdate> {
    &self.updates
  }

  /// 最近一次处理结果的快照
  pub fn latest(&self) -> Option<PipelineUpdate> {
    self
      .latest
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  pub fn stats(&self) -> SchedulerStats {
    self.scheduler.stats()
  }

  pub fn is_busy(&self) -> bool {
    self.scheduler.is_busy()
  }

  /// 关闭请求通道并等待工作线程处理完在途帧
  pub fn shutdown(&mut self) {
    let Some(worker) = self.worker.take() else {
      return;
    };
    drop(self.requests.take());
    if worker.join().is_err() {
      error!("工作线程异常退出");
    }
    let stats = self.scheduler.stats();
    info!(
      "检测服务已停止: 提交 {} 帧, 处理 {} 帧, 间隔跳过 {} 帧, 忙碌跳过 {} 帧",
      stats.offered, stats.admitted, stats.skipped_interval, stats.skipped_busy
    );
  }
}

impl Drop for DetectionService {
  fn drop(&mut self) {
    self.shutdown();
  }
}

fn worker_loop(
  mut pipeline: Pipeline,
  requests: Receiver<WorkerRequest>,
  latch: CaptureLatch,
  updates: SyncSender<PipelineUpdate>,
  latest: Latest,
) {
  debug!("工作线程开始");
  for request in requests {
    match request {
      WorkerRequest::Process {
        frame,
        orientation,
        permit,
      } => {
        let frame_number = permit.frame_number();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
          pipeline.process(frame, orientation, &latch)
        }));
        drop(permit);

        let update = match result {
          Ok(update) => update,
          Err(_) => {
            error!("第 {} 帧处理时发生 panic, 已跳过", frame_number);
            continue;
          }
        };

        *latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(update.clone());
        match updates.try_send(update) {
          Ok(()) => {}
          Err(TrySendError::Full(_)) => warn!("结果通道已满, 丢弃第 {} 帧结果", frame_number),
          Err(TrySendError::Disconnected(_)) => trace!("结果通道已关闭"),
        }
      }
    }
  }
  debug!("工作线程结束");
}
