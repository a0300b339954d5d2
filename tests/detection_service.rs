// 该文件是 Zhunxing （准星） 项目的一部分。
// tests/detection_service.rs - 后台检测服务
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

mod common;

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use common::*;
use zhunxing::{
  capture::CaptureOutcome,
  model::{Detector, FixtureEngine, InferenceEngine, Labels},
  pipeline::Pipeline,
  scheduler::SkipReason,
  service::{DetectionService, ServiceError},
  storage::{CaptureStore, DirectoryStore},
};

const TIMEOUT: Duration = Duration::from_secs(5);

fn service(
  engine: impl InferenceEngine + 'static,
  skip_interval: u64,
  dir: &std::path::Path,
) -> DetectionService {
  let detector = Detector::new(Box::new(engine), Labels::from_iter(["card"]));
  let store = Box::new(DirectoryStore::new(dir));
  DetectionService::spawn(Pipeline::new(config(skip_interval), detector, store)).unwrap()
}

fn fixture() -> FixtureEngine {
  FixtureEngine::new(centered_output()).with_input_size(INPUT_SIZE, INPUT_SIZE)
}

fn wait_idle(service: &DetectionService) {
  for _ in 0..500 {
    if !service.is_busy() {
      return;
    }
    thread::sleep(Duration::from_millis(10));
  }
  panic!("在途标志未释放");
}

#[test]
fn slow_pass_skips_frames_and_releases_once() {
  let dir = tempfile::tempdir().unwrap();
  let (started_tx, started_rx) = mpsc::channel();
  let (gate_tx, gate_rx) = mpsc::channel();
  let engine = GatedEngine {
    output: centered_output(),
    started: started_tx,
    gate: gate_rx,
  };
  let service = service(engine, 1, dir.path());

  assert_eq!(service.submit(frame(0), None).unwrap(), 1);
  started_rx.recv_timeout(TIMEOUT).unwrap();

  // 推理进行中，后续帧全部丢弃
  for i in 1..=5 {
    assert!(matches!(
      service.submit(frame(i), None),
      Err(ServiceError::Skipped(SkipReason::Busy))
    ));
  }
  assert!(service.is_busy());
  assert_eq!(service.stats().released, 0);

  gate_tx.send(()).unwrap();
  let update = service.updates().recv_timeout(TIMEOUT).unwrap();
  assert_eq!(update.frame_index, 0);
  assert_eq!(update.detections.len(), 1);

  let stats = service.stats();
  assert_eq!(stats.admitted, 1);
  assert_eq!(stats.skipped_busy, 5);
  assert_eq!(stats.released, 1);
  assert!(!service.is_busy());

  // 释放后下一帧被放行
  assert_eq!(service.submit(frame(6), None).unwrap(), 7);
  started_rx.recv_timeout(TIMEOUT).unwrap();
  gate_tx.send(()).unwrap();
  let update = service.updates().recv_timeout(TIMEOUT).unwrap();
  assert_eq!(update.frame_index, 6);
  assert_eq!(service.latest().unwrap().frame_index, 6);
}

#[test]
fn interval_admits_every_nth_frame() {
  let dir = tempfile::tempdir().unwrap();
  let service = service(fixture(), 3, dir.path());

  let mut admitted = Vec::new();
  for i in 0..9 {
    match service.submit(frame(i), None) {
      Ok(n) => {
        admitted.push(n);
        service.updates().recv_timeout(TIMEOUT).unwrap();
        wait_idle(&service);
      }
      Err(ServiceError::Skipped(SkipReason::Interval)) => {}
      Err(e) => panic!("意外错误: {}", e),
    }
  }
  assert_eq!(admitted, vec![3, 6, 9]);
}

#[test]
fn panicking_pass_releases_guard() {
  let dir = tempfile::tempdir().unwrap();
  let engine = FlakyEngine {
    output: centered_output(),
    panics: 1,
  };
  let service = service(engine, 1, dir.path());

  service.submit(frame(0), None).unwrap();
  wait_idle(&service);
  assert!(service.updates().try_recv().is_err());
  assert_eq!(service.stats().released, 1);

  // 工作线程仍然可用
  service.submit(frame(1), None).unwrap();
  let update = service.updates().recv_timeout(TIMEOUT).unwrap();
  assert_eq!(update.frame_index, 1);
}

#[test]
fn inference_failure_yields_empty_update() {
  let dir = tempfile::tempdir().unwrap();
  let service = service(FailingEngine, 1, dir.path());
  service.request_capture();

  service.submit(frame(0), None).unwrap();
  let update = service.updates().recv_timeout(TIMEOUT).unwrap();
  assert!(update.detections.is_empty());
  assert!(update.capture.is_none());
  // 没有检测结果时拍摄请求保留
  assert!(service.capture_pending());
}

#[test]
fn capture_request_is_consumed_once() {
  let dir = tempfile::tempdir().unwrap();
  let service = service(fixture(), 1, dir.path());
  service.request_capture();
  service.request_capture();

  service.submit(frame(0), None).unwrap();
  let update = service.updates().recv_timeout(TIMEOUT).unwrap();
  let asset = match &update.capture {
    Some(CaptureOutcome::Saved(asset)) => asset.clone(),
    other => panic!("拍摄未完成: {:?}", other),
  };
  assert!(asset.path.starts_with(dir.path()));
  assert!(!service.capture_pending());

  wait_idle(&service);
  service.submit(frame(1), None).unwrap();
  let update = service.updates().recv_timeout(TIMEOUT).unwrap();
  assert!(update.capture.is_none());
  assert_eq!(DirectoryStore::new(dir.path()).list().unwrap().len(), 1);
}

#[test]
fn shutdown_rejects_new_frames() {
  let dir = tempfile::tempdir().unwrap();
  let mut service = service(fixture(), 1, dir.path());
  service.shutdown();
  assert!(matches!(
    service.submit(frame(0), None),
    Err(ServiceError::Stopped)
  ));
  // 重复关闭无副作用
  service.shutdown();
}
