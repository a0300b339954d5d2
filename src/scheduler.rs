// 该文件是 Zhunxing （准星） 项目的一部分。
// src/scheduler.rs - 帧调度与节流
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

//! 每 N 帧放行一帧，同时保证同一时刻至多一次推理在途。
//!
//! 在途期间到达的帧直接丢弃，不排队。

use std::sync::{
  Arc,
  atomic::{AtomicBool, AtomicU64, Ordering},
};

use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
  /// 未到采样间隔
  Interval,
  /// 上一帧仍在处理
  Busy,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
  pub offered: u64,
  pub admitted: u64,
  pub skipped_interval: u64,
  pub skipped_busy: u64,
  pub released: u64,
}

#[derive(Debug, Default)]
struct Counters {
  admitted: AtomicU64,
  skipped_interval: AtomicU64,
  skipped_busy: AtomicU64,
  released: AtomicU64,
}

#[derive(Debug)]
struct SchedulerState {
  skip_interval: u64,
  frame_counter: AtomicU64,
  in_flight: AtomicBool,
  counters: Counters,
}

/// 帧调度器，可在线程间共享（内部为 `Arc`）
#[derive(Debug, Clone)]
pub struct FrameScheduler {
  state: Arc<SchedulerState>,
}

/// 在途许可，析构时释放在途标志
///
/// 无论处理成功、失败还是发生 panic，许可都会在离开作用域时恰好释放一次。
#[derive(Debug)]
#[must_use = "许可被丢弃时立即释放在途标志"]
pub struct InFlightPermit {
  state: Arc<SchedulerState>,
  frame_number: u64,
}

impl InFlightPermit {
  /// 被放行帧在调度器中的序号（从 1 开始）
  pub fn frame_number(&self) -> u64 {
    self.frame_number
  }
}

impl Drop for InFlightPermit {
  fn drop(&mut self) {
    self.state.in_flight.store(false, Ordering::Release);
    self.state.counters.released.fetch_add(1, Ordering::Relaxed);
    trace!("释放在途标志: 第 {} 帧", self.frame_number);
  }
}

impl FrameScheduler {
  /// `skip_interval` 为 0 时按 1 处理
  pub fn new(skip_interval: u64) -> Self {
    Self {
      state: Arc::new(SchedulerState {
        skip_interval: skip_interval.max(1),
        frame_counter: AtomicU64::new(0),
        in_flight: AtomicBool::new(false),
        counters: Counters::default(),
      }),
    }
  }

  pub fn skip_interval(&self) -> u64 {
    self.state.skip_interval
  }

  /// 判断当前帧是否放行，O(1) 且不阻塞
  pub fn try_admit(&self) -> Result<InFlightPermit, SkipReason> {
    let state = &self.state;
    let frame_number = state.frame_counter.fetch_add(1, Ordering::Relaxed) + 1;

    if state.in_flight.load(Ordering::Acquire) {
      state.counters.skipped_busy.fetch_add(1, Ordering::Relaxed);
      return Err(SkipReason::Busy);
    }

    if frame_number % state.skip_interval != 0 {
      state.counters.skipped_interval.fetch_add(1, Ordering::Relaxed);
      return Err(SkipReason::Interval);
    }

    if state
      .in_flight
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .is_err()
    {
      state.counters.skipped_busy.fetch_add(1, Ordering::Relaxed);
      return Err(SkipReason::Busy);
    }

    state.counters.admitted.fetch_add(1, Ordering::Relaxed);
    Ok(InFlightPermit {
      state: Arc::clone(state),
      frame_number,
    })
  }

  pub fn is_busy(&self) -> bool {
    self.state.in_flight.load(Ordering::Acquire)
  }

  pub fn stats(&self) -> SchedulerStats {
    let c = &self.state.counters;
    SchedulerStats {
      offered: self.state.frame_counter.load(Ordering::Relaxed),
      admitted: c.admitted.load(Ordering::Relaxed),
      skipped_interval: c.skipped_interval.load(Ordering::Relaxed),
      skipped_busy: c.skipped_busy.load(Ordering::Relaxed),
      released: c.released.load(Ordering::Relaxed),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn admits_exactly_one_in_n() {
    for (frames, interval) in [(10u64, 3u64), (9, 3), (7, 1), (100, 7), (2, 5)] {
      let scheduler = FrameScheduler::new(interval);
      let admitted = (0..frames)
        .filter_map(|_| scheduler.try_admit().ok())
        .count() as u64;
      assert_eq!(admitted, frames / interval, "{} frames / {}", frames, interval);
    }
  }

  #[test]
  fn busy_guard_skips_and_releases_once() {
    let scheduler = FrameScheduler::new(2);
    assert_eq!(scheduler.try_admit().unwrap_err(), SkipReason::Interval);
    let permit = scheduler.try_admit().unwrap();
    assert_eq!(permit.frame_number(), 2);
    assert!(scheduler.is_busy());

    // 接下来三个本应放行的帧（以及其间的帧）全部跳过
    for _ in 0..6 {
      assert_eq!(scheduler.try_admit().unwrap_err(), SkipReason::Busy);
    }
    assert_eq!(scheduler.stats().released, 0);

    drop(permit);
    let stats = scheduler.stats();
    assert_eq!(stats.released, 1);
    assert_eq!(stats.skipped_busy, 6);
    assert!(!scheduler.is_busy());

    // 计数器持续递增：第 9 帧跳过，第 10 帧放行
    assert_eq!(scheduler.try_admit().unwrap_err(), SkipReason::Interval);
    assert!(scheduler.try_admit().is_ok());
  }

  #[test]
  fn permit_released_on_panic() {
    let scheduler = FrameScheduler::new(1);
    let permit = scheduler.try_admit().unwrap();
    let result = std::panic::catch_unwind(move || {
      let _permit = permit;
      panic!("推理失败");
    });
    assert!(result.is_err());
    assert!(!scheduler.is_busy());
    assert!(scheduler.try_admit().is_ok());
  }

  #[test]
  fn zero_interval_behaves_like_one() {
    let scheduler = FrameScheduler::new(0);
    assert_eq!(scheduler.skip_interval(), 1);
  }
}
