// 该文件是 FallSense （跌倒感知） 项目的一部分。
// src/alert/dispatch.rs - 告警副作用的后台执行
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 FallSense Contributors

use std::{
  fmt::Display,
  panic::{AssertUnwindSafe, catch_unwind},
  sync::{
    Arc, Mutex,
    mpsc::{Receiver, SyncSender, TrySendError, sync_channel},
  },
  thread::JoinHandle,
};

use tracing::{debug, error, warn};

pub const DEFAULT_WORKERS: usize = 2;
pub const DEFAULT_QUEUE_CAPACITY: usize = 16;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// 固定大小的后台工作线程池
///
/// 任务提交后即不再跟踪：失败只记录日志，队列满时直接丢弃。
/// 销毁时等待已提交的任务执行完毕。
pub struct Dispatcher {
  sender: Option<SyncSender<Job>>,
  workers: Vec<JoinHandle<()>>,
}

fn worker_loop(id: usize, jobs: Arc<Mutex<Receiver<Job>>>) {
  loop {
    let job = match jobs.lock() {
      Ok(receiver) => receiver.recv(),
      Err(_) => break,
    };
    let Ok(job) = job else {
      break;
    };
    if catch_unwind(AssertUnwindSafe(job)).is_err() {
      error!("后台任务 panic (worker #{})", id);
    }
  }
  debug!("worker #{} 退出", id);
}

impl Dispatcher {
  pub fn new(workers: usize, capacity: usize) -> Self {
    let (sender, receiver) = sync_channel::<Job>(capacity.max(1));
    let receiver = Arc::new(Mutex::new(receiver));
    let workers = (0..workers.max(1))
      .map(|id| {
        let receiver = Arc::clone(&receiver);
        std::thread::spawn(move || worker_loop(id, receiver))
      })
      .collect();

    Self {
      sender: Some(sender),
      workers,
    }
  }

  /// 提交任务，返回是否已入队
  pub fn submit<F, E>(&self, name: &'static str, task: F) -> bool
  where
    F: FnOnce() -> Result<(), E> + Send + 'static,
    E: Display,
  {
    let Some(sender) = self.sender.as_ref() else {
      warn!("{}: 后台线程池已关闭", name);
      return false;
    };

    let job: Job = Box::new(move || {
      if let Err(e) = task() {
        warn!("{}失败: {}", name, e);
      }
    });

    match sender.try_send(job) {
      Ok(()) => true,
      Err(TrySendError::Full(_)) => {
        warn!("后台队列已满，丢弃任务: {}", name);
        false
      }
      Err(TrySendError::Disconnected(_)) => {
        error!("后台线程池不可用，丢弃任务: {}", name);
        false
      }
    }
  }

  /// 关闭队列并等待所有已提交任务完成
  pub fn shutdown(&mut self) {
    drop(self.sender.take());
    for handle in self.workers.drain(..) {
      if handle.join().is_err() {
        error!("后台线程异常退出");
      }
    }
  }
}

impl Default for Dispatcher {
  fn default() -> Self {
    Self::new(DEFAULT_WORKERS, DEFAULT_QUEUE_CAPACITY)
  }
}

impl Drop for Dispatcher {
  fn drop(&mut self) {
    self.shutdown();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::{
    atomic::{AtomicUsize, Ordering},
    mpsc::channel,
  };

  #[test]
  fn runs_all_jobs_before_shutdown() {
    let counter = Arc::new(AtomicUsize::new(0));
    let mut dispatcher = Dispatcher::new(3, 32);
    for _ in 0..20 {
      let counter = Arc::clone(&counter);
      assert!(dispatcher.submit("计数", move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok::<(), String>(())
      }));
    }
    dispatcher.shutdown();
    assert_eq!(counter.load(Ordering::SeqCst), 20);
  }

  #[test]
  fn failing_and_panicking_jobs_do_not_kill_workers() {
    let counter = Arc::new(AtomicUsize::new(0));
    let mut dispatcher = Dispatcher::new(1, 8);
    dispatcher.submit("失败任务", || Err::<(), _>("boom"));
    dispatcher.submit("panic 任务", || -> Result<(), String> { panic!("boom") });
    {
      let counter = Arc::clone(&counter);
      dispatcher.submit("计数", move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok::<(), String>(())
      });
    }
    dispatcher.shutdown();
    assert_eq!(counter.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn full_queue_drops_instead_of_blocking() {
    let dispatcher = Dispatcher::new(1, 1);
    let (started_tx, started_rx) = channel();
    let (release_tx, release_rx) = channel::<()>();

    assert!(dispatcher.submit("阻塞任务", move || {
      started_tx.send(()).map_err(|e| e.to_string())?;
      release_rx.recv().map_err(|e| e.to_string())
    }));
    started_rx.recv().unwrap();

    assert!(dispatcher.submit("排队任务", || Ok::<(), String>(())));
    assert!(!dispatcher.submit("被丢弃任务", || Ok::<(), String>(())));

    release_tx.send(()).unwrap();
  }

  #[test]
  fn submit_after_shutdown_is_rejected() {
    let mut dispatcher = Dispatcher::new(1, 1);
    dispatcher.shutdown();
    assert!(!dispatcher.submit("迟到任务", || Ok::<(), String>(())));
  }
}
