// 该文件是 FallSense （跌倒感知） 项目的一部分。
// src/task.rs - 帧处理主循环
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

//! 帧处理主循环
//!
//! 读帧 → 检测流水线 → 告警协调，并负责断线重连、抽帧、叠加显示与退出控制。
//! 重连不会重置检测状态，只有连续多帧无目标才会重置跟踪。

use std::{
  collections::VecDeque,
  io::BufRead,
  sync::{
    Arc,
    mpsc::{Receiver, Sender, channel},
  },
  thread,
  time::{Duration, Instant},
};

use chrono::Local;
use image::RgbImage;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  alert::{AlertCoordinator, AlertMetadata, AlertOutcome},
  frame::Frame,
  input::{InputError, ReadError, VideoSource},
  model::Detection,
  output::draw::{Caption, Overlay, OverlayFont, Status, annotate},
  pipeline::FallPipeline,
};

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(2);
pub const DEFAULT_RECONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const FPS_WINDOW: usize = 30;
const FPS_LOG_INTERVAL: u64 = 300;

#[derive(Error, Debug)]
pub enum TaskError {
  #[error("无法打开视频源: {0}")]
  Open(#[from] InputError),
  #[error("无法设置中断信号处理: {0}")]
  Signal(#[from] ctrlc::Error),
}

/// 画面输出（显示窗口等）
pub trait FrameSink {
  fn show(&mut self, image: &RgbImage) -> anyhow::Result<()>;
}

#[cfg(feature = "gstreamer_output")]
impl FrameSink for crate::output::GStreamerDisplay {
  fn show(&mut self, image: &RgbImage) -> anyhow::Result<()> {
    crate::output::GStreamerDisplay::show(self, image)?;
    Ok(())
  }
}

/// 外部退出信号
pub struct Cancellation {
  receiver: Receiver<()>,
}

impl Cancellation {
  /// 手动触发的退出信号
  pub fn manual() -> (Sender<()>, Self) {
    let (sender, receiver) = channel();
    (sender, Self { receiver })
  }

  /// 监听 Ctrl-C 与标准输入中的 `q`
  pub fn install() -> Result<Self, TaskError> {
    let (sender, cancellation) = Self::manual();

    let signal = sender.clone();
    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      let _ = signal.send(());
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })?;

    thread::spawn(move || {
      let stdin = std::io::stdin();
      for line in stdin.lock().lines() {
        let Ok(line) = line else {
          break;
        };
        if line.trim().eq_ignore_ascii_case("q") {
          info!("收到退出命令");
          let _ = sender.send(());
          break;
        }
      }
    });

    info!("按 Ctrl-C 或输入 q 回车退出");
    Ok(cancellation)
  }

  pub fn is_cancelled(&self) -> bool {
    self.receiver.try_recv().is_ok()
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
  /// 连续读帧失败达到该次数时重连
  pub failure_threshold: u32,
  pub backoff: Duration,
  pub reconnect_timeout: Duration,
}

impl Default for ReconnectPolicy {
  fn default() -> Self {
    Self {
      failure_threshold: DEFAULT_FAILURE_THRESHOLD,
      backoff: DEFAULT_BACKOFF,
      reconnect_timeout: DEFAULT_RECONNECT_TIMEOUT,
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DriverConfig {
  /// 每 N 帧推理一次，其余帧只显示与录像
  pub frame_skip: u32,
  pub reconnect: ReconnectPolicy,
  pub max_frames: Option<u64>,
  /// 叠加显示时忽略的小轮廓面积
  pub min_area: u32,
}

impl Default for DriverConfig {
  fn default() -> Self {
    Self {
      frame_skip: 1,
      reconnect: ReconnectPolicy::default(),
      max_frames: None,
      min_area: 0,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
  Cancelled,
  EndOfStream,
  MaxFrames,
  ReconnectFailed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
  pub frames: u64,
  pub processed: u64,
  pub falls: u64,
  pub alerts: u64,
  pub reconnects: u32,
  pub end: SessionEnd,
}

/// 滑动窗口帧率
#[derive(Debug, Default)]
pub struct FpsCounter {
  ticks: VecDeque<Instant>,
}

impl FpsCounter {
  pub fn tick(&mut self, now: Instant) {
    if self.ticks.len() >= FPS_WINDOW {
      self.ticks.pop_front();
    }
    self.ticks.push_back(now);
  }

  pub fn fps(&self) -> f64 {
    match (self.ticks.front(), self.ticks.back()) {
      (Some(first), Some(last)) if self.ticks.len() > 1 => {
        let span = last.duration_since(*first).as_secs_f64();
        if span > 0.0 {
          (self.ticks.len() - 1) as f64 / span
        } else {
          0.0
        }
      }
      _ => 0.0,
    }
  }
}

pub struct FrameDriver<S, P> {
  source: S,
  pipeline: P,
  alerts: AlertCoordinator,
  sink: Option<Box<dyn FrameSink>>,
  config: DriverConfig,
  fps: FpsCounter,
  font: Option<OverlayFont>,
  last_detection: Option<Detection>,
  last_fall: bool,
}

impl<S: VideoSource, P: FallPipeline> FrameDriver<S, P> {
  pub fn new(source: S, pipeline: P, alerts: AlertCoordinator, config: DriverConfig) -> Self {
    Self {
      source,
      pipeline,
      alerts,
      sink: None,
      config: DriverConfig {
        frame_skip: config.frame_skip.max(1),
        ..config
      },
      fps: FpsCounter::default(),
      font: None,
      last_detection: None,
      last_fall: false,
    }
  }

  pub fn with_sink(mut self, sink: Box<dyn FrameSink>) -> Self {
    self.sink = Some(sink);
    self
  }

  /// 叠加画面的状态条显示状态、时间与帧率
  pub fn with_font(mut self, font: OverlayFont) -> Self {
    self.font = Some(font);
    self
  }

  fn reconnect(&mut self) -> bool {
    let policy = self.config.reconnect;
    warn!("连续 {} 次读帧失败，尝试重新连接...", policy.failure_threshold);
    self.source.release();
    thread::sleep(policy.backoff);
    self.source.set_connect_timeout(policy.reconnect_timeout);

    match self.source.open() {
      Ok(()) => {
        info!("重新连接成功: {}", self.source.describe());
        true
      }
      Err(e) => {
        error!("重新连接失败: {}", e);
        false
      }
    }
  }

  fn render(&mut self, frame: &Frame) {
    if self.sink.is_none() && !self.alerts.is_recording() {
      return;
    }

    let overlay = Overlay {
      status: Status::resolve(
        frame.timestamp,
        self.alerts.last_alert_time(),
        self.alerts.is_recording(),
      ),
      detection: self.last_detection.as_ref(),
      fall: self.last_fall,
      min_area: self.config.min_area,
      caption: self.font.as_ref().map(|font| Caption {
        font,
        time: Local::now(),
        fps: self.fps.fps(),
      }),
    };
    let annotated = Arc::new(annotate(frame.image(), &overlay));

    self.alerts.record_frame(&annotated, frame.timestamp);

    if let Some(sink) = self.sink.as_mut()
      && let Err(e) = sink.show(&annotated)
    {
      warn!("画面显示失败，关闭显示: {}", e);
      self.sink = None;
    }
  }

  /// 运行直到退出信号、视频结束、达到帧数上限或重连失败
  pub fn run(mut self, cancellation: &Cancellation) -> Result<SessionSummary, TaskError> {
    info!("打开视频源: {}", self.source.describe());
    self.source.open()?;

    let mut summary = SessionSummary {
      frames: 0,
      processed: 0,
      falls: 0,
      alerts: 0,
      reconnects: 0,
      end: SessionEnd::EndOfStream,
    };
    let mut failures = 0u32;

    summary.end = loop {
      if cancellation.is_cancelled() {
        warn!("中断信号接收，退出任务循环");
        break SessionEnd::Cancelled;
      }
      if self.config.max_frames.is_some_and(|n| summary.frames >= n) {
        info!("达到指定帧数 {}, 退出任务循环", summary.frames);
        break SessionEnd::MaxFrames;
      }

      let frame = match self.source.read() {
        Ok(frame) => {
          failures = 0;
          frame
        }
        Err(ReadError::EndOfStream) => {
          info!("视频流结束");
          break SessionEnd::EndOfStream;
        }
        Err(e) => {
          failures += 1;
          warn!(
            "读帧失败 ({}/{}): {}",
            failures, self.config.reconnect.failure_threshold, e
          );
          if failures >= self.config.reconnect.failure_threshold {
            summary.reconnects += 1;
            if !self.reconnect() {
              break SessionEnd::ReconnectFailed;
            }
            failures = 0;
          }
          continue;
        }
      };

      summary.frames += 1;
      self.fps.tick(Instant::now());

      if (summary.frames - 1) % self.config.frame_skip as u64 == 0 {
        summary.processed += 1;
        let report = self.pipeline.process(&frame);
        self.last_fall = report.decision.fall;
        self.last_detection = report.detection;

        if report.decision.fall {
          summary.falls += 1;
          let metadata = AlertMetadata {
            timestamp: frame.timestamp,
            frame_index: frame.index,
            camera_address: self.source.describe(),
          };
          if self.alerts.on_fall(frame.snapshot(), metadata) == AlertOutcome::Fired {
            summary.alerts += 1;
          }
        }
      }

      self.render(&frame);

      if summary.frames % FPS_LOG_INTERVAL == 0 {
        info!("已处理 {} 帧, {:.1} fps", summary.frames, self.fps.fps());
      } else {
        debug!("第 {} 帧, {:.1} fps", frame.index, self.fps.fps());
      }
    };

    self.source.release();
    self.alerts.shutdown();
    info!(
      "任务结束 ({:?}): {} 帧, {} 次跌倒判定, {} 次告警, {} 次重连",
      summary.end, summary.frames, summary.falls, summary.alerts, summary.reconnects
    );
    Ok(summary)
  }
}
