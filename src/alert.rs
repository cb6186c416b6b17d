// 该文件是 FallSense （跌倒感知） 项目的一部分。
// src/alert.rs - 告警协调：冷却、截图、录像、通知
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

//! 告警协调
//!
//! 每次确认跌倒都交给 [`AlertCoordinator::on_fall`]。冷却期内的告警被静默丢弃，
//! 且不会刷新冷却计时。截图、通知、提示音各自提交到后台线程池执行，互不影响，
//! 失败只记录日志；录像在主线程启动，帧写入与编码在录像线程中完成。

use std::{path::PathBuf, sync::Arc};

use chrono::{DateTime, Local};
use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::output::{DEFAULT_RECORD_FPS, Recorder, SnapshotError, SnapshotWriter};

pub mod dispatch;
pub mod sound;
#[cfg(feature = "webhook")]
pub mod webhook;

pub use self::dispatch::Dispatcher;
pub use self::sound::{AlertSound, SoundError};
#[cfg(feature = "webhook")]
pub use self::webhook::WebhookNotifier;

pub const DEFAULT_COOLDOWN_SECONDS: f64 = 30.0;
pub const DEFAULT_DEVICE_ID: &str = "SENSOR_001";
pub const EVENT_TYPE: &str = "fall_detected";

#[derive(Error, Debug)]
pub enum NotifyError {
  #[cfg(feature = "webhook")]
  #[error("HTTP 请求失败: {0}")]
  Http(#[from] reqwest::Error),
  #[error("服务器返回状态码 {0}")]
  Status(u16),
  #[error("附件编码失败: {0}")]
  Attachment(#[from] SnapshotError),
}

/// 交给后台任务的告警快照，创建后不再修改
#[derive(Debug, Clone)]
pub struct AlertEvent {
  pub device_id: String,
  pub camera_address: String,
  /// 触发帧的时间戳（秒）
  pub timestamp: f64,
  pub frame_index: u64,
  pub wall_time: DateTime<Local>,
  pub image: Arc<RgbImage>,
}

impl AlertEvent {
  pub fn message(&self) -> String {
    format!(
      "检测到跌倒! 设备 {} 摄像头 {} 时间 {}",
      self.device_id,
      self.camera_address,
      self.wall_time.format("%Y-%m-%d %H:%M:%S")
    )
  }
}

/// 告警通知渠道
pub trait Notifier: Send + Sync {
  fn notify(&self, event: &AlertEvent) -> Result<(), NotifyError>;
}

/// 告警触发时的帧信息
#[derive(Debug, Clone)]
pub struct AlertMetadata {
  pub timestamp: f64,
  pub frame_index: u64,
  pub camera_address: String,
}

/// 冷却计时
///
/// 判定与更新在同一次调用中完成，同一时刻的第二次触发一定被抑制。
#[derive(Debug, Clone, PartialEq)]
pub struct AlertState {
  cooldown: f64,
  last_alert_time: Option<f64>,
}

impl AlertState {
  pub fn new(cooldown: f64) -> Self {
    Self {
      cooldown,
      last_alert_time: None,
    }
  }

  pub fn last_alert_time(&self) -> Option<f64> {
    self.last_alert_time
  }

  pub fn try_fire(&mut self, now: f64) -> bool {
    if let Some(last) = self.last_alert_time
      && now - last < self.cooldown
    {
      return false;
    }
    self.last_alert_time = Some(now);
    true
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertOutcome {
  Fired,
  Suppressed,
}

#[derive(Debug, Clone)]
pub struct AlertConfig {
  pub cooldown: f64,
  pub device_id: String,
  pub output_dir: PathBuf,
  /// 截图 JPEG 质量，`None` 表示不保存截图
  pub snapshot_quality: Option<u8>,
  pub record: bool,
  pub record_seconds: f64,
  pub sound: bool,
}

impl Default for AlertConfig {
  fn default() -> Self {
    Self {
      cooldown: DEFAULT_COOLDOWN_SECONDS,
      device_id: DEFAULT_DEVICE_ID.to_string(),
      output_dir: PathBuf::from("fall_events"),
      snapshot_quality: Some(95),
      record: false,
      record_seconds: 15.0,
      sound: false,
    }
  }
}

pub struct AlertCoordinator {
  device_id: String,
  state: AlertState,
  snapshots: Option<Arc<SnapshotWriter>>,
  recorder: Option<Recorder>,
  notifier: Option<Arc<dyn Notifier>>,
  sound: Option<Arc<AlertSound>>,
  dispatcher: Dispatcher,
}

impl AlertCoordinator {
  pub fn new(config: AlertConfig, notifier: Option<Arc<dyn Notifier>>) -> Self {
    let snapshots = config
      .snapshot_quality
      .map(|quality| Arc::new(SnapshotWriter::new(&config.output_dir, quality)));
    let recorder = config
      .record
      .then(|| Recorder::new(&config.output_dir, config.record_seconds, DEFAULT_RECORD_FPS));
    let sound = config.sound.then(|| Arc::new(AlertSound::default()));

    Self {
      device_id: config.device_id,
      state: AlertState::new(config.cooldown),
      snapshots,
      recorder,
      notifier,
      sound,
      dispatcher: Dispatcher::default(),
    }
  }

  pub fn last_alert_time(&self) -> Option<f64> {
    self.state.last_alert_time()
  }

  pub fn is_recording(&self) -> bool {
    self.recorder.as_ref().is_some_and(|r| r.is_recording())
  }

  /// 处理一次确认的跌倒
  pub fn on_fall(&mut self, image: Arc<RgbImage>, metadata: AlertMetadata) -> AlertOutcome {
    if !self.state.try_fire(metadata.timestamp) {
      debug!("冷却期内，忽略跌倒事件 (帧 {})", metadata.frame_index);
      return AlertOutcome::Suppressed;
    }

    let event = Arc::new(AlertEvent {
      device_id: self.device_id.clone(),
      camera_address: metadata.camera_address,
      timestamp: metadata.timestamp,
      frame_index: metadata.frame_index,
      wall_time: Local::now(),
      image,
    });
    warn!("{}", event.message());

    if let Some(writer) = &self.snapshots {
      let writer = Arc::clone(writer);
      let event = Arc::clone(&event);
      self
        .dispatcher
        .submit("保存截图", move || writer.save(&event.image, event.wall_time).map(|_| ()));
    }

    if let Some(recorder) = self.recorder.as_mut()
      && !recorder.is_recording()
    {
      match recorder.start(event.timestamp, event.wall_time) {
        Ok(_) => recorder.push(&event.image, event.timestamp),
        Err(e) => warn!("启动录像失败: {}", e),
      }
    }

    if let Some(notifier) = &self.notifier {
      let notifier = Arc::clone(notifier);
      let event = Arc::clone(&event);
      self
        .dispatcher
        .submit("发送告警通知", move || notifier.notify(&event));
    }

    if let Some(sound) = &self.sound {
      let sound = Arc::clone(sound);
      self.dispatcher.submit("播放提示音", move || sound.play());
    }

    info!("告警已分发 (帧 {})", event.frame_index);
    AlertOutcome::Fired
  }

  /// 把一帧写入正在进行的录像
  pub fn record_frame(&mut self, image: &Arc<RgbImage>, timestamp: f64) {
    if let Some(recorder) = self.recorder.as_mut() {
      recorder.push(image, timestamp);
    }
  }

  /// 停止录像并等待后台任务完成
  pub fn shutdown(&mut self) {
    if let Some(recorder) = self.recorder.as_mut() {
      recorder.stop();
    }
    self.dispatcher.shutdown();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::{
    Mutex,
    atomic::{AtomicUsize, Ordering},
  };

  #[derive(Default)]
  struct CountingNotifier {
    count: AtomicUsize,
    frames: Mutex<Vec<u64>>,
  }

  impl Notifier for CountingNotifier {
    fn notify(&self, event: &AlertEvent) -> Result<(), NotifyError> {
      self.count.fetch_add(1, Ordering::SeqCst);
      self.frames.lock().unwrap().push(event.frame_index);
      Ok(())
    }
  }

  struct FailingNotifier;

  impl Notifier for FailingNotifier {
    fn notify(&self, _: &AlertEvent) -> Result<(), NotifyError> {
      Err(NotifyError::Status(503))
    }
  }

  fn quiet_config(cooldown: f64) -> AlertConfig {
    AlertConfig {
      cooldown,
      snapshot_quality: None,
      ..Default::default()
    }
  }

  fn metadata(timestamp: f64, frame_index: u64) -> AlertMetadata {
    AlertMetadata {
      timestamp,
      frame_index,
      camera_address: "192.168.1.40:10554".to_string(),
    }
  }

  fn image() -> Arc<RgbImage> {
    Arc::new(RgbImage::new(16, 16))
  }

  fn delivered(events: &[(f64, u64)], cooldown: f64) -> (Vec<AlertOutcome>, Vec<u64>) {
    let notifier = Arc::new(CountingNotifier::default());
    let mut coordinator = AlertCoordinator::new(
      quiet_config(cooldown),
      Some(notifier.clone() as Arc<dyn Notifier>),
    );
    let outcomes = events
      .iter()
      .map(|(t, i)| coordinator.on_fall(image(), metadata(*t, *i)))
      .collect();
    coordinator.shutdown();
    let frames = notifier.frames.lock().unwrap().clone();
    assert_eq!(notifier.count.load(Ordering::SeqCst), frames.len());
    (outcomes, frames)
  }

  #[test]
  fn falls_within_cooldown_deliver_once() {
    let (outcomes, frames) = delivered(&[(100.0, 1), (101.0, 2)], 30.0);
    assert_eq!(outcomes, vec![AlertOutcome::Fired, AlertOutcome::Suppressed]);
    assert_eq!(frames, vec![1]);
  }

  #[test]
  fn falls_beyond_cooldown_deliver_twice() {
    let (outcomes, mut frames) = delivered(&[(100.0, 1), (131.0, 2)], 30.0);
    assert_eq!(outcomes, vec![AlertOutcome::Fired, AlertOutcome::Fired]);
    frames.sort();
    assert_eq!(frames, vec![1, 2]);
  }

  #[test]
  fn suppressed_fall_does_not_restart_cooldown() {
    let (outcomes, _) = delivered(&[(0.0, 1), (20.0, 2), (31.0, 3)], 30.0);
    assert_eq!(
      outcomes,
      vec![
        AlertOutcome::Fired,
        AlertOutcome::Suppressed,
        AlertOutcome::Fired
      ]
    );
  }

  #[test]
  fn same_instant_cannot_double_fire() {
    let mut state = AlertState::new(3.0);
    assert!(state.try_fire(10.0));
    assert!(!state.try_fire(10.0));
    assert_eq!(state.last_alert_time(), Some(10.0));
    assert!(state.try_fire(13.0));
  }

  #[test]
  fn notifier_failure_is_not_fatal() {
    let mut coordinator =
      AlertCoordinator::new(quiet_config(0.0), Some(Arc::new(FailingNotifier)));
    assert_eq!(coordinator.on_fall(image(), metadata(1.0, 1)), AlertOutcome::Fired);
    assert_eq!(coordinator.on_fall(image(), metadata(2.0, 2)), AlertOutcome::Fired);
    coordinator.shutdown();
  }

  #[test]
  fn fired_alert_writes_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let mut coordinator = AlertCoordinator::new(
      AlertConfig {
        output_dir: dir.path().to_path_buf(),
        snapshot_quality: Some(30),
        ..Default::default()
      },
      None,
    );
    coordinator.on_fall(image(), metadata(5.0, 7));
    coordinator.shutdown();

    let names: Vec<String> = std::fs::read_dir(dir.path())
      .unwrap()
      .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
      .collect();
    assert_eq!(names.len(), 1);
    assert!(names[0].starts_with("fall_screenshot_"));
  }

  #[test]
  fn recording_starts_once_and_is_bounded() {
    let dir = tempfile::tempdir().unwrap();
    let mut coordinator = AlertCoordinator::new(
      AlertConfig {
        cooldown: 0.0,
        output_dir: dir.path().to_path_buf(),
        snapshot_quality: None,
        record: true,
        record_seconds: 15.0,
        ..Default::default()
      },
      None,
    );
    coordinator.on_fall(image(), metadata(0.0, 0));
    assert!(coordinator.is_recording());
    // 录像期间的新告警不会延长录像
    coordinator.on_fall(image(), metadata(10.0, 100));
    coordinator.record_frame(&image(), 14.0);
    assert!(coordinator.is_recording());
    coordinator.record_frame(&image(), 15.0);
    assert!(!coordinator.is_recording());
    coordinator.shutdown();
  }
}
