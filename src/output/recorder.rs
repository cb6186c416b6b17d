// 该文件是 FallSense （跌倒感知） 项目的一部分。
// src/output/recorder.rs - 限时事件录像
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

//! 跌倒事件录像
//!
//! 录像从告警时刻开始，达到固定时长后无条件停止，期间的新告警不会延长录像。
//! 帧先以 PNG 序列写入 `<输出文件>.frames` 临时目录，录像结束后由后台线程
//! 调用 ffmpeg 编码为 MP4，主循环不会因磁盘或编码而阻塞。
//!
//! # 依赖
//!
//! 需要系统安装 ffmpeg 命令行工具。

use std::{
  path::{Path, PathBuf},
  process::Command,
  sync::{
    Arc,
    mpsc::{Receiver, SyncSender, TrySendError, sync_channel},
  },
  thread::JoinHandle,
};

use chrono::{DateTime, Local};
use image::RgbImage;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::output::create_timestamped;

pub const DEFAULT_RECORD_FPS: u32 = 10;
pub const RECORDING_PREFIX: &str = "fall_event";
const FRAME_QUEUE_CAPACITY: usize = 64;

#[derive(Error, Debug)]
pub enum RecorderError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("视频编码错误: {0}")]
  EncodingError(String),
  #[error("已有录像正在进行: {0}")]
  AlreadyRecording(PathBuf),
}

/// 视频帧缓存
struct FrameBuffer {
  temp_dir: PathBuf,
  frames: usize,
}

impl FrameBuffer {
  fn new(output_path: &Path) -> Result<Self, RecorderError> {
    // 在输出文件旁边创建临时目录
    let mut temp_dir = output_path.as_os_str().to_owned();
    temp_dir.push(".frames");
    let temp_dir = PathBuf::from(temp_dir);
    std::fs::create_dir_all(&temp_dir)?;

    Ok(FrameBuffer {
      temp_dir,
      frames: 0,
    })
  }

  fn add_frame(&mut self, image: &RgbImage) -> Result<(), RecorderError> {
    let frame_path = self.temp_dir.join(format!("frame_{:06}.png", self.frames));
    image.save(&frame_path)?;
    self.frames += 1;
    Ok(())
  }

  fn encode_to_video(&self, output_path: &Path, fps: u32) -> Result<(), RecorderError> {
    if self.frames == 0 {
      info!("没有帧可以编码为视频，跳过编码过程");
      return Ok(());
    }

    info!(
      "开始编码视频: {} 帧 @ {} fps -> {}",
      self.frames,
      fps,
      output_path.display()
    );

    let output = Command::new("ffmpeg")
      .arg("-y")
      .arg("-loglevel")
      .arg("error")
      .arg("-framerate")
      .arg(fps.to_string())
      .arg("-i")
      .arg(self.temp_dir.join("frame_%06d.png"))
      .arg("-c:v")
      .arg("libx264")
      .arg("-pix_fmt")
      .arg("yuv420p")
      .arg("-preset")
      .arg("fast")
      .arg("-crf")
      .arg("23")
      .arg(output_path)
      .output()
      .map_err(|e| {
        RecorderError::EncodingError(format!("无法执行 ffmpeg (请确保已安装): {}", e))
      })?;

    if !output.status.success() {
      let stderr = String::from_utf8_lossy(&output.stderr);
      return Err(RecorderError::EncodingError(format!(
        "ffmpeg 失败: {}",
        stderr.trim()
      )));
    }

    info!("视频编码成功: {}", output_path.display());
    Ok(())
  }

  fn cleanup(&self) {
    if let Err(e) = std::fs::remove_dir_all(&self.temp_dir) {
      warn!("清理临时目录失败: {}", e);
    }
  }
}

/// RAII 守卫确保清理总是执行
struct CleanupGuard<'a>(&'a FrameBuffer);

impl Drop for CleanupGuard<'_> {
  fn drop(&mut self) {
    self.0.cleanup();
  }
}

fn encode_worker(
  mut buffer: FrameBuffer,
  frames: Receiver<Arc<RgbImage>>,
  output_path: PathBuf,
  fps: u32,
) {
  // 发送端关闭即录像结束
  for image in frames {
    if let Err(e) = buffer.add_frame(&image) {
      warn!("写入录像帧失败: {}", e);
    }
  }

  let _guard = CleanupGuard(&buffer);
  if let Err(e) = buffer.encode_to_video(&output_path, fps) {
    error!("编码视频时出错: {}", e);
  }
}

struct ActiveRecording {
  path: PathBuf,
  started_at: f64,
  last_written: Option<f64>,
  sender: SyncSender<Arc<RgbImage>>,
  worker: JoinHandle<()>,
}

/// 限时录像器
///
/// 时间以帧时间戳计（秒）。录像以 `fps` 对输入帧降采样。
pub struct Recorder {
  directory: PathBuf,
  duration: f64,
  fps: u32,
  active: Option<ActiveRecording>,
  encoding: Vec<JoinHandle<()>>,
}

impl Recorder {
  pub fn new(directory: impl AsRef<Path>, duration: f64, fps: u32) -> Self {
    Self {
      directory: directory.as_ref().to_path_buf(),
      duration,
      fps: fps.max(1),
      active: None,
      encoding: Vec::new(),
    }
  }

  pub fn is_recording(&self) -> bool {
    self.active.is_some()
  }

  pub fn current_path(&self) -> Option<&Path> {
    self.active.as_ref().map(|a| a.path.as_path())
  }

  pub fn start(&mut self, started_at: f64, at: DateTime<Local>) -> Result<PathBuf, RecorderError> {
    if let Some(active) = &self.active {
      return Err(RecorderError::AlreadyRecording(active.path.clone()));
    }

    std::fs::create_dir_all(&self.directory)?;
    // 先占住文件名，ffmpeg 以 -y 覆盖
    let (path, _) = create_timestamped(&self.directory, RECORDING_PREFIX, "mp4", at)?;
    let buffer = FrameBuffer::new(&path)?;

    let (sender, receiver) = sync_channel(FRAME_QUEUE_CAPACITY);
    let worker = {
      let path = path.clone();
      let fps = self.fps;
      std::thread::spawn(move || encode_worker(buffer, receiver, path, fps))
    };

    info!("开始录像 {} 秒: {}", self.duration, path.display());
    self.active = Some(ActiveRecording {
      path: path.clone(),
      started_at,
      last_written: None,
      sender,
      worker,
    });
    Ok(path)
  }

  /// 送入一帧；到达时长上限时自动停止
  pub fn push(&mut self, image: &Arc<RgbImage>, timestamp: f64) {
    let Some(active) = self.active.as_mut() else {
      return;
    };

    if timestamp - active.started_at >= self.duration {
      self.stop();
      return;
    }

    let interval = 1.0 / self.fps as f64;
    if active
      .last_written
      .is_some_and(|last| timestamp - last < interval)
    {
      return;
    }

    match active.sender.try_send(Arc::clone(image)) {
      Ok(()) => active.last_written = Some(timestamp),
      Err(TrySendError::Full(_)) => warn!("录像队列已满，丢弃一帧"),
      Err(TrySendError::Disconnected(_)) => {
        error!("录像线程已退出");
        self.stop();
      }
    }
  }

  pub fn stop(&mut self) {
    self.encoding.retain(|handle| !handle.is_finished());

    if let Some(active) = self.active.take() {
      info!("停止录像: {}", active.path.display());
      drop(active.sender);
      self.encoding.push(active.worker);
    }
  }
}

impl Drop for Recorder {
  fn drop(&mut self) {
    self.stop();
    // 等待编码完成，保证退出前视频已写入
    for handle in self.encoding.drain(..) {
      if handle.join().is_err() {
        error!("录像编码线程异常退出");
      }
    }
  }
}
