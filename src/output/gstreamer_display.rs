// 该文件是 FallSense （跌倒感知） 项目的一部分。
// src/output/gstreamer_display.rs - GStreamer 实时画面显示
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

//! # 实时画面显示
//!
//! 通过 `appsrc ! videoconvert ! autovideosink` 把叠加后的画面显示在本地窗口。
//! 管道在收到第一帧时按帧尺寸创建，尺寸变化时重建。

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use image::RgbImage;
use thiserror::Error;
use tracing::{info, warn};

const DISPLAY_FPS: i32 = 30;

#[derive(Error, Debug)]
pub enum GStreamerDisplayError {
  /// GStreamer 库错误
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// 无法获取 appsrc 元素
  #[error("Failed to get appsrc element")]
  AppSrcNotFound,
  /// 无法转换元素为 appsrc
  #[error("Failed to convert element to appsrc")]
  AppSrcConversionFailed,
  /// 管道错误
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  /// 状态改变错误
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  /// 缓冲区创建错误
  #[error("Buffer creation error")]
  BufferCreationError,
}

struct DisplayPipeline {
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  size: (u32, u32),
}

impl Drop for DisplayPipeline {
  fn drop(&mut self) {
    let _ = self.appsrc.end_of_stream();
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer display pipeline: {}", e);
    }
  }
}

/// 本地显示窗口
#[derive(Default)]
pub struct GStreamerDisplay {
  pipeline: Option<DisplayPipeline>,
  frame_count: u64,
}

impl GStreamerDisplay {
  pub fn new() -> Self {
    Self::default()
  }

  fn build(width: u32, height: u32) -> Result<DisplayPipeline, GStreamerDisplayError> {
    gst::init()?;

    let pipeline = gst::parse::launch(
      "appsrc name=src is-live=true ! videoconvert ! autovideosink sync=false",
    )?
    .downcast::<gst::Pipeline>()
    .map_err(|_| GStreamerDisplayError::PipelineError("Failed to create pipeline".to_string()))?;

    let appsrc = pipeline
      .by_name("src")
      .ok_or(GStreamerDisplayError::AppSrcNotFound)?
      .downcast::<gst_app::AppSrc>()
      .map_err(|_| GStreamerDisplayError::AppSrcConversionFailed)?;

    let caps = gst::Caps::builder("video/x-raw")
      .field("format", "RGB")
      .field("width", width as i32)
      .field("height", height as i32)
      .field("framerate", gst::Fraction::new(DISPLAY_FPS, 1))
      .build();
    appsrc.set_caps(Some(&caps));
    appsrc.set_format(gst::Format::Time);

    pipeline.set_state(gst::State::Playing)?;
    info!("显示窗口已打开: {}x{}", width, height);

    Ok(DisplayPipeline {
      pipeline,
      appsrc,
      size: (width, height),
    })
  }

  pub fn show(&mut self, image: &RgbImage) -> Result<(), GStreamerDisplayError> {
    let size = (image.width(), image.height());
    if self.pipeline.as_ref().is_none_or(|p| p.size != size) {
      self.pipeline = None;
      self.pipeline = Some(Self::build(size.0, size.1)?);
      self.frame_count = 0;
    }
    let Some(display) = self.pipeline.as_ref() else {
      return Ok(());
    };

    let data = image.as_raw();
    let mut buffer =
      gst::Buffer::with_size(data.len()).map_err(|_| GStreamerDisplayError::BufferCreationError)?;
    {
      let buffer_ref = buffer
        .get_mut()
        .ok_or(GStreamerDisplayError::BufferCreationError)?;
      let frame_ns = 1_000_000_000 / DISPLAY_FPS as u64;
      buffer_ref.set_pts(gst::ClockTime::from_nseconds(self.frame_count * frame_ns));
      buffer_ref.set_duration(gst::ClockTime::from_nseconds(frame_ns));
      let mut map = buffer_ref.map_writable().map_err(|_| {
        GStreamerDisplayError::PipelineError("Failed to map buffer".to_string())
      })?;
      map.copy_from_slice(data);
    }
    self.frame_count += 1;

    display.appsrc.push_buffer(buffer).map_err(|e| {
      GStreamerDisplayError::PipelineError(format!("Failed to push buffer: {:?}", e))
    })?;
    Ok(())
  }
}
