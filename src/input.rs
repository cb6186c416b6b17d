// 该文件是 FallSense （跌倒感知） 项目的一部分。
// src/input.rs - 视频输入
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

use std::time::Duration;

use thiserror::Error;

use crate::{FromUrl, frame::Frame};

mod rtsp;
pub use self::rtsp::{ALTERNATIVE_PATHS, CameraAddress, DEFAULT_CONNECT_TIMEOUT};

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::ImageFolderInput;

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{GStreamerInputError, GStreamerRtspInput};

#[derive(Error, Debug)]
pub enum InputError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("摄像头地址无效: {0}")]
  InvalidAddress(String),
  #[error("无法连接视频源 {0}: 所有候选路径均失败")]
  ConnectFailed(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer 输入错误: {0}")]
  GStreamerInputError(#[from] GStreamerInputError),
}

/// 单次读帧失败的原因
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReadError {
  /// 有限视频源已读完，不需要重连
  #[error("视频流结束")]
  EndOfStream,
  /// 在限定时间内没有收到新帧
  #[error("读帧超时")]
  Timeout,
  #[error("读帧失败: {0}")]
  Failed(String),
}

/// 视频源
///
/// `open` 建立连接（可在内部尝试多个候选地址），`read` 阻塞读取下一帧，
/// `release` 释放连接。重连由调用方按 `release` + `open` 完成。
pub trait VideoSource {
  fn open(&mut self) -> Result<(), InputError>;
  fn read(&mut self) -> Result<Frame, ReadError>;
  fn release(&mut self);
  /// 用于日志和告警的源描述（不含密码）
  fn describe(&self) -> String;
  /// 调整后续 `open` 的连接超时，重连时使用较短的超时
  fn set_connect_timeout(&mut self, _timeout: Duration) {}
}

impl<S: VideoSource + ?Sized> VideoSource for Box<S> {
  fn open(&mut self) -> Result<(), InputError> {
    (**self).open()
  }

  fn read(&mut self) -> Result<Frame, ReadError> {
    (**self).read()
  }

  fn release(&mut self) {
    (**self).release()
  }

  fn describe(&self) -> String {
    (**self).describe()
  }

  fn set_connect_timeout(&mut self, timeout: Duration) {
    (**self).set_connect_timeout(timeout)
  }
}

pub enum InputWrapper {
  #[cfg(feature = "gstreamer_input")]
  GStreamerRtspInput(GStreamerRtspInput),
  #[cfg(feature = "read_image_file")]
  ImageFolderInput(ImageFolderInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "gstreamer_input")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == GStreamerRtspInput::SCHEME {
        let input = GStreamerRtspInput::from_url(url)?;
        return Ok(InputWrapper::GStreamerRtspInput(input));
      }
    }
    #[cfg(feature = "read_image_file")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == ImageFolderInput::SCHEME {
        let input = ImageFolderInput::from_url(url)?;
        return Ok(InputWrapper::ImageFolderInput(input));
      }
    }
    Err(InputError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl VideoSource for InputWrapper {
  fn open(&mut self) -> Result<(), InputError> {
    match self {
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerRtspInput(input) => input.open(),
      #[cfg(feature = "read_image_file")]
      InputWrapper::ImageFolderInput(input) => input.open(),
    }
  }

  fn read(&mut self) -> Result<Frame, ReadError> {
    match self {
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerRtspInput(input) => input.read(),
      #[cfg(feature = "read_image_file")]
      InputWrapper::ImageFolderInput(input) => input.read(),
    }
  }

  fn release(&mut self) {
    match self {
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerRtspInput(input) => input.release(),
      #[cfg(feature = "read_image_file")]
      InputWrapper::ImageFolderInput(input) => input.release(),
    }
  }

  fn describe(&self) -> String {
    match self {
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerRtspInput(input) => input.describe(),
      #[cfg(feature = "read_image_file")]
      InputWrapper::ImageFolderInput(input) => input.describe(),
    }
  }

  fn set_connect_timeout(&mut self, timeout: Duration) {
    match self {
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerRtspInput(input) => input.set_connect_timeout(timeout),
      #[cfg(feature = "read_image_file")]
      InputWrapper::ImageFolderInput(input) => input.set_connect_timeout(timeout),
    }
  }
}
