// 该文件是 FallSense （跌倒感知） 项目的一部分。
// src/input/rtsp.rs - RTSP 摄像头地址与候选路径
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

use url::Url;

use crate::{FromUrl, input::InputError};

pub const DEFAULT_PORT: u16 = 554;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// 主路径连接失败后依次尝试的常见厂商路径
pub const ALTERNATIVE_PATHS: [&str; 7] = [
  "/live/ch00_0",
  "/cam/realmonitor?channel=1&subtype=0",
  "/h264Preview_01_main",
  "/livestream/0",
  "/videoMain",
  "/live/ch01_0",
  "/video1",
];

/// IP 摄像头连接参数
#[derive(Debug, Clone, PartialEq)]
pub struct CameraAddress {
  pub host: String,
  pub port: u16,
  pub user: Option<String>,
  pub password: Option<String>,
  /// 路径，可带查询串，例如 `/tcp/av0_0`
  pub path: String,
  pub timeout: Duration,
}

impl CameraAddress {
  fn with_path(&self, path: &str, redact: bool) -> String {
    let credentials = match (&self.user, &self.password) {
      (Some(user), Some(password)) => {
        let password = if redact {
          "***".to_string()
        } else {
          urlencoding::encode(password).into_owned()
        };
        format!("{}:{}@", urlencoding::encode(user), password)
      }
      (Some(user), None) => format!("{}@", urlencoding::encode(user)),
      _ => String::new(),
    };
    let path = if path.starts_with('/') {
      path.to_string()
    } else {
      format!("/{}", path)
    };
    format!("rtsp://{}{}:{}{}", credentials, self.host, self.port, path)
  }

  /// 主路径的完整 URL
  pub fn url(&self) -> String {
    self.with_path(&self.path, false)
  }

  /// 用于日志的 URL，密码被隐藏
  pub fn redacted(&self) -> String {
    self.with_path(&self.path, true)
  }

  /// `host:port`，用于告警中的摄像头标识
  pub fn endpoint(&self) -> String {
    format!("{}:{}", self.host, self.port)
  }

  /// 按顺序返回所有候选 URL：主路径、厂商路径、强制 TCP 的主路径
  pub fn candidates(&self) -> Vec<String> {
    let mut urls = Vec::with_capacity(ALTERNATIVE_PATHS.len() + 2);
    urls.push(self.url());
    urls.extend(
      ALTERNATIVE_PATHS
        .iter()
        .filter(|p| **p != self.path)
        .map(|p| self.with_path(p, false)),
    );
    let separator = if self.path.contains('?') { '&' } else { '?' };
    urls.push(self.with_path(&format!("{}{}tcp", self.path, separator), false));
    urls
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }
}

impl FromUrl for CameraAddress {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != "rtsp" && url.scheme() != "rtsps" {
      return Err(InputError::SchemeMismatch(format!(
        "期望 'rtsp', 实际 '{}'",
        url.scheme()
      )));
    }

    let host = url
      .host_str()
      .filter(|h| !h.is_empty())
      .ok_or_else(|| InputError::InvalidAddress("缺少主机地址".to_string()))?
      .to_string();

    let decode = |s: &str| {
      urlencoding::decode(s)
        .map(|s| s.into_owned())
        .map_err(|e| InputError::InvalidAddress(format!("凭据编码错误: {}", e)))
    };
    let user = match url.username() {
      "" => None,
      u => Some(decode(u)?),
    };
    let password = url.password().map(decode).transpose()?;
    if user.is_none() && password.is_some() {
      return Err(InputError::InvalidAddress("只有密码没有用户名".to_string()));
    }

    let mut path = url.path().to_string();
    if let Some(query) = url.query() {
      path.push('?');
      path.push_str(query);
    }

    Ok(CameraAddress {
      host,
      port: url.port().unwrap_or(DEFAULT_PORT),
      user,
      password,
      path,
      timeout: DEFAULT_CONNECT_TIMEOUT,
    })
  }
}
