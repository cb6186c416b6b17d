// 该文件是 FallSense （跌倒感知） 项目的一部分。
// src/alert/webhook.rs - HTTP 告警推送
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

//! # Webhook 告警
//!
//! 默认以 JSON 推送：
//!
//! ```json
//! {"device_id": "SENSOR_001", "event_type": "fall_detected",
//!  "timestamp": "2026-01-01T12:00:00+08:00", "camera_address": "192.168.1.40:10554"}
//! ```
//!
//! 开启图片附件时改为 multipart 表单，包含上述字段、`message` 文本和 `image` JPEG。
//! 任何非 2xx 响应都视为失败。

use std::time::Duration;

use reqwest::blocking::{Client, multipart};
use serde::Serialize;
use tracing::info;
use url::Url;

use crate::{
  alert::{AlertEvent, EVENT_TYPE, Notifier, NotifyError},
  output::encode_jpeg,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct WebhookBody<'a> {
  device_id: &'a str,
  event_type: &'a str,
  timestamp: String,
  camera_address: &'a str,
}

impl<'a> From<&'a AlertEvent> for WebhookBody<'a> {
  fn from(event: &'a AlertEvent) -> Self {
    WebhookBody {
      device_id: &event.device_id,
      event_type: EVENT_TYPE,
      timestamp: event.wall_time.to_rfc3339(),
      camera_address: &event.camera_address,
    }
  }
}

pub struct WebhookNotifier {
  client: Client,
  url: Url,
  /// 附件 JPEG 质量，`None` 表示只发送 JSON
  attachment_quality: Option<u8>,
}

impl WebhookNotifier {
  /// `insecure` 为真时不校验 TLS 证书
  pub fn new(url: Url, insecure: bool, attachment_quality: Option<u8>) -> Result<Self, NotifyError> {
    let client = Client::builder()
      .danger_accept_invalid_certs(insecure)
      .timeout(REQUEST_TIMEOUT)
      .build()?;
    Ok(Self {
      client,
      url,
      attachment_quality,
    })
  }

  fn form(event: &AlertEvent, quality: u8) -> Result<multipart::Form, NotifyError> {
    let body = WebhookBody::from(event);
    let jpeg = encode_jpeg(&event.image, quality)?;
    let image = multipart::Part::bytes(jpeg)
      .file_name(format!("fall_{}.jpg", event.wall_time.format("%Y%m%d_%H%M%S")))
      .mime_str("image/jpeg")?;

    Ok(
      multipart::Form::new()
        .text("device_id", body.device_id.to_string())
        .text("event_type", body.event_type.to_string())
        .text("timestamp", body.timestamp)
        .text("camera_address", body.camera_address.to_string())
        .text("message", event.message())
        .part("image", image),
    )
  }
}

impl Notifier for WebhookNotifier {
  fn notify(&self, event: &AlertEvent) -> Result<(), NotifyError> {
    let request = self.client.post(self.url.clone());
    let request = match self.attachment_quality {
      Some(quality) => request.multipart(Self::form(event, quality)?),
      None => request.json(&WebhookBody::from(event)),
    };

    let response = request.send()?;
    let status = response.status();
    if !status.is_success() {
      return Err(NotifyError::Status(status.as_u16()));
    }

    info!("告警推送成功: {} ({})", self.url, status);
    Ok(())
  }
}
