// 该文件是 FallSense （跌倒感知） 项目的一部分。
// src/main.rs - 项目主程序
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

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use fallsense::{
  FromUrl,
  alert::{AlertCoordinator, Notifier},
  args::Args,
  classifier::{AspectRatioRule, DisplacementRule, RapidChangeRule, TemporalClassifier},
  config::{DetectorConfig, Mode, MotionRuleKind},
  feature::{ContourFeatures, LandmarkFeatures},
  input::{InputWrapper, VideoSource},
  model::{LandmarkFileModel, MotionModel},
  output::draw::OverlayFont,
  pipeline::{DetectionPipeline, FallPipeline},
  smoother::SignalSmoother,
  task::{Cancellation, FrameDriver, SessionEnd},
};

fn build_pipeline(config: &DetectorConfig) -> Result<Box<dyn FallPipeline>> {
  let motion = &config.motion;
  let classifier = config.classifier;

  let Some(kind) = config.mode.landmark_kind() else {
    let model = MotionModel::new(motion.history, motion.var_threshold);
    let features = ContourFeatures::new(motion.min_area);
    let pipeline: Box<dyn FallPipeline> = match motion.rule {
      MotionRuleKind::Aspect => Box::new(DetectionPipeline::new(
        model,
        features,
        TemporalClassifier::new(
          AspectRatioRule {
            threshold: motion.aspect_ratio,
          },
          classifier,
        ),
      )),
      MotionRuleKind::Change => Box::new(DetectionPipeline::new(
        model,
        features,
        TemporalClassifier::new(
          RapidChangeRule {
            aspect_change: motion.aspect_change,
            area_change: motion.area_change,
          },
          classifier,
        ),
      )),
    };
    return Ok(pipeline);
  };

  let landmarks = &config.landmarks;
  let file = landmarks
    .file
    .as_ref()
    .context("关键点模式缺少 --landmarks 文件")?;
  info!("加载关键点文件: {}", file.display());
  let model = LandmarkFileModel::open(file, kind)
    .with_context(|| format!("无法加载关键点文件 {}", file.display()))?;

  let rule = DisplacementRule {
    fall_threshold: landmarks.fall_threshold,
    min_interval: landmarks.min_interval,
    // 只有姿态模式能判断躯干是否水平
    horizontal_threshold: (config.mode == Mode::Pose).then_some(landmarks.horizontal_threshold),
  };

  Ok(Box::new(DetectionPipeline::new(
    model,
    LandmarkFeatures::new(SignalSmoother::default(), landmarks.min_visibility),
    TemporalClassifier::new(rule, classifier),
  )))
}

#[cfg(feature = "webhook")]
fn build_notifier(config: &DetectorConfig) -> Result<Option<Arc<dyn Notifier>>> {
  let Some(webhook) = &config.webhook else {
    return Ok(None);
  };
  info!("告警推送地址: {}", webhook.url);
  if webhook.insecure {
    warn!("已关闭推送地址的 TLS 证书校验");
  }
  let notifier = fallsense::alert::WebhookNotifier::new(
    webhook.url.clone(),
    webhook.insecure,
    webhook.attachment_quality,
  )?;
  Ok(Some(Arc::new(notifier)))
}

#[cfg(not(feature = "webhook"))]
fn build_notifier(config: &DetectorConfig) -> Result<Option<Arc<dyn Notifier>>> {
  if config.webhook.is_some() {
    warn!("未启用 webhook 功能，忽略 --webhook");
  }
  Ok(None)
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  let config = DetectorConfig::try_from(&args).context("参数配置无效")?;

  info!("FallSense 跌倒检测");
  info!("检测方式: {:?}", config.mode);
  info!("灵敏度: {:?}", args.sensitivity);
  info!(
    "最小面积: {}, 宽高比阈值: {}",
    config.motion.min_area, config.motion.aspect_ratio
  );
  info!("输出目录: {}", config.alert.output_dir.display());

  let mut source = InputWrapper::from_url(&config.camera)?;
  source.set_connect_timeout(config.connect_timeout);

  let pipeline = build_pipeline(&config)?;
  let alerts = AlertCoordinator::new(config.alert.clone(), build_notifier(&config)?);
  let driver = FrameDriver::new(source, pipeline, alerts, config.driver);

  #[cfg(feature = "gstreamer_output")]
  let driver = if config.display {
    driver.with_sink(Box::new(fallsense::output::GStreamerDisplay::new()))
  } else {
    driver
  };
  #[cfg(not(feature = "gstreamer_output"))]
  if config.display {
    warn!("未启用 gstreamer_output 功能，不显示画面");
  }

  let font = match &config.font {
    Some(path) => Some(OverlayFont::load(path)?),
    None => OverlayFont::discover(),
  };
  let driver = match font {
    Some(font) => driver.with_font(font),
    None => {
      warn!("未找到可用字体，叠加画面不显示文字 (可用 --font 指定)");
      driver
    }
  };

  let cancellation = Cancellation::install()?;
  let summary = driver.run(&cancellation)?;

  info!("检测结束: {:?}", summary.end);
  info!(
    "总帧数: {}, 检测帧数: {}, 跌倒: {}, 告警: {}, 重连: {}",
    summary.frames, summary.processed, summary.falls, summary.alerts, summary.reconnects
  );

  if summary.end == SessionEnd::ReconnectFailed {
    anyhow::bail!("视频源断开且无法重连");
  }
  Ok(())
}
