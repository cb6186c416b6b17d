// 该文件是 FallSense （跌倒感知） 项目的一部分。
// src/pipeline.rs - 单帧检测流水线
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

//! 运动、姿态、手部、人脸四种检测方式共用同一条流水线：
//! 推理模型 → 特征提取 → 时序判定，三者都是可替换的策略。

use std::fmt::Display;

use tracing::warn;

use crate::{
  classifier::{Decision, FallRule, Observation, TemporalClassifier},
  feature::{FeatureExtractor, FeatureSample},
  frame::Frame,
  model::{Detection, Model},
};

/// 单帧处理结果
#[derive(Debug, Clone)]
pub struct FrameReport {
  pub detection: Option<Detection>,
  pub sample: Option<FeatureSample>,
  pub decision: Decision,
}

/// 帧处理驱动所需的能力
pub trait FallPipeline {
  fn process(&mut self, frame: &Frame) -> FrameReport;
}

impl<P: FallPipeline + ?Sized> FallPipeline for Box<P> {
  fn process(&mut self, frame: &Frame) -> FrameReport {
    (**self).process(frame)
  }
}

pub struct DetectionPipeline<M, E, R> {
  model: M,
  extractor: E,
  classifier: TemporalClassifier<R>,
}

impl<M, E, R> DetectionPipeline<M, E, R> {
  pub fn new(model: M, extractor: E, classifier: TemporalClassifier<R>) -> Self {
    Self {
      model,
      extractor,
      classifier,
    }
  }

  pub fn classifier(&self) -> &TemporalClassifier<R> {
    &self.classifier
  }
}

impl<M, E, R> FallPipeline for DetectionPipeline<M, E, R>
where
  M: Model<Input = Frame, Output = Detection>,
  M::Error: Display,
  E: FeatureExtractor,
  R: FallRule,
{
  fn process(&mut self, frame: &Frame) -> FrameReport {
    // 推理失败按“无目标”处理
    let detection = self.model.infer(frame).unwrap_or_else(|e| {
      warn!("第 {} 帧推理失败: {}", frame.index, e);
      None
    });

    let sample = detection.as_ref().and_then(|d| {
      self
        .extractor
        .extract(d, (frame.width(), frame.height()), frame.timestamp)
    });

    let decision = self
      .classifier
      .observe(sample.map_or(Observation::Lost, Observation::Sample));
    if decision.reset {
      self.extractor.reset();
    }

    FrameReport {
      detection,
      sample,
      decision,
    }
  }
}
