// 该文件是 FallSense （跌倒感知） 项目的一部分。
// src/classifier.rs - 时序跌倒判定状态机
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

//! 把逐帧特征序列转换为去抖后的跌倒事件。
//!
//! 状态转换：
//!
//! ```text
//! NoSubject --首个样本--> Tracking --候选--> FallCandidate --连续 N 帧--> FallConfirmed
//!     ^                      ^                                              |
//!     |                      +----------------------------------------------+
//!     +---- 连续丢失超过 stability_frames 帧（任意状态）
//! ```
//!
//! 确认策略为边沿触发：连续候选帧数恰好达到 `confirm_frames` 时确认一次，
//! 之后的连续候选帧不会重复确认，直到出现一帧非候选帧重新武装。

use std::collections::VecDeque;

use tracing::{debug, info};

use crate::feature::FeatureSample;

pub const DEFAULT_HISTORY_CAPACITY: usize = 10;
pub const DEFAULT_STABILITY_FRAMES: u32 = 10;
pub const DEFAULT_CONFIRM_FRAMES: u32 = 1;

/// 定长先进先出的特征历史
#[derive(Debug, Clone)]
pub struct History {
  samples: VecDeque<FeatureSample>,
  capacity: usize,
}

impl History {
  pub fn new(capacity: usize) -> Self {
    let capacity = capacity.max(1);
    Self {
      samples: VecDeque::with_capacity(capacity),
      capacity,
    }
  }

  pub fn push(&mut self, sample: FeatureSample) {
    while self.samples.len() >= self.capacity {
      self.samples.pop_front();
    }
    self.samples.push_back(sample);
  }

  pub fn len(&self) -> usize {
    self.samples.len()
  }

  pub fn is_empty(&self) -> bool {
    self.samples.is_empty()
  }

  /// 倒数第 `n` 个样本，`n = 0` 为最新样本
  pub fn back(&self, n: usize) -> Option<&FeatureSample> {
    self
      .samples
      .len()
      .checked_sub(n + 1)
      .and_then(|i| self.samples.get(i))
  }

  pub fn iter(&self) -> impl Iterator<Item = &FeatureSample> {
    self.samples.iter()
  }

  pub fn clear(&mut self) {
    self.samples.clear();
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingState {
  NoSubject,
  Tracking,
  FallCandidate,
  /// 瞬态：仅出现在决策结果中，内部状态随即回到 `Tracking`
  FallConfirmed,
}

/// 分类器的输入：一帧的特征，或本帧没有检测到目标
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Observation {
  Sample(FeatureSample),
  Lost,
}

/// 规则对当前样本的评估结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
  /// 门控未通过（例如距参考时间太短），参考状态保持不变
  Skip,
  /// 已评估；非候选或确认跌倒时参考状态更新为当前样本，
  /// 候选累计期间参考保持不变
  Evaluated { candidate: bool },
}

/// 跌倒候选判定规则
pub trait FallRule {
  fn evaluate(&self, sample: &FeatureSample, reference: &FeatureSample, history: &History)
  -> Verdict;
}

impl<R: FallRule + ?Sized> FallRule for Box<R> {
  fn evaluate(
    &self,
    sample: &FeatureSample,
    reference: &FeatureSample,
    history: &History,
  ) -> Verdict {
    (**self).evaluate(sample, reference, history)
  }
}

/// 外接框宽高比超过阈值即为候选（身体横躺）
#[derive(Debug, Clone, Copy)]
pub struct AspectRatioRule {
  pub threshold: f32,
}

impl FallRule for AspectRatioRule {
  fn evaluate(&self, sample: &FeatureSample, _: &FeatureSample, _: &History) -> Verdict {
    Verdict::Evaluated {
      candidate: sample.aspect_ratio > self.threshold,
    }
  }
}

/// 与两帧之前相比，宽高比与面积同时突变即为候选
#[derive(Debug, Clone, Copy)]
pub struct RapidChangeRule {
  pub aspect_change: f32,
  pub area_change: f32,
}

impl FallRule for RapidChangeRule {
  fn evaluate(&self, sample: &FeatureSample, _: &FeatureSample, history: &History) -> Verdict {
    let Some(previous) = history.back(2) else {
      return Verdict::Evaluated { candidate: false };
    };
    let candidate = (sample.aspect_ratio - previous.aspect_ratio).abs() > self.aspect_change
      && (sample.area - previous.area).abs() > self.area_change;
    Verdict::Evaluated { candidate }
  }
}

/// 肩部竖直位移规则
///
/// 距参考时间不少于 `min_interval` 秒时才评估；肩部下移超过 `fall_threshold`，
/// 且躯干接近水平（肩髋距离小于 `horizontal_threshold`）时为候选。
#[derive(Debug, Clone, Copy)]
pub struct DisplacementRule {
  pub fall_threshold: f32,
  pub min_interval: f64,
  pub horizontal_threshold: Option<f32>,
}

impl FallRule for DisplacementRule {
  fn evaluate(&self, sample: &FeatureSample, reference: &FeatureSample, _: &History) -> Verdict {
    if sample.timestamp - reference.timestamp < self.min_interval {
      return Verdict::Skip;
    }

    // y 轴向下，位移为正表示下落
    let displacement = sample.shoulder_y() - reference.shoulder_y();
    let horizontal = self
      .horizontal_threshold
      .is_none_or(|t| sample.shoulder_hip_ratio < t);

    Verdict::Evaluated {
      candidate: displacement > self.fall_threshold && horizontal,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifierConfig {
  pub history_capacity: usize,
  /// 连续丢失超过该帧数时重置跟踪
  pub stability_frames: u32,
  /// 确认跌倒所需的连续候选帧数
  pub confirm_frames: u32,
}

impl Default for ClassifierConfig {
  fn default() -> Self {
    Self {
      history_capacity: DEFAULT_HISTORY_CAPACITY,
      stability_frames: DEFAULT_STABILITY_FRAMES,
      confirm_frames: DEFAULT_CONFIRM_FRAMES,
    }
  }
}

/// 每个检测会话一份的可变状态
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassifierState {
  pub consecutive_fall_frames: u32,
  pub stable_frame_count: u32,
  pub last_reference: Option<FeatureSample>,
  pub last_reference_time: Option<f64>,
}

/// 单次观测的判定结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
  pub state: TrackingState,
  pub fall: bool,
  /// 本次观测导致跟踪被重置
  pub reset: bool,
}

pub struct TemporalClassifier<R> {
  rule: R,
  config: ClassifierConfig,
  state: TrackingState,
  history: History,
  inner: ClassifierState,
}

impl<R: FallRule> TemporalClassifier<R> {
  pub fn new(rule: R, config: ClassifierConfig) -> Self {
    Self {
      rule,
      history: History::new(config.history_capacity),
      config: ClassifierConfig {
        confirm_frames: config.confirm_frames.max(1),
        ..config
      },
      state: TrackingState::NoSubject,
      inner: ClassifierState::default(),
    }
  }

  pub fn state(&self) -> TrackingState {
    self.state
  }

  pub fn history(&self) -> &History {
    &self.history
  }

  pub fn classifier_state(&self) -> &ClassifierState {
    &self.inner
  }

  fn reset(&mut self) {
    self.state = TrackingState::NoSubject;
    self.history.clear();
    self.inner = ClassifierState::default();
  }

  fn decision(&self, state: TrackingState, fall: bool, reset: bool) -> Decision {
    Decision { state, fall, reset }
  }

  pub fn observe(&mut self, observation: Observation) -> Decision {
    match observation {
      Observation::Lost => self.observe_lost(),
      Observation::Sample(sample) => self.observe_sample(sample),
    }
  }

  fn observe_lost(&mut self) -> Decision {
    self.inner.stable_frame_count = self.inner.stable_frame_count.saturating_add(1);
    if self.state != TrackingState::NoSubject
      && self.inner.stable_frame_count > self.config.stability_frames
    {
      info!(
        "连续 {} 帧未检测到目标，重置跟踪",
        self.inner.stable_frame_count
      );
      self.reset();
      return self.decision(TrackingState::NoSubject, false, true);
    }
    self.decision(self.state, false, false)
  }

  fn observe_sample(&mut self, sample: FeatureSample) -> Decision {
    self.inner.stable_frame_count = 0;
    self.history.push(sample);

    let Some(reference) = self.inner.last_reference else {
      debug!("开始跟踪目标");
      self.update_reference(sample);
      self.state = TrackingState::Tracking;
      return self.decision(self.state, false, false);
    };

    let candidate = match self.rule.evaluate(&sample, &reference, &self.history) {
      Verdict::Skip => return self.decision(self.state, false, false),
      Verdict::Evaluated { candidate } => candidate,
    };

    if !candidate {
      self.inner.consecutive_fall_frames = 0;
      self.update_reference(sample);
      self.state = TrackingState::Tracking;
      return self.decision(self.state, false, false);
    }

    self.inner.consecutive_fall_frames = self.inner.consecutive_fall_frames.saturating_add(1);
    let count = self.inner.consecutive_fall_frames;
    if count < self.config.confirm_frames {
      // 候选期间保持跌倒前的参考，后续候选帧仍与其比较
      debug!("跌倒候选 {}/{}", count, self.config.confirm_frames);
      self.state = TrackingState::FallCandidate;
      return self.decision(self.state, false, false);
    }

    self.update_reference(sample);
    self.state = TrackingState::Tracking;
    if count == self.config.confirm_frames {
      info!("确认跌倒 (连续 {} 帧候选)", count);
      self.decision(TrackingState::FallConfirmed, true, false)
    } else {
      // 已确认过，等待非候选帧重新武装
      self.decision(self.state, false, false)
    }
  }

  fn update_reference(&mut self, sample: FeatureSample) {
    self.inner.last_reference = Some(sample);
    self.inner.last_reference_time = Some(sample.timestamp);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn motion(aspect_ratio: f32, t: f64) -> Observation {
    Observation::Sample(FeatureSample {
      aspect_ratio,
      area: 20000.0,
      vertical_position: 0.5,
      shoulder_hip_ratio: 0.5,
      timestamp: t,
    })
  }

  fn pose(shoulder_y: f32, ratio: f32, t: f64) -> Observation {
    Observation::Sample(FeatureSample {
      aspect_ratio: 1.0,
      area: 0.1,
      vertical_position: 1.0 - shoulder_y,
      shoulder_hip_ratio: ratio,
      timestamp: t,
    })
  }

  fn aspect_classifier(confirm_frames: u32) -> TemporalClassifier<AspectRatioRule> {
    TemporalClassifier::new(
      AspectRatioRule { threshold: 1.5 },
      ClassifierConfig {
        confirm_frames,
        ..Default::default()
      },
    )
  }

  fn displacement_rule() -> DisplacementRule {
    DisplacementRule {
      fall_threshold: 0.3,
      min_interval: 0.5,
      horizontal_threshold: Some(0.15),
    }
  }

  #[test]
  fn history_never_exceeds_capacity() {
    let mut history = History::new(10);
    for i in 0..25 {
      history.push(FeatureSample {
        aspect_ratio: i as f32,
        area: 0.0,
        vertical_position: 0.0,
        shoulder_hip_ratio: 0.0,
        timestamp: i as f64,
      });
      assert!(history.len() <= 10);
    }
    assert_eq!(history.len(), 10);
    assert_eq!(history.iter().next().unwrap().aspect_ratio, 15.0);
    assert_eq!(history.back(0).unwrap().aspect_ratio, 24.0);
    assert_eq!(history.back(2).unwrap().aspect_ratio, 22.0);
    assert!(history.back(10).is_none());
  }

  #[test]
  fn classifier_history_is_bounded() {
    let mut classifier = aspect_classifier(1);
    for i in 0..30 {
      classifier.observe(motion(1.0, i as f64));
    }
    assert_eq!(classifier.history().len(), DEFAULT_HISTORY_CAPACITY);
  }

  #[test]
  fn motion_sequence_confirms_once_on_first_exceeding_sample() {
    let mut classifier = aspect_classifier(1);
    let falls: Vec<bool> = [0.8, 0.9, 1.9, 2.1]
      .iter()
      .enumerate()
      .map(|(i, ar)| classifier.observe(motion(*ar, i as f64)).fall)
      .collect();
    assert_eq!(falls, vec![false, false, true, false]);
  }

  #[test]
  fn first_sample_is_never_evaluated() {
    let mut classifier = aspect_classifier(1);
    let decision = classifier.observe(motion(5.0, 0.0));
    assert!(!decision.fall);
    assert_eq!(decision.state, TrackingState::Tracking);
  }

  #[test]
  fn three_frame_debounce_needs_consecutive_candidates() {
    let mut classifier = aspect_classifier(3);
    let sequence = [1.0, 2.0, 2.0, 1.0, 2.0, 2.0, 2.0, 2.0];
    let decisions: Vec<Decision> = sequence
      .iter()
      .enumerate()
      .map(|(i, ar)| classifier.observe(motion(*ar, i as f64)))
      .collect();
    assert_eq!(decisions[2].state, TrackingState::FallCandidate);
    assert!(!decisions[3].fall);
    assert_eq!(
      decisions.iter().filter(|d| d.fall).count(),
      1,
      "only the third consecutive candidate confirms"
    );
    assert!(decisions[6].fall);
    assert_eq!(decisions[6].state, TrackingState::FallConfirmed);
    assert_eq!(classifier.state(), TrackingState::Tracking);
  }

  #[test]
  fn rearms_after_non_candidate_frame() {
    let mut classifier = aspect_classifier(1);
    let falls = [1.0, 2.0, 2.0, 1.0, 2.0]
      .iter()
      .enumerate()
      .filter(|(i, ar)| classifier.observe(motion(**ar, *i as f64)).fall)
      .count();
    assert_eq!(falls, 2);
  }

  #[test]
  fn lost_tracking_resets_state() {
    let mut classifier = aspect_classifier(1);
    classifier.observe(motion(1.0, 0.0));
    classifier.observe(motion(1.0, 1.0));
    for i in 0..DEFAULT_STABILITY_FRAMES {
      let d = classifier.observe(Observation::Lost);
      assert!(!d.reset, "frame {} should not reset yet", i);
    }
    assert!(classifier.classifier_state().last_reference.is_some());

    let d = classifier.observe(Observation::Lost);
    assert!(d.reset);
    assert_eq!(d.state, TrackingState::NoSubject);
    assert!(classifier.classifier_state().last_reference.is_none());
    assert!(classifier.history().is_empty());

    // 重置后的第一个样本只建立参考，不会立即判定跌倒
    let d = classifier.observe(motion(9.0, 20.0));
    assert!(!d.fall);
    assert_eq!(d.state, TrackingState::Tracking);
  }

  #[test]
  fn lost_frames_within_bounds_keep_history() {
    let mut classifier = aspect_classifier(1);
    for i in 0..4 {
      classifier.observe(motion(1.0, i as f64));
    }
    for _ in 0..5 {
      classifier.observe(Observation::Lost);
    }
    assert_eq!(classifier.history().len(), 4);
    assert!(classifier.observe(motion(2.0, 10.0)).fall);
  }

  #[test]
  fn pose_fall_waits_for_elapsed_interval() {
    let mut classifier = TemporalClassifier::new(displacement_rule(), ClassifierConfig::default());
    assert!(!classifier.observe(pose(0.3, 0.3, 0.0)).fall);
    assert!(!classifier.observe(pose(0.3, 0.3, 0.3)).fall);
    assert!(!classifier.observe(pose(0.3, 0.3, 0.6)).fall);
    assert_eq!(
      classifier.classifier_state().last_reference_time,
      Some(0.6)
    );
    // 跳变后 0.3 秒，未满足 0.5 秒间隔
    assert!(!classifier.observe(pose(0.7, 0.10, 0.9)).fall);
    let decision = classifier.observe(pose(0.7, 0.10, 1.2));
    assert!(decision.fall);
    assert_eq!(decision.state, TrackingState::FallConfirmed);
  }

  #[test]
  fn pose_debounce_compares_candidates_with_standing_reference() {
    let mut classifier = TemporalClassifier::new(
      displacement_rule(),
      ClassifierConfig {
        confirm_frames: 3,
        ..Default::default()
      },
    );

    // 10 fps：0 到 0.6 秒站立，之后躺倒 5 秒
    let decisions: Vec<Decision> = (0..=57)
      .map(|i| {
        let t = i as f64 / 10.0;
        if t <= 0.6 {
          classifier.observe(pose(0.3, 0.3, t))
        } else {
          classifier.observe(pose(0.7, 0.10, t))
        }
      })
      .collect();

    assert_eq!(decisions.iter().filter(|d| d.fall).count(), 1);
    let candidates = decisions
      .iter()
      .filter(|d| d.state == TrackingState::FallCandidate)
      .count();
    assert_eq!(candidates, 2);
    let confirmed = decisions.iter().position(|d| d.fall).unwrap();
    assert_eq!(decisions[confirmed].state, TrackingState::FallConfirmed);
    assert!(
      decisions[confirmed - 2..confirmed]
        .iter()
        .all(|d| d.state == TrackingState::FallCandidate)
    );
  }

  #[test]
  fn pose_streak_broken_by_recovery_does_not_confirm() {
    let mut classifier = TemporalClassifier::new(
      displacement_rule(),
      ClassifierConfig {
        confirm_frames: 3,
        ..Default::default()
      },
    );
    classifier.observe(pose(0.3, 0.3, 0.0));
    assert_eq!(
      classifier.observe(pose(0.7, 0.1, 0.6)).state,
      TrackingState::FallCandidate
    );
    assert_eq!(classifier.classifier_state().last_reference_time, Some(0.0));
    // 重新站起，候选中断，参考更新为站立姿态
    let d = classifier.observe(pose(0.3, 0.3, 0.7));
    assert_eq!(d.state, TrackingState::Tracking);
    assert_eq!(classifier.classifier_state().consecutive_fall_frames, 0);
    assert_eq!(classifier.classifier_state().last_reference_time, Some(0.7));
  }

  #[test]
  fn skipped_samples_keep_reference_until_interval_elapses() {
    let mut classifier = TemporalClassifier::new(displacement_rule(), ClassifierConfig::default());
    classifier.observe(pose(0.3, 0.3, 0.0));

    // 间隔不足的样本都被跳过，其中包括已经躺下的样本
    for (y, ratio, t) in [(0.35, 0.3, 0.1), (0.5, 0.2, 0.2), (0.7, 0.1, 0.3), (0.7, 0.1, 0.4)] {
      let d = classifier.observe(pose(y, ratio, t));
      assert!(!d.fall);
      assert_eq!(d.state, TrackingState::Tracking);
      assert_eq!(classifier.classifier_state().last_reference_time, Some(0.0));
    }

    let d = classifier.observe(pose(0.7, 0.1, 0.5));
    assert!(d.fall);
    assert_eq!(classifier.classifier_state().last_reference_time, Some(0.5));
  }

  #[test]
  fn upright_torso_is_not_a_fall() {
    let mut classifier = TemporalClassifier::new(displacement_rule(), ClassifierConfig::default());
    classifier.observe(pose(0.3, 0.3, 0.0));
    // 下移足够但躯干仍竖直（例如蹲下）
    assert!(!classifier.observe(pose(0.7, 0.3, 0.6)).fall);
  }

  #[test]
  fn upward_motion_is_not_a_fall() {
    let mut classifier = TemporalClassifier::new(displacement_rule(), ClassifierConfig::default());
    classifier.observe(pose(0.8, 0.1, 0.0));
    assert!(!classifier.observe(pose(0.3, 0.1, 0.6)).fall);
  }

  #[test]
  fn rapid_change_rule_uses_history() {
    let rule = RapidChangeRule {
      aspect_change: 0.5,
      area_change: 800.0,
    };
    let mut classifier = TemporalClassifier::new(rule, ClassifierConfig::default());
    let sample = |ar: f32, area: f32, t: f64| {
      Observation::Sample(FeatureSample {
        aspect_ratio: ar,
        area,
        vertical_position: 0.5,
        shoulder_hip_ratio: 0.5,
        timestamp: t,
      })
    };
    assert!(!classifier.observe(sample(0.5, 5000.0, 0.0)).fall);
    assert!(!classifier.observe(sample(0.6, 5100.0, 0.1)).fall);
    assert!(classifier.observe(sample(1.6, 7000.0, 0.2)).fall);
  }
}
