// 该文件是 Chejian （车检） 项目的一部分。
// src/model.rs - 远程检测模型
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use thiserror::Error;

/// 远程检测能力：给定图像与置信度阈值（0-100），返回原始 JSON 结果
pub trait Detector: Send + Sync {
  fn name(&self) -> &str;

  fn predict(
    &self,
    image: Arc<[u8]>,
    confidence: u8,
  ) -> BoxFuture<'static, Result<serde_json::Value, ModelError>>;
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("模型地址错误: {0}")]
  EndpointError(String),
  #[error("缺少 API 密钥，请设置环境变量 {0}")]
  MissingApiKey(String),
  #[error("未注册的模型: {0}")]
  UnknownModel(String),
  #[error("远程请求失败: {0}")]
  Transport(String),
  #[error("远程服务返回状态 {status}: {body}")]
  Status { status: u16, body: String },
  #[error("响应解析失败: {0}")]
  InvalidResponse(String),
  #[error("模型初始化失败: {0}")]
  InitFailed(String),
}

/// 已初始化的模型句柄集合
#[derive(Clone, Default)]
pub struct ModelSet {
  detectors: HashMap<String, Arc<dyn Detector>>,
}

impl ModelSet {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_detector(mut self, detector: Arc<dyn Detector>) -> Self {
    self.insert(detector);
    self
  }

  pub fn insert(&mut self, detector: Arc<dyn Detector>) {
    self
      .detectors
      .insert(detector.name().to_string(), detector);
  }

  pub fn get(&self, name: &str) -> Result<Arc<dyn Detector>, ModelError> {
    self
      .detectors
      .get(name)
      .cloned()
      .ok_or_else(|| ModelError::UnknownModel(name.to_string()))
  }

  pub fn len(&self) -> usize {
    self.detectors.len()
  }

  pub fn is_empty(&self) -> bool {
    self.detectors.is_empty()
  }
}

mod registry;
pub use self::registry::ModelRegistry;

#[cfg(feature = "roboflow")]
mod roboflow;
#[cfg(feature = "roboflow")]
pub use self::roboflow::{RoboflowDetector, RoboflowEndpoint};
