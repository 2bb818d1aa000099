// 该文件是 Chejian （车检） 项目的一部分。
// src/fusion.rs - 多模型并发调用与结果融合
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

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::detection::{Detection, ImageMeta, ModelOutput, SourceTag};
use crate::model::ModelSet;

/// 类别名重命名表（内部代码 -> 显示名称）
pub type RenameTable = HashMap<String, String>;

/// 每个来源的类别过滤规则
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassFilter {
  /// 不过滤
  All,
  /// 仅保留名单中的类别
  Allow(BTreeSet<String>),
  /// 丢弃名单中的类别
  Deny(BTreeSet<String>),
}

impl ClassFilter {
  pub fn allow<I: IntoIterator<Item = S>, S: Into<String>>(classes: I) -> Self {
    ClassFilter::Allow(classes.into_iter().map(Into::into).collect())
  }

  pub fn deny<I: IntoIterator<Item = S>, S: Into<String>>(classes: I) -> Self {
    ClassFilter::Deny(classes.into_iter().map(Into::into).collect())
  }

  pub fn permits(&self, class_name: &str) -> bool {
    match self {
      ClassFilter::All => true,
      ClassFilter::Allow(classes) => classes.contains(class_name),
      ClassFilter::Deny(classes) => !classes.contains(class_name),
    }
  }
}

/// 一个参与融合的模型来源
#[derive(Debug, Clone)]
pub struct SourceSpec {
  pub name: String,
  pub confidence: u8,
  pub filter: ClassFilter,
  pub rename: Arc<RenameTable>,
  pub tag: SourceTag,
}

impl SourceSpec {
  /// 过滤后重命名；顺序保持不变
  pub fn apply(&self, predictions: Vec<Detection>) -> Vec<Detection> {
    predictions
      .into_iter()
      .filter(|p| self.filter.permits(&p.class_name))
      .map(|mut p| {
        if let Some(canonical) = self.rename.get(&p.class_name) {
          p.class_name = canonical.clone();
        }
        p
      })
      .collect()
  }
}

/// 单个来源的调用结果；失败时已替换为占位结果
#[derive(Debug, Clone)]
pub struct SourceResult {
  pub output: ModelOutput,
  pub failed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceStats {
  pub name: String,
  pub source: SourceTag,
  pub predictions_count: usize,
  pub filtered_count: usize,
  pub failed: bool,
}

#[derive(Debug, Clone)]
pub struct FusedResult {
  pub predictions: Vec<Detection>,
  pub image: ImageMeta,
  /// 去重并按字典序排序的类别
  pub classes: Vec<String>,
  pub stats: Vec<SourceStats>,
}

impl FusedResult {
  pub fn is_empty(&self) -> bool {
    self.predictions.is_empty()
  }
}

pub struct PredictionFuser {
  sources: Vec<SourceSpec>,
  image_priority: Vec<String>,
}

impl PredictionFuser {
  pub fn new(sources: Vec<SourceSpec>, image_priority: Vec<String>) -> Self {
    Self {
      sources,
      image_priority,
    }
  }

  /// 并发调用全部来源并等待全部结束；单个失败替换为占位结果
  pub async fn dispatch(&self, models: &ModelSet, image: Arc<[u8]>) -> Vec<SourceResult> {
    info!("同时向 {} 个模型发起请求", self.sources.len());
    let now = Instant::now();

    let tasks = self.sources.iter().map(|spec| {
      let name = spec.name.clone();
      let tag = spec.tag;
      let call = models
        .get(&spec.name)
        .map(|detector| detector.predict(image.clone(), spec.confidence));

      tokio::spawn(async move {
        let started = Instant::now();
        let value = match call {
          Ok(call) => call.await,
          Err(e) => Err(e),
        };
        match value {
          Ok(value) => {
            let output = ModelOutput::from_json(&name, tag, &value);
            info!(
              "模型 '{}' 返回 {} 个预测, 耗时: {:.2?}",
              name,
              output.predictions.len(),
              started.elapsed()
            );
            SourceResult {
              output,
              failed: false,
            }
          }
          Err(e) => {
            warn!("模型 '{}' 调用失败，使用空结果: {}", name, e);
            SourceResult {
              output: ModelOutput::placeholder(),
              failed: true,
            }
          }
        }
      })
    });

    let results = join_all(tasks)
      .await
      .into_iter()
      .zip(&self.sources)
      .map(|(joined, spec)| {
        joined.unwrap_or_else(|e| {
          warn!("模型 '{}' 任务异常退出，使用空结果: {}", spec.name, e);
          SourceResult {
            output: ModelOutput::placeholder(),
            failed: true,
          }
        })
      })
      .collect::<Vec<_>>();

    info!("全部模型响应完成，耗时: {:.2?}", now.elapsed());
    results
  }

  /// 过滤、重命名并按来源顺序拼接
  pub fn fuse(&self, results: Vec<SourceResult>) -> FusedResult {
    let mut predictions = Vec::new();
    let mut stats = Vec::with_capacity(self.sources.len());
    let mut metas = HashMap::with_capacity(self.sources.len());

    for (spec, result) in self.sources.iter().zip(results) {
      let predictions_count = result.output.predictions.len();
      let kept = spec.apply(result.output.predictions);
      debug!(
        "模型 '{}': 原始 {} 个, 过滤后 {} 个",
        spec.name,
        predictions_count,
        kept.len()
      );

      stats.push(SourceStats {
        name: spec.name.clone(),
        source: spec.tag,
        predictions_count,
        filtered_count: kept.len(),
        failed: result.failed,
      });
      metas.insert(spec.name.as_str(), result.output.image);
      predictions.extend(kept);
    }

    let image = self
      .image_priority
      .iter()
      .filter_map(|name| metas.get(name.as_str()))
      .find(|meta| meta.is_valid())
      .copied()
      .unwrap_or(ImageMeta::PLACEHOLDER);

    let classes = predictions
      .iter()
      .map(|p| p.class_name.clone())
      .collect::<BTreeSet<_>>()
      .into_iter()
      .collect::<Vec<_>>();

    info!(
      "融合完成: {} 个预测, {} 个类别, 图像尺寸 {}x{}",
      predictions.len(),
      classes.len(),
      image.width,
      image.height
    );
    if predictions.is_empty() {
      warn!("没有预测通过过滤，返回空检测结果");
    }

    FusedResult {
      predictions,
      image,
      classes,
      stats,
    }
  }

  pub async fn run(&self, models: &ModelSet, image: Arc<[u8]>) -> FusedResult {
    let results = self.dispatch(models, image).await;
    self.fuse(results)
  }
}
