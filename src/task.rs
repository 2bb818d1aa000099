// 该文件是 Chejian （车检） 项目的一部分。
// src/task.rs - 单张图像的分析流程
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
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::color::to_hex;
use crate::config::{ConfigError, Mode, PipelineConfig};
use crate::detection::{ImageMeta, Point, SourceTag};
use crate::fusion::SourceStats;
use crate::input::ImageFileInput;
use crate::model::{ModelError, ModelRegistry};
use crate::output::draw::Draw;
use crate::output::label::Placement;
use crate::output::mask::{MaskBatch, build_region_masks};
use crate::output::report::Report;
use crate::output::store::{MASK_FILE, ORIGINAL_FILE, OVERLAY_FILE, REPORT_FILE, RESPONSE_FILE};
use crate::output::{ArtifactStore, MaskPaths, RenderContext, StoreError};

#[derive(Error, Debug)]
pub enum AnalyzeError {
  #[error("配置错误: {0}")]
  Config(#[from] ConfigError),
  #[error("模型错误: {0}")]
  Model(#[from] ModelError),
  #[error("产物保存错误: {0}")]
  Store(#[from] StoreError),
  #[error("响应序列化错误: {0}")]
  Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectionInfo {
  pub id: usize,
  pub class_name: String,
  pub confidence: f32,
  pub bbox: [f32; 4],
  pub center: [f32; 2],
  /// `#rrggbb`
  pub color: String,
  pub source: SourceTag,
  pub source_model: String,
  pub label: Option<Placement>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PolygonInfo {
  pub id: usize,
  pub class_name: String,
  pub points: Vec<Point>,
  pub visible: bool,
  pub masks: Option<MaskPaths>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArtifactPaths {
  pub overlay: PathBuf,
  pub mask: PathBuf,
  pub original: PathBuf,
  pub report: PathBuf,
  pub response: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResponse {
  pub request_id: String,
  pub mode: Mode,
  pub image_name: String,
  /// 模型报告的图像尺寸
  pub image: ImageMeta,
  pub detected_classes: Vec<String>,
  pub detections: Vec<DetectionInfo>,
  pub polygons: Vec<PolygonInfo>,
  pub models: Vec<SourceStats>,
  pub skipped_masks: usize,
  pub artifacts: ArtifactPaths,
}

/// 融合、渲染并保存一张图像的全部产物
pub struct AnalyzeTask {
  config: PipelineConfig,
  registry: Arc<ModelRegistry>,
  store: ArtifactStore,
  draw: Draw,
}

impl AnalyzeTask {
  pub fn new(config: PipelineConfig, registry: Arc<ModelRegistry>, store: ArtifactStore, draw: Draw) -> Self {
    Self {
      config,
      registry,
      store,
      draw,
    }
  }

  pub async fn run(&self, input: &ImageFileInput, mode: Mode) -> Result<AnalysisResponse, AnalyzeError> {
    let request_id = self.store.next_request_id();
    info!("开始任务 {}: {} (模式 {})", request_id, input.path().display(), mode);
    let now = Instant::now();

    let fuser = self.config.fuser(mode)?;
    let models = self.registry.get().await?;
    let fused = fuser.run(&models, input.bytes()).await;

    let mut ctx = RenderContext::new(&self.config.reserved_label);
    let rendered = self.draw.render(input.image(), &fused.predictions, &mut ctx);
    info!("渲染完成，耗时: {:.2?}", now.elapsed());

    let (width, height) = input.dimensions();
    let masks = if self.config.export_masks {
      build_region_masks(&fused.predictions, &rendered.order, width, height, &ctx.colors)
    } else {
      MaskBatch::default()
    };

    let original = self.store.save_image(&request_id, ORIGINAL_FILE, input.image())?;
    let overlay = self.store.save_image(&request_id, OVERLAY_FILE, &rendered.overlay)?;
    let mask = self.store.save_image(&request_id, MASK_FILE, &rendered.mask)?;
    let mut mask_paths = self
      .store
      .save_masks(&request_id, &masks.artifacts)?
      .into_iter()
      .collect::<HashMap<_, _>>();

    let report = Report::from_detections(&input.name(), &fused.predictions);
    let report = self.store.save_text(&request_id, REPORT_FILE, &report.to_text())?;
    let response_path = self.store.request_dir(&request_id)?.join(RESPONSE_FILE);

    let detections = fused
      .predictions
      .iter()
      .enumerate()
      .map(|(id, det)| {
        let bbox = det.bbox();
        DetectionInfo {
          id,
          class_name: det.class_name.clone(),
          confidence: det.confidence,
          bbox: bbox.to_array(),
          center: bbox.center(),
          color: to_hex(ctx.colors.color_or_fallback(&det.class_name)),
          source: det.source,
          source_model: det.source_model.clone(),
          label: rendered.placements.get(id).copied().flatten(),
        }
      })
      .collect::<Vec<_>>();

    let polygons = fused
      .predictions
      .iter()
      .enumerate()
      .filter_map(|(id, det)| {
        let points = det.geometry.points()?;
        Some(PolygonInfo {
          id,
          class_name: det.class_name.clone(),
          points: points.to_vec(),
          visible: true,
          masks: mask_paths.remove(&id),
        })
      })
      .collect::<Vec<_>>();

    let response = AnalysisResponse {
      request_id: request_id.clone(),
      mode,
      image_name: input.name(),
      image: fused.image,
      detected_classes: fused.classes,
      detections,
      polygons,
      models: fused.stats,
      skipped_masks: masks.skipped,
      artifacts: ArtifactPaths {
        overlay,
        mask,
        original,
        report,
        response: response_path,
      },
    };

    let json = serde_json::to_string_pretty(&response)?;
    self.store.save_text(&request_id, RESPONSE_FILE, &json)?;

    info!(
      "任务 {} 完成: {} 个检测, 总耗时: {:.2?}",
      request_id,
      response.detections.len(),
      now.elapsed()
    );
    Ok(response)
  }
}
