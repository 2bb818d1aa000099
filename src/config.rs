// 该文件是 Chejian （车检） 项目的一部分。
// src/config.rs - 流水线配置
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

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
#[cfg(feature = "roboflow")]
use url::Url;

use crate::color::DEFAULT_RESERVED_LABEL;
use crate::detection::SourceTag;
use crate::fusion::{ClassFilter, PredictionFuser, RenameTable, SourceSpec};

/// 远程模型 API 密钥所在的环境变量
pub const API_KEY_ENV: &str = "ROBOFLOW_API_KEY";

pub const DEFAULT_FONT_SIZE: f32 = 16.0;
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("读取配置文件失败: {0}")]
  Io(#[from] std::io::Error),
  #[error("配置文件格式错误: {0}")]
  Parse(#[from] serde_json::Error),
  #[error("模式 {mode} 引用了未定义的模型 '{model}'")]
  UnknownModel { mode: Mode, model: String },
  #[error("模型 '{model}' 引用了未定义的重命名表 '{table}'")]
  UnknownRenameTable { model: String, table: String },
  #[error("模式 {0} 没有配置任何模型")]
  EmptyMode(Mode),
}

/// 分析模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
  /// 车身部件
  Parts,
  /// 损伤
  Damage,
  /// 部件与损伤
  Full,
}

impl Mode {
  pub fn as_str(&self) -> &'static str {
    match self {
      Mode::Parts => "parts",
      Mode::Damage => "damage",
      Mode::Full => "full",
    }
  }
}

impl fmt::Display for Mode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// 一个远程模型的定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
  pub name: String,
  /// `roboflow://<host>/<project>/<version>`
  pub endpoint: String,
  pub tag: SourceTag,
  pub filter: ClassFilter,
  /// 使用的重命名表名称
  pub rename: String,
}

/// 模式中对模型的一次调用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCall {
  pub model: String,
  /// 置信度阈值（0-100）
  pub confidence: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeConfig {
  /// 调用顺序即结果拼接顺序
  pub calls: Vec<ModelCall>,
  /// 图像尺寸取值的优先顺序
  pub image_priority: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelConfig {
  /// 未设置时在系统字体目录中查找
  pub font: Option<PathBuf>,
  pub font_size: f32,
}

impl Default for LabelConfig {
  fn default() -> Self {
    Self {
      font: None,
      font_size: DEFAULT_FONT_SIZE,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
  pub models: Vec<ModelConfig>,
  pub parts: ModeConfig,
  pub damage: ModeConfig,
  pub full: ModeConfig,
  pub renames: BTreeMap<String, BTreeMap<String, String>>,
  pub reserved_label: String,
  pub label: LabelConfig,
  pub export_masks: bool,
  pub timeout_secs: u64,
}

fn endpoint(project: &str, version: u32) -> String {
  format!("roboflow://detect.roboflow.com/{}/{}", project, version)
}

fn table(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
  pairs
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn calls(pairs: &[(&str, u8)]) -> Vec<ModelCall> {
  pairs
    .iter()
    .map(|(model, confidence)| ModelCall {
      model: model.to_string(),
      confidence: *confidence,
    })
    .collect()
}

fn names(items: &[&str]) -> Vec<String> {
  items.iter().map(|s| s.to_string()).collect()
}

const DAMAGE_CLASSES: [&str; 8] = [
  "gocuk",
  "kirik-kayip",
  "cam_catlagi",
  "cizik",
  "crack",
  "scratch",
  "dent",
  "korosi",
];

impl Default for PipelineConfig {
  fn default() -> Self {
    let damage_model = |name: &str, project: &str, version: u32| ModelConfig {
      name: name.to_string(),
      endpoint: endpoint(project, version),
      tag: SourceTag::Damage,
      filter: ClassFilter::allow(DAMAGE_CLASSES),
      rename: "damage".to_string(),
    };

    let models = vec![
      ModelConfig {
        name: "wheels".to_string(),
        endpoint: endpoint("parts-car", 1),
        tag: SourceTag::Parts,
        filter: ClassFilter::allow(["Roda", "Pneu", "Teto", "Janela"]),
        rename: "parts".to_string(),
      },
      ModelConfig {
        name: "doors".to_string(),
        endpoint: endpoint("car-parts-ulbml", 1),
        tag: SourceTag::Parts,
        filter: ClassFilter::allow([
          "back_left_door",
          "back_right_door",
          "back_right_light",
          "back_left_light",
          "front_left_door",
          "front_right_door",
          "front_left_light",
          "front_right_light",
          "left_mirror",
          "right_mirror",
        ]),
        rename: "parts".to_string(),
      },
      ModelConfig {
        name: "main".to_string(),
        endpoint: endpoint("cars-parts-and-damages_3", 2),
        tag: SourceTag::Parts,
        // 车轮与车门由专用模型负责
        filter: ClassFilter::deny([
          "W", "FD", "RD", "HL", "DM", "TL", "OL", "dmg_LD", "dmg_SC",
        ]),
        rename: "parts".to_string(),
      },
      damage_model("damage_1", "car-damage-detection-frmnl", 3),
      damage_model("damage_2", "car-damage-detection-vyhvw", 6),
      damage_model("damage_3", "bilgi-university-car-damage", 1),
      damage_model("damage_4", "corrosion-hsmae", 5),
    ];

    let mut renames = BTreeMap::new();
    renames.insert(
      "parts".to_string(),
      table(&[
        ("FF", "FRONT FENDER"),
        ("Q", "REAR QUARTER PANEL"),
        ("FS", "WINDSHIELD"),
        ("RS", "REAR WINDOW"),
        ("RNP", "REAR LICENSE PLATE"),
        ("FNP", "FRONT LICENSE PLATE"),
        ("FB", "BUMPER"),
        ("B", "HOOD"),
        ("G", "GRILLE"),
        ("Roda", "WHEEL DISC"),
        ("Pneu", "TIRE"),
        ("Teto", "ROOF"),
        ("Janela", "WINDOW GLASS"),
        ("emblem", "MANUFACTURER EMBLEM"),
        ("Tampa Gas", "FUEL DOOR"),
        ("back_left_door", "REAR LEFT DOOR"),
        ("back_right_door", "REAR RIGHT DOOR"),
        ("back_right_light", "REAR RIGHT LIGHT"),
        ("back_left_light", "REAR LEFT LIGHT"),
        ("front_left_door", "FRONT LEFT DOOR"),
        ("front_right_door", "FRONT RIGHT DOOR"),
        ("front_left_light", "LEFT HEADLIGHT"),
        ("front_right_light", "RIGHT HEADLIGHT"),
        ("left_mirror", "LEFT MIRROR"),
        ("right_mirror", "RIGHT MIRROR"),
      ]),
    );
    renames.insert(
      "damage".to_string(),
      table(&[
        ("gocuk", "CREASE"),
        ("kirik-kayip", "MISSING FRAGMENT"),
        ("cam_catlagi", "CRACK"),
        ("cizik", "SCRATCH"),
        ("crack", "CRACK"),
        ("scratch", "SCRATCH"),
        ("dent", "DENT"),
        ("korosi", "SURFACE CORROSION"),
      ]),
    );

    let damage_priority = ["damage_1", "damage_2", "damage_3", "damage_4"];

    Self {
      models,
      parts: ModeConfig {
        calls: calls(&[("wheels", 30), ("doors", 10), ("main", 30)]),
        image_priority: names(&["main"]),
      },
      damage: ModeConfig {
        calls: calls(&[
          ("damage_1", 40),
          ("damage_2", 40),
          ("damage_3", 40),
          ("damage_4", 40),
        ]),
        image_priority: names(&damage_priority),
      },
      full: ModeConfig {
        calls: calls(&[
          ("wheels", 30),
          ("doors", 10),
          ("main", 30),
          ("damage_1", 20),
          ("damage_2", 20),
          ("damage_3", 20),
          ("damage_4", 20),
        ]),
        image_priority: names(&[
          "damage_1", "damage_2", "damage_3", "damage_4", "wheels", "doors", "main",
        ]),
      },
      renames,
      reserved_label: DEFAULT_RESERVED_LABEL.to_string(),
      label: LabelConfig::default(),
      export_masks: true,
      timeout_secs: DEFAULT_TIMEOUT_SECS,
    }
  }
}

impl PipelineConfig {
  pub fn from_json(text: &str) -> Result<Self, ConfigError> {
    let config: PipelineConfig = serde_json::from_str(text)?;
    config.validate()?;
    Ok(config)
  }

  pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    info!("加载配置文件: {}", path.display());
    let text = std::fs::read_to_string(path)?;
    Self::from_json(&text)
  }

  pub fn mode(&self, mode: Mode) -> &ModeConfig {
    match mode {
      Mode::Parts => &self.parts,
      Mode::Damage => &self.damage,
      Mode::Full => &self.full,
    }
  }

  pub fn model(&self, name: &str) -> Option<&ModelConfig> {
    self.models.iter().find(|m| m.name == name)
  }

  /// 检查所有模式引用的模型与重命名表均已定义
  pub fn validate(&self) -> Result<(), ConfigError> {
    for mode in [Mode::Parts, Mode::Damage, Mode::Full] {
      self.sources(mode)?;
    }
    Ok(())
  }

  /// 解析模式的调用列表为融合来源
  pub fn sources(&self, mode: Mode) -> Result<Vec<SourceSpec>, ConfigError> {
    let mode_config = self.mode(mode);
    if mode_config.calls.is_empty() {
      return Err(ConfigError::EmptyMode(mode));
    }

    mode_config
      .calls
      .iter()
      .map(|call| {
        let model = self
          .model(&call.model)
          .ok_or_else(|| ConfigError::UnknownModel {
            mode,
            model: call.model.clone(),
          })?;
        let rename = self
          .renames
          .get(&model.rename)
          .ok_or_else(|| ConfigError::UnknownRenameTable {
            model: model.name.clone(),
            table: model.rename.clone(),
          })?;
        debug!(
          "模式 {}: 模型 '{}' confidence={}",
          mode, model.name, call.confidence
        );
        Ok(SourceSpec {
          name: model.name.clone(),
          confidence: call.confidence,
          filter: model.filter.clone(),
          rename: Arc::new(rename.iter().map(|(k, v)| (k.clone(), v.clone())).collect::<RenameTable>()),
          tag: model.tag,
        })
      })
      .collect()
  }

  pub fn fuser(&self, mode: Mode) -> Result<PredictionFuser, ConfigError> {
    let sources = self.sources(mode)?;
    Ok(PredictionFuser::new(
      sources,
      self.mode(mode).image_priority.clone(),
    ))
  }

  /// 构建全部远程模型句柄；API 密钥取自环境变量
  #[cfg(feature = "roboflow")]
  pub fn build_models(&self) -> Result<crate::model::ModelSet, crate::model::ModelError> {
    use std::time::Duration;

    use crate::FromUrl;
    use crate::model::{ModelError, ModelSet, RoboflowDetector, RoboflowEndpoint};

    let api_key = std::env::var(API_KEY_ENV)
      .ok()
      .filter(|key| !key.trim().is_empty())
      .ok_or_else(|| ModelError::MissingApiKey(API_KEY_ENV.to_string()))?;
    let client = RoboflowDetector::build_client(Duration::from_secs(self.timeout_secs))?;

    let mut models = ModelSet::new();
    for model in &self.models {
      let url = Url::parse(&model.endpoint)
        .map_err(|e| ModelError::EndpointError(format!("{}: {}", model.endpoint, e)))?;
      let endpoint = RoboflowEndpoint::from_url(&url)?;
      info!("注册模型 '{}': {}", model.name, model.endpoint);
      let detector = RoboflowDetector::new(&model.name, &endpoint, &api_key, client.clone())?;
      models.insert(Arc::new(detector));
    }
    Ok(models)
  }
}
