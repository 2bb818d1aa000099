// 该文件是 Chejian （车检） 项目的一部分。
// src/detection.rs - 检测结果数据模型与解析
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

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

/// 远程调用失败或缺失时使用的占位分辨率
pub const PLACEHOLDER_WIDTH: u32 = 640;
pub const PLACEHOLDER_HEIGHT: u32 = 480;

/// 缺失置信度时的默认值
pub const DEFAULT_CONFIDENCE: f32 = 0.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
  pub x: f32,
  pub y: f32,
}

/// 轴对齐框 [x1, y1, x2, y2]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
  pub x1: f32,
  pub y1: f32,
  pub x2: f32,
  pub y2: f32,
}

impl BBox {
  pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
    Self { x1, y1, x2, y2 }
  }

  /// 由中心点格式 (cx, cy, w, h) 构造
  pub fn from_center(cx: f32, cy: f32, width: f32, height: f32) -> Self {
    Self {
      x1: cx - width / 2.0,
      y1: cy - height / 2.0,
      x2: cx + width / 2.0,
      y2: cy + height / 2.0,
    }
  }

  /// 点集外接框，空集返回 None
  pub fn enclosing(points: &[Point]) -> Option<Self> {
    let first = points.first()?;
    let init = BBox::new(first.x, first.y, first.x, first.y);
    Some(points.iter().fold(init, |b, p| BBox {
      x1: b.x1.min(p.x),
      y1: b.y1.min(p.y),
      x2: b.x2.max(p.x),
      y2: b.y2.max(p.y),
    }))
  }

  pub fn width(&self) -> f32 {
    (self.x2 - self.x1).max(0.0)
  }

  pub fn height(&self) -> f32 {
    (self.y2 - self.y1).max(0.0)
  }

  pub fn area(&self) -> f32 {
    self.width() * self.height()
  }

  pub fn center(&self) -> [f32; 2] {
    [(self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0]
  }

  pub fn to_array(&self) -> [f32; 4] {
    [self.x1, self.y1, self.x2, self.y2]
  }
}

/// 区域几何：框或多边形（多边形同时携带外接框）
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
  Box(BBox),
  Polygon { points: Vec<Point>, bbox: BBox },
}

impl Geometry {
  pub fn bbox(&self) -> BBox {
    match self {
      Geometry::Box(bbox) => *bbox,
      Geometry::Polygon { bbox, .. } => *bbox,
    }
  }

  pub fn points(&self) -> Option<&[Point]> {
    match self {
      Geometry::Box(_) => None,
      Geometry::Polygon { points, .. } => Some(points),
    }
  }
}

/// 预测来源标签，用于报表分组
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceTag {
  Parts,
  Damage,
}

impl SourceTag {
  pub fn as_str(&self) -> &'static str {
    match self {
      SourceTag::Parts => "parts",
      SourceTag::Damage => "damage",
    }
  }
}

/// 单个检测区域
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  pub class_name: String,
  pub confidence: f32,
  pub geometry: Geometry,
  pub source_model: String,
  pub source: SourceTag,
}

impl Detection {
  pub fn bbox(&self) -> BBox {
    self.geometry.bbox()
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ImageMeta {
  pub width: u32,
  pub height: u32,
}

impl ImageMeta {
  pub const PLACEHOLDER: ImageMeta = ImageMeta {
    width: PLACEHOLDER_WIDTH,
    height: PLACEHOLDER_HEIGHT,
  };

  pub fn is_valid(&self) -> bool {
    self.width > 0 && self.height > 0
  }
}

/// 单个模型的解析后输出
#[derive(Debug, Clone, PartialEq)]
pub struct ModelOutput {
  pub predictions: Vec<Detection>,
  pub image: ImageMeta,
}

#[derive(Error, Debug, PartialEq)]
pub enum PredictionError {
  #[error("预测项不是对象")]
  NotAnObject,
  #[error("预测项缺少可用几何信息")]
  MissingGeometry,
}

impl ModelOutput {
  /// 远程调用失败时的替代结果
  pub fn placeholder() -> Self {
    Self {
      predictions: Vec::new(),
      image: ImageMeta::PLACEHOLDER,
    }
  }

  /// 将远程返回的 JSON 解析为强类型结果，无法解析的预测项被跳过
  pub fn from_json(source_model: &str, source: SourceTag, value: &Value) -> Self {
    let predictions: Vec<Detection> = value
      .get("predictions")
      .and_then(Value::as_array)
      .map(|items| {
        items
          .iter()
          .enumerate()
          .filter_map(|(index, item)| {
            match parse_prediction(item, index, source_model, source) {
              Ok(detection) => Some(detection),
              Err(e) => {
                warn!("模型 {} 第 {} 个预测项被跳过: {}", source_model, index, e);
                None
              }
            }
          })
          .collect()
      })
      .unwrap_or_default();

    let image = value
      .get("image")
      .map(|image| ImageMeta {
        width: read_dimension(image.get("width")),
        height: read_dimension(image.get("height")),
      })
      .unwrap_or_default();

    debug!(
      "模型 {} 解析得到 {} 个预测, 图像尺寸 {}x{}",
      source_model,
      predictions.len(),
      image.width,
      image.height
    );

    Self { predictions, image }
  }
}

fn read_dimension(value: Option<&Value>) -> u32 {
  value
    .and_then(read_number)
    .filter(|v| v.is_finite() && *v > 0.0)
    .map(|v| v as u32)
    .unwrap_or(0)
}

/// 数字或数字字符串
fn read_number(value: &Value) -> Option<f32> {
  let number = match value {
    Value::Number(n) => n.as_f64().map(|v| v as f32),
    Value::String(s) => s.trim().parse::<f32>().ok(),
    _ => None,
  };
  number.filter(|v| v.is_finite())
}

/// `{"x": .., "y": ..}` 或 `[x, y]`
fn read_point(value: &Value) -> Option<Point> {
  match value {
    Value::Object(map) => Some(Point {
      x: read_number(map.get("x")?)?,
      y: read_number(map.get("y")?)?,
    }),
    Value::Array(pair) if pair.len() >= 2 => Some(Point {
      x: read_number(&pair[0])?,
      y: read_number(&pair[1])?,
    }),
    _ => None,
  }
}

fn read_box(item: &serde_json::Map<String, Value>) -> Option<BBox> {
  let field = |key: &str| item.get(key).and_then(read_number);
  if let (Some(cx), Some(cy), Some(w), Some(h)) =
    (field("x"), field("y"), field("width"), field("height"))
  {
    return Some(BBox::from_center(cx, cy, w, h));
  }

  let coords = item
    .get("bbox")?
    .as_array()?
    .iter()
    .map(read_number)
    .collect::<Option<Vec<f32>>>()?;
  match coords.as_slice() {
    [x1, y1, x2, y2, ..] => Some(BBox::new(*x1, *y1, *x2, *y2)),
    _ => None,
  }
}

fn parse_prediction(
  value: &Value,
  index: usize,
  source_model: &str,
  source: SourceTag,
) -> Result<Detection, PredictionError> {
  let item = value.as_object().ok_or(PredictionError::NotAnObject)?;

  let class_name = item
    .get("class")
    .and_then(Value::as_str)
    .map(str::to_string)
    .unwrap_or_else(|| format!("class_{}", index));

  let confidence = item
    .get("confidence")
    .and_then(read_number)
    .unwrap_or(DEFAULT_CONFIDENCE);

  let explicit_box = read_box(item);

  let polygon = item.get("points").and_then(Value::as_array).and_then(|raw| {
    let points = raw.iter().map(read_point).collect::<Option<Vec<Point>>>();
    if points.is_none() {
      warn!("类别 {} 的多边形坐标无效，退回使用外接框", class_name);
    }
    points.filter(|points| !points.is_empty())
  });

  let geometry = match (polygon, explicit_box) {
    (Some(points), Some(bbox)) => Geometry::Polygon { points, bbox },
    (Some(points), None) => {
      let bbox = BBox::enclosing(&points).ok_or(PredictionError::MissingGeometry)?;
      Geometry::Polygon { points, bbox }
    }
    (None, Some(bbox)) => Geometry::Box(bbox),
    (None, None) => return Err(PredictionError::MissingGeometry),
  };

  Ok(Detection {
    class_name,
    confidence,
    geometry,
    source_model: source_model.to_string(),
    source,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn parses_polygon_prediction_with_center_box() {
    let value = json!({
      "predictions": [{
        "x": 50.0, "y": 40.0, "width": 20.0, "height": 10.0,
        "confidence": 0.87, "class": "Roda",
        "points": [{"x": 40, "y": 35}, {"x": 60, "y": 35}, {"x": 60, "y": 45}]
      }],
      "image": {"width": 800, "height": 600}
    });

    let output = ModelOutput::from_json("wheels", SourceTag::Parts, &value);
    assert_eq!(output.image, ImageMeta { width: 800, height: 600 });
    assert_eq!(output.predictions.len(), 1);

    let det = &output.predictions[0];
    assert_eq!(det.class_name, "Roda");
    assert_eq!(det.bbox(), BBox::new(40.0, 35.0, 60.0, 45.0));
    assert_eq!(det.geometry.points().map(|p| p.len()), Some(3));
    assert_eq!(det.source_model, "wheels");
  }

  #[test]
  fn accepts_pair_points_and_bbox_array() {
    let value = json!({
      "predictions": [{
        "class": "dent", "confidence": "0.5",
        "bbox": [1, 2, 30, 40],
        "points": [[1, 2], [30, 2], [30, 40]]
      }]
    });
    let output = ModelOutput::from_json("damage_1", SourceTag::Damage, &value);
    let det = &output.predictions[0];
    assert_eq!(det.confidence, 0.5);
    assert_eq!(det.bbox(), BBox::new(1.0, 2.0, 30.0, 40.0));
    assert_eq!(output.image, ImageMeta::default());
  }

  #[test]
  fn malformed_points_fall_back_to_box() {
    let value = json!({
      "predictions": [{
        "class": "FB", "x": 10, "y": 10, "width": 4, "height": 4,
        "points": [{"x": "left", "y": 1}, {"x": 2, "y": 2}, {"x": 3, "y": 1}]
      }]
    });
    let output = ModelOutput::from_json("main", SourceTag::Parts, &value);
    assert_eq!(
      output.predictions[0].geometry,
      Geometry::Box(BBox::new(8.0, 8.0, 12.0, 12.0))
    );
  }

  #[test]
  fn predictions_without_geometry_are_dropped() {
    let value = json!({
      "predictions": [
        {"class": "B", "confidence": 0.9},
        {"confidence": 0.4, "bbox": [0, 0, 5, 5]},
        "garbage"
      ]
    });
    let output = ModelOutput::from_json("main", SourceTag::Parts, &value);
    assert_eq!(output.predictions.len(), 1);
    assert_eq!(output.predictions[0].class_name, "class_1");
    assert_eq!(output.predictions[0].confidence, 0.4);
  }

  #[test]
  fn missing_fields_degrade_to_empty() {
    let output = ModelOutput::from_json("doors", SourceTag::Parts, &json!({}));
    assert!(output.predictions.is_empty());
    assert!(!output.image.is_valid());
    assert!(ModelOutput::placeholder().image.is_valid());
  }
}
