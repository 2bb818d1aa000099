// 该文件是 Chejian （车检） 项目的一部分。
// src/output.rs - 渲染与产物输出
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

use crate::color::ColorTable;
use crate::detection::Detection;

pub mod draw;
pub mod label;
pub mod mask;
pub mod report;

pub mod store;
pub use self::store::{ArtifactStore, MaskKind, MaskPaths, StoreError};

use self::label::LabelBox;

/// 单次请求的渲染状态：颜色表与已占标签区域
///
/// 每个请求新建一个，请求结束后丢弃。
#[derive(Debug, Clone, Default)]
pub struct RenderContext {
  pub colors: ColorTable,
  pub occupied: Vec<LabelBox>,
}

impl RenderContext {
  pub fn new(reserved_label: &str) -> Self {
    Self {
      colors: ColorTable::new(reserved_label),
      occupied: Vec::new(),
    }
  }

  /// 按绘制顺序为各区域类别分配颜色，序号取区域原始下标
  pub fn assign_colors(&mut self, regions: &[Detection], order: &[usize]) {
    for &index in order {
      self.colors.color_for(&regions[index].class_name, index);
    }
  }
}
