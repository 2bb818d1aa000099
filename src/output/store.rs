// 该文件是 Chejian （车检） 项目的一部分。
// src/output/store.rs - 按请求组织的产物目录
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

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use image::{DynamicImage, GrayImage, RgbImage};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::output::mask::MaskArtifact;
use crate::{FromUrl, FromUrlWithScheme, decode_url_path};

pub const OVERLAY_FILE: &str = "overlay.jpg";
pub const MASK_FILE: &str = "mask.png";
pub const ORIGINAL_FILE: &str = "original.jpg";
pub const REPORT_FILE: &str = "report.txt";
pub const RESPONSE_FILE: &str = "response.json";
pub const MASKS_DIR: &str = "masks";

#[derive(Error, Debug)]
pub enum StoreError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("请求编号无效: {0}")]
  InvalidRequestId(String),
  #[error("产物不存在: {0}")]
  NotFound(PathBuf),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 单区域掩码的三种形式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskKind {
  Binary,
  Colored,
  Transparent,
}

impl MaskKind {
  pub fn suffix(&self) -> &'static str {
    match self {
      MaskKind::Binary => "binary",
      MaskKind::Colored => "colored",
      MaskKind::Transparent => "transparent",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MaskPaths {
  pub binary: PathBuf,
  pub colored: PathBuf,
  pub transparent: PathBuf,
}

/// 产物根目录：`folder:///path/to/root`
pub struct ArtifactStore {
  directory: PathBuf,
  request_counter: Mutex<u16>,
}

impl FromUrlWithScheme for ArtifactStore {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for ArtifactStore {
  type Error = StoreError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(StoreError::SchemeMismatch);
    }
    Ok(Self::new(decode_url_path(uri)))
  }
}

impl ArtifactStore {
  pub fn new<P: Into<PathBuf>>(directory: P) -> Self {
    Self {
      directory: directory.into(),
      request_counter: Mutex::new(0),
    }
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  fn next_counter(&self) -> u16 {
    let mut counter = match self.request_counter.lock() {
      Ok(guard) => guard,
      Err(poisoned) => poisoned.into_inner(),
    };
    *counter = counter.wrapping_add(1);
    *counter
  }

  /// UTC 时间戳加进程内计数
  pub fn next_request_id(&self) -> String {
    let now = Utc::now();
    format!("{}-{:04X}", now.format("%Y%m%d-%H%M%S"), self.next_counter())
  }

  fn checked_dir(&self, request_id: &str) -> Result<PathBuf, StoreError> {
    let valid = !request_id.is_empty()
      && request_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
      return Err(StoreError::InvalidRequestId(request_id.to_string()));
    }
    Ok(self.directory.join(request_id))
  }

  /// 创建请求目录
  pub fn request_dir(&self, request_id: &str) -> Result<PathBuf, StoreError> {
    let directory = self.checked_dir(request_id)?;
    std::fs::create_dir_all(directory.join(MASKS_DIR))?;
    Ok(directory)
  }

  pub fn save_image(&self, request_id: &str, name: &str, image: &RgbImage) -> Result<PathBuf, StoreError> {
    let path = self.request_dir(request_id)?.join(name);
    image.save(&path)?;
    debug!("保存图像: {}", path.display());
    Ok(path)
  }

  pub fn save_text(&self, request_id: &str, name: &str, text: &str) -> Result<PathBuf, StoreError> {
    let path = self.request_dir(request_id)?.join(name);
    std::fs::write(&path, text)?;
    debug!("保存文本: {}", path.display());
    Ok(path)
  }

  fn mask_path(directory: &Path, region_id: usize, kind: MaskKind) -> PathBuf {
    directory
      .join(MASKS_DIR)
      .join(format!("{}_{}.png", region_id, kind.suffix()))
  }

  /// 保存每个区域的三种掩码
  pub fn save_masks(&self, request_id: &str, masks: &[MaskArtifact]) -> Result<Vec<(usize, MaskPaths)>, StoreError> {
    let directory = self.request_dir(request_id)?;
    let mut saved = Vec::with_capacity(masks.len());

    for mask in masks {
      let paths = MaskPaths {
        binary: Self::mask_path(&directory, mask.region_id, MaskKind::Binary),
        colored: Self::mask_path(&directory, mask.region_id, MaskKind::Colored),
        transparent: Self::mask_path(&directory, mask.region_id, MaskKind::Transparent),
      };
      mask.binary.save(&paths.binary)?;
      mask.colored.save(&paths.colored)?;
      mask.transparent.save(&paths.transparent)?;
      saved.push((mask.region_id, paths));
    }

    info!("保存 {} 组区域掩码到 {}", saved.len(), directory.display());
    Ok(saved)
  }

  fn open(path: PathBuf) -> Result<DynamicImage, StoreError> {
    if !path.exists() {
      return Err(StoreError::NotFound(path));
    }
    Ok(image::open(&path)?)
  }

  pub fn load_original(&self, request_id: &str) -> Result<RgbImage, StoreError> {
    let path = self.checked_dir(request_id)?.join(ORIGINAL_FILE);
    Ok(Self::open(path)?.to_rgb8())
  }

  pub fn load_region_mask(&self, request_id: &str, region_id: usize, kind: MaskKind) -> Result<DynamicImage, StoreError> {
    let directory = self.checked_dir(request_id)?;
    Self::open(Self::mask_path(&directory, region_id, kind))
  }

  pub fn load_binary_mask(&self, request_id: &str, region_id: usize) -> Result<GrayImage, StoreError> {
    Ok(self.load_region_mask(request_id, region_id, MaskKind::Binary)?.to_luma8())
  }

  pub fn load_colored_mask(&self, request_id: &str, region_id: usize) -> Result<RgbImage, StoreError> {
    Ok(self.load_region_mask(request_id, region_id, MaskKind::Colored)?.to_rgb8())
  }

  /// 已保存掩码的区域编号（升序）
  pub fn region_ids(&self, request_id: &str) -> Result<Vec<usize>, StoreError> {
    let directory = self.checked_dir(request_id)?.join(MASKS_DIR);
    if !directory.exists() {
      return Err(StoreError::NotFound(directory));
    }

    let suffix = format!("_{}.png", MaskKind::Binary.suffix());
    let mut ids = std::fs::read_dir(&directory)?
      .filter_map(|entry| entry.ok())
      .filter_map(|entry| {
        let name = entry.file_name().to_string_lossy().into_owned();
        name.strip_suffix(&suffix)?.parse::<usize>().ok()
      })
      .collect::<Vec<_>>();
    ids.sort_unstable();
    Ok(ids)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::detection::BBox;
  use image::{Luma, Rgb, Rgba, RgbaImage};

  fn temp_store(tag: &str) -> ArtifactStore {
    let dir = std::env::temp_dir().join(format!("chejian-store-{}-{}", tag, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    ArtifactStore::new(dir)
  }

  fn artifact(region_id: usize) -> MaskArtifact {
    let mut binary = GrayImage::new(4, 4);
    binary.put_pixel(1, 1, Luma([255]));
    let mut colored = RgbImage::new(4, 4);
    colored.put_pixel(1, 1, Rgb([1, 2, 3]));
    let mut transparent = RgbaImage::new(4, 4);
    transparent.put_pixel(1, 1, Rgba([1, 2, 3, 255]));
    MaskArtifact {
      region_id,
      class_name: "DENT".to_string(),
      confidence: 0.5,
      bbox: BBox::new(1.0, 1.0, 2.0, 2.0),
      color: Rgb([1, 2, 3]),
      binary,
      colored,
      transparent,
    }
  }

  #[test]
  fn request_ids_are_unique() {
    let store = temp_store("ids");
    let a = store.next_request_id();
    let b = store.next_request_id();
    assert_ne!(a, b);
    assert!(a.ends_with("-0001"));
  }

  #[test]
  fn parses_folder_url() {
    let url = Url::parse("folder:///tmp/chejian%20out").unwrap();
    let store = ArtifactStore::from_url(&url).unwrap();
    assert_eq!(store.directory(), Path::new("/tmp/chejian out"));
    assert!(ArtifactStore::from_url(&Url::parse("image:///tmp/a.jpg").unwrap()).is_err());
  }

  #[test]
  fn masks_round_trip_through_store() {
    let store = temp_store("masks");
    let id = store.next_request_id();
    let saved = store.save_masks(&id, &[artifact(3), artifact(0)]).unwrap();
    assert_eq!(saved.len(), 2);
    assert!(saved[0].1.transparent.ends_with("masks/3_transparent.png"));

    assert_eq!(store.region_ids(&id).unwrap(), vec![0, 3]);
    let binary = store.load_binary_mask(&id, 3).unwrap();
    assert_eq!(binary.get_pixel(1, 1), &Luma([255]));
    assert_eq!(binary.get_pixel(0, 0), &Luma([0]));
    let colored = store.load_colored_mask(&id, 0).unwrap();
    assert_eq!(colored.get_pixel(1, 1), &Rgb([1, 2, 3]));

    assert!(matches!(
      store.load_binary_mask(&id, 7),
      Err(StoreError::NotFound(_))
    ));
    std::fs::remove_dir_all(store.directory()).unwrap();
  }

  #[test]
  fn rejects_path_like_request_ids() {
    let store = temp_store("reject");
    assert!(matches!(
      store.load_original("../etc"),
      Err(StoreError::InvalidRequestId(_))
    ));
    assert!(matches!(
      store.save_text("", REPORT_FILE, "x"),
      Err(StoreError::InvalidRequestId(_))
    ));
  }
}
