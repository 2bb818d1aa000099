// 该文件是 Chejian （车检） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, decode_url_path};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI 方案不匹配")]
  SchemaMismatch,
  #[error("读取文件失败: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像解码失败: {0}")]
  ImageLoadError(#[from] image::ImageError),
}

/// 一张待分析的图像：原始字节（发送给远程模型）与解码后的像素
pub struct ImageFileInput {
  path: PathBuf,
  bytes: Arc<[u8]>,
  image: RgbImage,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    Self::open(decode_url_path(url))
  }
}

impl ImageFileInput {
  pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ImageFileInputError> {
    let path = path.as_ref().to_path_buf();
    let bytes = std::fs::read(&path)?;
    let input = Self::from_bytes(path, bytes)?;
    info!(
      "读取图像 {}: {}x{}",
      input.path.display(),
      input.image.width(),
      input.image.height()
    );
    Ok(input)
  }

  /// 按内容识别格式解码
  pub fn from_bytes(path: PathBuf, bytes: Vec<u8>) -> Result<Self, ImageFileInputError> {
    let image = ImageReader::new(Cursor::new(&bytes))
      .with_guessed_format()?
      .decode()?
      .to_rgb8();
    Ok(Self {
      path,
      bytes: Arc::from(bytes),
      image,
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// 不含扩展名的文件名，用于报表
  pub fn name(&self) -> String {
    self
      .path
      .file_stem()
      .map(|s| s.to_string_lossy().into_owned())
      .unwrap_or_else(|| "image".to_string())
  }

  pub fn bytes(&self) -> Arc<[u8]> {
    self.bytes.clone()
  }

  pub fn image(&self) -> &RgbImage {
    &self.image
  }

  pub fn dimensions(&self) -> (u32, u32) {
    self.image.dimensions()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{ImageFormat, Rgb};

  fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, Rgb([10, 20, 30]));
    let mut bytes = Vec::new();
    image
      .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
      .unwrap();
    bytes
  }

  #[test]
  fn decodes_bytes_by_content() {
    let input = ImageFileInput::from_bytes(PathBuf::from("/tmp/car.bin"), png_bytes(7, 5)).unwrap();
    assert_eq!(input.dimensions(), (7, 5));
    assert_eq!(input.name(), "car");
    assert_eq!(input.image().get_pixel(3, 3), &Rgb([10, 20, 30]));
  }

  #[test]
  fn corrupt_bytes_are_reported() {
    let result = ImageFileInput::from_bytes(PathBuf::from("x.jpg"), vec![1, 2, 3, 4]);
    assert!(result.is_err());
  }

  #[test]
  fn rejects_other_schemes() {
    let url = Url::parse("folder:///tmp/out").unwrap();
    assert!(matches!(
      ImageFileInput::from_url(&url),
      Err(ImageFileInputError::SchemaMismatch)
    ));
  }

  #[test]
  fn reads_percent_encoded_path() {
    let dir = std::env::temp_dir().join(format!("chejian-input-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let file = dir.join("my car.png");
    std::fs::write(&file, png_bytes(3, 2)).unwrap();

    let url = Url::from_file_path(&file).unwrap();
    let url = Url::parse(&url.as_str().replacen("file:", "image:", 1)).unwrap();
    let input = ImageFileInput::from_url(&url).unwrap();
    assert_eq!(input.dimensions(), (3, 2));
    assert_eq!(input.name(), "my car");

    std::fs::remove_dir_all(&dir).unwrap();
  }
}
