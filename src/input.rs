// 该文件是 Chejian （车检） 项目的一部分。
// src/input.rs - 图像输入
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

use thiserror::Error;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme};

mod read_image_file;
pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

#[derive(Error, Debug)]
pub enum InputError {
  #[error("图像文件输入错误: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 打开输入：`image://` URL 或普通文件路径
pub fn open_input(source: &str) -> Result<ImageFileInput, InputError> {
  match Url::parse(source) {
    Ok(url) if url.scheme() == ImageFileInput::SCHEME => Ok(ImageFileInput::from_url(&url)?),
    // 单字母方案视为 Windows 盘符
    Ok(url) if url.scheme().len() > 1 => Err(InputError::SchemeMismatch(url.scheme().to_string())),
    _ => Ok(ImageFileInput::open(source)?),
  }
}
