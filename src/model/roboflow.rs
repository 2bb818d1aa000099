// 该文件是 Chejian （车检） 项目的一部分。
// src/model/roboflow.rs - Roboflow 托管推理接口
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

use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine;
use futures::future::BoxFuture;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{Detector, ModelError},
};

/// 模型端点：`roboflow://<host>/<project>/<version>`，附加 `?insecure` 时使用 http
#[derive(Debug, Clone, PartialEq)]
pub struct RoboflowEndpoint {
  pub base: Url,
  pub project: String,
  pub version: u32,
}

impl FromUrlWithScheme for RoboflowEndpoint {
  const SCHEME: &'static str = "roboflow";
}

impl FromUrl for RoboflowEndpoint {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelError::EndpointError(format!(
        "期望方案 '{}', 实际方案 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }

    let host = url
      .host_str()
      .ok_or_else(|| ModelError::EndpointError(format!("缺少主机名: {}", url)))?;

    let segments = url
      .path_segments()
      .map(|s| s.filter(|seg| !seg.is_empty()).collect::<Vec<_>>())
      .unwrap_or_default();
    let (project, version) = match segments.as_slice() {
      [project, version] => (*project, *version),
      _ => {
        return Err(ModelError::EndpointError(format!(
          "路径应为 /<project>/<version>: {}",
          url
        )));
      }
    };
    let version = version
      .parse::<u32>()
      .map_err(|_| ModelError::EndpointError(format!("版本号无效: {}", version)))?;

    let insecure = url.query_pairs().any(|(k, _)| k == "insecure");
    let scheme = if insecure { "http" } else { "https" };
    let authority = match url.port() {
      Some(port) => format!("{}:{}", host, port),
      None => host.to_string(),
    };
    let base = Url::parse(&format!("{}://{}/", scheme, authority))
      .map_err(|e| ModelError::EndpointError(e.to_string()))?;

    Ok(RoboflowEndpoint {
      base,
      project: project.to_string(),
      version,
    })
  }
}

impl RoboflowEndpoint {
  pub fn inference_url(&self) -> Result<Url, ModelError> {
    self
      .base
      .join(&format!("{}/{}", self.project, self.version))
      .map_err(|e| ModelError::EndpointError(e.to_string()))
  }
}

/// 通过 HTTP 调用的托管检测模型
pub struct RoboflowDetector {
  name: String,
  url: Url,
  api_key: String,
  client: reqwest::Client,
}

impl RoboflowDetector {
  pub fn new(
    name: &str,
    endpoint: &RoboflowEndpoint,
    api_key: &str,
    client: reqwest::Client,
  ) -> Result<Self, ModelError> {
    Ok(Self {
      name: name.to_string(),
      url: endpoint.inference_url()?,
      api_key: api_key.to_string(),
      client,
    })
  }

  /// 共享的 HTTP 客户端
  pub fn build_client(timeout: Duration) -> Result<reqwest::Client, ModelError> {
    reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| ModelError::InitFailed(e.to_string()))
  }
}

impl Detector for RoboflowDetector {
  fn name(&self) -> &str {
    &self.name
  }

  fn predict(
    &self,
    image: Arc<[u8]>,
    confidence: u8,
  ) -> BoxFuture<'static, Result<serde_json::Value, ModelError>> {
    let name = self.name.clone();
    let url = self.url.clone();
    let api_key = self.api_key.clone();
    let client = self.client.clone();

    Box::pin(async move {
      info!("请求模型 '{}' (confidence={})", name, confidence);
      let now = Instant::now();

      let body = base64::engine::general_purpose::STANDARD.encode(&image);
      let response = client
        .post(url)
        .query(&[
          ("api_key", api_key),
          ("confidence", confidence.to_string()),
        ])
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(body)
        .send()
        .await
        .map_err(|e| ModelError::Transport(e.to_string()))?;

      let status = response.status();
      if !status.is_success() {
        let body = response
          .text()
          .await
          .unwrap_or_else(|_| "<无响应体>".to_string());
        return Err(ModelError::Status {
          status: status.as_u16(),
          body,
        });
      }

      let value = response
        .json::<serde_json::Value>()
        .await
        .map_err(|e| ModelError::InvalidResponse(e.to_string()))?;

      debug!("模型 '{}' 响应完成，耗时: {:.2?}", name, now.elapsed());
      Ok(value)
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_hosted_endpoint() {
    let url = Url::parse("roboflow://detect.roboflow.com/car-parts-ulbml/1").unwrap();
    let endpoint = RoboflowEndpoint::from_url(&url).unwrap();
    assert_eq!(endpoint.project, "car-parts-ulbml");
    assert_eq!(endpoint.version, 1);
    assert_eq!(
      endpoint.inference_url().unwrap().as_str(),
      "https://detect.roboflow.com/car-parts-ulbml/1"
    );
  }

  #[test]
  fn insecure_local_endpoint_keeps_port() {
    let url = Url::parse("roboflow://localhost:9001/corrosion-hsmae/5?insecure").unwrap();
    let endpoint = RoboflowEndpoint::from_url(&url).unwrap();
    assert_eq!(
      endpoint.inference_url().unwrap().as_str(),
      "http://localhost:9001/corrosion-hsmae/5"
    );
  }

  #[test]
  fn rejects_wrong_scheme_and_shape() {
    let wrong = Url::parse("https://detect.roboflow.com/a/1").unwrap();
    assert!(RoboflowEndpoint::from_url(&wrong).is_err());
    let short = Url::parse("roboflow://detect.roboflow.com/only-project").unwrap();
    assert!(RoboflowEndpoint::from_url(&short).is_err());
    let bad_version = Url::parse("roboflow://detect.roboflow.com/p/latest").unwrap();
    assert!(RoboflowEndpoint::from_url(&bad_version).is_err());
  }
}
