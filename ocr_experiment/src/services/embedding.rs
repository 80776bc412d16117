// 埋め込みアダプター - テキスト → ベクトル

use crate::core::{EmbeddingProvider, ExperimentError, ExperimentResult, TechniqueStage};
use crate::services::config::{EmbeddingProviderKind, EmbeddingSettings};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a_hash(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, &byte| {
        (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
    })
}

fn normalize_vector(vec: &mut [f32]) {
    let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in vec.iter_mut() {
            *value /= norm;
        }
    }
}

/// オフラインで動作する特徴ハッシュ方式の埋め込み
///
/// 小文字化した単語をFNV-1aで次元に割り当て、符号付きで加算してL2正規化する。
/// 空テキストはゼロベクトルになる。
#[derive(Debug, Clone)]
pub struct HashingEmbeddingProvider {
    dimensions: usize,
}

impl HashingEmbeddingProvider {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        let tokens = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|token| !token.is_empty())
            .map(str::to_lowercase);

        for token in tokens {
            let hash = fnv1a_hash(token.as_bytes());
            let index = (hash % self.dimensions as u64) as usize;
            let sign = if (hash >> 63) & 1 == 0 { 1.0 } else { -1.0 };
            vector[index] += sign;
        }

        normalize_vector(&mut vector);
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    fn provider_name(&self) -> &'static str {
        "hashing"
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// `{"embedding": [...]}` と `{"data": [{"embedding": [...]}]}` の両形式を受け付ける
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EmbeddingResponse {
    Single { embedding: Vec<f32> },
    List { data: Vec<EmbeddingData> },
}

impl EmbeddingResponse {
    fn into_vector(self) -> Result<Vec<f32>> {
        match self {
            Self::Single { embedding } => Ok(embedding),
            Self::List { data } => data
                .into_iter()
                .next()
                .map(|d| d.embedding)
                .ok_or_else(|| anyhow!("Embedding response contained no vectors")),
        }
    }
}

/// 汎用JSONエンドポイントを呼び出す埋め込みプロバイダー
#[derive(Debug, Clone)]
pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    endpoint: String,
    model: Option<String>,
    api_key: Option<String>,
}

impl HttpEmbeddingProvider {
    pub fn new(endpoint: impl Into<String>, model: Option<String>, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            model,
            api_key,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = EmbeddingRequest {
            input: text,
            model: self.model.as_deref(),
        };

        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| anyhow!("Failed to call embedding endpoint: {}", e))?;
        if !response.status().is_success() {
            return Err(anyhow!("Embedding endpoint returned status: {}", response.status()));
        }

        let body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| anyhow!("Failed to parse embedding response: {}", e))?;
        body.into_vector()
    }

    fn provider_name(&self) -> &'static str {
        "http"
    }
}

/// 設定からプロバイダーを生成
pub fn create_embedding_provider(settings: &EmbeddingSettings) -> Result<Box<dyn EmbeddingProvider>> {
    match settings.provider {
        EmbeddingProviderKind::Hashing => Ok(Box::new(HashingEmbeddingProvider::new(settings.dimensions))),
        EmbeddingProviderKind::Http => {
            let endpoint = settings
                .endpoint
                .clone()
                .ok_or_else(|| anyhow!("embedding.endpoint is required for the http provider"))?;
            let api_key = settings
                .api_key_env
                .as_deref()
                .and_then(|name| std::env::var(name).ok());
            Ok(Box::new(HttpEmbeddingProvider::new(endpoint, settings.model.clone(), api_key)?))
        }
    }
}

/// テクニックごとのテキストを埋め込むアダプター
pub struct EmbeddingAdapter<E: EmbeddingProvider> {
    provider: Arc<E>,
}

impl<E: EmbeddingProvider> Clone for EmbeddingAdapter<E> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
        }
    }
}

impl<E: EmbeddingProvider> EmbeddingAdapter<E> {
    pub fn new(provider: E) -> Self {
        Self {
            provider: Arc::new(provider),
        }
    }

    pub async fn embed_for(&self, technique: &str, text: &str) -> ExperimentResult<Vec<f32>> {
        self.provider
            .embed(text)
            .await
            .map_err(|e| ExperimentError::technique(technique, TechniqueStage::Embedding, e))
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.provider_name()
    }
}
