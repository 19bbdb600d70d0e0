//! Adds an embedding vector to every row that has text.

use crate::llm_provider::{EmbeddingRequest, EmbeddingService};
use crate::openai_embedding::OpenAiEmbeddingClient;
use crate::report::BatchReport;
use enrich_core::{
    execute_with_retry, get_field, set_field, CopyRequest, DatasetConfig, EnrichConfig,
    EnrichError, EnvCredentialProvider, ObjectCopier, Result, RetryPolicy, Value,
};
use std::sync::Arc;
use tracing::{info, warn};

pub struct EmbeddingEnricher {
    service: Arc<dyn EmbeddingService>,
    copier: ObjectCopier,
    retry: RetryPolicy,
    copy_depth: usize,
    dataset: DatasetConfig,
    max_tokens: usize,
    temperature: f32,
}

impl EmbeddingEnricher {
    pub fn new(service: Arc<dyn EmbeddingService>, config: &EnrichConfig) -> Self {
        let copier = match &config.copy.temp_dir {
            Some(dir) => ObjectCopier::with_temp_dir(dir),
            None => ObjectCopier::default(),
        };
        Self {
            service,
            copier,
            retry: config.retry.policy(),
            copy_depth: config.copy.max_depth,
            dataset: config.dataset.clone(),
            max_tokens: config.embedding.max_tokens,
            temperature: config.embedding.temperature,
        }
    }

    /// Build against the configured HTTP endpoint. Fails before any row is
    /// touched when the API key is missing.
    pub fn from_config(config: &EnrichConfig) -> Result<Self> {
        let credentials = EnvCredentialProvider::new(&config.embedding.api_key_env);
        let client = OpenAiEmbeddingClient::new(config.embedding.clone(), &credentials)?;
        Ok(Self::new(Arc::new(client), config))
    }

    pub async fn enrich(&self, rows: Vec<Value>) -> BatchReport {
        let mut report = BatchReport {
            attempted: rows.len(),
            ..BatchReport::default()
        };

        for (index, row) in rows.into_iter().enumerate() {
            match self.enrich_row(&row).await {
                Ok(enriched) => report.rows.push(enriched),
                Err(e) => {
                    warn!(row = index, error = %e, "Skipping row");
                    report.skip(index, e.to_string());
                    report.rows.push(row);
                }
            }
        }

        info!(
            model = self.service.model_name(),
            rows = report.attempted,
            enriched = report.succeeded(),
            skipped = report.skipped.len(),
            "Embedding batch finished"
        );
        report
    }

    async fn enrich_row(&self, row: &Value) -> Result<Value> {
        let copy = self
            .copier
            .copy(&CopyRequest::new(row.clone()).with_max_depth(self.copy_depth))?
            .value;

        let text = get_field(&copy, &self.dataset.text_field)
            .and_then(|v| v.to_text())
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                EnrichError::EmptyInput(format!("no text in field '{}'", self.dataset.text_field))
            })?;

        let request = EmbeddingRequest {
            input_text: text,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };
        let vector = execute_with_retry(&self.retry, |_| self.service.embed(&request)).await?;

        set_field(copy, &self.dataset.embedding_field, Value::from(vector))
    }
}
