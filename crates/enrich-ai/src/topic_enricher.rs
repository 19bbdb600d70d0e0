//! Derives a topic label per cluster and writes it into the member rows.

use crate::llm_provider::{ChatService, Message};
use crate::openai_chat::OpenAiChatClient;
use crate::report::BatchReport;
use enrich_core::{
    build_clustering_prompt, execute_with_retry, get_field, set_field, CopyRequest,
    DatasetConfig, EnrichConfig, EnrichError, EnvCredentialProvider, ObjectCopier, Result,
    RetryPolicy, Value,
};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One row of cluster metadata. Indices point into the data rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterMetadata {
    pub cluster_id: String,
    pub representative: Option<usize>,
    pub members: Vec<usize>,
}

impl ClusterMetadata {
    /// Parse a metadata row. `members` may be an integer array or a comma or
    /// semicolon separated list such as `"3, 7;12"`.
    pub fn from_row(row: &Value, dataset: &DatasetConfig) -> Result<Self> {
        let cluster_id = get_field(row, &dataset.cluster_id_field)
            .and_then(|v| v.to_text())
            .ok_or_else(|| {
                EnrichError::InvalidArgument(format!(
                    "cluster row has no '{}'",
                    dataset.cluster_id_field
                ))
            })?;

        let representative = match get_field(row, &dataset.representative_field) {
            None | Some(Value::Null) => None,
            Some(value) => Some(parse_index(&value)?),
        };

        let members = match get_field(row, &dataset.members_field) {
            None | Some(Value::Null) => Vec::new(),
            Some(value) => parse_members(&value)?,
        };

        Ok(Self {
            cluster_id,
            representative,
            members,
        })
    }

    /// Representative first, then the remaining members, each once.
    pub fn ordered_indices(&self) -> Vec<usize> {
        let mut seen = HashSet::new();
        self.representative
            .iter()
            .chain(self.members.iter())
            .copied()
            .filter(|index| seen.insert(*index))
            .collect()
    }
}

fn parse_index(value: &Value) -> Result<usize> {
    value
        .as_i64()
        .and_then(|i| usize::try_from(i).ok())
        .ok_or_else(|| EnrichError::InvalidArgument(format!("not a row index: {:?}", value)))
}

fn parse_members(value: &Value) -> Result<Vec<usize>> {
    match value {
        Value::Array(items) => items.iter().map(parse_index).collect(),
        Value::String(list) => list
            .split([',', ';'])
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| {
                part.parse::<usize>().map_err(|_| {
                    EnrichError::InvalidArgument(format!("not a row index: '{part}'"))
                })
            })
            .collect(),
        Value::Shared(shared) => {
            let cell = shared.last_in_chain().ok_or_else(|| {
                EnrichError::InvalidArgument("members cells only hold each other".to_string())
            })?;
            let members = parse_members(&cell.get());
            members
        }
        other => Ok(vec![parse_index(other)?]),
    }
}

pub struct TopicEnricher {
    service: Arc<dyn ChatService>,
    copier: ObjectCopier,
    retry: RetryPolicy,
    copy_depth: usize,
    dataset: DatasetConfig,
    system_prompt: String,
}

impl TopicEnricher {
    pub fn new(service: Arc<dyn ChatService>, config: &EnrichConfig) -> Self {
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
            system_prompt: config.chat.system_prompt.clone(),
        }
    }

    pub fn from_config(config: &EnrichConfig) -> Result<Self> {
        let credentials = EnvCredentialProvider::new(&config.chat.api_key_env);
        let client = OpenAiChatClient::new(config.chat.clone(), &credentials)?;
        Ok(Self::new(Arc::new(client), config))
    }

    /// Label every cluster in `clusters` and write the label into its member
    /// rows. Skipped entries in the report carry cluster indices.
    pub async fn enrich(&self, rows: Vec<Value>, clusters: &[Value]) -> BatchReport {
        let mut report = BatchReport {
            rows,
            attempted: clusters.len(),
            ..BatchReport::default()
        };

        for (index, cluster_row) in clusters.iter().enumerate() {
            let outcome = match ClusterMetadata::from_row(cluster_row, &self.dataset) {
                Ok(cluster) => self.label_cluster(&cluster, &report.rows).await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(updates) => {
                    for (row_index, row) in updates {
                        report.rows[row_index] = row;
                    }
                }
                Err(e) => {
                    warn!(cluster = index, error = %e, "Skipping cluster");
                    report.skip(index, e.to_string());
                }
            }
        }

        info!(
            model = self.service.model_name(),
            clusters = report.attempted,
            labelled = report.succeeded(),
            skipped = report.skipped.len(),
            "Topic batch finished"
        );
        report
    }

    /// Fetch the topic and build the updated member rows. Nothing is written
    /// back unless every member row could be updated.
    async fn label_cluster(
        &self,
        cluster: &ClusterMetadata,
        rows: &[Value],
    ) -> Result<Vec<(usize, Value)>> {
        let indices = cluster.ordered_indices();
        if let Some(bad) = indices.iter().find(|&&i| i >= rows.len()) {
            return Err(EnrichError::InvalidArgument(format!(
                "cluster {} references row {} of {}",
                cluster.cluster_id,
                bad,
                rows.len()
            )));
        }

        let snippets = self.collect_snippets(&indices, rows);
        if snippets.is_empty() {
            return Err(EnrichError::EmptyInput(format!(
                "cluster {} has no member text",
                cluster.cluster_id
            )));
        }
        debug!(cluster = %cluster.cluster_id, snippets = snippets.len(), "Building topic prompt");

        let prompt = build_clustering_prompt(&snippets)?;
        let messages = vec![Message::system(&self.system_prompt), Message::user(prompt)];
        let topic = execute_with_retry(&self.retry, |_| self.service.complete(&messages)).await?;
        let topic = topic.trim().to_string();

        let mut updates = Vec::with_capacity(indices.len());
        for index in indices {
            let copy = self
                .copier
                .copy(&CopyRequest::new(rows[index].clone()).with_max_depth(self.copy_depth))?
                .value;
            let updated = set_field(copy, &self.dataset.topic_field, Value::from(topic.as_str()))?;
            updates.push((index, updated));
        }
        Ok(updates)
    }

    fn collect_snippets(&self, indices: &[usize], rows: &[Value]) -> Vec<String> {
        let mut seen = HashSet::new();
        let snippets = indices
            .iter()
            .filter_map(|&i| get_field(&rows[i], &self.dataset.text_field))
            .filter_map(|v| v.to_text())
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty() && seen.insert(t.clone()));

        match self.dataset.max_snippets_per_cluster {
            Some(cap) => snippets.take(cap).collect(),
            None => snippets.collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset() -> DatasetConfig {
        DatasetConfig::default()
    }

    #[test]
    fn members_parse_from_array_and_list() {
        let from_array = Value::record([
            ("cluster_id", Value::Int(4)),
            ("representative", Value::Int(2)),
            ("members", Value::Array(vec![Value::Int(1), Value::Int(2)])),
        ]);
        let cluster = ClusterMetadata::from_row(&from_array, &dataset()).unwrap();
        assert_eq!(cluster.cluster_id, "4");
        assert_eq!(cluster.ordered_indices(), vec![2, 1]);

        let from_list = Value::record([
            ("cluster_id", Value::from("c-9")),
            ("members", Value::from("3, 7;12 ,")),
        ]);
        let cluster = ClusterMetadata::from_row(&from_list, &dataset()).unwrap();
        assert_eq!(cluster.representative, None);
        assert_eq!(cluster.members, vec![3, 7, 12]);
    }

    #[test]
    fn bad_member_index_is_rejected() {
        let row = Value::record([
            ("cluster_id", Value::Int(1)),
            ("members", Value::from("1, two")),
        ]);
        assert!(matches!(
            ClusterMetadata::from_row(&row, &dataset()),
            Err(EnrichError::InvalidArgument(_))
        ));

        let negative = Value::record([
            ("cluster_id", Value::Int(1)),
            ("members", Value::Array(vec![Value::Int(-1)])),
        ]);
        assert!(ClusterMetadata::from_row(&negative, &dataset()).is_err());
    }

    #[test]
    fn members_behind_cells_are_followed() {
        let list = Value::shared(Value::shared(Value::from("4;5")));
        let row = Value::record([("cluster_id", Value::Int(2)), ("members", list)]);
        let cluster = ClusterMetadata::from_row(&row, &dataset()).unwrap();
        assert_eq!(cluster.members, vec![4, 5]);

        let cell = enrich_core::SharedValue::new(Value::Null);
        cell.set(Value::Shared(cell.clone()));
        let looped = Value::record([("cluster_id", Value::Int(3)), ("members", Value::Shared(cell))]);
        assert!(matches!(
            ClusterMetadata::from_row(&looped, &dataset()),
            Err(EnrichError::InvalidArgument(_))
        ));
    }

    #[test]
    fn missing_cluster_id_is_rejected() {
        let row = Value::record([("members", Value::from("1"))]);
        assert!(ClusterMetadata::from_row(&row, &dataset()).is_err());
    }
}
