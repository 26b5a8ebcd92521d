//! OpenAI-backed language inference.
//!
//! Two jobs: turn a question plus a schema into a candidate SELECT, and turn
//! a finished analysis into a short narrative. The candidate SQL is never
//! trusted; it always goes through the safety validator before execution.
//! A dummy API key short-circuits to deterministic offline output so the
//! pipeline runs without network access.

use crate::analyzer::DescriptiveStats;
use crate::error::{DatasightError, Result};
use crate::providers::LanguageInference;
use crate::schema::SchemaDescription;
use crate::table::TableData;
use async_trait::async_trait;
use tracing::debug;

pub struct OpenAiInference {
    api_key: String,
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiInference {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4".to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    pub fn with_model(mut self, model: String) -> Self {
        self.model = model;
        self
    }

    async fn call_llm(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": "You are a precise data analyst. Answer exactly what is asked, no other text."},
                {"role": "user", "content": prompt}
            ],
            "temperature": 0.1,
            "max_tokens": 1000
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| DatasightError::Inference(format!("LLM API call failed: {}", e)))?;

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| DatasightError::Inference(format!("Failed to parse LLM response: {}", e)))?;

        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| DatasightError::Inference("No content in LLM response".to_string()))?;

        Ok(content.to_string())
    }

    /// Deterministic offline SQL for the dummy key: first table, all
    /// columns, bounded.
    fn offline_sql(schema: &SchemaDescription) -> Result<String> {
        let table = schema.tables.first().ok_or_else(|| {
            DatasightError::Inference("schema has no tables".to_string())
        })?;
        Ok(format!(
            "SELECT {} FROM {} LIMIT 1000",
            table.columns.join(", "),
            table.name
        ))
    }
}

/// Models often wrap SQL in markdown fences; strip them before validation.
pub fn strip_sql_fences(raw: &str) -> String {
    let trimmed = raw.trim();
    let without_open = trimmed
        .strip_prefix("```sql")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open
        .strip_suffix("```")
        .unwrap_or(without_open)
        .trim()
        .to_string()
}

#[async_trait]
impl LanguageInference for OpenAiInference {
    async fn infer_sql(&self, question: &str, schema: &SchemaDescription) -> Result<String> {
        if self.api_key == "dummy-api-key" {
            return Self::offline_sql(schema);
        }

        let prompt = format!(
            r#"Write a single read-only SQL SELECT statement answering the question below.

Schema:
{}

Question: "{}"

Rules:
- One SELECT statement only, no DDL or DML.
- Use only tables and columns from the schema above.
- Return only the SQL, no explanation."#,
            schema.describe(),
            question
        );

        let raw = self.call_llm(&prompt).await?;
        let sql = strip_sql_fences(&raw);
        debug!(sql = %sql, "inferred candidate SQL");
        Ok(sql)
    }

    async fn infer_narrative(
        &self,
        question: &str,
        table: &TableData,
        stats: &DescriptiveStats,
    ) -> Result<String> {
        if self.api_key == "dummy-api-key" {
            return Ok(format!(
                "Analyzed {} rows across {} columns.",
                table.height(),
                table.width()
            ));
        }

        let stats_json = serde_json::to_string(stats)
            .map_err(|e| DatasightError::Inference(format!("Failed to serialize stats: {}", e)))?;

        let prompt = format!(
            r#"Summarize this analysis result in 2-3 plain sentences for a business reader.

Question: "{}"
Result shape: {} rows, columns: {}
Statistics: {}

Return only the summary text, no other formatting."#,
            question,
            table.height(),
            table.columns.join(", "),
            stats_json
        );

        let narrative = self.call_llm(&prompt).await?;
        Ok(narrative.trim().to_string())
    }
}
