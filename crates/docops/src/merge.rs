use async_trait::async_trait;
use doccore::{ExecError, Executor, ExecutorInput, ExecutorResult};
use serde_json::json;

/// Concatenate all input files into a single output document.
pub struct MergeExecutor;

#[async_trait]
impl Executor for MergeExecutor {
    fn operation(&self) -> &str {
        "document-merge"
    }

    async fn execute(&self, input: ExecutorInput) -> Result<ExecutorResult, ExecError> {
        if input.files.is_empty() {
            return Err(ExecError::Failed("no input files to merge".to_string()));
        }

        let name = input
            .config_str("output_name")
            .unwrap_or("merged.bin")
            .to_string();
        let target = input.output_dir.join(&name);

        let mut merged = Vec::new();
        for file in &input.files {
            let bytes = tokio::fs::read(file).await?;
            merged.extend_from_slice(&bytes);
        }
        tokio::fs::write(&target, &merged).await?;

        tracing::debug!(node = %input.node_id, files = input.files.len(), "Merged documents");

        Ok(ExecutorResult::new().with_file(target).with_data(json!({
            "merged_files": input.files.len(),
            "bytes": merged.len(),
        })))
    }
}
