use async_trait::async_trait;
use doccore::{ExecError, Executor, ExecutorInput, ExecutorResult};
use serde_json::json;

/// Split the first input file into N byte-range parts.
pub struct SplitExecutor;

#[async_trait]
impl Executor for SplitExecutor {
    fn operation(&self) -> &str {
        "document-split"
    }

    async fn execute(&self, input: ExecutorInput) -> Result<ExecutorResult, ExecError> {
        let source = input
            .files
            .first()
            .ok_or_else(|| ExecError::Failed("no input file to split".to_string()))?;
        let parts = input.config_u64("parts", 2).max(1) as usize;

        let bytes = tokio::fs::read(source).await?;
        if bytes.is_empty() {
            return Err(ExecError::Failed(format!(
                "{} is empty",
                source.display()
            )));
        }

        let chunk = bytes.len().div_ceil(parts);
        let stem = source
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("document");

        let mut result = ExecutorResult::new();
        for (index, slice) in bytes.chunks(chunk).enumerate() {
            let target = input.output_dir.join(format!("{stem}-part{}.bin", index + 1));
            tokio::fs::write(&target, slice).await?;
            result.output_files.push(target);
        }

        let produced = result.output_files.len();
        Ok(result.with_data(json!({ "parts": produced })))
    }
}
