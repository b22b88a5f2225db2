use async_trait::async_trait;
use doccore::{ExecError, Executor, ExecutorInput, ExecutorResult};
use serde_json::json;

/// Write a lossy UTF-8 text rendition of each input file.
pub struct TextExtractExecutor;

#[async_trait]
impl Executor for TextExtractExecutor {
    fn operation(&self) -> &str {
        "text-extract"
    }

    async fn execute(&self, input: ExecutorInput) -> Result<ExecutorResult, ExecError> {
        if input.files.is_empty() {
            return Err(ExecError::Failed(
                "no input files to extract".to_string(),
            ));
        }

        let mut result = ExecutorResult::new();
        let mut characters = 0usize;
        for file in &input.files {
            let bytes = tokio::fs::read(file).await?;
            let text = String::from_utf8_lossy(&bytes);
            characters += text.chars().count();

            let stem = file
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("document");
            let target = input.output_dir.join(format!("{stem}.txt"));
            tokio::fs::write(&target, text.as_bytes()).await?;
            result.output_files.push(target);
        }

        Ok(result.with_data(json!({
            "files": input.files.len(),
            "characters": characters,
        })))
    }
}
