use async_trait::async_trait;
use doccore::{ExecError, Executor, ExecutorInput, ExecutorResult};
use serde_json::json;
use tokio::time::{sleep, Duration};

/// Sleep for a configured duration, passing inputs through untouched.
pub struct DelayExecutor;

#[async_trait]
impl Executor for DelayExecutor {
    fn operation(&self) -> &str {
        "delay"
    }

    async fn execute(&self, input: ExecutorInput) -> Result<ExecutorResult, ExecError> {
        let delay_ms = input.config_u64("delay_ms", 100);

        sleep(Duration::from_millis(delay_ms)).await;

        Ok(ExecutorResult::new()
            .with_files(input.files.clone())
            .with_data(json!({ "delayed_ms": delay_ms })))
    }
}
