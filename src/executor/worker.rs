//! Worker process entry point
//!
//! A worker reads one JSON [`WorkItem`] per line on stdin, runs it through
//! a [`TestExecutor`] and answers with one JSON [`WorkerResponse`] per line
//! on stdout. This line protocol is the only contract between the
//! orchestrator and its worker processes.

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::debug;

use crate::models::{TestResult, WorkItem};

/// Runs a single test file
pub trait TestExecutor: Send + Sync {
    fn execute<'a>(&'a self, item: &'a WorkItem) -> BoxFuture<'a, Result<TestResult>>;
}

/// Answer to one work item
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerResponse {
    Result { result: TestResult },
    /// The executor failed before producing a result
    Error { message: String },
}

/// Serve work items from `input` until it is closed
pub async fn serve<R, W>(executor: &dyn TestExecutor, input: R, mut output: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();

    while let Some(line) = lines.next_line().await.context("Failed to read work item")? {
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<WorkItem>(&line) {
            Ok(item) => {
                debug!("Worker running {}", item.path.display());
                match executor.execute(&item).await {
                    Ok(result) => WorkerResponse::Result { result },
                    Err(e) => WorkerResponse::Error {
                        message: format!("{e:#}"),
                    },
                }
            }
            Err(e) => WorkerResponse::Error {
                message: format!("Invalid work item: {e}"),
            },
        };

        let mut json = serde_json::to_string(&response).context("Failed to encode response")?;
        json.push('\n');
        output
            .write_all(json.as_bytes())
            .await
            .context("Failed to write response")?;
        output.flush().await.context("Failed to flush response")?;
    }

    debug!("Worker input closed, exiting");
    Ok(())
}

/// Serve on the process' own stdin/stdout
pub async fn run_worker(executor: &dyn TestExecutor) -> Result<()> {
    serve(executor, BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GlobalConfig, ProjectConfig};

    struct EchoExecutor;

    impl TestExecutor for EchoExecutor {
        fn execute<'a>(&'a self, item: &'a WorkItem) -> BoxFuture<'a, Result<TestResult>> {
            Box::pin(async move {
                if item.path.to_string_lossy().contains("boom") {
                    anyhow::bail!("executor blew up");
                }
                Ok(TestResult::pass(item.path.clone(), 1))
            })
        }
    }

    fn item_line(path: &str) -> String {
        let item = WorkItem {
            config: ProjectConfig::default(),
            global_config: GlobalConfig::new("/repo"),
            path: path.into(),
            raw_module_map: None,
        };
        serde_json::to_string(&item).unwrap()
    }

    #[tokio::test]
    async fn test_serve_answers_every_line_in_order() {
        let input = format!(
            "{}\n\n{}\nnot json\n{}\n",
            item_line("a.test.js"),
            item_line("boom.test.js"),
            item_line("c.test.js")
        );
        let mut output = Vec::new();

        serve(&EchoExecutor, input.as_bytes(), &mut output)
            .await
            .unwrap();

        let responses: Vec<WorkerResponse> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();

        assert_eq!(responses.len(), 4);
        assert_eq!(
            responses[0],
            WorkerResponse::Result {
                result: TestResult::pass("a.test.js", 1)
            }
        );
        assert_eq!(
            responses[1],
            WorkerResponse::Error {
                message: "executor blew up".to_string()
            }
        );
        assert!(matches!(
            &responses[2],
            WorkerResponse::Error { message } if message.starts_with("Invalid work item")
        ));
        assert_eq!(
            responses[3],
            WorkerResponse::Result {
                result: TestResult::pass("c.test.js", 1)
            }
        );
    }

    #[test]
    fn test_response_wire_format() {
        let response: WorkerResponse = serde_json::from_str(
            r#"{"type":"result","result":{"path":"x","status":"fail","message":"m"}}"#,
        )
        .unwrap();
        assert_eq!(
            response,
            WorkerResponse::Result {
                result: TestResult::fail("x", 0, "m")
            }
        );
    }
}
