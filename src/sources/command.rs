use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::SourceError;

/// Runs an external command line tool and returns its standard output.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String]) -> Result<String, SourceError>;
}

/// Spawns real processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<String, SourceError> {
        debug!("Running {} {}", program, args.join(" "));

        let output = Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(SourceError::Command {
                program: program.to_string(),
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
