//! Engine info from the command-line program.

use crate::core::{EngineInfo, InfoSource, ScanError};

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;

/// Default name of the engine's command-line scanner.
pub const DEFAULT_PROGRAM: &str = "scan";

/// Runs the engine's command-line program to read its versions.
///
/// `scan -v` prints the program version and `scan -V` the virus
/// definitions version; each invocation is bounded by the timeout.
#[derive(Debug, Clone)]
pub struct ProcessInfoSource {
    program: PathBuf,
    version_args: Vec<String>,
    definitions_args: Vec<String>,
    timeout: Duration,
}

impl Default for ProcessInfoSource {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRAM)
    }
}

impl ProcessInfoSource {
    /// Creates a source that runs `program`.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            version_args: vec!["-v".to_string()],
            definitions_args: vec!["-V".to_string()],
            timeout: Duration::from_secs(10),
        }
    }

    /// Arguments that make the program print its version.
    pub fn with_version_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.version_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Arguments that make the program print its definitions version.
    pub fn with_definitions_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.definitions_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the per-invocation timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(&self, args: &[String]) -> Result<String, ScanError> {
        let program = self.program.display().to_string();
        let mut command = Command::new(&self.program);
        command.args(args).kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| ScanError::timeout(format!("{} {}", program, args.join(" ")), self.timeout))?
            .map_err(|e| ScanError::process_failed(&program, e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ScanError::process_failed(
                &program,
                format!("exited with {}: {}", output.status, stderr.trim()),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let value = stdout.trim();
        if value.is_empty() {
            return Err(ScanError::process_failed(&program, "printed nothing"));
        }
        Ok(value.to_string())
    }
}

#[async_trait]
impl InfoSource for ProcessInfoSource {
    fn name(&self) -> &str {
        "process"
    }

    async fn query(&self) -> Result<EngineInfo, ScanError> {
        let version = self.run(&self.version_args).await?;
        let definitions = self.run(&self.definitions_args).await?;
        tracing::debug!(
            program = %self.program.display(),
            version = %version,
            definitions = %definitions,
            "Read engine info from program"
        );
        Ok(EngineInfo::new(version, definitions))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_query_reads_both_versions() {
        let source = ProcessInfoSource::new("echo")
            .with_version_args(["4.3.1"])
            .with_definitions_args(["24011004"]);

        let info = source.query().await.unwrap();
        assert_eq!(info.version, "4.3.1");
        assert_eq!(info.virus_definitions_version, "24011004");
        assert_eq!(source.name(), "process");
    }

    #[tokio::test]
    async fn test_missing_program() {
        let source = ProcessInfoSource::new("/nonexistent/scanline/scan");
        let err = source.query().await.unwrap_err();
        assert!(matches!(err, ScanError::ProcessFailed { .. }));
    }

    #[tokio::test]
    async fn test_failing_program() {
        let source = ProcessInfoSource::new("false");
        let err = source.query().await.unwrap_err();
        assert!(matches!(err, ScanError::ProcessFailed { .. }));
    }

    #[test]
    fn test_default_program() {
        let source = ProcessInfoSource::default();
        assert_eq!(source.program, PathBuf::from("scan"));
        assert_eq!(source.version_args, vec!["-v"]);
        assert_eq!(source.definitions_args, vec!["-V"]);
    }
}
