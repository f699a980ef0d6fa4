use std::time::Duration;

use tracing::{debug, warn};

use super::hdr::StageFailure;
use super::runtime::{CommandSpec, PipelineCommandRunner, PipelineRuntimeError};

/// Asks the transform engine for its version. Exit status zero means usable;
/// anything else, including a failed launch, means unavailable.
pub fn probe_tool<R>(
    runner: &R,
    program: &str,
    timeout: Option<Duration>,
) -> Result<(), StageFailure>
where
    R: PipelineCommandRunner + ?Sized,
{
    let spec = CommandSpec::new(program)
        .arg("-version")
        .with_timeout(timeout);
    match runner.run(&spec) {
        Ok(output) if output.success() => {
            debug!(program, version = %first_line(output.stdout.as_str()), "transform engine available");
            Ok(())
        }
        Ok(output) => {
            warn!(
                program,
                status_code = output.status_code,
                stderr = %output.stderr.trim(),
                "transform engine not working"
            );
            Err(StageFailure::ToolUnavailable(format!(
                "version query exited with {}",
                output.status_code
            )))
        }
        Err(error) => {
            warn!(program, %error, "transform engine not found");
            Err(match error {
                PipelineRuntimeError::TimedOut { timeout_ms, .. } => {
                    StageFailure::TimedOut { timeout_ms }
                }
                other => StageFailure::ToolUnavailable(other.to_string()),
            })
        }
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default().trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::runtime::{CommandOutput, StdPipelineCommandRunner};

    struct FixedRunner(i32);

    impl PipelineCommandRunner for FixedRunner {
        fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, PipelineRuntimeError> {
            assert_eq!(spec.args, vec![String::from("-version")]);
            Ok(CommandOutput {
                status_code: self.0,
                stdout: String::from("Version: ImageMagick 7.1.1\nmore"),
                stderr: String::new(),
            })
        }
    }

    #[test]
    fn zero_exit_is_available() {
        assert_eq!(probe_tool(&FixedRunner(0), "magick", None), Ok(()));
    }

    #[test]
    fn non_zero_exit_is_unavailable() {
        let err = probe_tool(&FixedRunner(1), "magick", None).expect_err("should be unavailable");
        assert!(matches!(err, StageFailure::ToolUnavailable(_)));
    }

    #[test]
    fn launch_failure_is_unavailable() {
        let err = probe_tool(&StdPipelineCommandRunner, "hdr-look-missing-magick", None)
            .expect_err("missing tool should be unavailable");
        assert!(matches!(err, StageFailure::ToolUnavailable(_)));
    }
}
