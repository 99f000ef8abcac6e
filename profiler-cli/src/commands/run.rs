//! Run a command under observation

use super::CommandError;
use convenient_profiler::{
    Compression, FileResource, MetricKind, ModuleMetrics, ProfilerConfig, ProfilerListener,
    ResourceSampler, SessionMetrics, SessionSummary, StepListener,
};
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{info, warn};

/// Step name of the observed command in the lifecycle collection
pub const EXECUTE_STEP: &str = "execute";

/// Run `command`, record the session into `output` and return the child's exit code
pub async fn execute(
    config: ProfilerConfig,
    command: &[String],
    output: &Path,
) -> Result<i32, CommandError> {
    let (program, args) = command.split_first().ok_or("no command given")?;

    let session = Arc::new(SessionMetrics::new(command.to_vec()));
    let workdir = std::env::current_dir()?;
    let subject = workdir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "root".to_string());
    let _ = session.add_module(ModuleMetrics::new(subject.clone()));
    session.set_system_properties([
        ("user.dir".to_string(), workdir.display().to_string()),
        ("os.name".to_string(), std::env::consts::OS.to_string()),
        ("os.arch".to_string(), std::env::consts::ARCH.to_string()),
    ]);

    let sampler = ResourceSampler::new(Arc::clone(&session), config.sampling_interval).spawn();
    let listener = ProfilerListener::new(config.clone(), Arc::clone(&session));

    info!(command = %command.join(" "), "Starting observed command");
    listener.on_step_start(MetricKind::Lifecycle, EXECUTE_STEP, &subject);

    let spawned = Command::new(program)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn();
    let mut child = match spawned {
        Ok(child) => child,
        Err(e) => {
            let _ = sampler.stop().await;
            return Err(format!("failed to start '{}': {}", program, e).into());
        }
    };

    let stdout = child.stdout.take().ok_or("child stdout not captured")?;
    let stderr = child.stderr.take().ok_or("child stderr not captured")?;
    let echo = !config.quiet;
    let (out, err, status) = tokio::join!(
        capture(stdout, echo, false),
        capture(stderr, echo, true),
        child.wait()
    );

    let code = match status {
        Ok(status) if status.success() => {
            listener.on_step_success(MetricKind::Lifecycle, EXECUTE_STEP, &subject);
            0
        }
        Ok(status) => {
            listener.on_step_failure(
                MetricKind::Lifecycle,
                EXECUTE_STEP,
                &subject,
                &format!("exited with {}", status),
            );
            status.code().unwrap_or(1)
        }
        Err(e) => {
            warn!(error = %e, "Failed to wait for observed command");
            listener.on_step_failure(
                MetricKind::Lifecycle,
                EXECUTE_STEP,
                &subject,
                &format!("wait failed: {}", e),
            );
            1
        }
    };

    let rounds = sampler.stop().await;
    let _ = session.set_logs(format!("{}{}", out, err));
    let _ = listener.finish();

    let compression = compression_for(output);
    session.save(&FileResource::new(output), compression)?;
    info!(rounds, output = %output.display(), "Session recorded");

    if config.console_enabled {
        println!();
        print!("{}", SessionSummary::build(&session, &config));
    }
    if config.report_open {
        println!("📄 Report: {}", output.display());
    }
    if code != 0 {
        warn!(code, "Observed command failed");
    }
    Ok(code)
}

/// Zstd for `.zst` outputs, plain JSON otherwise
fn compression_for(output: &Path) -> Compression {
    match output.extension().and_then(|ext| ext.to_str()) {
        Some("zst") => Compression::Zstd,
        _ => Compression::None,
    }
}

/// Drain `stream` to EOF, echoing each line; bytes that are not UTF-8 are
/// replaced rather than treated as an error
async fn capture<R: AsyncRead + Unpin>(stream: R, echo: bool, is_stderr: bool) -> String {
    let mut reader = BufReader::new(stream);
    let mut captured = String::new();
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&line);
                if echo {
                    let text = text.trim_end_matches('\n');
                    if is_stderr {
                        eprintln!("{}", text);
                    } else {
                        println!("{}", text);
                    }
                }
                captured.push_str(&text);
            }
            Err(e) => {
                warn!(error = %e, stderr = is_stderr, "Stopped capturing command output");
                break;
            }
        }
    }
    captured
}
