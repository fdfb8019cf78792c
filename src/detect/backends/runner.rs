use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use crate::detect::backend::InferenceBackend;
use crate::detect::result::DetectionResult;
use crate::error::BridgeError;

const BACKEND_NAME: &str = "runner";

/// Local model runner backend.
///
/// Writes the image to a temporary `.jpg`, runs
/// `<runner> --model <model> --image <tmp> --silent` and parses stdout.
/// The child is killed when it exceeds the inference timeout.
pub struct RunnerBackend {
    runner: PathBuf,
    model_path: PathBuf,
    timeout: Duration,
}

impl RunnerBackend {
    /// Fails with a `Config` error when the model file does not exist.
    pub fn new<R, M>(runner: R, model_path: M, timeout: Duration) -> Result<Self, BridgeError>
    where
        R: Into<PathBuf>,
        M: Into<PathBuf>,
    {
        let model_path = model_path.into();
        if !model_path.is_file() {
            return Err(BridgeError::Config(format!(
                "model file not found at {}",
                model_path.display()
            )));
        }
        log::info!("using local model at {}", model_path.display());
        Ok(Self {
            runner: runner.into(),
            model_path,
            timeout,
        })
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }
}

impl InferenceBackend for RunnerBackend {
    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn warm_up(&mut self) -> Result<(), BridgeError> {
        let mut command = Command::new(&self.runner);
        command.arg("--version");
        let output = run_with_timeout(command, self.timeout).map_err(|e| {
            BridgeError::Config(format!(
                "model runner '{}' is not usable: {}",
                self.runner.display(),
                e
            ))
        })?;
        if !output.status.success() {
            return Err(BridgeError::Config(format!(
                "model runner '{}' --version exited with {}",
                self.runner.display(),
                output.status
            )));
        }
        log::info!("model runner {} is installed", self.runner.display());
        Ok(())
    }

    fn classify(&mut self, image: &[u8]) -> Result<DetectionResult, BridgeError> {
        let mut file = tempfile::Builder::new()
            .prefix("person-detector-")
            .suffix(".jpg")
            .tempfile()
            .map_err(|e| BridgeError::inference(BACKEND_NAME, format!("temp file: {}", e)))?;
        file.write_all(image)
            .and_then(|_| file.flush())
            .map_err(|e| BridgeError::inference(BACKEND_NAME, format!("write image: {}", e)))?;

        let mut command = Command::new(&self.runner);
        command
            .arg("--model")
            .arg(&self.model_path)
            .arg("--image")
            .arg(file.path())
            .arg("--silent");
        log::debug!("running {:?}", command);

        let output = run_with_timeout(command, self.timeout)?;
        if !output.status.success() {
            return Err(BridgeError::inference(
                BACKEND_NAME,
                format!(
                    "exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        log::debug!("model output: {}", stdout.trim());
        Ok(parse_runner_output(&stdout))
    }
}

/// Parse the runner's human-readable output.
///
/// `person_detected` is a plain substring check for "person" and is NOT
/// derived from the extracted confidence; the two can disagree. Confidence
/// comes from `person ... NN.N%` (percent) or else `confidence ... N.N`
/// (fraction), defaulting to 0.
pub fn parse_runner_output(output: &str) -> DetectionResult {
    static PERCENT_RE: OnceLock<regex::Regex> = OnceLock::new();
    static FRACTION_RE: OnceLock<regex::Regex> = OnceLock::new();
    let percent_re =
        PERCENT_RE.get_or_init(|| regex::Regex::new(r"(?i)person.*?(\d+\.\d+)%").unwrap());
    let fraction_re =
        FRACTION_RE.get_or_init(|| regex::Regex::new(r"(?i)confidence.*?(\d+\.\d+)").unwrap());

    let person_detected = output.to_lowercase().contains("person");

    let confidence = if let Some(value) = capture_f64(percent_re, output) {
        value / 100.0
    } else {
        capture_f64(fraction_re, output).unwrap_or(0.0)
    };

    DetectionResult::new(person_detected, confidence)
}

fn capture_f64(re: &regex::Regex, text: &str) -> Option<f64> {
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn run_with_timeout(mut command: Command, timeout: Duration) -> Result<Output, BridgeError> {
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| BridgeError::inference(BACKEND_NAME, format!("spawn failed: {}", e)))?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let stdout_reader = std::thread::spawn(move || read_pipe(stdout));
    let stderr_reader = std::thread::spawn(move || read_pipe(stderr));

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(BridgeError::inference(
                    BACKEND_NAME,
                    format!("timed out after {}s", timeout.as_secs_f32()),
                ));
            }
            Ok(None) => std::thread::sleep(Duration::from_millis(20)),
            Err(e) => {
                return Err(BridgeError::inference(
                    BACKEND_NAME,
                    format!("wait failed: {}", e),
                ))
            }
        }
    };

    Ok(Output {
        status,
        stdout: stdout_reader.join().unwrap_or_default(),
        stderr: stderr_reader.join().unwrap_or_default(),
    })
}

fn read_pipe<R: Read>(pipe: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buf);
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_format_is_scaled() {
        let result = parse_runner_output("Result: person 87.5% (box 12,40,80,200)\n");
        assert!(result.person_detected);
        assert!((result.confidence - 0.875).abs() < 1e-9);
    }

    #[test]
    fn fraction_format_is_used_when_no_percent() {
        let result = parse_runner_output("label=Person confidence: 0.64\n");
        assert!(result.person_detected);
        assert!((result.confidence - 0.64).abs() < 1e-9);
    }

    #[test]
    fn percent_format_wins_over_fraction() {
        let result = parse_runner_output("confidence 0.10\nperson 91.0%\n");
        assert!((result.confidence - 0.91).abs() < 1e-9);
    }

    #[test]
    fn detected_flag_is_independent_of_confidence() {
        // "person" appears but no number follows: detected with zero confidence.
        let result = parse_runner_output("classes: person, background\n");
        assert!(result.person_detected);
        assert_eq!(result.confidence, 0.0);

        // A confidence without the word "person": not detected, yet confidence is set.
        let result = parse_runner_output("background confidence 0.93\n");
        assert!(!result.person_detected);
        assert!((result.confidence - 0.93).abs() < 1e-9);
    }

    #[test]
    fn patterns_do_not_cross_lines() {
        let result = parse_runner_output("person\n55.0%\n");
        assert!(result.person_detected);
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn empty_output_is_nothing() {
        assert_eq!(parse_runner_output(""), DetectionResult::none());
    }

    #[test]
    fn missing_model_is_a_config_error() {
        let err = RunnerBackend::new(
            "edge-impulse-linux-runner",
            "/nonexistent/model.eim",
            Duration::from_secs(1),
        )
        .err()
        .expect("missing model must fail");
        assert!(err.is_fatal());
        assert!(err.to_string().contains("/nonexistent/model.eim"));
    }

    #[test]
    fn missing_runner_is_an_inference_error() {
        let model = tempfile::NamedTempFile::new().unwrap();
        let mut backend = RunnerBackend::new(
            "/nonexistent/edge-impulse-linux-runner",
            model.path(),
            Duration::from_secs(1),
        )
        .unwrap();
        let err = backend.classify(b"\xff\xd8jpeg").unwrap_err();
        assert!(matches!(err, BridgeError::Inference { .. }));
        assert!(backend.warm_up().unwrap_err().is_fatal());
    }
}
