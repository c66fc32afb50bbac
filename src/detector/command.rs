use super::{DetectionError, Detector, PlateCandidate};
use std::env;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{trace, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Detection model running as an external process.
///
/// Invoked as `program args... <image>`; stdout must be a JSON array of
/// `{"plate": str|null, "confidence": f, "bbox": [x, y, w, h]}`.
/// With a timeout set, a process still running at the deadline is killed.
#[derive(Debug)]
pub struct CommandDetector {
    name: String,
    program: PathBuf,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl CommandDetector {
    /// Fails with [`DetectionError::Unavailable`] when the program or one of the
    /// required files (model weights and the like) is missing.
    pub fn new(
        name: &str,
        program: &Path,
        args: &[String],
        requires: &[PathBuf],
    ) -> Result<Self, DetectionError> {
        let program = resolve_program(program).ok_or_else(|| {
            DetectionError::Unavailable(format!(
                "{}: program '{}' not found",
                name,
                program.display()
            ))
        })?;
        if let Some(missing) = requires.iter().find(|p| !p.exists()) {
            return Err(DetectionError::Unavailable(format!(
                "{}: required file '{}' not found",
                name,
                missing.display()
            )));
        }
        Ok(Self {
            name: name.to_string(),
            program,
            args: args.to_vec(),
            timeout: None,
        })
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn wait_for_exit(&self, child: &mut Child) -> Result<ExitStatus, DetectionError> {
        let limit = match self.timeout {
            Some(limit) => limit,
            None => return Ok(child.wait()?),
        };
        let start = Instant::now();
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }
            if start.elapsed() >= limit {
                warn!("{}: killing model process {} after {:?}", self.name, child.id(), limit);
                let _ = child.kill();
                let _ = child.wait();
                return Err(DetectionError::Timeout(limit));
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

/// Drains a child pipe on its own thread so a chatty model never stalls on a full pipe.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<io::Result<Vec<u8>>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            pipe.read_to_end(&mut buf)?;
        }
        Ok(buf)
    })
}

fn collect(reader: JoinHandle<io::Result<Vec<u8>>>) -> Result<Vec<u8>, DetectionError> {
    reader
        .join()
        .map_err(|_| DetectionError::Process("pipe reader panicked".into()))?
        .map_err(DetectionError::from)
}

impl Detector for CommandDetector {
    fn name(&self) -> &str {
        &self.name
    }

    fn detect(&self, image: &Path) -> Result<Vec<PlateCandidate>, DetectionError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(image)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        let stdout_reader = drain(child.stdout.take());
        let stderr_reader = drain(child.stderr.take());

        let status = self.wait_for_exit(&mut child)?;
        let stdout = collect(stdout_reader)?;
        let stderr = collect(stderr_reader)?;

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr);
            return Err(DetectionError::Process(format!(
                "{} exited with {}: {}",
                self.program.display(),
                status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&stdout);
        let trimmed = stdout.trim();
        trace!("{} output for {}: {}", self.name, image.display(), trimmed);
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(trimmed)?)
    }
}

fn resolve_program(program: &Path) -> Option<PathBuf> {
    if program.components().count() > 1 {
        return program.is_file().then(|| program.to_path_buf());
    }
    let paths = env::var_os("PATH")?;
    env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;

    // Scripts run through `sh` so the test never executes a file it just wrote.
    fn script_detector(dir: &Path, name: &str, body: &str) -> CommandDetector {
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        let args = vec![path.to_string_lossy().into_owned()];
        CommandDetector::new(name, Path::new("sh"), &args, &[]).unwrap()
    }

    #[test]
    fn test_parses_candidates_from_stdout() {
        let tmp = tempfile::tempdir().unwrap();
        let detector = script_detector(
            tmp.path(),
            "detect.sh",
            r#"echo '[{"plate": "4567890", "confidence": 0.88, "bbox": [10, 20, 200, 60]}]'"#,
        );
        let found = detector.detect(Path::new("/tmp/img.jpg")).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].plate.as_deref(), Some("4567890"));
    }

    #[test]
    fn test_image_path_is_last_argument() {
        let tmp = tempfile::tempdir().unwrap();
        let detector = script_detector(
            tmp.path(),
            "echo_arg.sh",
            r#"printf '[{"plate": "%s", "confidence": 0.5}]' "$(basename "$1")""#,
        );
        let found = detector.detect(Path::new("/data/frame_01.jpg")).unwrap();
        assert_eq!(found[0].plate.as_deref(), Some("frame_01.jpg"));
    }

    #[test]
    fn test_non_zero_exit_is_a_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let detector = script_detector(tmp.path(), "broken.sh", "echo 'no model' >&2; exit 3");
        let err = detector.detect(Path::new("/tmp/img.jpg")).unwrap_err();
        assert!(matches!(err, DetectionError::Process(_)));
    }

    #[test]
    fn test_garbage_output_is_a_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let detector = script_detector(tmp.path(), "garbage.sh", "echo 'not json'");
        let err = detector.detect(Path::new("/tmp/img.jpg")).unwrap_err();
        assert!(matches!(err, DetectionError::Output(_)));
    }

    #[test]
    fn test_overrunning_process_is_killed_at_deadline() {
        let tmp = tempfile::tempdir().unwrap();
        let marker = tmp.path().join("finished");
        let body = format!("sleep 2; touch '{}'", marker.display());
        let detector = script_detector(tmp.path(), "hang.sh", &body)
            .with_timeout(Some(Duration::from_millis(100)));

        let started = Instant::now();
        let err = detector.detect(Path::new("/tmp/img.jpg")).unwrap_err();
        assert!(matches!(err, DetectionError::Timeout(_)));
        assert!(started.elapsed() < Duration::from_secs(2));

        thread::sleep(Duration::from_secs(3));
        assert!(!marker.exists(), "model process outlived its deadline");
    }

    #[test]
    fn test_missing_weights_make_backend_unavailable() {
        let tmp = tempfile::tempdir().unwrap();
        let err = CommandDetector::new(
            "custom_model",
            Path::new("sh"),
            &[],
            &[tmp.path().join("weights/best.pt")],
        )
        .unwrap_err();
        assert!(matches!(err, DetectionError::Unavailable(_)));
    }
}
