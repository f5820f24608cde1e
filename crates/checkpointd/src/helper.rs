//! Descriptor extraction through an external helper process.
//!
//! The helper is any program that speaks one JSON object per line on
//! stdin/stdout:
//!
//! ```text
//! → {"op":"load"}                      ← {"ok":true}
//! → {"op":"detect","image":"/path"}    ← {"descriptor":[0.12, ...]} | {"descriptor":null}
//! → {"op":"enroll","image":"/path"}    ← {"descriptor":[0.12, ...]}
//!                                      ← {"error":"..."} on failure
//! ```
//!
//! Frames are handed over as PNG files in a scratch directory.

use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use checkpoint_core::{Descriptor, DescriptorExtractor, ExtractError, Frame};
use serde::{Deserialize, Deserializer, Serialize};

const FRAME_FILE: &str = "frame.png";

#[derive(Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum HelperRequest<'a> {
    Load,
    Detect { image: &'a Path },
    Enroll { image: &'a Path },
}

#[derive(Debug, Deserialize)]
struct HelperResponse {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    /// Outer `None`: key absent. `Some(None)`: explicit null (no face).
    #[serde(default, deserialize_with = "present")]
    descriptor: Option<Option<Vec<f32>>>,
}

fn present<'de, D>(deserializer: D) -> Result<Option<Option<Vec<f32>>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<Vec<f32>>::deserialize(deserializer).map(Some)
}

impl HelperResponse {
    fn parse(line: &str) -> Result<Self, ExtractError> {
        let response: HelperResponse = serde_json::from_str(line.trim())
            .map_err(|e| ExtractError::Protocol(format!("bad response {line:?}: {e}")))?;
        match response.error {
            Some(error) => Err(ExtractError::Backend(error)),
            None => Ok(response),
        }
    }

    fn descriptor(self) -> Result<Option<Descriptor>, ExtractError> {
        match self.descriptor {
            Some(values) => Ok(values.map(Descriptor::new)),
            None => Err(ExtractError::Protocol("response has no descriptor field".into())),
        }
    }
}

struct HelperProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

/// [`DescriptorExtractor`] backed by a long-lived helper process.
pub struct HelperExtractor {
    command: Vec<String>,
    scratch_dir: PathBuf,
    process: Option<HelperProcess>,
}

impl HelperExtractor {
    pub fn new(command: Vec<String>, scratch_dir: PathBuf) -> Self {
        Self {
            command,
            scratch_dir,
            process: None,
        }
    }

    fn spawn(&self) -> Result<HelperProcess, ExtractError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| ExtractError::Backend("empty extractor command".into()))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ExtractError::Backend("helper stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExtractError::Backend("helper stdout unavailable".into()))?;

        tracing::info!(program = %program, pid = child.id(), "extractor helper spawned");

        Ok(HelperProcess {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        })
    }

    fn call(&mut self, request: &HelperRequest<'_>) -> Result<HelperResponse, ExtractError> {
        let process = self.process.as_mut().ok_or(ExtractError::NotLoaded)?;

        let mut line = serde_json::to_string(request)
            .map_err(|e| ExtractError::Protocol(format!("encode request: {e}")))?;
        line.push('\n');
        process.stdin.write_all(line.as_bytes())?;
        process.stdin.flush()?;

        let mut response = String::new();
        if process.stdout.read_line(&mut response)? == 0 {
            return Err(ExtractError::Backend("helper closed its output".into()));
        }
        HelperResponse::parse(&response)
    }

    fn write_frame(&self, frame: &Frame) -> Result<PathBuf, ExtractError> {
        if !frame.is_complete() {
            return Err(ExtractError::Protocol(format!(
                "frame buffer of {} bytes does not cover {}x{}",
                frame.data.len(),
                frame.width,
                frame.height
            )));
        }
        let image = image::GrayImage::from_raw(frame.width, frame.height, frame.data.clone())
            .ok_or_else(|| ExtractError::Protocol("frame rejected by encoder".into()))?;
        let path = self.scratch_dir.join(FRAME_FILE);
        image
            .save(&path)
            .map_err(|e| ExtractError::Backend(format!("write {}: {e}", path.display())))?;
        Ok(path)
    }
}

impl DescriptorExtractor for HelperExtractor {
    fn load(&mut self) -> Result<(), ExtractError> {
        std::fs::create_dir_all(&self.scratch_dir)?;
        if self.process.is_none() {
            self.process = Some(self.spawn()?);
        }
        let response = self.call(&HelperRequest::Load)?;
        if !response.ok {
            return Err(ExtractError::Backend("helper refused to load models".into()));
        }
        tracing::info!("extraction models loaded");
        Ok(())
    }

    fn detect(&mut self, frame: &Frame) -> Result<Option<Descriptor>, ExtractError> {
        let path = self.write_frame(frame)?;
        self.call(&HelperRequest::Detect { image: &path })?.descriptor()
    }

    fn enroll(&mut self, reference_image: &Path) -> Result<Descriptor, ExtractError> {
        self.call(&HelperRequest::Enroll {
            image: reference_image,
        })?
        .descriptor()?
        .ok_or_else(|| ExtractError::NoFace(reference_image.display().to_string()))
    }
}

impl Drop for HelperExtractor {
    fn drop(&mut self) {
        if let Some(mut process) = self.process.take() {
            let _ = process.child.kill();
            let _ = process.child.wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Shell helper answering load/detect/enroll; enroll of "blank" has no face.
    const SCRIPT: &str = r#"
while IFS= read -r line; do
  case "$line" in
    *'"op":"load"'*) echo '{"ok":true}' ;;
    *'"op":"detect"'*) echo '{"descriptor":[0.25,0.5]}' ;;
    *blank*) echo '{"descriptor":null}' ;;
    *'"op":"enroll"'*) echo '{"descriptor":[1.0,0.0]}' ;;
    *) echo '{"error":"unknown op"}' ;;
  esac
done
"#;

    fn helper(dir: &Path) -> HelperExtractor {
        HelperExtractor::new(
            vec!["sh".into(), "-c".into(), SCRIPT.into()],
            dir.to_path_buf(),
        )
    }

    #[test]
    fn test_parse_responses() {
        assert!(HelperResponse::parse(r#"{"ok":true}"#).unwrap().ok);

        let face = HelperResponse::parse(r#"{"descriptor":[0.5]}"#).unwrap();
        assert_eq!(face.descriptor().unwrap().unwrap().values(), &[0.5]);

        let none = HelperResponse::parse(r#"{"descriptor":null}"#).unwrap();
        assert!(none.descriptor().unwrap().is_none());

        let missing = HelperResponse::parse(r#"{"ok":true}"#).unwrap();
        assert!(matches!(missing.descriptor(), Err(ExtractError::Protocol(_))));

        assert!(matches!(
            HelperResponse::parse(r#"{"error":"model crashed"}"#),
            Err(ExtractError::Backend(ref m)) if m == "model crashed"
        ));
        assert!(matches!(HelperResponse::parse("not json"), Err(ExtractError::Protocol(_))));
    }

    #[test]
    fn test_request_encoding() {
        let json = serde_json::to_string(&HelperRequest::Detect {
            image: Path::new("/tmp/frame.png"),
        })
        .unwrap();
        assert_eq!(json, r#"{"op":"detect","image":"/tmp/frame.png"}"#);
        assert_eq!(serde_json::to_string(&HelperRequest::Load).unwrap(), r#"{"op":"load"}"#);
    }

    #[test]
    fn test_calls_before_load_fail() {
        let dir = tempfile::tempdir().unwrap();
        let mut extractor = helper(dir.path());
        assert!(matches!(
            extractor.enroll(Path::new("/faces/alice.jpg")),
            Err(ExtractError::NotLoaded)
        ));
    }

    #[test]
    fn test_round_trip_through_shell_helper() {
        let dir = tempfile::tempdir().unwrap();
        let mut extractor = helper(dir.path());
        extractor.load().unwrap();

        let frame = Frame::new(vec![128; 16], 4, 4, 1);
        let descriptor = extractor.detect(&frame).unwrap().unwrap();
        assert_eq!(descriptor.values(), &[0.25, 0.5]);
        assert!(dir.path().join(FRAME_FILE).exists());

        assert_eq!(
            extractor.enroll(Path::new("/faces/alice.jpg")).unwrap().values(),
            &[1.0, 0.0]
        );
        assert!(matches!(
            extractor.enroll(Path::new("/faces/blank.jpg")),
            Err(ExtractError::NoFace(_))
        ));
    }

    #[test]
    fn test_incomplete_frame_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut extractor = helper(dir.path());
        extractor.load().unwrap();
        let frame = Frame::new(vec![0; 3], 4, 4, 1);
        assert!(matches!(extractor.detect(&frame), Err(ExtractError::Protocol(_))));
    }

    #[test]
    fn test_empty_command() {
        let dir = tempfile::tempdir().unwrap();
        let mut extractor = HelperExtractor::new(Vec::new(), dir.path().to_path_buf());
        assert!(matches!(extractor.load(), Err(ExtractError::Backend(_))));
    }
}
