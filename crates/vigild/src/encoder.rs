//! Face encoder adapter backed by a long-lived helper process.
//!
//! Wire format, one exchange per frame:
//! - stdin: a JSON header line `{"width":W,"height":H}` followed by exactly
//!   `W*H*3` bytes of interleaved RGB;
//! - stdout: one JSON line, an array of `{"box":[l,t,r,b],"embedding":[..]}`
//!   with boxes in the coordinates of the frame it was sent.

use image::RgbImage;
use serde::Serialize;
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use vigil_core::{EncodedFace, EncoderError, FaceEncoder};

#[derive(Serialize)]
struct FrameHeader {
    width: u32,
    height: u32,
}

pub struct SubprocessEncoder {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl SubprocessEncoder {
    /// Start the helper. `command` is split on whitespace; no shell is involved.
    pub fn spawn(command: &str) -> Result<Self, EncoderError> {
        let mut parts = command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| EncoderError::Protocol("empty encoder command".into()))?;

        let mut child = Command::new(program)
            .args(parts)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;

        let stdin = child.stdin.take().ok_or(EncoderError::Closed)?;
        let stdout = child.stdout.take().ok_or(EncoderError::Closed)?;
        tracing::info!(command, pid = child.id(), "face encoder started");

        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        })
    }

    fn send(&mut self, image: &RgbImage) -> std::io::Result<()> {
        let header = FrameHeader {
            width: image.width(),
            height: image.height(),
        };
        let line = serde_json::to_string(&header).map_err(std::io::Error::other)?;
        writeln!(self.stdin, "{line}")?;
        self.stdin.write_all(image.as_raw())?;
        self.stdin.flush()
    }
}

impl FaceEncoder for SubprocessEncoder {
    fn encode(&mut self, image: &RgbImage) -> Result<Vec<EncodedFace>, EncoderError> {
        self.send(image).map_err(|e| match e.kind() {
            ErrorKind::BrokenPipe => EncoderError::Closed,
            _ => EncoderError::Io(e),
        })?;

        let mut line = String::new();
        if self.stdout.read_line(&mut line)? == 0 {
            return Err(EncoderError::Closed);
        }
        serde_json::from_str(line.trim())
            .map_err(|e| EncoderError::Protocol(format!("bad encoder reply: {e}")))
    }
}

impl Drop for SubprocessEncoder {
    fn drop(&mut self) {
        if let Err(e) = self.child.kill() {
            tracing::debug!(error = %e, "face encoder already exited");
        }
        let _ = self.child.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    /// Write a helper script and return the command that runs it.
    fn script(dir: &Path, body: &str) -> String {
        let path = dir.join("encoder.sh");
        std::fs::write(&path, format!("{body}\n")).unwrap();
        format!("sh {}", path.display())
    }

    #[test]
    fn test_roundtrip_with_helper() {
        let dir = tempfile::tempdir().unwrap();
        // 2x1 frame = 6 RGB bytes per request.
        let cmd = script(
            dir.path(),
            r#"while IFS= read -r header; do
  head -c 6 > /dev/null
  echo '[{"box":[1,2,3,4],"embedding":[0.5,0.5]}]'
done"#,
        );
        let mut encoder = SubprocessEncoder::spawn(&cmd).unwrap();
        let image = RgbImage::new(2, 1);

        for _ in 0..2 {
            let faces = encoder.encode(&image).unwrap();
            assert_eq!(faces.len(), 1);
            assert_eq!(faces[0].face_box, vigil_core::FaceBox::new(1, 2, 3, 4));
            assert_eq!(faces[0].embedding.values, vec![0.5, 0.5]);
        }
    }

    #[test]
    fn test_empty_reply_is_no_faces() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = script(
            dir.path(),
            r#"while IFS= read -r header; do
  head -c 6 > /dev/null
  echo '[]'
done"#,
        );
        let mut encoder = SubprocessEncoder::spawn(&cmd).unwrap();
        assert!(encoder.encode(&RgbImage::new(2, 1)).unwrap().is_empty());
    }

    #[test]
    fn test_garbage_reply_is_protocol_error() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = script(
            dir.path(),
            r#"while IFS= read -r header; do
  head -c 6 > /dev/null
  echo 'no faces here'
done"#,
        );
        let mut encoder = SubprocessEncoder::spawn(&cmd).unwrap();
        assert!(matches!(
            encoder.encode(&RgbImage::new(2, 1)),
            Err(EncoderError::Protocol(_))
        ));
    }

    #[test]
    fn test_exited_helper_is_closed() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = script(dir.path(), "exit 0");
        let mut encoder = SubprocessEncoder::spawn(&cmd).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(100));
        assert!(matches!(
            encoder.encode(&RgbImage::new(2, 1)),
            Err(EncoderError::Closed)
        ));
    }

    #[test]
    fn test_empty_command_rejected() {
        assert!(SubprocessEncoder::spawn("   ").is_err());
    }
}
