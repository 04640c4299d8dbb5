//! Joining clips end to end.

use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::command::{FfmpegCommand, FfmpegProgress, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::probe::{probe_video, VideoInfo};

/// Protocols the concat demuxer may open when a clip is a URL.
const REMOTE_PROTOCOLS: &str = "file,http,https,tcp,tls";

/// How the clips were joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StitchMethod {
    /// Packets copied through the concat demuxer.
    StreamCopy,
    /// Decoded and re-encoded to H.264 through the concat filter.
    Reencode,
}

impl StitchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            StitchMethod::StreamCopy => "stream_copy",
            StitchMethod::Reencode => "reencode",
        }
    }
}

/// A joined clip on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct StitchedVideo {
    pub path: PathBuf,
    pub method: StitchMethod,
    pub content_type: &'static str,
}

/// Joins clips, in order, into one MP4.
///
/// Local clips that share codec, size and rate are stream-copied. Anything
/// else, or a copy that fails, is decoded and re-encoded.
#[derive(Debug, Clone)]
pub struct Stitcher {
    runner: FfmpegRunner,
    probe_timeout: Duration,
}

impl Stitcher {
    pub fn new(runner: FfmpegRunner, probe_timeout: Duration) -> Self {
        Self { runner, probe_timeout }
    }

    /// Command for the stream-copy attempt, reading the clip list at `list`.
    pub fn copy_command(&self, list: &Path, sources: &[String], output: &Path) -> FfmpegCommand {
        let cmd = FfmpegCommand::new(list, output)
            .input_arg("-f")
            .input_arg("concat")
            .input_arg("-safe")
            .input_arg("0");
        let cmd = if sources.iter().any(|s| is_remote(s)) {
            cmd.input_arg("-protocol_whitelist").input_arg(REMOTE_PROTOCOLS)
        } else {
            cmd
        };
        cmd.output_args(["-c", "copy", "-avoid_negative_ts", "make_zero"])
    }

    /// Command for the re-encode fallback. Audio is dropped.
    pub fn reencode_command(&self, sources: &[String], output: &Path) -> MediaResult<FfmpegCommand> {
        let (first, rest) = sources
            .split_first()
            .ok_or_else(|| MediaError::InvalidSequence("no clips to stitch".to_string()))?;

        let labels: String = (0..sources.len()).map(|i| format!("[{i}:v]")).collect();
        let filter = format!("{labels}concat=n={}:v=1:a=0[v]", sources.len());

        let cmd = rest
            .iter()
            .fold(FfmpegCommand::new(first, output), |cmd, source| cmd.add_input(source));
        Ok(cmd.filter_complex(filter).output_args([
            "-map",
            "[v]",
            "-c:v",
            "libx264",
            "-preset",
            "ultrafast",
            "-crf",
            "23",
            "-pix_fmt",
            "yuv420p",
            "-movflags",
            "+faststart",
        ]))
    }

    /// Join `sources` into `output`.
    pub async fn stitch<F>(&self, sources: &[String], output: &Path, on_progress: F) -> MediaResult<StitchedVideo>
    where
        F: Fn(FfmpegProgress) + Clone + Send + 'static,
    {
        if sources.len() < 2 {
            return Err(MediaError::InvalidSequence(format!(
                "stitching needs at least two clips, got {}",
                sources.len()
            )));
        }
        for source in sources.iter().filter(|s| !is_remote(s)) {
            if !Path::new(source).exists() {
                return Err(MediaError::FileNotFound(PathBuf::from(source)));
            }
        }

        info!(clips = sources.len(), output = %output.display(), "Stitching clips");

        if !self.clips_match(sources).await? {
            return self.reencode(sources, output, on_progress).await;
        }

        let list = output.with_extension("concat.txt");
        tokio::fs::write(&list, concat_list(sources)).await?;
        let copied = self
            .runner
            .run_with_progress(&self.copy_command(&list, sources, output), on_progress.clone())
            .await;
        if let Err(e) = tokio::fs::remove_file(&list).await {
            warn!("Failed to remove concat list {}: {}", list.display(), e);
        }

        match copied {
            Ok(()) => self.finished(sources, output, StitchMethod::StreamCopy),
            Err(e @ (MediaError::FfmpegNotFound | MediaError::Io(_))) => Err(e),
            Err(e) => {
                warn!("Stream copy failed, re-encoding instead: {}", e);
                self.reencode(sources, output, on_progress).await
            }
        }
    }

    async fn reencode<F>(&self, sources: &[String], output: &Path, on_progress: F) -> MediaResult<StitchedVideo>
    where
        F: Fn(FfmpegProgress) + Send + 'static,
    {
        self.runner
            .run_with_progress(&self.reencode_command(sources, output)?, on_progress)
            .await?;
        self.finished(sources, output, StitchMethod::Reencode)
    }

    /// Whether the local clips can be joined without decoding. Remote clips
    /// are not probed; a failed copy still falls back to a re-encode.
    async fn clips_match(&self, sources: &[String]) -> MediaResult<bool> {
        let mut infos = Vec::with_capacity(sources.len());
        for source in sources.iter().filter(|s| !is_remote(s)) {
            infos.push(probe_video(source, self.probe_timeout).await?);
        }
        let matched = same_stream_layout(&infos);
        debug!(probed = infos.len(), matched, "Compared clip stream layouts");
        Ok(matched)
    }

    fn finished(&self, sources: &[String], output: &Path, method: StitchMethod) -> MediaResult<StitchedVideo> {
        if !output.exists() {
            return Err(MediaError::ffmpeg_failed(
                format!("stitch produced no file at {}", output.display()),
                None,
                None,
            ));
        }

        info!(method = method.as_str(), "Stitched {} clips", sources.len());
        Ok(StitchedVideo {
            path: output.to_path_buf(),
            method,
            content_type: "video/mp4",
        })
    }
}

/// Same codec, frame size and frame rate across every clip.
fn same_stream_layout(infos: &[VideoInfo]) -> bool {
    let Some(first) = infos.first() else {
        return true;
    };
    infos.iter().all(|info| {
        info.codec == first.codec
            && info.width == first.width
            && info.height == first.height
            && (info.fps - first.fps).abs() < 0.01
    })
}

fn is_remote(source: &str) -> bool {
    source.contains("://")
}

/// Concat demuxer script listing every clip. Paths are absolutized so the list
/// can live anywhere.
pub fn concat_list(sources: &[String]) -> String {
    sources
        .iter()
        .map(|source| {
            let path = if is_remote(source) {
                source.clone()
            } else {
                std::path::absolute(source)
                    .map(|p| p.to_string_lossy().to_string())
                    .unwrap_or_else(|_| source.clone())
            };
            format!("file '{}'\n", path.replace('\'', r"'\''"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clips(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_concat_list_quotes_paths() {
        let list = concat_list(&clips(&["/clips/a.mp4", "/clips/it's.mp4", "https://cdn/x.mp4"]));
        let lines: Vec<&str> = list.lines().collect();
        assert_eq!(lines[0], "file '/clips/a.mp4'");
        assert_eq!(lines[1], r"file '/clips/it'\''s.mp4'");
        assert_eq!(lines[2], "file 'https://cdn/x.mp4'");
        assert!(concat_list(&clips(&["rel.mp4"])).contains(std::path::MAIN_SEPARATOR));
    }

    fn info(codec: &str, width: u32, fps: f64) -> VideoInfo {
        VideoInfo {
            duration: 1.0,
            width,
            height: 48,
            fps,
            codec: codec.to_string(),
            frame_count: None,
        }
    }

    #[test]
    fn test_stream_layout_comparison() {
        assert!(same_stream_layout(&[]));
        assert!(same_stream_layout(&[info("h264", 64, 24.0), info("h264", 64, 24.0)]));
        assert!(!same_stream_layout(&[info("h264", 64, 24.0), info("vp9", 64, 24.0)]));
        assert!(!same_stream_layout(&[info("h264", 64, 24.0), info("h264", 80, 24.0)]));
        assert!(!same_stream_layout(&[info("h264", 64, 24.0), info("h264", 64, 30.0)]));
    }

    #[test]
    fn test_copy_command() {
        let stitcher = Stitcher::new(FfmpegRunner::new(), Duration::from_secs(5));
        let args = stitcher
            .copy_command(Path::new("/w/list.txt"), &clips(&["/a.mp4", "/b.mp4"]), Path::new("/w/out.mp4"))
            .build_args();
        let input = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[input + 1], "/w/list.txt");
        assert!(args[..input].contains(&"concat".to_string()));
        assert!(!args.contains(&REMOTE_PROTOCOLS.to_string()));
        assert!(args[input..].contains(&"copy".to_string()));

        let args = stitcher
            .copy_command(Path::new("/w/list.txt"), &clips(&["/a.mp4", "https://cdn/b.mp4"]), Path::new("/w/out.mp4"))
            .build_args();
        assert!(args.contains(&REMOTE_PROTOCOLS.to_string()));
    }

    #[test]
    fn test_reencode_command_concats_every_clip() {
        let stitcher = Stitcher::new(FfmpegRunner::new(), Duration::from_secs(5));
        let args = stitcher
            .reencode_command(&clips(&["/a.mp4", "/b.mp4", "/c.mp4"]), Path::new("/w/out.mp4"))
            .unwrap()
            .build_args();
        assert_eq!(args.iter().filter(|a| *a == "-i").count(), 3);
        let filter = args.iter().position(|a| a == "-filter_complex").unwrap();
        assert_eq!(args[filter + 1], "[0:v][1:v][2:v]concat=n=3:v=1:a=0[v]");
        assert!(args.contains(&"libx264".to_string()));
        assert_eq!(args.last().unwrap(), "/w/out.mp4");

        assert!(stitcher.reencode_command(&[], Path::new("/w/out.mp4")).is_err());
    }

    #[tokio::test]
    async fn test_rejects_single_clip_and_missing_files() {
        let stitcher = Stitcher::new(FfmpegRunner::new(), Duration::from_secs(5));
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.mp4");

        let err = stitcher.stitch(&clips(&["/a.mp4"]), &out, |_| {}).await.unwrap_err();
        assert!(matches!(err, MediaError::InvalidSequence(_)));

        let missing = dir.path().join("gone.mp4").to_string_lossy().to_string();
        let err = stitcher
            .stitch(&[missing.clone(), missing], &out, |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::FileNotFound(_)));
    }
}
