//! Extra result variants built from the raw processed PNG sequence.
//!
//! Both take the sequence by reference and must run before the sequence is
//! handed to the encoder.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;
use crate::frame::{frame_file_name, FinalFrameSequence};

/// ZIP every frame into `output`. Blocking; call from `spawn_blocking`.
pub fn build_still_archive(sequence: &FinalFrameSequence, output: &Path) -> MediaResult<PathBuf> {
    let frames = sequence.sequence();
    let file = File::create(output)?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    // PNG is already compressed.
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

    for index in 0..frames.len() {
        zip.start_file(frame_file_name(index), options)?;
        let bytes = std::fs::read(frames.frame_path(index))?;
        zip.write_all(&bytes)?;
    }

    let mut writer = zip.finish()?;
    writer.flush()?;
    info!(frames = frames.len(), path = %output.display(), "Built still-frame archive");
    Ok(output.to_path_buf())
}

/// FFmpeg filter graph for a reduced-palette GIF that keeps one transparent entry.
pub fn palette_filter(max_colors: u16) -> String {
    format!(
        "split[a][b];[a]palettegen=max_colors={max_colors}:reserve_transparent=1:stats_mode=diff[p];\
         [b][p]paletteuse=dither=bayer:bayer_scale=3:alpha_threshold=128"
    )
}

/// Build a looping palette GIF from the sequence.
pub async fn build_palette_animation(
    runner: &FfmpegRunner,
    sequence: &FinalFrameSequence,
    output: &Path,
    max_colors: u16,
) -> MediaResult<PathBuf> {
    let frames = sequence.sequence();
    let cmd = FfmpegCommand::new(frames.pattern(), output)
        .image_sequence_input(frames.fps())
        .video_filter(palette_filter(max_colors))
        .output_args(["-loop", "0"]);

    runner.run(&cmd).await?;
    info!(frames = frames.len(), path = %output.display(), "Built palette animation");
    Ok(output.to_path_buf())
}
