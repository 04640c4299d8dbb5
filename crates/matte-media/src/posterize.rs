//! Frame-rate reduction ("posterize time").
//!
//! Every `interval`-th frame is kept, where `interval = round(src / target)`
//! with a minimum of 1, and survivors are renumbered from zero. The reduced
//! sequence plays at `src / interval`, so its wall-clock duration matches the
//! source.

use tracing::debug;

use crate::error::{MediaError, MediaResult};
use crate::frame::{Frame, FrameSequence};

/// Keep-every-n interval for a source and target rate.
pub fn reduction_interval(source_fps: f64, target_fps: f64) -> MediaResult<usize> {
    if !(source_fps.is_finite() && source_fps > 0.0 && target_fps.is_finite() && target_fps > 0.0) {
        return Err(MediaError::stage(
            "posterize",
            format!("invalid frame rates {source_fps} -> {target_fps}"),
        ));
    }
    Ok(((source_fps / target_fps).round() as usize).max(1))
}

/// Output rate for a reduced sequence.
pub fn output_fps(source_fps: f64, interval: usize) -> f64 {
    source_fps / interval as f64
}

/// Reduce an in-memory frame list. Returns the survivors and their playback rate.
pub fn posterize_frames(frames: Vec<Frame>, source_fps: f64, target_fps: f64) -> MediaResult<(Vec<Frame>, f64)> {
    let interval = reduction_interval(source_fps, target_fps)?;
    let kept = frames
        .into_iter()
        .filter(|frame| frame.index % interval == 0)
        .enumerate()
        .map(|(ordinal, mut frame)| {
            frame.index = ordinal;
            frame
        })
        .collect();
    Ok((kept, output_fps(source_fps, interval)))
}

/// Reduce an on-disk sequence in place: dropped frames are deleted and the
/// survivors renamed to contiguous ordinals.
pub async fn posterize_sequence(sequence: FrameSequence, target_fps: f64) -> MediaResult<FrameSequence> {
    let interval = reduction_interval(sequence.fps(), target_fps)?;
    if interval == 1 {
        return Ok(sequence);
    }

    let total = sequence.len();
    for index in (0..total).filter(|i| i % interval != 0) {
        tokio::fs::remove_file(sequence.frame_path(index)).await?;
    }

    // Ascending renames never collide: the destination ordinal k is either a
    // deleted frame or was itself moved to k / interval earlier.
    let mut kept = 0;
    for index in (0..total).step_by(interval) {
        if index != kept {
            tokio::fs::rename(sequence.frame_path(index), sequence.frame_path(kept)).await?;
        }
        kept += 1;
    }

    let fps = output_fps(sequence.fps(), interval);
    debug!(
        source_frames = total,
        kept_frames = kept,
        interval,
        fps,
        "Posterized frame sequence"
    );
    Ok(sequence.with_count_and_fps(kept, fps))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::save_frame;
    use image::{Rgba, RgbaImage};
    use matte_models::JobId;
    use tempfile::TempDir;

    fn frames(n: usize) -> Vec<Frame> {
        let job = JobId::from_string("posterize-test");
        (0..n)
            .map(|i| Frame::new(i, RgbaImage::from_pixel(1, 1, Rgba([i as u8, 0, 0, 255])), job.clone()))
            .collect()
    }

    #[test]
    fn test_interval() {
        assert_eq!(reduction_interval(24.0, 12.0).unwrap(), 2);
        assert_eq!(reduction_interval(24.0, 8.0).unwrap(), 3);
        assert_eq!(reduction_interval(30.0, 12.0).unwrap(), 3);
        assert_eq!(reduction_interval(10.0, 12.0).unwrap(), 1);
        assert!(reduction_interval(0.0, 12.0).is_err());
    }

    #[test]
    fn test_48_frames_24_to_12() {
        let (kept, fps) = posterize_frames(frames(48), 24.0, 12.0).unwrap();
        assert_eq!(kept.len(), 24);
        assert_eq!(fps, 12.0);
        assert!(kept.iter().enumerate().all(|(i, f)| f.index == i));
        // Survivor k was source frame 2k.
        assert_eq!(kept[5].image.get_pixel(0, 0)[0], 10);
        assert!((kept.len() as f64 / fps - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_non_integer_ratio_keeps_duration() {
        let (kept, fps) = posterize_frames(frames(30), 30.0, 12.0).unwrap();
        assert_eq!(kept.len(), 10);
        assert!((kept.len() as f64 / fps - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_on_disk_renumbering() {
        let dir = TempDir::new().unwrap();
        for frame in frames(48) {
            save_frame(dir.path(), &frame).unwrap();
        }
        let sequence = FrameSequence::scan(dir.path(), 24.0).unwrap();

        let reduced = posterize_sequence(sequence, 12.0).await.unwrap();
        assert_eq!(reduced.len(), 24);
        assert_eq!(reduced.fps(), 12.0);
        assert!((reduced.duration() - 2.0).abs() < 1e-9);

        let rescanned = FrameSequence::scan(dir.path(), 12.0).unwrap();
        assert_eq!(rescanned.len(), 24);
        let job = JobId::new();
        for k in 0..24 {
            let frame = rescanned.load(k, &job).unwrap();
            assert_eq!(frame.image.get_pixel(0, 0)[0] as usize, 2 * k);
        }
    }
}
