//! Filtering, ranking and selection over stream formats. Pure functions.

use std::cmp::Ordering;

use tracing::debug;

use crate::domain::{Resolution, SortKey};
use crate::media::RawFormat;

#[derive(Debug, Clone, PartialEq)]
pub struct FormatCandidate {
    pub format_id: String,
    pub resolution: Resolution,
    pub bitrate: f64,
    pub fps: Option<f64>,
    pub filesize: Option<u64>,
    pub container: Option<String>,
}

impl FormatCandidate {
    /// `None` when the format lacks a resolution or bitrate, or when its
    /// resolution does not parse.
    pub fn from_raw(raw: &RawFormat) -> Option<Self> {
        let resolution = raw.resolution.as_deref()?;
        let bitrate = raw.tbr?;
        let resolution = match resolution.parse::<Resolution>() {
            Ok(resolution) => resolution,
            Err(err) => {
                debug!(format = %raw.format_id, error = %err, "skipping format");
                return None;
            }
        };
        Some(Self {
            format_id: raw.format_id.clone(),
            resolution,
            bitrate,
            fps: raw.fps,
            filesize: raw.filesize.or(raw.filesize_approx).map(|size| size as u64),
            container: raw.ext.clone(),
        })
    }
}

pub fn filter_eligible(raw: &[RawFormat]) -> Vec<FormatCandidate> {
    raw.iter().filter_map(FormatCandidate::from_raw).collect()
}

/// Stable descending sort. Missing sizes and frame rates always sort last.
pub fn sort_by(mut formats: Vec<FormatCandidate>, key: SortKey) -> Vec<FormatCandidate> {
    formats.sort_by(|a, b| match key {
        SortKey::Resolution => b.resolution.cmp(&a.resolution),
        SortKey::Bitrate => b.bitrate.total_cmp(&a.bitrate),
        SortKey::FileSize => descending_present_first(a.filesize, b.filesize, |a, b| a.cmp(b)),
        SortKey::Fps => descending_present_first(a.fps, b.fps, f64::total_cmp),
    });
    formats
}

fn descending_present_first<T>(
    a: Option<T>,
    b: Option<T>,
    cmp: impl Fn(&T, &T) -> Ordering,
) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => cmp(&b, &a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

pub fn select_best_video(formats: &[FormatCandidate]) -> Option<&FormatCandidate> {
    formats
        .iter()
        .filter(|format| !format.resolution.is_audio_only())
        .max_by(|a, b| {
            a.resolution
                .cmp(&b.resolution)
                .then(a.bitrate.total_cmp(&b.bitrate))
        })
}

pub fn select_best_audio(formats: &[FormatCandidate]) -> Option<&FormatCandidate> {
    formats
        .iter()
        .filter(|format| format.resolution.is_audio_only())
        .max_by(|a, b| a.bitrate.total_cmp(&b.bitrate))
}
