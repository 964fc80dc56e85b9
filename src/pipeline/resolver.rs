//! Format selection policy.
//!
//! Selection is a pure function of the candidate list and the criteria, so the
//! same inputs always produce the same pick.

use std::cmp::Ordering;

use crate::config::Config;
use crate::extractors::{FormatCandidate, MediaMode};

/// Constraints for one resolution round
#[derive(Debug, Clone)]
pub struct SelectionCriteria<'a> {
    pub mode: MediaMode,

    /// Inclusive height ceiling for video. `None` means unlimited.
    pub max_height: Option<u32>,

    /// Exclusive bitrate ceiling for audio, set after a size violation
    pub below_bitrate: Option<f64>,

    /// Format ids already tried by this job
    pub excluded: &'a [String],

    /// Fall back to the smallest video when nothing fits the ceiling
    pub allow_fallback: bool,
}

impl<'a> SelectionCriteria<'a> {
    /// Criteria for the first round of a job
    pub fn initial(mode: MediaMode, max_height: Option<u32>, excluded: &'a [String]) -> Self {
        Self {
            mode,
            max_height,
            below_bitrate: None,
            excluded,
            allow_fallback: true,
        }
    }

    /// Same constraints with a different exclusion list
    pub fn excluding<'b>(&self, excluded: &'b [String]) -> SelectionCriteria<'b> {
        SelectionCriteria {
            mode: self.mode,
            max_height: self.max_height,
            below_bitrate: self.below_bitrate,
            excluded,
            allow_fallback: self.allow_fallback,
        }
    }

    /// Tighten the criteria below a candidate whose artifact was too large
    pub fn below(&mut self, oversized: &FormatCandidate) {
        self.allow_fallback = false;
        match self.mode {
            MediaMode::Video => {
                let height = oversized.height.unwrap_or(0);
                self.max_height = Some(height.saturating_sub(1));
            }
            MediaMode::Audio => {
                self.below_bitrate = Some(audio_bitrate(oversized));
            }
        }
    }
}

/// Flag candidates that already meet the forced output format for `mode`
pub fn mark_forced(candidates: &mut [FormatCandidate], config: &Config, mode: MediaMode) {
    for candidate in candidates.iter_mut() {
        candidate.satisfies_forced = match mode {
            MediaMode::Video => match config.forced_container() {
                Some(container) => candidate.container == container,
                None => true,
            },
            MediaMode::Audio => {
                candidate.is_audio_only()
                    && config
                        .forced_audio_format()
                        .map(|format| candidate.container == format)
                        .unwrap_or(true)
            }
        };
    }
}

/// Pick a candidate according to the selection policy
pub fn select<'c>(
    candidates: &'c [FormatCandidate],
    criteria: &SelectionCriteria<'_>,
) -> Option<&'c FormatCandidate> {
    let available = candidates
        .iter()
        .filter(|candidate| !criteria.excluded.contains(&candidate.format_id));

    match criteria.mode {
        MediaMode::Video => select_video(available, criteria),
        MediaMode::Audio => select_audio(available, criteria),
    }
}

fn select_video<'c>(
    available: impl Iterator<Item = &'c FormatCandidate>,
    criteria: &SelectionCriteria<'_>,
) -> Option<&'c FormatCandidate> {
    // Once downgrading, an unknown height cannot be shown to be lower
    let videos: Vec<&FormatCandidate> = available
        .filter(|c| c.has_video)
        .filter(|c| criteria.allow_fallback || c.height.is_some())
        .collect();

    let within = videos
        .iter()
        .copied()
        .filter(|c| criteria.max_height.map(|max| height(c) <= max).unwrap_or(true))
        .max_by(|a, b| height(a).cmp(&height(b)).then_with(|| tie_break(a, b)));

    if within.is_some() || !criteria.allow_fallback {
        return within;
    }

    // Nothing at or below the requested resolution: take the smallest one
    videos
        .into_iter()
        .min_by(|a, b| height(a).cmp(&height(b)).then_with(|| tie_break(b, a)))
}

fn select_audio<'c>(
    available: impl Iterator<Item = &'c FormatCandidate>,
    criteria: &SelectionCriteria<'_>,
) -> Option<&'c FormatCandidate> {
    let eligible: Vec<&FormatCandidate> = available
        .filter(|c| c.has_audio)
        .filter(|c| criteria.below_bitrate.map(|max| audio_bitrate(c) < max).unwrap_or(true))
        .collect();

    let by_bitrate = |a: &&FormatCandidate, b: &&FormatCandidate| {
        audio_bitrate(a)
            .total_cmp(&audio_bitrate(b))
            .then_with(|| tie_break(a, b))
    };

    eligible
        .iter()
        .copied()
        .filter(|c| c.is_audio_only())
        .max_by(by_bitrate)
        .or_else(|| eligible.iter().copied().filter(|c| c.is_muxed()).max_by(by_bitrate))
}

fn height(candidate: &FormatCandidate) -> u32 {
    candidate.height.unwrap_or(0)
}

fn bitrate(candidate: &FormatCandidate) -> f64 {
    candidate.bitrate_kbps.unwrap_or(0.0)
}

fn audio_bitrate(candidate: &FormatCandidate) -> f64 {
    candidate.audio_bitrate().unwrap_or(0.0)
}

/// Total order among otherwise equal candidates; `Greater` means preferred
fn tie_break(a: &FormatCandidate, b: &FormatCandidate) -> Ordering {
    a.satisfies_forced
        .cmp(&b.satisfies_forced)
        .then_with(|| a.has_audio.cmp(&b.has_audio))
        .then_with(|| bitrate(a).total_cmp(&bitrate(b)))
        .then_with(|| b.format_id.cmp(&a.format_id))
}
