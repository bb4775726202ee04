//! Bandwidth allocation for local tracks
//!
//! A bandwidth budget is expressed in kbps, with `0` meaning "no explicit cap".
//! For simulcast tracks the budget is split between the enabled variants in
//! proportion to the number of pixels each variant carries: a variant whose
//! resolution is scaled down by `s` weighs `1 / s²`. Disabled variants never
//! receive an allocation.
//!
//! Bitrates announced to the server in an offer are in bps; variants without
//! an explicit cap fall back to [`DefaultBitrates`].

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::track::{SimulcastConfig, TrackKind, Variant};
use crate::transport::EncodingParameters;

/// Bandwidth cap requested by the application for a track
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TrackBandwidthLimit {
    /// Total budget in kbps, split across variants for simulcast tracks
    Total(u32),
    /// Explicit per-variant budget in kbps
    PerVariant(BTreeMap<Variant, u32>),
}

impl Default for TrackBandwidthLimit {
    fn default() -> Self {
        TrackBandwidthLimit::Total(0)
    }
}

/// Bitrates used for encodings that have no explicit cap
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultBitrates {
    pub audio_kbps: u32,
    pub video_kbps: u32,
    pub low_kbps: u32,
    pub medium_kbps: u32,
    pub high_kbps: u32,
}

impl Default for DefaultBitrates {
    fn default() -> Self {
        Self {
            audio_kbps: 50,
            video_kbps: 1500,
            low_kbps: 150,
            medium_kbps: 500,
            high_kbps: 1500,
        }
    }
}

impl DefaultBitrates {
    pub fn for_variant(&self, variant: Variant) -> u32 {
        match variant {
            Variant::Low => self.low_kbps,
            Variant::Medium => self.medium_kbps,
            Variant::High => self.high_kbps,
        }
    }

    pub fn for_kind(&self, kind: TrackKind) -> u32 {
        match kind {
            TrackKind::Audio => self.audio_kbps,
            TrackKind::Video => self.video_kbps,
        }
    }
}

/// Bitrates announced to the server, in bps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TrackBitrates {
    Single(u32),
    Simulcast(BTreeMap<Variant, u32>),
}

/// Per-encoding caps currently applied to a track, in kbps (`None` = uncapped)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BandwidthAllocation {
    Single(Option<u32>),
    Simulcast(BTreeMap<Variant, Option<u32>>),
}

impl BandwidthAllocation {
    /// Resolve a requested limit against the track's simulcast configuration
    pub fn from_limit(
        simulcast: &SimulcastConfig,
        limit: &TrackBandwidthLimit,
        disabled: &BTreeSet<Variant>,
    ) -> Self {
        if !simulcast.enabled {
            let total = match limit {
                TrackBandwidthLimit::Total(kbps) => *kbps,
                TrackBandwidthLimit::PerVariant(caps) => {
                    caps.values().fold(0u32, |total, kbps| total.saturating_add(*kbps))
                }
            };
            return BandwidthAllocation::Single(cap(total));
        }

        let enabled: BTreeSet<Variant> =
            simulcast.active_encodings.difference(disabled).copied().collect();
        match limit {
            TrackBandwidthLimit::Total(kbps) => {
                BandwidthAllocation::Simulcast(split_bandwidth(*kbps, &enabled))
            }
            TrackBandwidthLimit::PerVariant(caps) => BandwidthAllocation::Simulcast(
                enabled
                    .iter()
                    .map(|variant| (*variant, caps.get(variant).copied().and_then(cap)))
                    .collect(),
            ),
        }
    }

    /// Cap for one encoding; the single encoding of a non-simulcast track ignores `variant`
    pub fn for_variant(&self, variant: Option<Variant>) -> Option<u32> {
        match (self, variant) {
            (BandwidthAllocation::Single(kbps), _) => *kbps,
            (BandwidthAllocation::Simulcast(caps), Some(variant)) => {
                caps.get(&variant).copied().flatten()
            }
            (BandwidthAllocation::Simulcast(_), None) => None,
        }
    }
}

fn cap(kbps: u32) -> Option<u32> {
    (kbps > 0).then_some(kbps)
}

/// Convert kbps to bps, saturating at `u32::MAX`
fn to_bps(kbps: u32) -> u32 {
    kbps.saturating_mul(1000)
}

/// Split `total_kbps` across `variants` proportionally to their pixel count
pub fn split_bandwidth(total_kbps: u32, variants: &BTreeSet<Variant>) -> BTreeMap<Variant, Option<u32>> {
    if total_kbps == 0 || variants.is_empty() {
        return variants.iter().map(|variant| (*variant, None)).collect();
    }

    let weight = |variant: &Variant| 1.0 / variant.scale_resolution_down_by().powi(2);
    let weight_sum: f64 = variants.iter().map(weight).sum();
    let unit = f64::from(total_kbps) / weight_sum;

    variants
        .iter()
        .map(|variant| (*variant, Some((unit * weight(variant)).round() as u32)))
        .collect()
}

/// Bitrates to announce for a track in an offer
pub fn offer_bitrates(
    kind: TrackKind,
    simulcast: &SimulcastConfig,
    allocation: &BandwidthAllocation,
    defaults: &DefaultBitrates,
) -> TrackBitrates {
    if simulcast.enabled {
        TrackBitrates::Simulcast(
            simulcast
                .active_encodings
                .iter()
                .map(|variant| {
                    let kbps = allocation
                        .for_variant(Some(*variant))
                        .unwrap_or_else(|| defaults.for_variant(*variant));
                    (*variant, to_bps(kbps))
                })
                .collect(),
        )
    } else {
        let kbps = allocation.for_variant(None).unwrap_or_else(|| defaults.for_kind(kind));
        TrackBitrates::Single(to_bps(kbps))
    }
}

/// Sender encodings for a track about to be attached to the transport
pub fn encoding_parameters(
    simulcast: &SimulcastConfig,
    allocation: &BandwidthAllocation,
    disabled: &BTreeSet<Variant>,
) -> Vec<EncodingParameters> {
    if !simulcast.enabled {
        return vec![EncodingParameters {
            rid: None,
            active: true,
            max_bitrate_bps: allocation.for_variant(None).map(to_bps),
            scale_resolution_down_by: None,
        }];
    }

    Variant::ALL
        .iter()
        .filter(|variant| simulcast.active_encodings.contains(variant))
        .map(|variant| EncodingParameters {
            rid: Some(*variant),
            active: !disabled.contains(variant),
            max_bitrate_bps: allocation.for_variant(Some(*variant)).map(to_bps),
            scale_resolution_down_by: Some(variant.scale_resolution_down_by()),
        })
        .collect()
}
