use std::io::Cursor;

use image::imageops::FilterType;
use image::ImageReader;
use screen_recap_common::config::DifferConfig;
use screen_recap_common::frame::Frame;
use tracing::debug;

/// Cheap content digest of one frame, compared only against the previous
/// kept frame's digest.
///
/// Decodable images get an average hash (aHash): grayscale, resize to
/// `hash_size` x `hash_size`, one bit per pixel against the mean. Payloads
/// that do not decode fall back to an FNV-1a hash of the raw bytes so the
/// differ always produces an answer. Neither form is cryptographic; a
/// mistaken match only affects sampling density.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameFingerprint {
    /// aHash bits of the decoded, downscaled grayscale image.
    Visual(Vec<bool>),
    /// FNV-1a of the raw payload bytes (undecodable payloads).
    Opaque(u64),
}

impl FrameFingerprint {
    pub fn of(frame: &Frame, hash_size: u32) -> Self {
        match compute_ahash(&frame.payload, hash_size) {
            Some(bits) => FrameFingerprint::Visual(bits),
            None => FrameFingerprint::Opaque(fnv1a(&frame.payload)),
        }
    }

    /// Whether `other` is close enough to count as the same scene.
    fn matches(&self, other: &Self, distance_threshold: u32) -> bool {
        match (self, other) {
            (FrameFingerprint::Visual(a), FrameFingerprint::Visual(b)) => {
                a.len() == b.len() && hamming(a, b) <= distance_threshold
            }
            (FrameFingerprint::Opaque(a), FrameFingerprint::Opaque(b)) => a == b,
            // A decodable frame next to an undecodable one is always a change.
            _ => false,
        }
    }
}

/// Compute an aHash (average hash) for an encoded image at the given
/// hash_size. Returns a bit vector of length hash_size*hash_size, or None
/// if the payload does not decode as an image.
pub fn compute_ahash(data: &[u8], hash_size: u32) -> Option<Vec<bool>> {
    let img = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .ok()?
        .decode()
        .ok()?;

    let gray = img
        .resize_exact(hash_size, hash_size, FilterType::Nearest)
        .to_luma8();

    let pixels: Vec<u8> = gray.pixels().map(|p| p.0[0]).collect();
    let mean: f64 = pixels.iter().map(|&p| p as f64).sum::<f64>() / pixels.len() as f64;
    let hash: Vec<bool> = pixels.iter().map(|&p| p as f64 > mean).collect();
    Some(hash)
}

/// Hamming distance between two equal-length bit vectors.
pub fn hamming(a: &[bool], b: &[bool]) -> u32 {
    a.iter().zip(b.iter()).filter(|(a, b)| a != b).count() as u32
}

fn fnv1a(data: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &byte in data {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

/// Decides which captured frames are worth analyzing.
///
/// Keeps the session's first frame unconditionally, then every frame whose
/// fingerprint differs from the previous *kept* frame's. The stored baseline
/// is replaced only on keep, so a slow drift is still caught once it
/// accumulates past the threshold.
pub struct FrameDiffer {
    hash_size: u32,
    distance_threshold: u32,
    last: Option<FrameFingerprint>,
}

impl FrameDiffer {
    pub fn new(config: &DifferConfig) -> Self {
        Self {
            hash_size: config.hash_size,
            distance_threshold: config.distance_threshold,
            last: None,
        }
    }

    /// Returns `true` if the frame should be analyzed (content changed).
    pub fn should_keep(&mut self, frame: &Frame) -> bool {
        let fingerprint = FrameFingerprint::of(frame, self.hash_size);

        match &self.last {
            None => {
                debug!(seq = frame.seq, "first frame, keeping unconditionally");
                self.last = Some(fingerprint);
                true
            }
            Some(previous) => {
                let keep = !previous.matches(&fingerprint, self.distance_threshold);
                debug!(seq = frame.seq, keep, "fingerprint comparison");
                if keep {
                    self.last = Some(fingerprint);
                }
                keep
            }
        }
    }

    /// Clear the stored baseline for a fresh session.
    pub fn reset(&mut self) {
        self.last = None;
    }
}
