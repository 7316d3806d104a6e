/// Image container formats a captured frame may arrive in.
///
/// Sources hand us encoded bytes without metadata, so the format is sniffed
/// from magic numbers when something downstream needs it (e.g. building a
/// data URL for a vision API).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameEncoding {
    Jpeg,
    Png,
    Webp,
}

impl FrameEncoding {
    pub fn mime(&self) -> &'static str {
        match self {
            FrameEncoding::Jpeg => "image/jpeg",
            FrameEncoding::Png => "image/png",
            FrameEncoding::Webp => "image/webp",
        }
    }
}

const PNG_SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

/// A captured screen frame with timestamp metadata.
///
/// `seq` is assigned by the frame source in read order. The differ may drop
/// frames, so kept frames carry increasing but not necessarily contiguous
/// sequence numbers. Analysis results are ordered by it.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Encoded image bytes, exactly as read from the source.
    pub payload: Vec<u8>,
    pub captured_at_ms: i64,
    pub seq: u64,
}

impl Frame {
    pub fn new(payload: Vec<u8>, captured_at_ms: i64, seq: u64) -> Self {
        Self {
            payload,
            captured_at_ms,
            seq,
        }
    }

    /// Sniffs the image format from the payload's magic bytes.
    pub fn encoding(&self) -> Option<FrameEncoding> {
        let data = &self.payload;
        if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(FrameEncoding::Jpeg)
        } else if data.starts_with(&PNG_SIGNATURE) {
            Some(FrameEncoding::Png)
        } else if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP" {
            Some(FrameEncoding::Webp)
        } else {
            None
        }
    }

    pub fn captured_at(&self) -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::from_timestamp_millis(self.captured_at_ms)
            .unwrap_or_else(chrono::Utc::now)
    }

    pub fn payload_size(&self) -> usize {
        self.payload.len()
    }
}
