//! Audio format description and compatibility.

use std::fmt;

/// Sample encoding of a raw audio stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Encoding {
    /// Signed integer PCM.
    PcmSigned,
    /// Unsigned integer PCM.
    PcmUnsigned,
    /// IEEE float PCM.
    PcmFloat,
    /// Any other codec, identified by name.
    Other(String),
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PcmSigned => f.write_str("pcm_signed"),
            Self::PcmUnsigned => f.write_str("pcm_unsigned"),
            Self::PcmFloat => f.write_str("pcm_float"),
            Self::Other(name) => f.write_str(name),
        }
    }
}

/// Description of an audio stream.
///
/// Every field is optional. When a field is `None` on a requested format it
/// acts as a wildcard in [`is_compatible`](AudioFormat::is_compatible).
///
/// # Example
///
/// ```
/// use stream_fanout::AudioFormat;
///
/// let source = AudioFormat::pcm_signed(16_000, 16, 1);
/// let any_rate = AudioFormat {
///     sample_rate: None,
///     ..source.clone()
/// };
/// assert!(any_rate.is_compatible(&source));
/// assert!(!AudioFormat::pcm_signed(44_100, 16, 1).is_compatible(&source));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct AudioFormat {
    /// Container name (e.g. `"wav"`), `None` for a bare stream.
    pub container: Option<String>,
    /// Sample encoding.
    pub encoding: Option<Encoding>,
    /// Byte order of multi-byte samples.
    pub big_endian: Option<bool>,
    /// Bits per sample.
    pub bit_depth: Option<u16>,
    /// Bits per second.
    pub bit_rate: Option<u32>,
    /// Sample rate in Hz.
    pub sample_rate: Option<u32>,
    /// Number of interleaved channels.
    pub channels: Option<u16>,
}

impl AudioFormat {
    /// A fully specified little-endian signed PCM format with no container.
    pub fn pcm_signed(sample_rate: u32, bit_depth: u16, channels: u16) -> Self {
        Self {
            container: None,
            encoding: Some(Encoding::PcmSigned),
            big_endian: Some(false),
            bit_depth: Some(bit_depth),
            bit_rate: sample_rate
                .checked_mul(u32::from(bit_depth))
                .and_then(|bits| bits.checked_mul(u32::from(channels))),
            sample_rate: Some(sample_rate),
            channels: Some(channels),
        }
    }

    /// A format that matches any source.
    pub fn any() -> Self {
        Self::default()
    }

    /// Returns `true` if `source` satisfies every field set on `self`.
    pub fn is_compatible(&self, source: &AudioFormat) -> bool {
        fn field<T: PartialEq>(wanted: &Option<T>, actual: &Option<T>) -> bool {
            match wanted {
                Some(w) => actual.as_ref() == Some(w),
                None => true,
            }
        }

        field(&self.container, &source.container)
            && field(&self.encoding, &source.encoding)
            && field(&self.big_endian, &source.big_endian)
            && field(&self.bit_depth, &source.bit_depth)
            && field(&self.bit_rate, &source.bit_rate)
            && field(&self.sample_rate, &source.sample_rate)
            && field(&self.channels, &source.channels)
    }

    /// Size in bytes of one interleaved frame, if bit depth and channels are known.
    pub fn frame_bytes(&self) -> Option<usize> {
        let bits = usize::from(self.bit_depth?);
        let channels = usize::from(self.channels?);
        let bytes = bits.div_ceil(8) * channels;
        (bytes > 0).then_some(bytes)
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn opt<T: fmt::Display>(v: &Option<T>) -> String {
            v.as_ref().map_or_else(|| "*".to_string(), ToString::to_string)
        }

        write!(
            f,
            "{}/{} {}Hz {}bit {}ch",
            opt(&self.container),
            opt(&self.encoding),
            opt(&self.sample_rate),
            opt(&self.bit_depth),
            opt(&self.channels)
        )
    }
}
