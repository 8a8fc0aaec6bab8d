//! Decoder collaborator seam
//!
//! The decoder under test is external: it takes a compressed stream and a
//! [`DrcConfig`] and returns interleaved 16-bit PCM. This module defines
//! that contract, a catalog of available decoders, and a reference backend
//! built on symphonia.
//!
//! The symphonia backend decodes AAC (ADTS or MP4) and PCM WAV but has no
//! DRC support: it ignores the configuration it is handed. It is meant for
//! checks that do not depend on DRC processing (energy layout, clipping)
//! and for analysing PCM dumps captured from a real device.

use crate::drc::DrcConfig;
use crate::PcmBuffer;
use anyhow::Result;

#[cfg(feature = "decode")]
use crate::AudioParams;
#[cfg(feature = "decode")]
use anyhow::Context;
#[cfg(feature = "decode")]
use std::io::Cursor;
#[cfg(feature = "decode")]
use tracing::debug;

#[cfg(feature = "decode")]
use symphonia::core::audio::SampleBuffer;
#[cfg(feature = "decode")]
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
#[cfg(feature = "decode")]
use symphonia::core::formats::FormatOptions;
#[cfg(feature = "decode")]
use symphonia::core::io::MediaSourceStream;
#[cfg(feature = "decode")]
use symphonia::core::meta::MetadataOptions;
#[cfg(feature = "decode")]
use symphonia::core::probe::Hint;

/// MIME type of AAC / USAC content
pub const MIME_AAC: &str = "audio/mp4a-latm";

/// Name of the symphonia reference decoder
pub const SYMPHONIA_DECODER_NAME: &str = "symphonia.aac";

/// A black-box decoder
pub trait Decoder {
    /// Registry name of the decoder
    fn name(&self) -> &str;

    /// Decode a whole compressed stream under the given DRC configuration
    fn decode(&self, stream: &[u8], drc: &DrcConfig) -> Result<PcmBuffer>;
}

/// Source of decoders, queried once per run
pub trait DecoderRegistry {
    /// Names of the decoders handling `mime`
    fn decoder_names(&self, mime: &str) -> Vec<String>;

    /// Instantiate a decoder by name
    fn open(&self, name: &str) -> Result<Box<dyn Decoder>>;
}

/// Decoder names for one MIME type, enumerated once and passed around
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderCatalog {
    mime: String,
    names: Vec<String>,
}

impl DecoderCatalog {
    /// Query the registry for every decoder of `mime`
    pub fn discover(registry: &dyn DecoderRegistry, mime: &str) -> Self {
        let names = registry.decoder_names(mime);
        tracing::info!(mime, count = names.len(), "decoders discovered");
        Self {
            mime: mime.to_string(),
            names,
        }
    }

    /// Catalog with a fixed list of names
    pub fn from_names(mime: &str, names: Vec<String>) -> Self {
        Self {
            mime: mime.to_string(),
            names,
        }
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

// =============================================================================
// Symphonia reference backend
// =============================================================================

/// Reference decoder backed by symphonia
#[derive(Debug, Clone, Default)]
pub struct SymphoniaDecoder {
    /// Container hint, e.g. "m4a", "aac" or "wav"
    extension: Option<String>,
}

impl SymphoniaDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoder that hints the container format by file extension
    pub fn with_extension(extension: &str) -> Self {
        Self {
            extension: Some(extension.to_string()),
        }
    }
}

#[cfg(feature = "decode")]
impl Decoder for SymphoniaDecoder {
    fn name(&self) -> &str {
        SYMPHONIA_DECODER_NAME
    }

    fn decode(&self, stream: &[u8], drc: &DrcConfig) -> Result<PcmBuffer> {
        if *drc != DrcConfig::default() {
            debug!(?drc, "symphonia backend does not apply DRC parameters");
        }

        let source = Cursor::new(stream.to_vec());
        let mss = MediaSourceStream::new(Box::new(source), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = &self.extension {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .context("Failed to probe stream format")?;

        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| anyhow::anyhow!("No audio track found"))?;

        let track_id = track.id;
        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .context("Failed to create decoder")?;

        let mut samples: Vec<i16> = Vec::new();
        let mut params: Option<AudioParams> = None;
        let mut sample_buf: Option<SampleBuffer<i16>> = None;

        loop {
            let packet = match format.next_packet() {
                Ok(p) => p,
                Err(symphonia::core::errors::Error::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(e) => return Err(e.into()),
            };

            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(d) => d,
                Err(symphonia::core::errors::Error::DecodeError(e)) => {
                    debug!(error = e, "skipping undecodable packet");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let spec = *decoded.spec();
            let negotiated = AudioParams::new(spec.rate, spec.channels.count());
            match params {
                None => params = Some(negotiated),
                Some(p) if p != negotiated => {
                    anyhow::bail!("Output format changed mid-stream: {:?} -> {:?}", p, negotiated)
                }
                Some(_) => {}
            }

            let needed = decoded.capacity() * spec.channels.count();
            if sample_buf.as_ref().map_or(true, |b| b.capacity() < needed) {
                sample_buf = Some(SampleBuffer::<i16>::new(decoded.capacity() as u64, spec));
            }
            if let Some(buf) = sample_buf.as_mut() {
                buf.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buf.samples());
            }
        }

        let params = params.ok_or_else(|| anyhow::anyhow!("Decoder produced no audio"))?;
        debug!(
            sample_rate = params.sample_rate,
            channels = params.channels,
            frames = samples.len() / params.channels.max(1),
            "stream decoded"
        );

        Ok(PcmBuffer::new(samples, params)?)
    }
}

#[cfg(not(feature = "decode"))]
impl Decoder for SymphoniaDecoder {
    fn name(&self) -> &str {
        SYMPHONIA_DECODER_NAME
    }

    fn decode(&self, _stream: &[u8], _drc: &DrcConfig) -> Result<PcmBuffer> {
        anyhow::bail!(
            "Decoding requires the 'decode' feature.\n\
            Install with: cargo install drccheck --features decode"
        )
    }
}

/// Registry exposing the symphonia reference decoder
#[derive(Debug, Clone, Default)]
pub struct SymphoniaRegistry {
    extension: Option<String>,
}

impl SymphoniaRegistry {
    /// Registry whose decoders hint the container format by file extension
    pub fn with_extension(extension: &str) -> Self {
        Self {
            extension: Some(extension.to_string()),
        }
    }
}

impl DecoderRegistry for SymphoniaRegistry {
    fn decoder_names(&self, mime: &str) -> Vec<String> {
        if cfg!(feature = "decode") && mime == MIME_AAC {
            vec![SYMPHONIA_DECODER_NAME.to_string()]
        } else {
            Vec::new()
        }
    }

    fn open(&self, name: &str) -> Result<Box<dyn Decoder>> {
        if name != SYMPHONIA_DECODER_NAME {
            anyhow::bail!("Unknown decoder: {}", name);
        }
        Ok(Box::new(SymphoniaDecoder {
            extension: self.extension.clone(),
        }))
    }
}

/// Check if the decoding backend is compiled in
pub fn is_available() -> bool {
    cfg!(feature = "decode")
}
