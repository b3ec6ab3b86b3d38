//! Package codec: every inter-process frame is `compress?(encode(payload))`.

use common::model::config::CodecConfig;
use errors::{CodecError, Result};
use flate2::Compression as Flate2Level;
use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use log::warn;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::{Read, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackMethod {
    Json,
    Msgpack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressAlgorithm {
    Gzip,
    Deflate,
}

/// Encodes, decodes and optionally compresses frames between the
/// downloader and parser engines.
#[derive(Debug, Clone)]
pub struct PackageCodec {
    method: PackMethod,
    compress: Option<CompressAlgorithm>,
}

impl Default for PackageCodec {
    fn default() -> Self {
        PackageCodec {
            method: PackMethod::Msgpack,
            compress: None,
        }
    }
}

impl PackageCodec {
    pub fn new(method: PackMethod, compress: Option<CompressAlgorithm>) -> Self {
        PackageCodec { method, compress }
    }

    /// Builds a codec from configuration. An unavailable encoding
    /// degrades to json with a logged warning.
    pub fn from_config(cfg: &CodecConfig) -> Self {
        let method = match cfg.method.to_lowercase().as_str() {
            "json" => PackMethod::Json,
            "msgpack" | "rmp" => PackMethod::Msgpack,
            other => {
                warn!("pack method '{other}' unavailable, degrading to json");
                PackMethod::Json
            }
        };

        let compress = if cfg.compress {
            match cfg
                .compress_algorithm
                .as_deref()
                .unwrap_or("gzip")
                .to_lowercase()
                .as_str()
            {
                "gzip" => Some(CompressAlgorithm::Gzip),
                "deflate" => Some(CompressAlgorithm::Deflate),
                other => {
                    warn!("compression '{other}' unavailable, sending frames uncompressed");
                    None
                }
            }
        } else {
            None
        };

        PackageCodec { method, compress }
    }

    pub fn method(&self) -> PackMethod {
        self.method
    }

    /// `assemble = compress?(encode(payload))`.
    pub fn assemble<T: Serialize>(&self, payload: &T) -> Result<Vec<u8>> {
        let encoded = match self.method {
            PackMethod::Json => serde_json::to_vec(payload)
                .map_err(|e| CodecError::EncodeFailed(Box::new(e)))?,
            PackMethod::Msgpack => rmp_serde::to_vec_named(payload)
                .map_err(|e| CodecError::EncodeFailed(Box::new(e)))?,
        };

        match self.compress {
            None => Ok(encoded),
            Some(CompressAlgorithm::Gzip) => {
                let mut encoder = GzEncoder::new(Vec::new(), Flate2Level::default());
                encoder
                    .write_all(&encoded)
                    .and_then(|_| encoder.finish())
                    .map_err(|e| CodecError::CompressionFailed(Box::new(e)).into())
            }
            Some(CompressAlgorithm::Deflate) => {
                let mut encoder = ZlibEncoder::new(Vec::new(), Flate2Level::default());
                encoder
                    .write_all(&encoded)
                    .and_then(|_| encoder.finish())
                    .map_err(|e| CodecError::CompressionFailed(Box::new(e)).into())
            }
        }
    }

    /// Reverses [`assemble`]. Compression is sniffed from magic bytes,
    /// so a peer configured differently still decodes.
    pub fn disassemble<T: DeserializeOwned>(&self, frame: &[u8]) -> Result<T> {
        if frame.is_empty() {
            return Err(CodecError::EmptyFrame.into());
        }

        let decoded = decompress(frame)?;
        match self.method {
            PackMethod::Json => serde_json::from_slice(&decoded)
                .map_err(|e| CodecError::DecodeFailed(Box::new(e)).into()),
            PackMethod::Msgpack => rmp_serde::from_slice(&decoded)
                .map_err(|e| CodecError::DecodeFailed(Box::new(e)).into()),
        }
    }
}

/// Inflates a frame when its magic bytes say it is compressed, passing
/// plain frames through untouched. Gzip is 0x1f 0x8b; a zlib (deflate)
/// stream starts with 0x78.
fn decompress(frame: &[u8]) -> Result<Vec<u8>> {
    if frame.len() > 2 && frame[0] == 0x1f && frame[1] == 0x8b {
        let mut decoder = GzDecoder::new(frame);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|e| CodecError::DecodeFailed(Box::new(e)))?;
        Ok(out)
    } else if frame.len() > 2
        && frame[0] == 0x78
        && matches!(frame[1], 0x01 | 0x5e | 0x9c | 0xda)
    {
        let mut decoder = ZlibDecoder::new(frame);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|e| CodecError::DecodeFailed(Box::new(e)))?;
        Ok(out)
    } else {
        Ok(frame.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::model::frame::{BinaryType, Frame};
    use common::model::task::Task;

    fn sample_frame() -> Frame {
        Frame::Download {
            task: Task::new("http://example.com/page"),
            download_data: b"<html><body>hello</body></html>".to_vec(),
            binary_type: BinaryType::Text,
        }
    }

    #[test]
    fn test_round_trip_json() {
        let codec = PackageCodec::new(PackMethod::Json, None);
        let bytes = codec.assemble(&sample_frame()).unwrap();
        let back: Frame = codec.disassemble(&bytes).unwrap();
        assert!(matches!(back, Frame::Download { .. }));
    }

    #[test]
    fn test_round_trip_msgpack() {
        let codec = PackageCodec::new(PackMethod::Msgpack, None);
        let bytes = codec.assemble(&sample_frame()).unwrap();
        let back: Frame = codec.disassemble(&bytes).unwrap();
        assert!(matches!(back, Frame::Download { .. }));
    }

    #[test]
    fn test_round_trip_compressed() {
        for algo in [CompressAlgorithm::Gzip, CompressAlgorithm::Deflate] {
            let codec = PackageCodec::new(PackMethod::Json, Some(algo));
            let bytes = codec.assemble(&sample_frame()).unwrap();
            let back: Frame = codec.disassemble(&bytes).unwrap();
            assert!(matches!(back, Frame::Download { .. }));
        }
    }

    #[test]
    fn test_compressed_frame_decodes_without_compression_configured() {
        let sender = PackageCodec::new(PackMethod::Json, Some(CompressAlgorithm::Gzip));
        let receiver = PackageCodec::new(PackMethod::Json, None);
        let bytes = sender.assemble(&Frame::ping(25)).unwrap();
        let back: Frame = receiver.disassemble(&bytes).unwrap();
        assert!(back.is_ping());
    }

    #[test]
    fn test_empty_frame_rejected() {
        let codec = PackageCodec::default();
        let result: Result<Frame> = codec.disassemble(&[]);
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_method_degrades_to_json() {
        let cfg = common::model::config::CodecConfig {
            method: "serialize".to_string(),
            compress: false,
            compress_algorithm: None,
        };
        let codec = PackageCodec::from_config(&cfg);
        assert_eq!(codec.method(), PackMethod::Json);
    }
}
