//! Block codecs and the single-block decompression cache.

use std::io::{Read, Write};
use std::sync::Arc;

use tracing::{debug, warn};

use scriptorium_shared::{FormatError, ModuleDescriptor, Result};

/// Compression applied to a module's data blocks, chosen by `CompressType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Zlib,
    Bzip2,
    /// Stored bytes, used by the raw drivers.
    Identity,
}

impl Codec {
    /// Pick the codec for a descriptor.
    ///
    /// Compressed drivers without a `CompressType` use zlib. Raw drivers never
    /// compress, whatever the conf says. `LZSS`, `XZ` and unknown values fail
    /// with `UnsupportedCompression`.
    pub fn for_descriptor(descriptor: &ModuleDescriptor) -> Result<Self> {
        if !descriptor.driver.is_compressed() {
            return Ok(Self::Identity);
        }
        match descriptor.compress_type.as_deref() {
            None | Some("ZIP") | Some("ZLIB") => Ok(Self::Zlib),
            Some("BZIP2") | Some("BZ2") => Ok(Self::Bzip2),
            Some("NONE") => Ok(Self::Identity),
            Some(other) => Err(FormatError::UnsupportedCompression(format!(
                "{}: CompressType={other}",
                descriptor.id
            ))
            .into()),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Zlib => "zlib",
            Self::Bzip2 => "bzip2",
            Self::Identity => "identity",
        }
    }

    pub fn decompress(&self, input: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(input.len() * 4);
        let read = match self {
            Self::Zlib => flate2::read::ZlibDecoder::new(input).read_to_end(&mut out),
            Self::Bzip2 => bzip2::read::BzDecoder::new(input).read_to_end(&mut out),
            Self::Identity => {
                out.extend_from_slice(input);
                Ok(out.len())
            }
        };
        read.map_err(|e| FormatError::Malformed(format!("{} block: {e}", self.name())))?;
        Ok(out)
    }

    pub fn compress(&self, input: &[u8]) -> Result<Vec<u8>> {
        let malformed = |e: std::io::Error| FormatError::Malformed(format!("{}: {e}", self.name()));
        let out = match self {
            Self::Zlib => {
                let mut enc =
                    flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
                enc.write_all(input).map_err(malformed)?;
                enc.finish().map_err(malformed)?
            }
            Self::Bzip2 => {
                let mut enc =
                    bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
                enc.write_all(input).map_err(malformed)?;
                enc.finish().map_err(malformed)?
            }
            Self::Identity => input.to_vec(),
        };
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// BlockCache
// ---------------------------------------------------------------------------

/// Holds the most recently decompressed block of one decoder.
///
/// Blocks are identified by `(file, block number)`; `file` distinguishes the
/// testament files of a Bible, or is always 0 for single-file modules.
#[derive(Debug, Default)]
pub(crate) struct BlockCache {
    last: Option<(usize, usize, Arc<[u8]>)>,
    decompressions: u64,
}

impl BlockCache {
    pub(crate) fn decompressions(&self) -> u64 {
        self.decompressions
    }

    /// Return the cached block or decompress `compressed` with `codec`.
    ///
    /// A non-zero `expected` length that disagrees with the result is logged,
    /// not rejected.
    pub(crate) fn fetch(
        &mut self,
        file: usize,
        block: usize,
        codec: Codec,
        compressed: &[u8],
        expected: usize,
    ) -> Result<Arc<[u8]>> {
        if let Some((f, b, arena)) = &self.last {
            if *f == file && *b == block {
                return Ok(Arc::clone(arena));
            }
        }

        let bytes = codec.decompress(compressed)?;
        self.decompressions += 1;
        if expected != 0 && expected != bytes.len() {
            warn!(
                block,
                expected,
                actual = bytes.len(),
                "decompressed block size differs from index"
            );
        }
        debug!(file, block, size = bytes.len(), codec = codec.name(), "block decompressed");

        let arena: Arc<[u8]> = Arc::from(bytes);
        self.last = Some((file, block, Arc::clone(&arena)));
        Ok(arena)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scriptorium_shared::{ScriptoriumError, parse_conf};

    fn descriptor(driver: &str, compress: Option<&str>) -> ModuleDescriptor {
        let mut conf = format!("[Test]\nDataPath=./modules/texts/ztext/test/\nModDrv={driver}\n");
        if let Some(c) = compress {
            conf.push_str(&format!("CompressType={c}\n"));
        }
        parse_conf(&conf, "test.conf").unwrap()
    }

    #[test]
    fn codec_selection() {
        assert_eq!(Codec::for_descriptor(&descriptor("zText", None)).unwrap(), Codec::Zlib);
        assert_eq!(
            Codec::for_descriptor(&descriptor("zText", Some("BZIP2"))).unwrap(),
            Codec::Bzip2
        );
        assert_eq!(
            Codec::for_descriptor(&descriptor("RawText", Some("ZIP"))).unwrap(),
            Codec::Identity
        );
    }

    #[test]
    fn lzss_is_unsupported() {
        let err = Codec::for_descriptor(&descriptor("zCom", Some("LZSS"))).unwrap_err();
        assert!(matches!(
            err,
            ScriptoriumError::Format(FormatError::UnsupportedCompression(_))
        ));
    }

    #[test]
    fn zlib_and_bzip2_round_trip() {
        let text = b"In the beginning God created the heaven and the earth.".repeat(8);
        for codec in [Codec::Zlib, Codec::Bzip2, Codec::Identity] {
            let packed = codec.compress(&text).unwrap();
            assert_eq!(codec.decompress(&packed).unwrap(), text, "{}", codec.name());
        }
    }

    #[test]
    fn garbage_block_is_malformed() {
        let err = Codec::Zlib.decompress(b"not zlib at all").unwrap_err();
        assert!(matches!(err, ScriptoriumError::Format(FormatError::Malformed(_))));
    }

    #[test]
    fn cache_decompresses_once_per_block() {
        let packed = Codec::Zlib.compress(b"abcdef").unwrap();
        let mut cache = BlockCache::default();
        let a = cache.fetch(0, 3, Codec::Zlib, &packed, 6).unwrap();
        let b = cache.fetch(0, 3, Codec::Zlib, &packed, 6).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.decompressions(), 1);

        cache.fetch(1, 3, Codec::Zlib, &packed, 6).unwrap();
        assert_eq!(cache.decompressions(), 2);
    }
}
