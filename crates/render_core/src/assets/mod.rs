//! Persisted asset container
//!
//! Every asset file starts with an [`AssetHeader`] followed by a type-specific
//! payload. All integers are little-endian. Texture assets are the only
//! payload the renderer reads directly.

use std::io::{Read, Write};
use std::path::Path;

use thiserror::Error;

use crate::foundation::hash::hash_string;

/// Extension of compiled asset files
pub const ASSET_EXTENSION: &str = "cr";

/// Errors reading or writing asset files
#[derive(Error, Debug)]
pub enum AssetError {
    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The header names a different asset type
    #[error("Unexpected asset type {found:#018x}, expected {expected:#018x}")]
    TypeMismatch {
        /// Type id the reader accepts
        expected: u64,
        /// Type id found in the file
        found: u64,
    },

    /// The asset was written by an unsupported format version
    #[error("Unsupported asset version {found}, expected {expected}")]
    VersionMismatch {
        /// Version the reader accepts
        expected: u32,
        /// Version found in the file
        found: u32,
    },

    /// A length, count or string in the payload is invalid
    #[error("Malformed asset: {0}")]
    Malformed(String),
}

/// Result alias for asset operations
pub type AssetResult<T> = Result<T, AssetError>;

/// Fixed header at the start of every asset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetHeader {
    /// Hash of the asset type name
    pub type_id: u64,
    /// Payload format version
    pub version: u32,
    /// Hash of `name`
    pub name_hash: u64,
    /// Resource identifier
    pub name: String,
}

impl AssetHeader {
    /// Header for an asset of `type_name`, hashing both names
    pub fn new(type_name: &str, version: u32, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            type_id: hash_string(type_name),
            version,
            name_hash: hash_string(&name),
            name,
        }
    }

    /// Serialize the header
    pub fn write_to(&self, writer: &mut impl Write) -> AssetResult<()> {
        writer.write_all(&self.type_id.to_le_bytes())?;
        writer.write_all(&self.version.to_le_bytes())?;
        writer.write_all(&self.name_hash.to_le_bytes())?;
        let length = u16::try_from(self.name.len())
            .map_err(|_| AssetError::Malformed(format!("name of {} bytes is too long", self.name.len())))?;
        writer.write_all(&length.to_le_bytes())?;
        writer.write_all(self.name.as_bytes())?;
        Ok(())
    }

    /// Deserialize a header
    pub fn read_from(reader: &mut impl Read) -> AssetResult<Self> {
        let type_id = read_u64(reader)?;
        let version = read_u32(reader)?;
        let name_hash = read_u64(reader)?;
        let length = usize::from(read_u16(reader)?);
        let mut name = vec![0_u8; length];
        reader.read_exact(&mut name)?;
        let name = String::from_utf8(name).map_err(|e| AssetError::Malformed(format!("asset name: {e}")))?;
        Ok(Self {
            type_id,
            version,
            name_hash,
            name,
        })
    }
}

/// One mip level of one texture layer, RGBA8
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureMip {
    /// Width in texels
    pub width: u32,
    /// Height in texels
    pub height: u32,
    /// `width * height * 4` bytes
    pub texels: Vec<u8>,
}

/// Layered, mipmapped RGBA8 texture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureAsset {
    /// Asset header
    pub header: AssetHeader,
    /// Layers, each holding the same number of mips from largest to smallest
    pub layers: Vec<Vec<TextureMip>>,
}

impl TextureAsset {
    /// Type name hashed into the header
    pub const TYPE_NAME: &'static str = "TextureAsset";
    /// Current payload version
    pub const VERSION: u32 = 1;

    /// Build an asset, checking the layer and mip structure
    pub fn new(name: impl Into<String>, layers: Vec<Vec<TextureMip>>) -> AssetResult<Self> {
        let asset = Self {
            header: AssetHeader::new(Self::TYPE_NAME, Self::VERSION, name),
            layers,
        };
        asset.validate()?;
        Ok(asset)
    }

    /// Mip levels per layer
    pub fn mip_level_count(&self) -> usize {
        self.layers.first().map_or(0, Vec::len)
    }

    /// Number of layers
    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Size of mip 0
    pub fn extent(&self) -> (u32, u32) {
        self.layers
            .first()
            .and_then(|mips| mips.first())
            .map_or((0, 0), |mip| (mip.width, mip.height))
    }

    /// Every texel byte, layer-major then mip order
    pub fn packed_texels(&self) -> Vec<u8> {
        self.layers
            .iter()
            .flatten()
            .flat_map(|mip| mip.texels.iter().copied())
            .collect()
    }

    fn validate(&self) -> AssetResult<()> {
        let mips = self.mip_level_count();
        if self.layers.is_empty() || mips == 0 {
            return Err(AssetError::Malformed("texture has no layers or mip levels".to_string()));
        }
        if self.layers.len() > usize::from(u8::MAX) || mips > usize::from(u8::MAX) {
            return Err(AssetError::Malformed("too many layers or mip levels".to_string()));
        }
        let extent = self.extent();
        for (layer_index, layer) in self.layers.iter().enumerate() {
            if layer.len() != mips {
                return Err(AssetError::Malformed(format!(
                    "layer {layer_index} has {} mips, expected {mips}",
                    layer.len()
                )));
            }
            if layer.first().map(|m| (m.width, m.height)) != Some(extent) {
                return Err(AssetError::Malformed(format!("layer {layer_index} differs in size")));
            }
            for mip in layer {
                let expected = u64::from(mip.width) * u64::from(mip.height) * 4;
                if mip.width == 0 || mip.height == 0 || mip.texels.len() as u64 != expected {
                    return Err(AssetError::Malformed(format!(
                        "mip {}x{} carries {} bytes, expected {expected}",
                        mip.width,
                        mip.height,
                        mip.texels.len()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Serialize header and payload
    pub fn write_to(&self, writer: &mut impl Write) -> AssetResult<()> {
        self.validate()?;
        self.header.write_to(writer)?;
        // Counts were range-checked by validate
        writer.write_all(&[self.mip_level_count() as u8, self.layer_count() as u8])?;
        for mip in self.layers.iter().flatten() {
            writer.write_all(&mip.width.to_le_bytes())?;
            writer.write_all(&mip.height.to_le_bytes())?;
            writer.write_all(&mip.texels)?;
        }
        Ok(())
    }

    /// Deserialize and validate a texture asset
    pub fn read_from(reader: &mut impl Read) -> AssetResult<Self> {
        let header = AssetHeader::read_from(reader)?;
        let expected = hash_string(Self::TYPE_NAME);
        if header.type_id != expected {
            return Err(AssetError::TypeMismatch {
                expected,
                found: header.type_id,
            });
        }
        if header.version != Self::VERSION {
            return Err(AssetError::VersionMismatch {
                expected: Self::VERSION,
                found: header.version,
            });
        }

        let mut counts = [0_u8; 2];
        reader.read_exact(&mut counts)?;
        let [mip_count, layer_count] = counts;

        let mut layers = Vec::with_capacity(usize::from(layer_count));
        for _ in 0..layer_count {
            let mut mips = Vec::with_capacity(usize::from(mip_count));
            for _ in 0..mip_count {
                let width = read_u32(reader)?;
                let height = read_u32(reader)?;
                let size = usize::try_from(u64::from(width) * u64::from(height) * 4)
                    .map_err(|_| AssetError::Malformed(format!("mip {width}x{height} is too large")))?;
                let mut texels = vec![0_u8; size];
                reader.read_exact(&mut texels)?;
                mips.push(TextureMip { width, height, texels });
            }
            layers.push(mips);
        }

        let asset = Self { header, layers };
        asset.validate()?;
        Ok(asset)
    }

    /// Read a texture asset from disk
    pub fn load(path: impl AsRef<Path>) -> AssetResult<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        let asset = Self::read_from(&mut bytes.as_slice())?;
        log::debug!(
            "Loaded texture asset '{}' ({}x{}, {} layers, {} mips) from {}",
            asset.header.name,
            asset.extent().0,
            asset.extent().1,
            asset.layer_count(),
            asset.mip_level_count(),
            path.as_ref().display()
        );
        Ok(asset)
    }

    /// Write a texture asset to disk
    pub fn save(&self, path: impl AsRef<Path>) -> AssetResult<()> {
        let mut bytes = Vec::new();
        self.write_to(&mut bytes)?;
        std::fs::write(path.as_ref(), bytes)?;
        Ok(())
    }
}

fn read_u16(reader: &mut impl Read) -> AssetResult<u16> {
    let mut bytes = [0_u8; 2];
    reader.read_exact(&mut bytes)?;
    Ok(u16::from_le_bytes(bytes))
}

fn read_u32(reader: &mut impl Read) -> AssetResult<u32> {
    let mut bytes = [0_u8; 4];
    reader.read_exact(&mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}

fn read_u64(reader: &mut impl Read) -> AssetResult<u64> {
    let mut bytes = [0_u8; 8];
    reader.read_exact(&mut bytes)?;
    Ok(u64::from_le_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mip(width: u32, height: u32, value: u8) -> TextureMip {
        TextureMip {
            width,
            height,
            texels: vec![value; (width * height * 4) as usize],
        }
    }

    #[test]
    fn header_layout_is_little_endian_with_prefixed_name() {
        let header = AssetHeader::new("TextureAsset", 1, "grass");
        let mut bytes = Vec::new();
        header.write_to(&mut bytes).unwrap();

        assert_eq!(bytes.len(), 8 + 4 + 8 + 2 + 5);
        assert_eq!(&bytes[0..8], &hash_string("TextureAsset").to_le_bytes());
        assert_eq!(&bytes[8..12], &1_u32.to_le_bytes());
        assert_eq!(&bytes[12..20], &hash_string("grass").to_le_bytes());
        assert_eq!(&bytes[20..22], &5_u16.to_le_bytes());
        assert_eq!(&bytes[22..], b"grass");
    }

    #[test]
    fn texture_payload_reads_back() {
        let asset = TextureAsset::new(
            "terrain_layers",
            vec![vec![mip(4, 2, 1), mip(2, 1, 2)], vec![mip(4, 2, 3), mip(2, 1, 4)]],
        )
        .unwrap();
        let mut bytes = Vec::new();
        asset.write_to(&mut bytes).unwrap();
        // counts follow the 36-byte header
        assert_eq!(&bytes[36..38], &[2, 2]);

        let read = TextureAsset::read_from(&mut bytes.as_slice()).unwrap();
        assert_eq!(read, asset);
        assert_eq!(read.packed_texels().len(), 2 * (32 + 8));
    }

    #[test]
    fn wrong_type_or_version_is_rejected() {
        let mut bytes = Vec::new();
        AssetHeader::new("SoundAsset", 1, "boom").write_to(&mut bytes).unwrap();
        assert!(matches!(
            TextureAsset::read_from(&mut bytes.as_slice()),
            Err(AssetError::TypeMismatch { .. })
        ));

        let mut bytes = Vec::new();
        AssetHeader::new(TextureAsset::TYPE_NAME, 7, "old").write_to(&mut bytes).unwrap();
        assert!(matches!(
            TextureAsset::read_from(&mut bytes.as_slice()),
            Err(AssetError::VersionMismatch { found: 7, .. })
        ));
    }

    #[test]
    fn inconsistent_layers_are_malformed() {
        let err = TextureAsset::new("bad", vec![vec![mip(4, 4, 0)], vec![mip(2, 2, 0)]]).unwrap_err();
        assert!(matches!(err, AssetError::Malformed(_)));

        let short = TextureMip {
            width: 2,
            height: 2,
            texels: vec![0; 3],
        };
        assert!(TextureAsset::new("short", vec![vec![short]]).is_err());
    }

    #[test]
    fn truncated_payload_is_an_io_error() {
        let asset = TextureAsset::new("cut", vec![vec![mip(2, 2, 9)]]).unwrap();
        let mut bytes = Vec::new();
        asset.write_to(&mut bytes).unwrap();
        bytes.truncate(bytes.len() - 1);
        assert!(matches!(TextureAsset::read_from(&mut bytes.as_slice()), Err(AssetError::Io(_))));
    }
}
