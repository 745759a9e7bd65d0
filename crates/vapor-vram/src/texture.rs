//! Texture header decoding and mip chain layout math.
//!
//! The guest describes a texture entirely inside VRAM: a 14-byte header (one
//! `u16` info word plus three `u32` dimensions) followed by the pixel data for
//! every mip level laid out back-to-back, level 0 first. The header is what
//! makes textures self-describing for auto-length references, so validity
//! checking lives here rather than in the cache.

pub const MAX_1D_DIM: u32 = 8192;
pub const MAX_2D_DIM: u32 = 8192;
pub const MAX_3D_DIM: u32 = 2048;

/// Closed set of guest-visible texel formats.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TexFormat {
    R8,
    Ru8,
    Ri8,
    Rg8,
    Rgu8,
    Rgi8,
    Depth16,
    Rgba8,
    Rgbau8,
    Rgbai8,
    R32f,
    Depth32f,
    Depth24Stencil8,
    Rg32f,
    Rgba32f,
}

impl TexFormat {
    pub fn from_bits(bits: u8) -> Option<Self> {
        Some(match bits {
            0 => TexFormat::R8,
            1 => TexFormat::Ru8,
            2 => TexFormat::Ri8,
            3 => TexFormat::Rg8,
            4 => TexFormat::Rgu8,
            5 => TexFormat::Rgi8,
            6 => TexFormat::Depth16,
            7 => TexFormat::Rgba8,
            8 => TexFormat::Rgbau8,
            9 => TexFormat::Rgbai8,
            10 => TexFormat::R32f,
            11 => TexFormat::Depth32f,
            12 => TexFormat::Depth24Stencil8,
            13 => TexFormat::Rg32f,
            14 => TexFormat::Rgba32f,
            _ => return None,
        })
    }

    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            TexFormat::R8 | TexFormat::Ru8 | TexFormat::Ri8 => 1,
            TexFormat::Rg8 | TexFormat::Rgu8 | TexFormat::Rgi8 | TexFormat::Depth16 => 2,
            TexFormat::Rgba8
            | TexFormat::Rgbau8
            | TexFormat::Rgbai8
            | TexFormat::R32f
            | TexFormat::Depth32f
            | TexFormat::Depth24Stencil8 => 4,
            TexFormat::Rg32f => 8,
            TexFormat::Rgba32f => 16,
        }
    }

    pub fn is_depth_or_stencil(self) -> bool {
        matches!(
            self,
            TexFormat::Depth16 | TexFormat::Depth32f | TexFormat::Depth24Stencil8
        )
    }
}

/// Decoded texture header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureHeader {
    pub has_mipmaps: bool,
    pub dim_count: u8,
    pub dims: [u32; 3],
    pub format: TexFormat,
}

impl TextureHeader {
    pub const ENCODED_LEN: usize = 14;

    /// Decode and validate the on-VRAM header encoding.
    ///
    /// Info word layout: bit 15 mip flag, bits 13..=14 dimension count, low
    /// 8 bits format. Returns `None` for any header a well-behaved guest would
    /// never produce: zero/oversized dimensions, an unknown format, or a
    /// depth/stencil format used with mipmaps or a non-2D target.
    pub fn decode(raw: &[u8]) -> Option<Self> {
        assert_eq!(raw.len(), Self::ENCODED_LEN, "texture header is 14 bytes");

        let info = u16::from_le_bytes([raw[0], raw[1]]);
        let has_mipmaps = info >> 15 != 0;
        let dim_count = ((info >> 13) & 0x3) as u8;
        if dim_count == 0 || dim_count > 3 {
            return None;
        }

        let mut dims = [1u32; 3];
        for (i, dim) in dims.iter_mut().enumerate().take(usize::from(dim_count)) {
            let at = 2 + i * 4;
            *dim = u32::from_le_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]]);
            let max = match dim_count {
                1 => MAX_1D_DIM,
                2 => MAX_2D_DIM,
                _ => MAX_3D_DIM,
            };
            if *dim == 0 || *dim > max {
                return None;
            }
        }

        let format = TexFormat::from_bits((info & 0xFF) as u8)?;
        if format.is_depth_or_stencil() && (has_mipmaps || dim_count != 2) {
            return None;
        }

        Some(Self {
            has_mipmaps,
            dim_count,
            dims,
            format,
        })
    }

    pub fn level_count(&self) -> u32 {
        if !self.has_mipmaps {
            return 1;
        }
        let max_dim = self.dims[..usize::from(self.dim_count)]
            .iter()
            .copied()
            .max()
            .expect("dim_count is 1..=3");
        1 + max_dim.ilog2()
    }

    pub fn level_dims(&self, level: u32) -> [u32; 3] {
        let mut dims = self.dims;
        for dim in dims.iter_mut().take(usize::from(self.dim_count)) {
            *dim = (*dim >> level).max(1);
        }
        dims
    }

    /// Byte size of a single mip level.
    pub fn level_size(&self, level: u32) -> u64 {
        let dims = self.level_dims(level);
        let mut bytes = u64::from(self.format.bytes_per_pixel());
        for dim in dims.iter().take(usize::from(self.dim_count)) {
            bytes *= u64::from(*dim);
        }
        bytes
    }

    /// Byte offset of a mip level from the start of the pixel data.
    pub fn level_offset(&self, level: u32) -> u64 {
        (0..level).map(|l| self.level_size(l)).sum()
    }

    /// Total pixel data size across all mip levels.
    pub fn data_size(&self) -> u64 {
        (0..self.level_count()).map(|l| self.level_size(l)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(has_mipmaps: bool, dim_count: u8, dims: [u32; 3], format: u8) -> Vec<u8> {
        let info = (u16::from(has_mipmaps) << 15)
            | (u16::from(dim_count) << 13)
            | u16::from(format);
        let mut raw = info.to_le_bytes().to_vec();
        for dim in dims {
            raw.extend_from_slice(&dim.to_le_bytes());
        }
        raw
    }

    #[test]
    fn decodes_simple_2d() {
        let hdr = TextureHeader::decode(&encode(false, 2, [64, 32, 0], 7)).unwrap();
        assert_eq!(hdr.dim_count, 2);
        assert_eq!(hdr.dims, [64, 32, 1]);
        assert_eq!(hdr.format, TexFormat::Rgba8);
        assert_eq!(hdr.level_count(), 1);
        assert_eq!(hdr.data_size(), 64 * 32 * 4);
    }

    #[test]
    fn rejects_invalid_headers() {
        // Zero dimension count.
        assert!(TextureHeader::decode(&encode(false, 0, [1, 1, 1], 0)).is_none());
        // Zero-sized dimension.
        assert!(TextureHeader::decode(&encode(false, 2, [64, 0, 0], 0)).is_none());
        // Dimension past the per-target bound.
        assert!(TextureHeader::decode(&encode(false, 3, [2049, 1, 1], 0)).is_none());
        // Unknown format.
        assert!(TextureHeader::decode(&encode(false, 2, [4, 4, 0], 15)).is_none());
        // Depth formats are 2D-only and never mipmapped.
        assert!(TextureHeader::decode(&encode(true, 2, [4, 4, 0], 6)).is_none());
        assert!(TextureHeader::decode(&encode(false, 1, [4, 0, 0], 11)).is_none());
        assert!(TextureHeader::decode(&encode(false, 2, [4, 4, 0], 12)).is_some());
    }

    #[test]
    fn mip_chain_layout() {
        // 8x2 RGBA8 with mips: levels are 8x2, 4x1, 2x1, 1x1.
        let hdr = TextureHeader::decode(&encode(true, 2, [8, 2, 0], 7)).unwrap();
        assert_eq!(hdr.level_count(), 4);
        assert_eq!(hdr.level_dims(0), [8, 2, 1]);
        assert_eq!(hdr.level_dims(1), [4, 1, 1]);
        assert_eq!(hdr.level_dims(3), [1, 1, 1]);

        assert_eq!(hdr.level_size(0), 64);
        assert_eq!(hdr.level_size(1), 16);
        assert_eq!(hdr.level_offset(0), 0);
        assert_eq!(hdr.level_offset(1), 64);
        assert_eq!(hdr.level_offset(2), 80);
        assert_eq!(hdr.data_size(), 64 + 16 + 8 + 4);
    }

    #[test]
    fn non_power_of_two_levels_floor() {
        let hdr = TextureHeader::decode(&encode(true, 1, [5, 0, 0], 0)).unwrap();
        // floor(log2(5)) = 2, so 3 levels: 5, 2, 1.
        assert_eq!(hdr.level_count(), 3);
        assert_eq!(hdr.data_size(), 5 + 2 + 1);
    }
}
