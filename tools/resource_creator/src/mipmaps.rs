//! Mip chain generation

use image::imageops::{self, FilterType};
use image::RgbaImage;
use render_core::assets::TextureMip;

/// Mip `level` of a `base`-sized image, never smaller than one texel
pub fn level_extent(base: (u32, u32), level: u8) -> (u32, u32) {
    let shift = u32::from(level).min(31);
    ((base.0 >> shift).max(1), (base.1 >> shift).max(1))
}

/// Base image followed by `levels - 1` successively halved copies
pub fn build_chain(image: &RgbaImage, levels: u8) -> Vec<TextureMip> {
    let base = image.dimensions();
    (0..levels)
        .map(|level| {
            let (width, height) = level_extent(base, level);
            let texels = if level == 0 {
                image.as_raw().clone()
            } else {
                imageops::resize(image, width, height, FilterType::Triangle).into_raw()
            };
            TextureMip { width, height, texels }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_extent_halves_and_clamps() {
        assert_eq!(level_extent((16, 4), 0), (16, 4));
        assert_eq!(level_extent((16, 4), 1), (8, 2));
        assert_eq!(level_extent((16, 4), 3), (2, 1));
        assert_eq!(level_extent((16, 4), 8), (1, 1));
    }

    #[test]
    fn test_chain_sizes_match_texel_counts() {
        let image = RgbaImage::from_pixel(16, 8, Rgba([10, 20, 30, 255]));
        let chain = build_chain(&image, 4);
        assert_eq!(chain.len(), 4);
        for mip in &chain {
            assert_eq!(mip.texels.len() as u32, mip.width * mip.height * 4);
        }
        assert_eq!((chain[3].width, chain[3].height), (2, 1));
        // A flat colour stays flat through the filter
        assert_eq!(&chain[2].texels[..4], &[10, 20, 30, 255]);
    }
}
