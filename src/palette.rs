//! Fixed hardware palettes for quantization targets.

use image::Rgb;

/// An ordered table of 8 RGB entries describing a target color decoder.
///
/// Entry *order is a compatibility contract*, not an aesthetic choice: index
/// `i` must correspond to what the target firmware renders for logical color
/// `i` (its pen numbering), which may not match the RGB value a naive
/// nearest-color mapping would pick. Swapping or reordering entries changes
/// what appears on the physical panel even though the distance computation
/// below is unaffected. The quantizer itself knows nothing about decoder
/// quirks; callers encode them in the table they pass in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette(pub [Rgb<u8>; 8]);

/// Palette for the Inky Frame's ACeP panel, ordered by the firmware's pen
/// numbering: black, white, green, blue, red, yellow, orange, taupe.
///
/// The taupe entry is the panel's "clean" state and deliberately not a pure
/// gray; the orange entry is pulled toward red because the decoder renders
/// pure (255, 165, 0) as yellow.
pub const INKY_FRAME: Palette = Palette([
    Rgb([0, 0, 0]),       // pen 0: black
    Rgb([255, 255, 255]), // pen 1: white
    Rgb([0, 255, 0]),     // pen 2: green
    Rgb([0, 0, 255]),     // pen 3: blue
    Rgb([255, 0, 0]),     // pen 4: red
    Rgb([255, 255, 0]),   // pen 5: yellow
    Rgb([255, 140, 0]),   // pen 6: orange
    Rgb([220, 180, 200]), // pen 7: taupe
]);

impl Palette {
    /// Index of the entry nearest to `color` by squared Euclidean RGB
    /// distance. Ties resolve to the lowest index, so the mapping is
    /// deterministic for any input.
    pub fn nearest(&self, color: Rgb<u8>) -> usize {
        let mut best = 0usize;
        let mut best_dist = u32::MAX;
        for (i, entry) in self.0.iter().enumerate() {
            let dist = distance_sq(color, *entry);
            if dist < best_dist {
                best = i;
                best_dist = dist;
            }
        }
        best
    }

    /// The RGB value stored at `index`.
    pub fn entry(&self, index: usize) -> Rgb<u8> {
        self.0[index]
    }

    /// Whether `color` exactly equals one of the table entries.
    pub fn contains(&self, color: Rgb<u8>) -> bool {
        self.0.contains(&color)
    }
}

fn distance_sq(a: Rgb<u8>, b: Rgb<u8>) -> u32 {
    let dr = a.0[0] as i32 - b.0[0] as i32;
    let dg = a.0[1] as i32 - b.0[1] as i32;
    let db = a.0[2] as i32 - b.0[2] as i32;
    (dr * dr + dg * dg + db * db) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_entries_map_to_themselves() {
        for (i, entry) in INKY_FRAME.0.iter().enumerate() {
            assert_eq!(INKY_FRAME.nearest(*entry), i);
        }
    }

    #[test]
    fn near_black_maps_to_pen_zero() {
        assert_eq!(INKY_FRAME.nearest(Rgb([10, 5, 12])), 0);
    }

    #[test]
    fn ties_resolve_to_lowest_index() {
        // Equidistant between two identical synthetic entries must pick the
        // first one.
        let palette = Palette([
            Rgb([100, 100, 100]),
            Rgb([100, 100, 100]),
            Rgb([0, 0, 0]),
            Rgb([255, 255, 255]),
            Rgb([255, 0, 0]),
            Rgb([0, 255, 0]),
            Rgb([0, 0, 255]),
            Rgb([255, 255, 0]),
        ]);
        assert_eq!(palette.nearest(Rgb([100, 100, 100])), 0);
    }

    #[test]
    fn pen_order_matches_firmware_numbering() {
        // The device client clears with pen 1 (white) and draws its error
        // banner with pen 4 (red); those indices must stay put.
        assert_eq!(INKY_FRAME.entry(1), Rgb([255, 255, 255]));
        assert_eq!(INKY_FRAME.entry(4), Rgb([255, 0, 0]));
    }
}
