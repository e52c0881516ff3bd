//! Drawing detection markers onto RGB frames.

use crate::types::BoundingBox;

/// Marker colour for the classified face.
pub const MARKER_COLOR: [u8; 3] = [0, 255, 0];
/// Marker outline thickness in pixels.
pub const MARKER_THICKNESS: u32 = 2;

/// Draw a rectangle outline into a packed RGB8 buffer, in place.
///
/// The outline grows inward from `bbox` and is clipped to the image.
pub fn draw_rectangle(
    rgb: &mut [u8],
    width: u32,
    height: u32,
    bbox: BoundingBox,
    color: [u8; 3],
    thickness: u32,
) {
    let Some(b) = bbox.clamp_to(width, height) else {
        return;
    };
    if rgb.len() < width as usize * height as usize * 3 {
        return;
    }
    let t = thickness.max(1);
    let x_end = b.x + b.width;
    let y_end = b.y + b.height;

    let mut put = |x: u32, y: u32| {
        let idx = (y as usize * width as usize + x as usize) * 3;
        rgb[idx..idx + 3].copy_from_slice(&color);
    };

    for y in b.y..y_end {
        let on_horizontal_edge = y < b.y + t || y + t >= y_end;
        if on_horizontal_edge {
            for x in b.x..x_end {
                put(x, y);
            }
        } else {
            for x in (b.x..x_end).filter(|&x| x < b.x + t || x + t >= x_end) {
                put(x, y);
            }
        }
    }
}
