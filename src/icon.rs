use std::fmt::Display;

use crate::theme::IconThemeService;

#[derive(Debug)]
pub enum IconError {
    LoadIconFromFile {
        path: String,
        source: gtk::glib::Error,
    },
    NotAvailable,
}

impl Display for IconError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IconError::LoadIconFromFile { path, source } => {
                write!(f, "Failed to load icon from file {}: {}", path, source)
            }
            IconError::NotAvailable => write!(f, "Icon not available"),
        }
    }
}

/// The three icon roles an item can carry, each selected independently.
#[derive(Debug, Clone, Copy)]
pub enum IconRole {
    Icon,
    AttentionIcon,
    OverlayIcon,
}

impl Display for IconRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IconRole::Icon => write!(f, "Icon"),
            IconRole::AttentionIcon => write!(f, "AttentionIcon"),
            IconRole::OverlayIcon => write!(f, "OverlayIcon"),
        }
    }
}

/// The tray's layout axis. Upscaling preserves aspect ratio along this axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Horizontal,
    Vertical,
}

/// Convert a pixel buffer from the wire's ARGB32 (big-endian, alpha
/// premultiplied) to the straight-alpha RGBA32 that gdk-pixbuf understands.
pub fn argb_to_rgba(data: &mut [u8]) {
    for chunk in data.chunks_exact_mut(4) {
        let a = chunk[0];
        let (mut r, mut g, mut b) = (chunk[1], chunk[2], chunk[3]);
        if a != 0 && a != 0xff {
            // un-premultiply, rounding to nearest
            let a16 = a as u16;
            r = ((r as u16 * 255 + a16 / 2) / a16).min(255) as u8;
            g = ((g as u16 * 255 + a16 / 2) / a16).min(255) as u8;
            b = ((b as u16 * 255 + a16 / 2) / a16).min(255) as u8;
        }
        chunk[0] = r;
        chunk[1] = g;
        chunk[2] = b;
        chunk[3] = a;
    }
}

/// Pick the best candidate out of a set of pixmap dimensions: the smallest
/// one with both sides at least `size`, otherwise the largest available
/// (which the caller then scales up).
pub fn best_pixmap(dims: &[(i32, i32)], size: i32) -> Option<usize> {
    dims.iter()
        .enumerate()
        .max_by(|(_, (w1, h1)), (_, (w2, h2))| {
            let fits1 = *w1 >= size && *h1 >= size;
            let fits2 = *w2 >= size && *h2 >= size;
            match (fits1, fits2) {
                (true, true) => (w2 * h2).cmp(&(w1 * h1)),
                (true, false) => std::cmp::Ordering::Greater,
                (false, true) => std::cmp::Ordering::Less,
                (false, false) => (w1 * h1).cmp(&(w2 * h2)),
            }
        })
        .map(|(i, _)| i)
}

/// Target dimensions when forcing a `width`x`height` source into a `size`
/// box: the side along the tray axis is fixed to `size`, the other follows
/// the source's aspect ratio.
pub fn fit_dimensions(
    width: i32,
    height: i32,
    size: i32,
    orientation: Orientation,
) -> (i32, i32) {
    if width <= 0 || height <= 0 {
        return (size, size);
    }
    match orientation {
        Orientation::Horizontal => (((width * size) / height).max(1), size),
        Orientation::Vertical => (size, ((height * size) / width).max(1)),
    }
}

/// Load a pixbuf from StatusNotifierItem's [Icon format].
///
/// [Icon format]: https://freedesktop.org/wiki/Specifications/StatusNotifierItem/Icons/
fn pixbuf_from_argb(width: i32, height: i32, mut data: Vec<u8>) -> gtk::gdk_pixbuf::Pixbuf {
    argb_to_rgba(&mut data);

    gtk::gdk_pixbuf::Pixbuf::from_bytes(
        &gtk::glib::Bytes::from_owned(data),
        gtk::gdk_pixbuf::Colorspace::Rgb,
        true,
        8,
        width,
        height,
        width * 4,
    )
}

/// From a list of pixmaps, create an icon from the most appropriately sized
/// one.
///
/// Entries whose byte count disagrees with their advertised dimensions are
/// skipped; gdk-pixbuf rejects those buffers. Returns None when no
/// well-formed pixmap is provided.
pub fn icon_from_pixmaps(
    pixmaps: &[(i32, i32, Vec<u8>)],
    size: i32,
    orientation: Orientation,
) -> Option<gtk::gdk_pixbuf::Pixbuf> {
    let usable: Vec<&(i32, i32, Vec<u8>)> = pixmaps
        .iter()
        .filter(|(w, h, data)| {
            let well_formed =
                *w > 0 && *h > 0 && data.len() == (*w as usize) * (*h as usize) * 4;
            if !well_formed {
                log::warn!(
                    "ignoring malformed icon pixmap: {}x{} with {} bytes",
                    w,
                    h,
                    data.len()
                );
            }
            well_formed
        })
        .collect();
    let dims: Vec<(i32, i32)> = usable.iter().map(|(w, h, _)| (*w, *h)).collect();
    let (w, h, data) = usable[best_pixmap(&dims, size)?];

    let pixbuf = pixbuf_from_argb(*w, *h, data.clone());
    let (tw, th) = fit_dimensions(*w, *h, size, orientation);
    if (tw, th) != (*w, *h) {
        pixbuf.scale_simple(tw, th, gtk::gdk_pixbuf::InterpType::Bilinear)
    } else {
        Some(pixbuf)
    }
}

/// Resolve one icon role from an item's snapshot fields.
///
/// Names win over pixmaps ("Visualizations are encouraged to prefer icon
/// names over icon pixmaps if both are available"): try the theme, then the
/// name as a literal file path, then the pixmap set. The normal role falls
/// back to the `image-missing` sentinel, the overlay/attention roles to no
/// icon at all.
///
/// Must be called on the GTK main context.
pub fn load_icon(
    role: IconRole,
    icon_name: &str,
    pixmaps: &[(i32, i32, Vec<u8>)],
    theme_path: Option<&str>,
    theme: &IconThemeService,
    size: i32,
    scale: i32,
    orientation: Orientation,
) -> Option<gtk::gdk::Paintable> {
    let scaled_size = size * scale;

    let from_name: Result<gtk::gdk::Paintable, IconError> = (|| {
        if icon_name.is_empty() {
            return Err(IconError::NotAvailable);
        }

        if let Some(p) = theme.resolve(icon_name, theme_path, size, scale) {
            return Ok(p);
        }

        // the theme doesn't know it; interpret it as an absolute path if we can
        let icon_path = std::path::Path::new(&icon_name);
        if icon_path.is_absolute() && icon_path.is_file() {
            return gtk::gdk_pixbuf::Pixbuf::from_file_at_size(icon_path, scaled_size, scaled_size)
                .map_err(|e| IconError::LoadIconFromFile {
                    path: icon_name.to_owned(),
                    source: e,
                })
                .map(|pb| gtk::gdk::Texture::for_pixbuf(&pb).into());
        }

        Err(IconError::NotAvailable)
    })();

    match from_name {
        Ok(p) => return Some(p),           // got an icon!
        Err(IconError::NotAvailable) => {} // this error is expected, don't log
        Err(e) => log::debug!("failed to get icon by name for {}: {}", role, e),
    };

    log::trace!("can't get {} from name, trying pixmap", role);

    if let Some(pixbuf) = icon_from_pixmaps(pixmaps, scaled_size, orientation) {
        return Some(gtk::gdk::Texture::for_pixbuf(&pixbuf).into());
    }

    // The item didn't provide a valid icon so use the default fallback one.
    match role {
        IconRole::Icon => Some(theme.missing_image(size, scale)),
        IconRole::AttentionIcon | IconRole::OverlayIcon => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_smallest_pixmap_covering_request() {
        let dims = [(16, 16), (32, 32), (64, 64)];
        assert_eq!(best_pixmap(&dims, 24), Some(1));
        assert_eq!(best_pixmap(&dims, 48), Some(2));
        assert_eq!(best_pixmap(&dims, 16), Some(0));
    }

    #[test]
    fn selects_largest_pixmap_when_none_fits() {
        let dims = [(16, 16), (32, 32), (64, 64)];
        assert_eq!(best_pixmap(&dims, 128), Some(2));
        assert_eq!(best_pixmap(&[], 128), None);
    }

    #[test]
    fn both_dimensions_must_cover_the_request() {
        // (64, 20) is wide enough but not tall enough for 24
        let dims = [(64, 20), (32, 32)];
        assert_eq!(best_pixmap(&dims, 24), Some(1));
    }

    #[test]
    fn fit_preserves_aspect_along_tray_axis() {
        assert_eq!(fit_dimensions(64, 32, 24, Orientation::Horizontal), (48, 24));
        assert_eq!(fit_dimensions(64, 32, 24, Orientation::Vertical), (24, 12));
        assert_eq!(fit_dimensions(64, 64, 24, Orientation::Horizontal), (24, 24));
    }

    #[test]
    fn malformed_pixmaps_are_rejected() {
        // a zero-sized entry and one whose byte count disagrees with its
        // dimensions; neither may reach gdk-pixbuf
        let pixmaps = vec![(0, 0, vec![]), (16, 16, vec![0u8; 10])];
        assert!(icon_from_pixmaps(&pixmaps, 24, Orientation::Horizontal).is_none());
        assert!(icon_from_pixmaps(&[], 24, Orientation::Horizontal).is_none());
    }

    #[test]
    fn argb_conversion_unpremultiplies() {
        // opaque red, fully transparent, half-transparent white
        let mut data = vec![
            0xff, 0xff, 0x00, 0x00, //
            0x00, 0x00, 0x00, 0x00, //
            0x80, 0x80, 0x80, 0x80,
        ];
        argb_to_rgba(&mut data);
        assert_eq!(&data[0..4], &[0xff, 0x00, 0x00, 0xff]);
        assert_eq!(&data[4..8], &[0x00, 0x00, 0x00, 0x00]);
        // 0x80 premultiplied by 0x80 alpha scales back up to 0xff
        assert_eq!(&data[8..12], &[0xff, 0xff, 0xff, 0x80]);
    }
}
