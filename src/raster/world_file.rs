//! Sidecar georeferencing for rasters that carry none themselves.
//!
//! A world file holds six lines: pixel width, row rotation, column rotation, pixel height
//! (negative for north-up), then the x and y of the *center* of the upper-left pixel. The
//! projection lives next to it in a `.prj` file as WKT or an authority string.

use crate::raster::affine::GeoTransform;
use std::fs;
use std::path::{Path, PathBuf};

/// Sidecar names tried for `image`, in order: `.tfw` style (first + last letter + w),
/// `.tifw` style (extension + w), then `.wld`.
pub fn world_file_candidates(image: &Path) -> Vec<PathBuf> {
    let Some(ext) = image.extension().and_then(|e| e.to_str()) else {
        return vec![image.with_extension("wld")];
    };
    let mut exts = Vec::new();
    let mut chars = ext.chars();
    if let (Some(first), Some(last)) = (chars.next(), chars.last()) {
        exts.push(format!("{}{}w", first, last));
    }
    exts.push(format!("{}w", ext));
    exts.push("wld".to_string());
    let mut candidates = Vec::new();
    for e in exts {
        candidates.push(image.with_extension(e.to_lowercase()));
        candidates.push(image.with_extension(e.to_uppercase()));
    }
    candidates.dedup();
    candidates
}

pub fn find_world_file(image: &Path) -> Option<PathBuf> {
    world_file_candidates(image).into_iter().find(|p| p.is_file())
}

pub fn parse_world_file(text: &str) -> Result<GeoTransform, String> {
    let values: Vec<f64> = text
        .split_whitespace()
        .map(|tok| {
            tok.parse::<f64>()
                .map_err(|_| format!("world file value is not a number: {:?}", tok))
        })
        .collect::<Result<_, _>>()?;
    if values.len() != 6 {
        return Err(format!("world file must hold 6 values, found {}", values.len()));
    }
    let (a, d, b, e, c_center, f_center) =
        (values[0], values[1], values[2], values[3], values[4], values[5]);
    // Move the reference from the upper-left pixel center to its outer corner.
    Ok(GeoTransform::new(
        a,
        b,
        c_center - 0.5 * a - 0.5 * b,
        d,
        e,
        f_center - 0.5 * d - 0.5 * e,
    ))
}

pub fn read_world_file(image: &Path) -> Option<Result<GeoTransform, String>> {
    let path = find_world_file(image)?;
    Some(
        fs::read_to_string(&path)
            .map_err(|e| format!("{}: {}", path.display(), e))
            .and_then(|text| parse_world_file(&text)),
    )
}

/// Reads the `.prj` sidecar verbatim, trimmed.
pub fn read_projection_file(image: &Path) -> Option<String> {
    ["prj", "PRJ"]
        .iter()
        .map(|ext| image.with_extension(ext))
        .find(|p| p.is_file())
        .and_then(|p| fs::read_to_string(p).ok())
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}
