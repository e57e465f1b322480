//! Sample identifier and condition label derivation

use std::path::Path;

/// Derive a sample ID from the path of its quantification file.
///
/// The directory holding the file is split on `_` and its first two tokens are
/// kept, so `quant/KO_ctrl_1_S4_L001/counts.txt` becomes `KO_ctrl`. A path
/// without a parent directory falls back to the file stem.
pub fn sample_id_from_path(path: &str) -> String {
    let p = Path::new(path);
    let name = p
        .parent()
        .and_then(|d| d.file_name())
        .or_else(|| p.file_stem())
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string());

    name.split('_').take(2).collect::<Vec<_>>().join("_")
}

/// Normalize a raw group label: hyphens become underscores and `OverExpr`
/// is shortened to `OE`.
pub fn normalize_label(label: &str) -> String {
    label.trim().replace('-', "_").replace("OverExpr", "OE")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_id_from_directory() {
        assert_eq!(sample_id_from_path("data/KO1_S1_L001_R1/quant.sf"), "KO1_S1");
        assert_eq!(sample_id_from_path("OE3_S9_L002/counts.txt"), "OE3_S9");
    }

    #[test]
    fn test_sample_id_without_directory() {
        assert_eq!(sample_id_from_path("KO2_S2_extra.txt"), "KO2_S2");
        assert_eq!(sample_id_from_path("single"), "single");
    }

    #[test]
    fn test_normalize_label() {
        assert_eq!(normalize_label("KO-severe"), "KO_severe");
        assert_eq!(normalize_label("OverExpr-ctrl"), "OE_ctrl");
        assert_eq!(normalize_label(" KO_ctrl "), "KO_ctrl");
    }
}
