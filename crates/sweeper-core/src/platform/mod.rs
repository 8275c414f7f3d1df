use std::path::{Path, PathBuf};

/// Accepts "C", "c:", "C:\" or "\\.\C:" and returns the upper-case drive letter.
pub fn normalize_volume(input: &str) -> Option<char> {
    let trimmed = input
        .trim()
        .trim_start_matches(r"\\.\")
        .trim_end_matches(['\\', '/'])
        .trim_end_matches(':');
    let mut chars = trimmed.chars();
    match (chars.next(), chars.next()) {
        (Some(letter), None) if letter.is_ascii_alphabetic() => Some(letter.to_ascii_uppercase()),
        _ => None,
    }
}

/// Raw device path used to open a volume handle, e.g. `\\.\C:`.
pub fn volume_device_path(letter: char) -> String {
    format!(r"\\.\{}:", letter.to_ascii_uppercase())
}

/// Strip the `\\?\` verbatim prefix that handle-based path queries return.
pub fn strip_verbatim_prefix(path: &Path) -> PathBuf {
    let text = path.to_string_lossy();
    if let Some(rest) = text.strip_prefix(r"\\?\UNC\") {
        PathBuf::from(format!(r"\\{}", rest))
    } else if let Some(rest) = text.strip_prefix(r"\\?\") {
        PathBuf::from(rest)
    } else {
        path.to_path_buf()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_volume_forms() {
        assert_eq!(normalize_volume("C"), Some('C'));
        assert_eq!(normalize_volume("d:"), Some('D'));
        assert_eq!(normalize_volume(r"E:\"), Some('E'));
        assert_eq!(normalize_volume(r"\\.\F:"), Some('F'));
    }

    #[test]
    fn test_normalize_volume_rejects_garbage() {
        assert_eq!(normalize_volume(""), None);
        assert_eq!(normalize_volume("CD"), None);
        assert_eq!(normalize_volume("1:"), None);
    }

    #[test]
    fn test_strip_verbatim_prefix() {
        assert_eq!(
            strip_verbatim_prefix(Path::new(r"\\?\C:\Users\dev")),
            PathBuf::from(r"C:\Users\dev")
        );
        assert_eq!(
            strip_verbatim_prefix(Path::new(r"\\?\UNC\server\share")),
            PathBuf::from(r"\\server\share")
        );
        assert_eq!(
            strip_verbatim_prefix(Path::new("/tmp/x")),
            PathBuf::from("/tmp/x")
        );
    }

    #[test]
    fn test_volume_device_path() {
        assert_eq!(volume_device_path('c'), r"\\.\C:");
    }
}
