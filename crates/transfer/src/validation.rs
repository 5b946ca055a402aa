use std::path::{Component, Path};

use crate::TransferError;

/// Validates a transfer display name before it becomes part of an artifact name.
///
/// The name must be a single plain file name. Rejects:
/// - Empty names and NUL bytes
/// - Any path separator (`/` or `\`)
/// - `.` and `..`
/// - Windows drive prefixes (`C:`)
pub fn validate_transfer_name(name: &str) -> Result<(), TransferError> {
    if name.is_empty() {
        return Err(TransferError::InvalidName("empty name".into()));
    }

    if name.contains('\0') {
        return Err(TransferError::InvalidName(format!(
            "NUL byte not allowed: {name:?}"
        )));
    }

    if name.contains('/') || name.contains('\\') {
        return Err(TransferError::InvalidName(format!(
            "path separators not allowed: {name}"
        )));
    }

    if name.len() >= 2 && name.as_bytes()[1] == b':' {
        return Err(TransferError::InvalidName(format!(
            "drive prefix not allowed: {name}"
        )));
    }

    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(TransferError::InvalidName(format!(
            "not a plain file name: {name}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_name() {
        assert!(validate_transfer_name("").is_err());
    }

    #[test]
    fn rejects_parent_dir() {
        assert!(validate_transfer_name("..").is_err());
    }

    #[test]
    fn rejects_current_dir() {
        assert!(validate_transfer_name(".").is_err());
    }

    #[test]
    fn rejects_traversal() {
        assert!(validate_transfer_name("../../etc/passwd").is_err());
    }

    #[test]
    fn rejects_subdirectory() {
        assert!(validate_transfer_name("sub/file.txt").is_err());
    }

    #[test]
    fn rejects_absolute_path() {
        assert!(validate_transfer_name("/tmp/file").is_err());
    }

    #[test]
    fn rejects_backslash_and_drive() {
        assert!(validate_transfer_name("C:\\Windows\\evil").is_err());
        assert!(validate_transfer_name("C:evil").is_err());
    }

    #[test]
    fn rejects_nul() {
        assert!(validate_transfer_name("a\0b").is_err());
    }

    #[test]
    fn accepts_plain_names() {
        assert!(validate_transfer_name("video.mp4").is_ok());
        assert!(validate_transfer_name(".env").is_ok());
        assert!(validate_transfer_name("report 2024 (final).pdf").is_ok());
    }

    #[test]
    fn error_kind_is_invalid_name() {
        let err = validate_transfer_name("a/b").unwrap_err();
        assert!(matches!(err, TransferError::InvalidName(_)));
    }
}
