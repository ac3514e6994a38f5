//! Checksum calculation for revision files

use sha2::{Digest, Sha256};

/// SHA-256 of a revision file's content, hex encoded
///
/// Line endings are normalized first so a checkout with CRLF endings does not
/// look like an edited revision.
pub fn calculate_checksum(content: &str) -> String {
    let normalized = content.replace("\r\n", "\n");
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_is_hex_sha256() {
        let sum = calculate_checksum("CREATE TABLE suppliers (id UUID);\n");
        assert_eq!(sum.len(), 64);
        assert!(sum.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_line_endings_do_not_change_checksum() {
        assert_eq!(
            calculate_checksum("a;\r\nb;\r\n"),
            calculate_checksum("a;\nb;\n")
        );
        assert_ne!(calculate_checksum("a;\n"), calculate_checksum("b;\n"));
    }
}
