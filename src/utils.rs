//! Utility functions for path and input handling.
//!
//! This module provides small helpers shared by the session store, the login flow
//! and the media saver.

use std::path::PathBuf;

/// Constructs a file system path by joining a directory path with a subdirectory.
///
/// The path separator is picked by the operating system.
///
/// # Examples
///
/// ```
/// # use saveit::utils::get_path;
/// let path = get_path("/home/user", "downloads");
/// assert_eq!(path, "/home/user/downloads");
/// ```
pub fn get_path(dir_path: &str, subdir_path: &str) -> String {
    let path_buf: PathBuf = [dir_path, subdir_path].iter().collect();
    path_buf.to_string_lossy().into_owned()
}

/// Strips every non-digit character from a phone number.
///
/// Used to key sessions so that different spellings of the same number map to
/// the same session file.
///
/// # Examples
///
/// ```
/// # use saveit::utils::normalize_phone;
/// assert_eq!(normalize_phone("+98 912-345"), "98912345");
/// ```
pub fn normalize_phone(phone_number: &str) -> String {
    phone_number
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_path_simple() {
        let path = get_path("/home/user", "downloads");
        #[cfg(unix)]
        assert_eq!(path, "/home/user/downloads");
        #[cfg(windows)]
        assert_eq!(path, "\\home\\user\\downloads");
    }

    #[test]
    fn test_get_path_relative_paths() {
        let path = get_path(".", "session_123.session");
        #[cfg(unix)]
        assert_eq!(path, "./session_123.session");
        #[cfg(windows)]
        assert_eq!(path, ".\\session_123.session");
    }

    #[test]
    fn test_get_path_absolute_subdir_wins() {
        #[cfg(unix)]
        assert_eq!(get_path("/data", "/tmp/downloads"), "/tmp/downloads");
    }

    #[test]
    fn test_normalize_phone_strips_formatting() {
        assert_eq!(normalize_phone("+98 912 345 6789"), "989123456789");
        assert_eq!(normalize_phone("(555) 010-0199"), "5550100199");
    }

    #[test]
    fn test_normalize_phone_already_clean() {
        assert_eq!(normalize_phone("15550100"), "15550100");
    }

    #[test]
    fn test_normalize_phone_without_digits() {
        assert_eq!(normalize_phone("+ -"), "");
        assert_eq!(normalize_phone(""), "");
    }
}
