//! MIME type resolution

use crate::attributes::BasicFileAttributes;
use crate::mode::PosixFileType;
use crate::path::ByteStringListPath;

pub const DIRECTORY: &str = "inode/directory";
pub const GENERIC: &str = "application/octet-stream";

const EXTENSIONS: &[(&str, &str)] = &[
    ("7z", "application/x-7z-compressed"),
    ("apk", "application/vnd.android.package-archive"),
    ("avi", "video/x-msvideo"),
    ("bmp", "image/bmp"),
    ("c", "text/x-csrc"),
    ("css", "text/css"),
    ("csv", "text/csv"),
    ("doc", "application/msword"),
    ("epub", "application/epub+zip"),
    ("flac", "audio/flac"),
    ("gif", "image/gif"),
    ("gz", "application/gzip"),
    ("htm", "text/html"),
    ("html", "text/html"),
    ("jpeg", "image/jpeg"),
    ("jpg", "image/jpeg"),
    ("js", "text/javascript"),
    ("json", "application/json"),
    ("md", "text/markdown"),
    ("mkv", "video/x-matroska"),
    ("mp3", "audio/mpeg"),
    ("mp4", "video/mp4"),
    ("ogg", "audio/ogg"),
    ("pdf", "application/pdf"),
    ("png", "image/png"),
    ("rs", "text/rust"),
    ("svg", "image/svg+xml"),
    ("tar", "application/x-tar"),
    ("toml", "application/toml"),
    ("txt", "text/plain"),
    ("wav", "audio/x-wav"),
    ("webm", "video/webm"),
    ("webp", "image/webp"),
    ("xml", "text/xml"),
    ("zip", "application/zip"),
];

/// MIME type for file types that have no content to sniff
pub fn special_mime_type(file_type: PosixFileType) -> Option<&'static str> {
    match file_type {
        PosixFileType::Directory => Some(DIRECTORY),
        PosixFileType::CharacterDevice => Some("inode/chardevice"),
        PosixFileType::BlockDevice => Some("inode/blockdevice"),
        PosixFileType::Fifo => Some("inode/fifo"),
        PosixFileType::SymbolicLink => Some("inode/symlink"),
        PosixFileType::Socket => Some("inode/socket"),
        PosixFileType::RegularFile | PosixFileType::Unknown => None,
    }
}

/// Guess from the file name extension, case-insensitively
pub fn guess_from_extension(file_name: &[u8]) -> Option<&'static str> {
    let dot = file_name.iter().rposition(|b| *b == b'.')?;
    if dot == 0 {
        return None;
    }
    let extension = std::str::from_utf8(&file_name[dot + 1..]).ok()?.to_ascii_lowercase();
    EXTENSIONS
        .iter()
        .find(|(candidate, _)| *candidate == extension)
        .map(|(_, mime_type)| *mime_type)
}

/// Resolve the MIME type of a file
///
/// Order: the backend's own type, then the POSIX special type, then the
/// extension, then [`GENERIC`].
pub fn resolve_mime_type(path: &ByteStringListPath, attributes: &dyn BasicFileAttributes) -> String {
    if let Some(mime_type) = attributes.mime_type() {
        return mime_type.to_string();
    }
    if let Some(mime_type) = special_mime_type(attributes.file_type()) {
        return mime_type.to_string();
    }
    path.file_name_bytes()
        .and_then(|name| guess_from_extension(name.as_bytes()))
        .unwrap_or(GENERIC)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guess_from_extension() {
        assert_eq!(guess_from_extension(b"photo.JPG"), Some("image/jpeg"));
        assert_eq!(guess_from_extension(b"archive.tar.gz"), Some("application/gzip"));
        assert_eq!(guess_from_extension(b".bashrc"), None);
        assert_eq!(guess_from_extension(b"README"), None);
    }

    #[test]
    fn test_special_types() {
        assert_eq!(special_mime_type(PosixFileType::Fifo), Some("inode/fifo"));
        assert_eq!(special_mime_type(PosixFileType::RegularFile), None);
    }
}
