//! POSIX file types and permission mode bits

use crate::error::{ProviderError, Result};
use std::fmt;

/// One of the 12 POSIX permission and special bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PosixFileModeBit {
    SetUserId,
    SetGroupId,
    Sticky,
    OwnerRead,
    OwnerWrite,
    OwnerExecute,
    GroupRead,
    GroupWrite,
    GroupExecute,
    OthersRead,
    OthersWrite,
    OthersExecute,
}

impl PosixFileModeBit {
    pub const ALL: [PosixFileModeBit; 12] = [
        PosixFileModeBit::SetUserId,
        PosixFileModeBit::SetGroupId,
        PosixFileModeBit::Sticky,
        PosixFileModeBit::OwnerRead,
        PosixFileModeBit::OwnerWrite,
        PosixFileModeBit::OwnerExecute,
        PosixFileModeBit::GroupRead,
        PosixFileModeBit::GroupWrite,
        PosixFileModeBit::GroupExecute,
        PosixFileModeBit::OthersRead,
        PosixFileModeBit::OthersWrite,
        PosixFileModeBit::OthersExecute,
    ];

    pub const fn value(self) -> u32 {
        match self {
            PosixFileModeBit::SetUserId => 0o4000,
            PosixFileModeBit::SetGroupId => 0o2000,
            PosixFileModeBit::Sticky => 0o1000,
            PosixFileModeBit::OwnerRead => 0o400,
            PosixFileModeBit::OwnerWrite => 0o200,
            PosixFileModeBit::OwnerExecute => 0o100,
            PosixFileModeBit::GroupRead => 0o040,
            PosixFileModeBit::GroupWrite => 0o020,
            PosixFileModeBit::GroupExecute => 0o010,
            PosixFileModeBit::OthersRead => 0o004,
            PosixFileModeBit::OthersWrite => 0o002,
            PosixFileModeBit::OthersExecute => 0o001,
        }
    }
}

/// A set of [`PosixFileModeBit`]s
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PosixFileMode(u16);

impl PosixFileMode {
    const MASK: u32 = 0o7777;

    pub const EMPTY: PosixFileMode = PosixFileMode(0);
    /// `rw-rw-rw-`, before the umask
    pub const CREATE_FILE_DEFAULT: PosixFileMode = PosixFileMode(0o666);
    /// `rwxrwxrwx`, before the umask
    pub const CREATE_DIRECTORY_DEFAULT: PosixFileMode = PosixFileMode(0o777);

    /// Keep the 12 permission bits of a raw `st_mode`, ignoring the file type bits
    pub const fn from_int(mode: u32) -> Self {
        Self((mode & Self::MASK) as u16)
    }

    pub const fn to_int(self) -> u32 {
        self.0 as u32
    }

    pub fn from_bits(bits: impl IntoIterator<Item = PosixFileModeBit>) -> Self {
        bits.into_iter().fold(Self::EMPTY, |mode, bit| mode.with(bit))
    }

    pub fn contains(self, bit: PosixFileModeBit) -> bool {
        self.to_int() & bit.value() != 0
    }

    #[must_use]
    pub fn with(self, bit: PosixFileModeBit) -> Self {
        Self::from_int(self.to_int() | bit.value())
    }

    #[must_use]
    pub fn without(self, bit: PosixFileModeBit) -> Self {
        Self::from_int(self.to_int() & !bit.value())
    }

    pub fn insert(&mut self, bit: PosixFileModeBit) {
        *self = self.with(bit);
    }

    pub fn remove(&mut self, bit: PosixFileModeBit) {
        *self = self.without(bit);
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = PosixFileModeBit> {
        PosixFileModeBit::ALL
            .into_iter()
            .filter(move |bit| self.contains(*bit))
    }

    /// Render as the nine permission characters of `ls -l`, e.g. `rwsr-xr-T`
    pub fn to_mode_string(self) -> String {
        use PosixFileModeBit::*;

        let triple = |read, write, execute, special, special_char: char| {
            let mut chars = String::with_capacity(3);
            chars.push(if self.contains(read) { 'r' } else { '-' });
            chars.push(if self.contains(write) { 'w' } else { '-' });
            chars.push(match (self.contains(special), self.contains(execute)) {
                (true, true) => special_char,
                (true, false) => special_char.to_ascii_uppercase(),
                (false, true) => 'x',
                (false, false) => '-',
            });
            chars
        };

        let mut mode = String::with_capacity(9);
        mode.push_str(&triple(OwnerRead, OwnerWrite, OwnerExecute, SetUserId, 's'));
        mode.push_str(&triple(GroupRead, GroupWrite, GroupExecute, SetGroupId, 's'));
        mode.push_str(&triple(OthersRead, OthersWrite, OthersExecute, Sticky, 't'));
        mode
    }

    /// Render with the leading file type character, e.g. `drwxr-xr-x`
    pub fn to_ls_string(self, file_type: PosixFileType) -> String {
        let mut mode = String::with_capacity(10);
        mode.push(file_type.type_char());
        mode.push_str(&self.to_mode_string());
        mode
    }

    /// Parse the nine-character form produced by [`to_mode_string`](Self::to_mode_string)
    pub fn parse_mode_string(value: &str) -> Result<Self> {
        use PosixFileModeBit::*;

        let chars: Vec<char> = value.chars().collect();
        if chars.len() != 9 {
            return Err(ProviderError::InvalidArgument(format!(
                "Mode string must have 9 characters: {}",
                value
            )));
        }
        let invalid = || ProviderError::InvalidArgument(format!("Invalid mode string: {}", value));

        let classes = [
            (OwnerRead, OwnerWrite, OwnerExecute, SetUserId, 's'),
            (GroupRead, GroupWrite, GroupExecute, SetGroupId, 's'),
            (OthersRead, OthersWrite, OthersExecute, Sticky, 't'),
        ];
        let mut mode = Self::EMPTY;
        for (index, (read, write, execute, special, special_char)) in classes.into_iter().enumerate() {
            match chars[index * 3] {
                'r' => mode.insert(read),
                '-' => {}
                _ => return Err(invalid()),
            }
            match chars[index * 3 + 1] {
                'w' => mode.insert(write),
                '-' => {}
                _ => return Err(invalid()),
            }
            match chars[index * 3 + 2] {
                'x' => mode.insert(execute),
                '-' => {}
                c if c == special_char => {
                    mode.insert(execute);
                    mode.insert(special);
                }
                c if c == special_char.to_ascii_uppercase() => mode.insert(special),
                _ => return Err(invalid()),
            }
        }
        Ok(mode)
    }
}

impl fmt::Debug for PosixFileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PosixFileMode({:04o})", self.0)
    }
}

impl fmt::Display for PosixFileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_mode_string())
    }
}

impl FromIterator<PosixFileModeBit> for PosixFileMode {
    fn from_iter<T: IntoIterator<Item = PosixFileModeBit>>(iter: T) -> Self {
        Self::from_bits(iter)
    }
}

/// POSIX file type, decoded from the `S_IFMT` bits of `st_mode`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PosixFileType {
    #[default]
    Unknown,
    Directory,
    CharacterDevice,
    BlockDevice,
    RegularFile,
    Fifo,
    SymbolicLink,
    Socket,
}

impl PosixFileType {
    const S_IFMT: u32 = 0o170000;

    pub fn from_mode(mode: u32) -> Self {
        match mode & Self::S_IFMT {
            0o140000 => PosixFileType::Socket,
            0o120000 => PosixFileType::SymbolicLink,
            0o100000 => PosixFileType::RegularFile,
            0o060000 => PosixFileType::BlockDevice,
            0o040000 => PosixFileType::Directory,
            0o020000 => PosixFileType::CharacterDevice,
            0o010000 => PosixFileType::Fifo,
            _ => PosixFileType::Unknown,
        }
    }

    /// The `S_IFMT` bits for this type, zero when unknown
    pub fn to_mode(self) -> u32 {
        match self {
            PosixFileType::Socket => 0o140000,
            PosixFileType::SymbolicLink => 0o120000,
            PosixFileType::RegularFile => 0o100000,
            PosixFileType::BlockDevice => 0o060000,
            PosixFileType::Directory => 0o040000,
            PosixFileType::CharacterDevice => 0o020000,
            PosixFileType::Fifo => 0o010000,
            PosixFileType::Unknown => 0,
        }
    }

    pub fn type_char(self) -> char {
        match self {
            PosixFileType::RegularFile => '-',
            PosixFileType::Directory => 'd',
            PosixFileType::SymbolicLink => 'l',
            PosixFileType::Fifo => 'p',
            PosixFileType::CharacterDevice => 'c',
            PosixFileType::BlockDevice => 'b',
            PosixFileType::Socket => 's',
            PosixFileType::Unknown => '?',
        }
    }

    pub fn is_regular_file(self) -> bool {
        self == PosixFileType::RegularFile
    }

    pub fn is_directory(self) -> bool {
        self == PosixFileType::Directory
    }

    pub fn is_symbolic_link(self) -> bool {
        self == PosixFileType::SymbolicLink
    }

    pub fn is_other(self) -> bool {
        !(self.is_regular_file() || self.is_directory() || self.is_symbolic_link())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PosixFileModeBit::*;

    #[test]
    fn test_int_round_trip_all_values() {
        for value in 0..=0o7777u32 {
            let mode = PosixFileMode::from_int(value);
            assert_eq!(mode.to_int(), value);
            assert_eq!(PosixFileMode::from_bits(mode.iter()), mode);
        }
    }

    #[test]
    fn test_from_int_drops_type_bits() {
        assert_eq!(PosixFileMode::from_int(0o100644).to_int(), 0o644);
    }

    #[test]
    fn test_mode_string() {
        let mode = PosixFileMode::from_bits([OwnerRead, OwnerWrite, GroupRead, OthersRead]);
        assert_eq!(mode.to_mode_string(), "rw-r--r--");
        assert_eq!(PosixFileMode::from_int(0o4755).to_mode_string(), "rwsr-xr-x");
        assert_eq!(PosixFileMode::from_int(0o2644).to_mode_string(), "rw-r-Sr--");
        assert_eq!(PosixFileMode::from_int(0o1777).to_mode_string(), "rwxrwxrwt");
        assert_eq!(PosixFileMode::from_int(0o1776).to_mode_string(), "rwxrwxrwT");
    }

    #[test]
    fn test_ls_string() {
        let mode = PosixFileMode::from_int(0o755);
        assert_eq!(mode.to_ls_string(PosixFileType::Directory), "drwxr-xr-x");
        assert_eq!(mode.to_ls_string(PosixFileType::SymbolicLink), "lrwxr-xr-x");
    }

    #[test]
    fn test_parse_mode_string_inverts_rendering() {
        for value in 0..=0o7777u32 {
            let mode = PosixFileMode::from_int(value);
            assert_eq!(PosixFileMode::parse_mode_string(&mode.to_mode_string()).unwrap(), mode);
        }
        assert!(PosixFileMode::parse_mode_string("rwx").is_err());
        assert!(PosixFileMode::parse_mode_string("rwxrwxrwz").is_err());
    }

    #[test]
    fn test_file_type_from_mode() {
        assert_eq!(PosixFileType::from_mode(0o040755), PosixFileType::Directory);
        assert_eq!(PosixFileType::from_mode(0o120777), PosixFileType::SymbolicLink);
        assert_eq!(PosixFileType::from_mode(0o000644), PosixFileType::Unknown);
        assert!(PosixFileType::Fifo.is_other());
        for file_type in [PosixFileType::Socket, PosixFileType::BlockDevice, PosixFileType::RegularFile] {
            assert_eq!(PosixFileType::from_mode(file_type.to_mode() | 0o644), file_type);
        }
    }
}
