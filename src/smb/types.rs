//! Share entry types
//!
//! These are the records a session hands back to the walker. They carry
//! only what the traversal needs: a name and a coarse kind.

/// Kind of a directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// Regular file
    File,
    /// Directory (or share, when listing a server root)
    Directory,
    /// Anything else: symlinks, devices, printers, IPC shares
    Other,
}

impl EntryKind {
    /// Convert from a local file type
    pub fn from_file_type(file_type: std::fs::FileType) -> Self {
        if file_type.is_dir() {
            EntryKind::Directory
        } else if file_type.is_file() {
            EntryKind::File
        } else {
            EntryKind::Other
        }
    }
}

/// A directory entry returned from a directory stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dirent {
    /// Entry name (not full path)
    pub name: String,

    /// Entry kind
    pub kind: EntryKind,
}

impl Dirent {
    pub fn new(name: impl Into<String>, kind: EntryKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// Check if this is the "." entry
    pub fn is_dot(&self) -> bool {
        self.name == "."
    }

    /// Check if this is the ".." entry
    pub fn is_dotdot(&self) -> bool {
        self.name == ".."
    }

    /// Check if this should be skipped (. or ..)
    pub fn is_special(&self) -> bool {
        self.is_dot() || self.is_dotdot()
    }
}

/// Flags passed when opening a file
///
/// Only reads are supported; the value is carried through to the client
/// unchanged so write modes can be added without touching call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenFlags(pub u32);

impl OpenFlags {
    pub const READ_ONLY: OpenFlags = OpenFlags(0);
}

/// Result of a single chunk read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Some bytes were read; zero is legal and does not end the stream
    Bytes(usize),
    /// The stream is exhausted
    EndOfStream,
}

impl ReadOutcome {
    pub fn is_end(&self) -> bool {
        matches!(self, ReadOutcome::EndOfStream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_special_entries() {
        assert!(Dirent::new(".", EntryKind::Directory).is_special());
        assert!(Dirent::new("..", EntryKind::Directory).is_special());
        assert!(!Dirent::new("...", EntryKind::Directory).is_special());
        assert!(!Dirent::new(".hidden", EntryKind::File).is_special());
    }

    #[test]
    fn test_open_flags_default_is_read_only() {
        assert_eq!(OpenFlags::default(), OpenFlags::READ_ONLY);
        assert_eq!(OpenFlags::READ_ONLY.0, 0);
    }
}
