//! Virtual directory cursor and listing snapshot.

use crate::library::MediaLibrary;
use nmp_hw::mmio::nmp::stream;
use tracing::{debug, warn};

/// Kind of a listing entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Folder,
    File,
}

/// Folder and file browsing state.
///
/// `current_dir` is a virtual path relative to the library root: `""` is the
/// root, children are appended as `"/name"`.
#[derive(Debug, Clone, Default)]
pub struct Navigation {
    pub current_dir: String,
    pub current_music_file: String,
    /// Folders of `current_dir` at the last START_FILE_LIST
    pub folders: Vec<String>,
    /// Music files of `current_dir` at the last START_FILE_LIST
    pub music_files: Vec<String>,
    /// Cursor into `folders ++ music_files`, one past the entry last listed
    pub entry_count: usize,
}

impl Navigation {
    /// Take a fresh listing snapshot of `current_dir` and rewind the cursor
    pub fn snapshot(&mut self, library: &mut dyn MediaLibrary, extension: &str) {
        self.entry_count = 0;
        self.folders = library.list_folders(&self.current_dir).unwrap_or_else(|e| {
            warn!("Failed to list folders in {:?}: {}", self.current_dir, e);
            Vec::new()
        });
        self.music_files = library
            .list_files(&self.current_dir, extension)
            .unwrap_or_else(|e| {
                warn!("Failed to list files in {:?}: {}", self.current_dir, e);
                Vec::new()
            });
        debug!(
            "Listing {:?}: {} folders, {} files",
            self.current_dir,
            self.folders.len(),
            self.music_files.len()
        );
    }

    pub fn total_entries(&self) -> usize {
        self.folders.len() + self.music_files.len()
    }

    /// True once the cursor has passed every entry of the snapshot
    pub fn list_complete(&self) -> bool {
        self.entry_count >= self.total_entries()
    }

    pub fn advance(&mut self) {
        self.entry_count += 1;
    }

    /// Entry last handed out by the cursor. Folders come before files.
    pub fn current_entry(&self) -> Option<(&str, EntryKind)> {
        let entry = self.entry_count.checked_sub(1)?;
        match self.folders.get(entry) {
            Some(folder) => Some((folder.as_str(), EntryKind::Folder)),
            None => self
                .music_files
                .get(entry - self.folders.len())
                .map(|file| (file.as_str(), EntryKind::File)),
        }
    }

    /// Apply a SET_DIR argument: `".."` moves to the parent, any other
    /// non-empty name enters a child folder.
    pub fn change_dir(&mut self, name: &str) {
        if name == ".." {
            match self.current_dir.rfind('/') {
                Some(pos) => self.current_dir.truncate(pos),
                None => self.current_dir.clear(),
            }
        } else if !name.is_empty() {
            self.current_dir.push('/');
            self.current_dir.push_str(name);
        }
        debug!("Current directory: {:?}", self.current_dir);
    }

    /// Virtual path of a file in the current directory
    pub fn path_of(&self, file: &str) -> String {
        format!("{}/{}", self.current_dir, file)
    }
}

/// Extract the name argument of a command stream.
///
/// Characters sit at every other byte from index 3 and end at a zero byte. A
/// 0x01 / 0x02 marker in the first character slot is skipped.
pub fn parse_stream_name(command_stream: &[u8]) -> String {
    let mut name = String::new();
    for (i, &chr) in command_stream
        .iter()
        .enumerate()
        .skip(stream::NAME_START)
        .step_by(stream::NAME_STRIDE)
    {
        if chr == 0 {
            break;
        }
        if i == stream::NAME_START && stream::NAME_MARKERS.contains(&chr) {
            continue;
        }
        name.push(chr as char);
    }
    name
}
