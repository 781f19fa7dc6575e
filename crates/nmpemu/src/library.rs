//! Host-side music library backing the virtual SD card.
//!
//! The cartridge never sees real files: it asks the library for folder and
//! file names, decoded PCM and tag text, then renders those into its own
//! response blocks. Three backends are provided:
//!
//! - [`HostLibrary`] reads a directory on the host filesystem
//! - [`FatImageLibrary`] reads a FAT disk image (same format as a real SD card)
//! - [`MemoryLibrary`] holds everything in memory (tests, embedding)
//!
//! Virtual paths are '/'-separated and relative to the library root. The empty
//! string is the root itself, so `"/music/track.wav"` and `"music/track.wav"`
//! name the same file.

use crate::error::{NmpError, Result};
use fscommon::BufStream;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, trace};

/// Size of an ID3v1 trailer
const ID3V1_SIZE: usize = 128;

/// Decoded PCM handed to the audio feeder
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedAudio {
    /// Interleaved signed 16-bit samples
    pub samples: Vec<i16>,
    /// Source sample rate in Hz
    pub sample_rate: u32,
    /// Number of interleaved channels
    pub channels: u16,
    /// Track length in whole seconds
    pub duration_secs: u32,
}

/// Title and artist of a track. Missing tags are empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackTags {
    pub title: String,
    pub artist: String,
}

/// Filesystem, audio loader and tag extractor collaborators
pub trait MediaLibrary: std::fmt::Debug {
    /// Names of the folders directly inside `path`, in listing order
    fn list_folders(&mut self, path: &str) -> Result<Vec<String>>;

    /// Names of the files directly inside `path` whose extension matches
    /// `extension` (e.g. `".mp3"`, case-insensitive), in listing order
    fn list_files(&mut self, path: &str, extension: &str) -> Result<Vec<String>>;

    /// Decode a track to 16-bit PCM
    fn load_audio(&mut self, path: &str) -> Result<DecodedAudio>;

    /// Best-effort tag extraction
    fn read_tags(&mut self, path: &str) -> Result<TrackTags>;
}

// ============================================================================
// Shared helpers
// ============================================================================

/// Strip everything outside printable ASCII
pub fn make_printable(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_ascii_graphic() || *c == ' ')
        .collect()
}

/// Case-insensitive extension match. `extension` may carry a leading dot.
pub fn matches_extension(name: &str, extension: &str) -> bool {
    let extension = extension.trim_start_matches('.');
    match name.rsplit_once('.') {
        Some((stem, ext)) => !stem.is_empty() && ext.eq_ignore_ascii_case(extension),
        None => false,
    }
}

/// Decode a WAV stream to interleaved 16-bit PCM
pub fn decode_wav<R: Read>(reader: R) -> Result<DecodedAudio> {
    let mut wav = hound::WavReader::new(reader)?;
    let spec = wav.spec();

    let samples: Vec<i16> = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, 8) => wav
            .samples::<i8>()
            .map(|s| s.map(|v| (v as i16) << 8))
            .collect::<std::result::Result<_, _>>()?,
        (hound::SampleFormat::Int, 16) => wav
            .samples::<i16>()
            .collect::<std::result::Result<_, _>>()?,
        (hound::SampleFormat::Int, bits @ (24 | 32)) => {
            let shift = bits - 16;
            wav.samples::<i32>()
                .map(|s| s.map(|v| (v >> shift) as i16))
                .collect::<std::result::Result<_, _>>()?
        }
        (hound::SampleFormat::Float, 32) => wav
            .samples::<f32>()
            .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * i16::MAX as f32) as i16))
            .collect::<std::result::Result<_, _>>()?,
        (format, bits) => {
            return Err(NmpError::UnsupportedFormat(format!(
                "{:?} {}-bit",
                format, bits
            )));
        }
    };

    let duration_secs = if spec.sample_rate == 0 {
        0
    } else {
        wav.duration() / spec.sample_rate
    };

    debug!(
        "Decoded {} samples ({} Hz, {} ch, {}s)",
        samples.len(),
        spec.sample_rate,
        spec.channels,
        duration_secs
    );

    Ok(DecodedAudio {
        samples,
        sample_rate: spec.sample_rate,
        channels: spec.channels,
        duration_secs,
    })
}

/// Read the ID3v1 trailer of a file, if it has one
pub fn read_id3v1<R: Read + Seek>(reader: &mut R) -> Result<TrackTags> {
    let len = reader.seek(SeekFrom::End(0))?;
    if len < ID3V1_SIZE as u64 {
        return Ok(TrackTags::default());
    }

    let mut trailer = [0u8; ID3V1_SIZE];
    reader.seek(SeekFrom::End(-(ID3V1_SIZE as i64)))?;
    reader.read_exact(&mut trailer)?;

    if &trailer[0..3] != b"TAG" {
        trace!("No ID3v1 trailer");
        return Ok(TrackTags::default());
    }

    let field = |bytes: &[u8]| {
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        String::from_utf8_lossy(&bytes[..end]).trim_end().to_string()
    };

    Ok(TrackTags {
        title: field(&trailer[3..33]),
        artist: field(&trailer[33..63]),
    })
}

/// Split a virtual path into its non-empty components, rejecting `..`
fn components(path: &str) -> Result<Vec<&str>> {
    let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
    if parts.iter().any(|p| *p == "..") {
        return Err(NmpError::InvalidPath(path.to_string()));
    }
    Ok(parts)
}

// ============================================================================
// Host directory backend
// ============================================================================

/// Music library rooted at a host directory
#[derive(Debug, Clone)]
pub struct HostLibrary {
    root: PathBuf,
}

impl HostLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Library root on the host
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a virtual path onto the host filesystem
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let mut resolved = self.root.clone();
        for part in components(path)? {
            let part = Path::new(part);
            if !matches!(part.components().next(), Some(Component::Normal(_))) {
                return Err(NmpError::InvalidPath(path.to_string()));
            }
            resolved.push(part);
        }
        Ok(resolved)
    }

    /// Sorted names of visible entries in a directory matching `keep`
    fn entries(&self, path: &str, keep: impl Fn(&std::fs::DirEntry) -> bool) -> Result<Vec<String>> {
        let dir = self.resolve(path)?;
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || !keep(&entry) {
                continue;
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }
}

impl MediaLibrary for HostLibrary {
    fn list_folders(&mut self, path: &str) -> Result<Vec<String>> {
        self.entries(path, |e| e.file_type().is_ok_and(|t| t.is_dir()))
    }

    fn list_files(&mut self, path: &str, extension: &str) -> Result<Vec<String>> {
        self.entries(path, |e| {
            e.file_type().is_ok_and(|t| t.is_file())
                && matches_extension(&e.file_name().to_string_lossy(), extension)
        })
    }

    fn load_audio(&mut self, path: &str) -> Result<DecodedAudio> {
        let file = File::open(self.resolve(path)?)?;
        decode_wav(BufReader::new(file))
    }

    fn read_tags(&mut self, path: &str) -> Result<TrackTags> {
        let mut file = File::open(self.resolve(path)?)?;
        read_id3v1(&mut file)
    }
}

// ============================================================================
// FAT disk image backend
// ============================================================================

type ImageStream = BufStream<File>;

/// Music library read from a FAT-formatted SD card image
pub struct FatImageLibrary {
    image: PathBuf,
    fs: fatfs::FileSystem<ImageStream>,
}

impl std::fmt::Debug for FatImageLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FatImageLibrary")
            .field("image", &self.image)
            .finish_non_exhaustive()
    }
}

impl FatImageLibrary {
    /// Mount a raw FAT image
    pub fn open(image: impl Into<PathBuf>) -> Result<Self> {
        let image = image.into();
        let file = File::open(&image)?;
        let fs = fatfs::FileSystem::new(BufStream::new(file), fatfs::FsOptions::new())?;
        debug!("Mounted SD card image: {:?}", image);
        Ok(Self { image, fs })
    }

    fn dir(&self, path: &str) -> Result<fatfs::Dir<'_, ImageStream>> {
        let parts = components(path)?;
        let root = self.fs.root_dir();
        if parts.is_empty() {
            Ok(root)
        } else {
            Ok(root.open_dir(&parts.join("/"))?)
        }
    }

    fn file(&self, path: &str) -> Result<fatfs::File<'_, ImageStream>> {
        let parts = components(path)?;
        Ok(self.fs.root_dir().open_file(&parts.join("/"))?)
    }

    fn entries(&self, path: &str, keep: impl Fn(&fatfs::DirEntry<'_, ImageStream>) -> bool) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in self.dir(path)?.iter() {
            let entry = entry?;
            let name = entry.file_name();
            if name.starts_with('.') || !keep(&entry) {
                continue;
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }
}

impl MediaLibrary for FatImageLibrary {
    fn list_folders(&mut self, path: &str) -> Result<Vec<String>> {
        self.entries(path, |e| e.is_dir())
    }

    fn list_files(&mut self, path: &str, extension: &str) -> Result<Vec<String>> {
        self.entries(path, |e| e.is_file() && matches_extension(&e.file_name(), extension))
    }

    fn load_audio(&mut self, path: &str) -> Result<DecodedAudio> {
        decode_wav(BufReader::new(self.file(path)?))
    }

    fn read_tags(&mut self, path: &str) -> Result<TrackTags> {
        let mut file = self.file(path)?;
        read_id3v1(&mut file)
    }
}

// ============================================================================
// In-memory backend
// ============================================================================

#[derive(Debug, Clone)]
enum MemoryEntry {
    Folder,
    Track {
        audio: Option<DecodedAudio>,
        tags: TrackTags,
    },
}

/// Music library held entirely in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryLibrary {
    entries: BTreeMap<String, MemoryEntry>,
}

impl MemoryLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(path: &str) -> String {
        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        format!("/{}", parts.join("/"))
    }

    /// Add a folder (parents are created as needed)
    pub fn add_folder(&mut self, path: &str) -> &mut Self {
        let key = Self::key(path);
        let mut parent = String::new();
        for part in key.split('/').filter(|p| !p.is_empty()) {
            parent = format!("{}/{}", parent, part);
            self.entries
                .entry(parent.clone())
                .or_insert(MemoryEntry::Folder);
        }
        self
    }

    /// Add a track. `audio: None` makes loads fail like an undecodable file.
    pub fn add_track(&mut self, path: &str, audio: Option<DecodedAudio>, tags: TrackTags) -> &mut Self {
        let key = Self::key(path);
        if let Some((parent, _)) = key.rsplit_once('/')
            && !parent.is_empty()
        {
            self.add_folder(parent);
        }
        self.entries.insert(key, MemoryEntry::Track { audio, tags });
        self
    }

    fn children(&self, path: &str) -> impl Iterator<Item = (&str, &MemoryEntry)> {
        let dir = Self::key(path);
        self.entries.iter().filter_map(move |(key, entry)| {
            let (parent, name) = key.rsplit_once('/')?;
            let parent = if parent.is_empty() { "/" } else { parent };
            (parent == dir).then_some((name, entry))
        })
    }

    fn track(&self, path: &str) -> Result<(&Option<DecodedAudio>, &TrackTags)> {
        match self.entries.get(&Self::key(path)) {
            Some(MemoryEntry::Track { audio, tags }) => Ok((audio, tags)),
            _ => Err(NmpError::InvalidPath(path.to_string())),
        }
    }
}

impl MediaLibrary for MemoryLibrary {
    fn list_folders(&mut self, path: &str) -> Result<Vec<String>> {
        Ok(self
            .children(path)
            .filter(|(_, e)| matches!(e, MemoryEntry::Folder))
            .map(|(name, _)| name.to_string())
            .collect())
    }

    fn list_files(&mut self, path: &str, extension: &str) -> Result<Vec<String>> {
        Ok(self
            .children(path)
            .filter(|(name, e)| {
                matches!(e, MemoryEntry::Track { .. }) && matches_extension(name, extension)
            })
            .map(|(name, _)| name.to_string())
            .collect())
    }

    fn load_audio(&mut self, path: &str) -> Result<DecodedAudio> {
        match self.track(path)? {
            (Some(audio), _) => Ok(audio.clone()),
            (None, _) => Err(NmpError::UnsupportedFormat(path.to_string())),
        }
    }

    fn read_tags(&mut self, path: &str) -> Result<TrackTags> {
        Ok(self.track(path)?.1.clone())
    }
}
