use std::{
    collections::BTreeMap,
    fs::{self, File, OpenOptions},
    io::{self, Write as _},
    path::{Path, PathBuf},
};

/// File access used by the rotating logger: enumeration, content and
/// durable appends.
pub trait LogStore {
    fn list(&self) -> io::Result<Vec<String>>;

    fn read_to_string(&self, name: &str) -> io::Result<String>;

    /// `None` when the file does not exist yet.
    fn size(&self, name: &str) -> io::Result<Option<u64>>;

    /// Appends one line. The line is durable once this returns.
    fn append_line(&mut self, name: &str, line: &str) -> io::Result<()>;
}

/// Log files in one directory. Keeps the active file open between appends.
pub struct FsLogStore {
    directory: PathBuf,
    active: Option<(String, File)>,
}

impl FsLogStore {
    pub fn new<P: AsRef<Path>>(directory: P) -> io::Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory)?;

        Ok(Self {
            directory,
            active: None,
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn active_file(&mut self, name: &str) -> io::Result<&mut File> {
        let reopen = !matches!(&self.active, Some((active, _)) if active == name);

        if reopen {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.directory.join(name))?;
            // Dropping the previous handle closes the rotated-out file.
            self.active = Some((name.to_string(), file));
        }

        match &mut self.active {
            Some((_, file)) => Ok(file),
            None => Err(io::Error::new(io::ErrorKind::Other, "No active log file")),
        }
    }
}

impl LogStore for FsLogStore {
    fn list(&self) -> io::Result<Vec<String>> {
        let mut names = Vec::new();

        for entry in fs::read_dir(&self.directory)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }

        Ok(names)
    }

    fn read_to_string(&self, name: &str) -> io::Result<String> {
        fs::read_to_string(self.directory.join(name))
    }

    fn size(&self, name: &str) -> io::Result<Option<u64>> {
        match fs::metadata(self.directory.join(name)) {
            Ok(metadata) => Ok(Some(metadata.len())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn append_line(&mut self, name: &str, line: &str) -> io::Result<()> {
        let mut record = String::with_capacity(line.len() + 1);
        record.push_str(line);
        record.push('\n');

        let file = self.active_file(name)?;
        file.write_all(record.as_bytes())?;
        file.flush()?;
        file.sync_data()
    }
}

/// In-memory store for exercising the resume and rotation logic.
#[derive(Debug, Default, Clone)]
pub struct MemoryLogStore {
    files: BTreeMap<String, String>,
    reject_writes: bool,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, name: &str, content: &str) -> Self {
        self.files.insert(name.to_string(), content.to_string());
        self
    }

    pub fn file(&self, name: &str) -> Option<&str> {
        self.files.get(name).map(String::as_str)
    }

    pub fn file_names(&self) -> Vec<&str> {
        self.files.keys().map(String::as_str).collect()
    }

    /// Makes every following append fail, as an unwritable disk would.
    pub fn reject_writes(&mut self, reject: bool) {
        self.reject_writes = reject;
    }
}

impl LogStore for MemoryLogStore {
    fn list(&self) -> io::Result<Vec<String>> {
        Ok(self.files.keys().cloned().collect())
    }

    fn read_to_string(&self, name: &str) -> io::Result<String> {
        self.files
            .get(name)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, name.to_string()))
    }

    fn size(&self, name: &str) -> io::Result<Option<u64>> {
        Ok(self.files.get(name).map(|content| content.len() as u64))
    }

    fn append_line(&mut self, name: &str, line: &str) -> io::Result<()> {
        if self.reject_writes {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("{name} is read-only"),
            ));
        }

        let content = self.files.entry(name.to_string()).or_default();
        content.push_str(line);
        content.push('\n');
        Ok(())
    }
}
