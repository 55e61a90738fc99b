//! Cache of deployment logs, keyed by repository and deployment id.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use dashmap::DashMap;

use crate::github::Repository;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogKey {
    owner: String,
    repo: String,
    id: u64,
}

impl LogKey {
    /// Returns `None` if `owner` or `repo` can't be a GitHub name.
    pub fn new(owner: &str, repo: &str, id: u64) -> Option<Self> {
        if !is_valid_segment(owner) || !is_valid_segment(repo) {
            return None;
        }
        Some(Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
            id,
        })
    }

    pub fn for_repository(repository: &Repository, id: u64) -> Option<Self> {
        Self::new(&repository.owner.login, &repository.name, id)
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Public URL where this log can be fetched.
    pub fn url(&self, public_url: &str) -> String {
        format!(
            "{}/deployment/{}/{}/{}",
            public_url, self.owner, self.repo, self.id
        )
    }
}

fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

pub trait LogStore: Send + Sync {
    /// Stores `log`, replacing any previous log under the same key.
    fn put(&self, key: &LogKey, log: &str) -> io::Result<()>;
    fn get(&self, key: &LogKey) -> io::Result<Option<String>>;
}

#[derive(Debug, Default)]
pub struct MemoryLogStore(DashMap<LogKey, String>);

impl LogStore for MemoryLogStore {
    fn put(&self, key: &LogKey, log: &str) -> io::Result<()> {
        self.0.insert(key.clone(), log.to_string());
        Ok(())
    }

    fn get(&self, key: &LogKey) -> io::Result<Option<String>> {
        Ok(self.0.get(key).map(|log| log.clone()))
    }
}

/// Keeps logs as `<root>/<owner>/<repo>/<id>.log`.
#[derive(Debug)]
pub struct FileLogStore {
    root: PathBuf,
}

impl FileLogStore {
    pub fn open(root: &Path) -> io::Result<Self> {
        fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    fn path(&self, key: &LogKey) -> PathBuf {
        let mut p = self.root.join(&key.owner);
        p.push(&key.repo);
        p.push(format!("{}.log", key.id));
        p
    }
}

impl LogStore for FileLogStore {
    fn put(&self, key: &LogKey, log: &str) -> io::Result<()> {
        let path = self.path(key);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let tmp = path.with_extension("log.tmp");
        fs::write(&tmp, log)?;
        fs::rename(&tmp, &path)
    }

    fn get(&self, key: &LogKey) -> io::Result<Option<String>> {
        match fs::read_to_string(self.path(key)) {
            Ok(log) => Ok(Some(log)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }
}
