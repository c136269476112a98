//! Migration sources: files on disk, strings embedded at compile time, or
//! any hand-written [`Migration`] implementation.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::errors::{BoxError, SourceError};
use crate::migration::{Execer, Migration};

/// Produces a deterministic, ordered migration sequence.
pub trait MigrationSource {
    type Migration;

    fn load(&self) -> Result<Vec<Self::Migration>, SourceError>;
}

/// A migration backed by a file; the file name is its identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMigration {
    id: String,
    path: PathBuf,
}

impl FileMigration {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, SourceError> {
        let path = path.into();
        let id = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| SourceError::InvalidName { path: path.clone() })?
            .to_string();
        Ok(Self { id, path })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl<C> Migration<C> for FileMigration
where
    C: Execer + ?Sized,
{
    fn id(&self) -> &str {
        &self.id
    }

    async fn migrate(&self, conn: &mut C) -> Result<(), BoxError> {
        let body = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| SourceError::Io {
                path: self.path.clone(),
                source,
            })?;
        conn.exec(&body).await
    }
}

/// Every file in `dir` with the given extension, sorted by file name.
/// Hidden files are skipped; a missing directory yields no migrations.
#[derive(Debug, Clone)]
pub struct FileSource {
    dir: PathBuf,
    extension: String,
}

impl FileSource {
    pub fn new(dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        let extension = extension.into();
        Self {
            dir: dir.into(),
            extension: extension.trim_start_matches('.').to_string(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }
}

impl MigrationSource for FileSource {
    type Migration = FileMigration;

    fn load(&self) -> Result<Vec<FileMigration>, SourceError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let io_err = |source| SourceError::Io {
            path: self.dir.clone(),
            source,
        };

        let mut migrations = Vec::new();
        for entry in std::fs::read_dir(&self.dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            if !path.is_file() {
                continue;
            }
            if path.extension().and_then(|ext| ext.to_str()) != Some(self.extension.as_str()) {
                continue;
            }

            let migration = FileMigration::new(path)?;
            if migration.id.starts_with('.') {
                continue;
            }
            migrations.push(migration);
        }

        migrations.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(migrations)
    }
}

/// A migration whose body was compiled into the binary.
///
/// Usually produced by [`embed_migrations!`](crate::embed_migrations).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbeddedMigration {
    id: &'static str,
    body: &'static str,
}

impl EmbeddedMigration {
    pub const fn new(id: &'static str, body: &'static str) -> Self {
        Self { id, body }
    }

    pub fn id(&self) -> &'static str {
        self.id
    }

    pub fn body(&self) -> &'static str {
        self.body
    }
}

#[async_trait]
impl<C> Migration<C> for EmbeddedMigration
where
    C: Execer + ?Sized,
{
    fn id(&self) -> &str {
        self.id
    }

    async fn migrate(&self, conn: &mut C) -> Result<(), BoxError> {
        conn.exec(self.body).await
    }
}

/// Serves a static slice of embedded migrations.
#[derive(Debug, Clone, Copy)]
pub struct EmbeddedSource(pub &'static [EmbeddedMigration]);

impl MigrationSource for EmbeddedSource {
    type Migration = EmbeddedMigration;

    fn load(&self) -> Result<Vec<EmbeddedMigration>, SourceError> {
        Ok(self.0.to_vec())
    }
}
