//! A token store backed by a local file

use std::{io, path::PathBuf};

use async_trait::async_trait;
use tokio::fs::OpenOptions;

use super::{TokenRecord, TokenStore};

/// A token store that keeps the session in a JSON document on disk
#[derive(Debug)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    /// Constructs a new file token store
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn read_record(&self) -> io::Result<TokenRecord> {
        use tokio::io::AsyncReadExt;

        let mut file = match OpenOptions::new().read(true).open(&self.path).await {
            Ok(file) => file,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                tracing::trace!(path = %self.path.display(), "no token file present");
                return Ok(TokenRecord::default());
            }
            Err(error) => return Err(error),
        };
        let mut data = String::new();
        file.read_to_string(&mut data).await?;
        let record = serde_json::from_str(&data)?;
        Ok(record)
    }

    async fn write_record(&self, record: &TokenRecord) -> io::Result<()> {
        use tokio::io::AsyncWriteExt;

        let mut file_opts = OpenOptions::new();

        file_opts.create(true).truncate(true).write(true);

        #[cfg(unix)]
        file_opts.mode(0o600);

        let mut file = file_opts.open(&self.path).await?;
        let data = serde_json::to_string_pretty(record)?;
        file.write_all(data.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn load(&self) -> io::Result<TokenRecord> {
        self.read_record().await
    }

    async fn save(&self, record: &TokenRecord) -> io::Result<()> {
        self.write_record(record).await
    }

    async fn clear(&self) -> io::Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Err(error) if error.kind() != io::ErrorKind::NotFound => Err(error),
            _ => Ok(()),
        }
    }
}
