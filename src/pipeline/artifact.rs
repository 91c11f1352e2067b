//! The embeddings artifact: a CSV file the record store ingests with `LOAD CSV`.
//!
//! Format, consumed verbatim by the store's import query:
//!
//! ```text
//! movie_id,embedding
//! 603,"[0.012345,-0.067890,...]"
//! ```
//!
//! Every value is printed with six decimals.

use super::models::EmbeddingVector;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::fmt::Write as _;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, AsyncWriteExt, BufReader};

/// Column the store matches record ids against.
pub const ARTIFACT_ID_COLUMN: &str = "movie_id";
pub const ARTIFACT_HEADER: &str = "movie_id,embedding";

/// Whether `id` can be written as a bare CSV field.
///
/// Ids carrying a separator, a quote or a line break would split the row when
/// the store reads it, so they never reach the artifact.
pub fn is_representable_id(id: &str) -> bool {
    !id.contains([',', '"', '\r', '\n'])
}

/// Render one artifact row, newline included.
///
/// The id is written as is; check it with [`is_representable_id`] first.
pub fn format_row(vector: &EmbeddingVector) -> String {
    let mut row = String::with_capacity(vector.owner_id.len() + vector.values.len() * 10 + 8);
    row.push_str(&vector.owner_id);
    row.push_str(",\"[");
    for (i, value) in vector.values.iter().enumerate() {
        if i > 0 {
            row.push(',');
        }
        // Writing to a String cannot fail
        let _ = write!(row, "{value:.6}");
    }
    row.push_str("]\"\n");
    row
}

/// Parse one artifact row (without its newline).
pub fn parse_row(line: &str) -> Result<EmbeddingVector> {
    let (owner_id, rest) = line
        .rsplit_once(",\"[")
        .with_context(|| format!("artifact row has no embedding column: {line:?}"))?;
    let values = rest
        .strip_suffix("]\"")
        .with_context(|| format!("artifact row is truncated: {line:?}"))?;

    let values = if values.is_empty() {
        Vec::new()
    } else {
        values
            .split(',')
            .map(|v| v.trim().parse::<f32>())
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("artifact row has a non-numeric value: {line:?}"))?
    };

    Ok(EmbeddingVector {
        owner_id: owner_id.to_string(),
        values,
    })
}

/// Read every row of a finished artifact.
pub async fn read_artifact(path: impl AsRef<Path>) -> Result<Vec<EmbeddingVector>> {
    let path = path.as_ref();
    let file = File::open(path)
        .await
        .with_context(|| format!("Failed to open artifact {}", path.display()))?;
    let mut lines = BufReader::new(file).lines();

    match lines.next_line().await? {
        Some(header) if header == ARTIFACT_HEADER => {}
        Some(header) => anyhow::bail!("unexpected artifact header {header:?}"),
        None => anyhow::bail!("artifact {} is empty", path.display()),
    }

    let mut vectors = Vec::new();
    while let Some(line) = lines.next_line().await? {
        if line.is_empty() {
            continue;
        }
        vectors.push(parse_row(&line)?);
    }
    Ok(vectors)
}

/// Destination of artifact rows. The outcome collector is its only writer.
#[async_trait]
pub trait ArtifactSink: Send {
    /// Append one complete row. On error nothing of the row may remain.
    async fn append_row(&mut self, row: &str) -> std::io::Result<()>;
}

/// File-backed artifact.
///
/// Rows go to a `.partial` sibling that is renamed over the final path by
/// [`finish`](Self::finish), so readers never see a half-written file. A failed
/// append truncates the file back to the last complete row.
pub struct CsvArtifact {
    path: PathBuf,
    partial_path: PathBuf,
    file: File,
    committed: u64,
}

impl CsvArtifact {
    /// Create the artifact (and its parent directories) and write the header.
    pub async fn create(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut partial_name = path.file_name().unwrap_or_default().to_os_string();
        partial_name.push(".partial");
        let partial_path = path.with_file_name(partial_name);

        let mut file = File::create(&partial_path).await?;
        let header = format!("{ARTIFACT_HEADER}\n");
        file.write_all(header.as_bytes()).await?;
        file.flush().await?;

        Ok(Self {
            path,
            partial_path,
            file,
            committed: header.len() as u64,
        })
    }

    /// Sync the rows to disk and move the file into place.
    pub async fn finish(mut self) -> std::io::Result<PathBuf> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        drop(self.file);
        tokio::fs::rename(&self.partial_path, &self.path).await?;
        Ok(self.path)
    }

    async fn rollback(&mut self) -> std::io::Result<()> {
        self.file.set_len(self.committed).await?;
        self.file.seek(SeekFrom::Start(self.committed)).await?;
        Ok(())
    }
}

#[async_trait]
impl ArtifactSink for CsvArtifact {
    async fn append_row(&mut self, row: &str) -> std::io::Result<()> {
        let written = async {
            self.file.write_all(row.as_bytes()).await?;
            self.file.flush().await
        }
        .await;

        match written {
            Ok(()) => {
                self.committed += row.len() as u64;
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = self.rollback().await {
                    tracing::error!(
                        path = %self.partial_path.display(),
                        "Failed to roll back torn artifact row: {}",
                        rollback
                    );
                }
                Err(e)
            }
        }
    }
}
