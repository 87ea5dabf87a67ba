use crate::error::{BittorrentError, Result};
use crate::torrent::TorrentInfo;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// The torrent's content as one flat file. Block `begin` of piece `index`
/// lives at byte `index * piece_length + begin`.
///
/// All IO goes through one handle under a lock, so `finalize` can never
/// overtake a write that started before it.
pub struct Storage {
    path: PathBuf,
    piece_length: u64,
    file: Mutex<Option<File>>,
}

impl Storage {
    /// Create (or truncate) the destination file for a download.
    pub async fn create<P: AsRef<Path>>(path: P, info: &TorrentInfo) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(BittorrentError::StorageIo)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .read(true)
            .truncate(true)
            .open(&path)
            .await
            .map_err(BittorrentError::StorageIo)?;
        file.set_len(info.total_length)
            .await
            .map_err(BittorrentError::StorageIo)?;

        info!(
            "Storage initialized: {:?}, {} bytes",
            path, info.total_length
        );

        Ok(Self {
            path,
            piece_length: info.piece_length,
            file: Mutex::new(Some(file)),
        })
    }

    /// Open an existing, complete file for serving.
    pub async fn open<P: AsRef<Path>>(path: P, info: &TorrentInfo) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)
            .await
            .map_err(BittorrentError::StorageIo)?;

        let len = file
            .metadata()
            .await
            .map_err(BittorrentError::StorageIo)?
            .len();
        if len < info.total_length {
            return Err(BittorrentError::StorageIo(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!(
                    "{:?} holds {} bytes, torrent needs {}",
                    path, len, info.total_length
                ),
            )));
        }

        Ok(Self {
            path,
            piece_length: info.piece_length,
            file: Mutex::new(Some(file)),
        })
    }

    fn offset(&self, index: u32, begin: u32) -> u64 {
        index as u64 * self.piece_length + begin as u64
    }

    /// Write a received block at its place in the file.
    pub async fn write_block(&self, index: u32, begin: u32, data: &[u8]) -> Result<()> {
        let offset = self.offset(index, begin);
        let mut guard = self.file.lock().await;
        let file = guard.as_mut().ok_or(BittorrentError::StorageClosed)?;

        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(BittorrentError::StorageIo)?;
        file.write_all(data)
            .await
            .map_err(BittorrentError::StorageIo)?;

        debug!(
            "Wrote {} bytes for piece {} at offset {}",
            data.len(),
            index,
            offset
        );
        Ok(())
    }

    /// Read up to `length` bytes of a block; fewer are returned at end of file.
    pub async fn read_block(&self, index: u32, begin: u32, length: u32) -> Result<Vec<u8>> {
        let offset = self.offset(index, begin);
        let mut guard = self.file.lock().await;
        let file = guard.as_mut().ok_or(BittorrentError::StorageClosed)?;

        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(BittorrentError::StorageIo)?;

        let mut buffer = vec![0u8; length as usize];
        let mut filled = 0;
        while filled < buffer.len() {
            let n = file
                .read(&mut buffer[filled..])
                .await
                .map_err(BittorrentError::StorageIo)?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buffer.truncate(filled);

        Ok(buffer)
    }

    /// Flush and close the file. Later calls are no-ops; later reads and
    /// writes fail with `StorageClosed`.
    pub async fn finalize(&self) -> Result<()> {
        let mut guard = self.file.lock().await;
        if let Some(mut file) = guard.take() {
            file.flush().await.map_err(BittorrentError::StorageIo)?;
            file.sync_all().await.map_err(BittorrentError::StorageIo)?;
            info!("Storage finalized: {:?}", self.path);
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) async fn is_finalized(&self) -> bool {
        self.file.lock().await.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::torrent::tests::test_info;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_create_preallocates() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested/out.bin");
        let info = test_info(16384, 40000);

        let storage = Storage::create(&path, &info).await.unwrap();
        storage.finalize().await.unwrap();

        assert_eq!(tokio::fs::metadata(&path).await.unwrap().len(), 40000);
    }

    #[tokio::test]
    async fn test_blocks_land_at_flat_offsets() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("out.bin");
        let info = test_info(32768, 65536);
        let storage = Storage::create(&path, &info).await.unwrap();

        storage.write_block(1, 16384, &[0xab; 4]).await.unwrap();
        storage.write_block(0, 0, &[0x01; 2]).await.unwrap();
        assert_eq!(storage.read_block(1, 16384, 4).await.unwrap(), vec![0xab; 4]);
        storage.finalize().await.unwrap();

        let bytes = tokio::fs::read(&path).await.unwrap();
        assert_eq!(&bytes[..2], &[0x01, 0x01]);
        assert_eq!(&bytes[32768 + 16384..32768 + 16388], &[0xab; 4]);
    }

    #[tokio::test]
    async fn test_read_block_is_short_at_end_of_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("seed.bin");
        tokio::fs::write(&path, vec![9u8; 20000]).await.unwrap();
        let info = test_info(16384, 20000);

        let storage = Storage::open(&path, &info).await.unwrap();
        let block = storage.read_block(1, 0, 16384).await.unwrap();
        assert_eq!(block.len(), 20000 - 16384);
    }

    #[tokio::test]
    async fn test_open_rejects_short_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("short.bin");
        tokio::fs::write(&path, vec![0u8; 10]).await.unwrap();

        let result = Storage::open(&path, &test_info(16384, 20000)).await;
        assert!(matches!(result, Err(BittorrentError::StorageIo(_))));
    }

    #[tokio::test]
    async fn test_writes_after_finalize_fail() {
        let temp = TempDir::new().unwrap();
        let storage = Storage::create(temp.path().join("x.bin"), &test_info(16384, 100))
            .await
            .unwrap();

        storage.finalize().await.unwrap();
        storage.finalize().await.unwrap();
        assert!(storage.is_finalized().await);
        assert!(matches!(
            storage.write_block(0, 0, &[1]).await,
            Err(BittorrentError::StorageClosed)
        ));
    }
}
