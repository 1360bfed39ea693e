//! Pool of open page map files.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, trace};

type SharedFile = Arc<AsyncMutex<File>>;

#[derive(Default)]
struct ChannelTable {
    open: HashMap<PathBuf, SharedFile>,
    /// Least recently used first.
    lru: VecDeque<PathBuf>,
}

impl ChannelTable {
    fn touch(&mut self, path: &Path) {
        if let Some(position) = self.lru.iter().position(|p| p == path) {
            self.lru.remove(position);
        }
        self.lru.push_back(path.to_path_buf());
    }

    fn forget(&mut self, path: &Path) -> Option<SharedFile> {
        if let Some(position) = self.lru.iter().position(|p| p == path) {
            self.lru.remove(position);
        }
        self.open.remove(path)
    }

    /// Closes idle files, oldest first, until at most `capacity` are open.
    fn close_idle(&mut self, capacity: usize) {
        let mut index = 0;
        while self.open.len() > capacity && index < self.lru.len() {
            let idle = self
                .open
                .get(&self.lru[index])
                .map(|file| Arc::strong_count(file) == 1)
                .unwrap_or(true);
            if idle {
                if let Some(path) = self.lru.remove(index) {
                    trace!("Closing idle file channel {:?}", path);
                    self.open.remove(&path);
                }
            } else {
                index += 1;
            }
        }
    }
}

/// Bounded pool of open file handles keyed by path.
///
/// At most `capacity` channels are checked out at once. Handles that are
/// not in use stay open for reuse and are closed least recently used first
/// once more than `capacity` are open.
pub struct FileChannelPool {
    capacity: usize,
    permits: Arc<Semaphore>,
    table: Mutex<ChannelTable>,
}

impl FileChannelPool {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            permits: Arc::new(Semaphore::new(capacity)),
            table: Mutex::new(ChannelTable::default()),
        }
    }

    /// Checks out the channel of a file, waiting for a free slot.
    ///
    /// Returns `None` if the file does not exist and `create` is false.
    /// The channel goes back to the pool when dropped.
    pub async fn get_file_channel(
        &self,
        path: &Path,
        create: bool,
    ) -> io::Result<Option<FileChannel>> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "file channel pool is destroyed"))?;

        let cached = {
            let mut table = self.table.lock();
            let file = table.open.get(path).cloned();
            if file.is_some() {
                table.touch(path);
            }
            file
        };

        let file = match cached {
            Some(file) => file,
            None => {
                let opened = match OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(create)
                    .open(path)
                    .await
                {
                    Ok(file) => file,
                    Err(e) if e.kind() == io::ErrorKind::NotFound && !create => return Ok(None),
                    Err(e) => return Err(e),
                };
                debug!("Opened file channel {:?}", path);

                let mut table = self.table.lock();
                let file = table
                    .open
                    .entry(path.to_path_buf())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(opened)))
                    .clone();
                table.touch(path);
                table.close_idle(self.capacity);
                file
            }
        };

        Ok(Some(FileChannel {
            file: file.lock_owned().await,
            _permit: permit,
        }))
    }

    /// Closes the channel of a file, waiting for current users, and
    /// deletes the file.
    pub async fn close_and_delete(&self, path: &Path) -> io::Result<()> {
        let file = self.table.lock().forget(path);
        if let Some(file) = file {
            // wait until nobody writes to it anymore
            drop(file.lock().await);
        }

        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Closes every channel. Checkouts after this fail.
    pub fn destroy(&self) {
        self.permits.close();
        let mut table = self.table.lock();
        debug!("Closing {} file channels", table.open.len());
        table.open.clear();
        table.lru.clear();
    }

    pub fn open_count(&self) -> usize {
        self.table.lock().open.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// A checked out file handle.
pub struct FileChannel {
    file: OwnedMutexGuard<File>,
    _permit: OwnedSemaphorePermit,
}

impl FileChannel {
    pub async fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        self.file.seek(io::SeekFrom::Start(offset)).await?;
        self.file.write_all(data).await?;
        self.file.flush().await
    }

    pub async fn read_at(&mut self, offset: u64, len: u64) -> io::Result<Bytes> {
        self.file.seek(io::SeekFrom::Start(offset)).await?;
        let mut buffer = vec![0u8; len as usize];
        self.file.read_exact(&mut buffer).await?;
        Ok(Bytes::from(buffer))
    }

    pub async fn len(&self) -> io::Result<u64> {
        Ok(self.file.metadata().await?.len())
    }
}
