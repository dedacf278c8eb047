use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::fs;
use tokio::sync::Notify;

use crate::storage::memory::{MemoryStore, StoreImage};

const MAGIC: u32 = 0x4D49_4452; // "RDIM"
const VERSION: u32 = 1;
const STATE_COMMITTED: u32 = 0x0000_0001;
const STATE_INCOMPLETE: u32 = 0xFFFF_FFFF;
const HEADER_SIZE: usize = 4 + 4 + 4 + 8 + 4; // magic + version + state + body_len + checksum

/// `MemoryStore` 镜像的原子快照文件
///
/// 落盘流程：
/// 1) 写 `<path>.tmp` 的 INCOMPLETE header，然后经 checksum writer 流式写 bincode body
/// 2) seek 回开头覆盖 COMMITTED header（写入真实 len/checksum）
/// 3) fsync(tmpfile)，rename 覆盖 `<path>`，fsync(dir)
///
/// 任何一步崩溃都只会留下旧快照。加载时 header/长度/checksum 任何不一致都拒绝。
pub struct SnapshotStore {
    path: PathBuf,
}

#[derive(Default)]
struct RollingChecksum(u32);

impl RollingChecksum {
    fn update(&mut self, data: &[u8]) {
        for &b in data {
            self.0 = self.0.wrapping_add(b as u32).rotate_left(5);
        }
    }
}

struct ChecksumWriter<'a, W: Write> {
    inner: &'a mut W,
    checksum: RollingChecksum,
    bytes: u64,
}

impl<W: Write> Write for ChecksumWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.checksum.update(&buf[..n]);
        self.bytes += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

fn header(state: u32, body_len: u64, checksum: u32) -> [u8; HEADER_SIZE] {
    let mut h = [0u8; HEADER_SIZE];
    h[0..4].copy_from_slice(&MAGIC.to_le_bytes());
    h[4..8].copy_from_slice(&VERSION.to_le_bytes());
    h[8..12].copy_from_slice(&state.to_le_bytes());
    h[12..20].copy_from_slice(&body_len.to_le_bytes());
    h[20..24].copy_from_slice(&checksum.to_le_bytes());
    h
}

impl SnapshotStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `<path>.tmp`：在完整文件名后追加，`a.snap` 与 `a.bak` 不会共用临时文件
    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    /// 加载快照；文件不存在或校验失败时返回 `Ok(None)`
    pub async fn load_if_valid(&self) -> anyhow::Result<Option<StoreImage>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let data = fs::read(&self.path).await?;
        if data.len() < HEADER_SIZE {
            tracing::warn!("Snapshot {:?} too small, ignoring", self.path);
            return Ok(None);
        }

        let magic = u32::from_le_bytes(data[0..4].try_into()?);
        let version = u32::from_le_bytes(data[4..8].try_into()?);
        let state = u32::from_le_bytes(data[8..12].try_into()?);
        let body_len = u64::from_le_bytes(data[12..20].try_into()?);
        let stored_checksum = u32::from_le_bytes(data[20..24].try_into()?);

        if magic != MAGIC {
            tracing::warn!("Snapshot magic mismatch: {:#x} != {:#x}", magic, MAGIC);
            return Ok(None);
        }
        if version != VERSION {
            tracing::warn!("Snapshot version {} unsupported (want {})", version, VERSION);
            return Ok(None);
        }
        if state != STATE_COMMITTED {
            tracing::warn!("Snapshot state INCOMPLETE, ignoring");
            return Ok(None);
        }

        let body = &data[HEADER_SIZE..];
        if body.len() as u64 != body_len {
            tracing::warn!("Snapshot body length mismatch: {} != {}", body.len(), body_len);
            return Ok(None);
        }

        let mut checksum = RollingChecksum::default();
        checksum.update(body);
        if checksum.0 != stored_checksum {
            tracing::warn!("Snapshot checksum mismatch: {} != {}", checksum.0, stored_checksum);
            return Ok(None);
        }

        match bincode::deserialize::<StoreImage>(body) {
            Ok(image) => Ok(Some(image)),
            Err(e) => {
                tracing::warn!("Snapshot deserialize failed: {}", e);
                Ok(None)
            }
        }
    }

    pub async fn write_atomic(&self, image: &StoreImage) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // 1) 写 INCOMPLETE header（len/checksum 先置 0），然后流式写 body
        let tmp_path = self.tmp_path();
        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(&header(STATE_INCOMPLETE, 0, 0))?;

        let (body_len, checksum) = {
            let mut cw = ChecksumWriter {
                inner: &mut file,
                checksum: RollingChecksum::default(),
                bytes: 0,
            };
            bincode::serialize_into(&mut cw, image)?;
            (cw.bytes, cw.checksum.0)
        };

        // 2) seek 回开头覆盖 COMMITTED header
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&header(STATE_COMMITTED, body_len, checksum))?;
        file.sync_all()?;
        drop(file);

        // 3) rename 原子替换，再 fsync(dir) 确保目录项落盘
        std::fs::rename(&tmp_path, &self.path)?;

        if let Some(parent) = self.path.parent() {
            if let Ok(dir) = std::fs::File::open(parent) {
                let _ = dir.sync_all();
            }
        }

        tracing::info!(
            "Snapshot written: {} sets, {} maps, {} bytes",
            image.sorted.len(),
            image.maps.len(),
            HEADER_SIZE as u64 + body_len
        );
        Ok(())
    }
}

/// 每 `interval_secs` 秒对 `store` 做一次快照，期间没有新提交则跳过
///
/// 约定 generation 0 时 `store` 与快照文件一致（新建，或由加载的镜像构造）。
/// `shutdown` 触发后做最后一次保存，返回最后写入的 generation。
pub async fn snapshot_loop(
    store: Arc<MemoryStore>,
    snap: Arc<SnapshotStore>,
    interval_secs: u64,
    shutdown: Arc<Notify>,
) -> u64 {
    let mut saved = 0u64;
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    ticker.tick().await;

    loop {
        let stop = tokio::select! {
            _ = ticker.tick() => false,
            _ = shutdown.notified() => true,
        };

        if store.generation() != saved {
            let (generation, image) = store.image_at();
            match snap.write_atomic(&image).await {
                Ok(()) => saved = generation,
                Err(e) => tracing::warn!("Snapshot to {:?} failed: {:#}", snap.path(), e),
            }
        }

        if stop {
            return saved;
        }
    }
}
