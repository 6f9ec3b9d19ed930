use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use crossbeam_channel::Receiver;
use crossterm::terminal;
use log::{debug, info, warn};
use std::fs;
use std::io::{self, IsTerminal, Read, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

const SHM_DIR: &str = "/dev/shm";

/// 探测用测试图的 ID 和终端应答的等待时间
const QUERY_IMAGE_ID: u32 = 999;
const QUERY_TIMEOUT: Duration = Duration::from_millis(200);

static INSTANCE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// 共享内存传输：像素写入 /dev/shm 下的文件，终端按名字读取
///
/// 文件名带进程号和实例号，清理时只删除本实例创建的文件。
pub struct SharedMemory {
    dir: PathBuf,
    prefix: String,
    counter: u64,
}

impl SharedMemory {
    /// 当前平台是否可用（仅 Linux 的 /dev/shm）
    pub fn is_supported() -> bool {
        cfg!(target_os = "linux") && Path::new(SHM_DIR).is_dir()
    }

    /// 询问当前终端是否支持 `t=s` 传输
    ///
    /// 要在开始输出图像之前调用：临时进入 raw 模式读取终端应答。
    /// 标准输入输出不是终端时直接返回 false。
    pub fn terminal_supports() -> bool {
        if !Self::is_supported() || !io::stdin().is_terminal() || !io::stdout().is_terminal() {
            return false;
        }
        if let Err(e) = terminal::enable_raw_mode() {
            debug!("无法进入 raw 模式，跳过共享内存探测: {}", e);
            return false;
        }

        let replies = spawn_stdin_reader();
        let supported = Self::new().query_terminal(&mut io::stdout(), &replies, QUERY_TIMEOUT);

        if let Err(e) = terminal::disable_raw_mode() {
            warn!("退出 raw 模式失败: {}", e);
        }
        info!("共享内存传输探测: {}", if supported { "终端支持" } else { "终端不支持" });
        supported
    }

    /// 发送一张不带 `q=` 的 1x1 测试图，应答里有 `OK` 才算支持
    ///
    /// 测试图和测试文件在返回前都会删除。
    pub fn query_terminal(&self, out: &mut dyn Write, replies: &Receiver<Vec<u8>>, timeout: Duration) -> bool {
        let file_name = format!("{}query", self.prefix);
        let path = self.dir.join(&file_name);
        if let Err(e) = fs::write(&path, [0u8; 3]) {
            debug!("无法创建共享内存测试文件 {}: {}", path.display(), e);
            return false;
        }

        let request = format!(
            "\x1b_Ga=T,f=24,s=1,v=1,i={},t=s;{}\x1b\\",
            QUERY_IMAGE_ID,
            STANDARD.encode(format!("/{}", file_name))
        );
        let mut reply = Vec::new();
        if out.write_all(request.as_bytes()).and_then(|()| out.flush()).is_ok() {
            let deadline = Instant::now() + timeout;
            while let Ok(bytes) = replies.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
                reply.extend_from_slice(&bytes);
                if reply.ends_with(b"\x1b\\") {
                    break;
                }
            }
        }

        let delete = format!("\x1b_Ga=d,d=i,i={},q=2\x1b\\", QUERY_IMAGE_ID);
        if let Err(e) = out.write_all(delete.as_bytes()).and_then(|()| out.flush()) {
            debug!("删除测试图失败: {}", e);
        }
        let _ = fs::remove_file(&path);

        let reply = String::from_utf8_lossy(&reply);
        debug!("共享内存探测应答: {:?}", reply);
        reply.contains("OK")
    }

    pub fn new() -> Self {
        Self::with_dir(SHM_DIR)
    }

    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        let instance = INSTANCE_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self {
            dir: dir.into(),
            prefix: format!("reels-{}-{}-", process::id(), instance),
            counter: 0,
        }
    }

    /// 写入一帧，返回协议里使用的名字（"/" + 文件名）
    pub fn write(&mut self, data: &[u8], image_id: u32) -> io::Result<String> {
        let file_name = format!("{}{}-{}", self.prefix, image_id, self.counter);
        self.counter += 1;

        let path = self.dir.join(&file_name);
        let mut file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        if let Err(e) = file.write_all(data) {
            let _ = fs::remove_file(&path);
            return Err(e);
        }
        Ok(format!("/{}", file_name))
    }

    /// 删除本实例遗留的共享内存文件，返回删除数量
    pub fn cleanup(&self) -> usize {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("无法读取 {}: {}", self.dir.display(), e);
                return 0;
            }
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            if !entry.file_name().to_string_lossy().starts_with(&self.prefix) {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {} // 终端已经读完并删除
                Err(e) => warn!("删除共享内存文件失败 {}: {}", entry.path().display(), e),
            }
        }
        if removed > 0 {
            debug!("已清理 {} 个共享内存文件", removed);
        }
        removed
    }
}

/// 在后台线程里读标准输入，直到读到应答结束符 `ESC \`
///
/// 终端一直不应答时，这个线程会阻塞到下一次输入为止。
fn spawn_stdin_reader() -> Receiver<Vec<u8>> {
    let (tx, rx) = crossbeam_channel::unbounded();
    let spawned = thread::Builder::new().name("reels-shm-query".to_string()).spawn(move || {
        let mut stdin = io::stdin();
        let mut buf = [0u8; 256];
        loop {
            match stdin.read(&mut buf) {
                Ok(0) | Err(_) => return,
                Ok(n) => {
                    let finished = buf[..n].windows(2).any(|w| w == b"\x1b\\");
                    if tx.send(buf[..n].to_vec()).is_err() || finished {
                        return;
                    }
                }
            }
        }
    });
    if let Err(e) = spawned {
        warn!("无法创建终端应答读取线程: {}", e);
    }
    rx
}

impl Default for SharedMemory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_unique_files_and_cleans_only_its_own() {
        let dir = tempfile::tempdir().unwrap();
        let mut shm = SharedMemory::with_dir(dir.path());
        let other = SharedMemory::with_dir(dir.path());

        let first = shm.write(&[1, 2, 3], 7).unwrap();
        let second = shm.write(&[4, 5, 6], 7).unwrap();
        assert_ne!(first, second);
        assert!(first.starts_with('/'));
        assert_eq!(fs::read(dir.path().join(&first[1..])).unwrap(), vec![1, 2, 3]);

        fs::write(dir.path().join("unrelated"), b"x").unwrap();
        assert_eq!(other.cleanup(), 0);
        assert_eq!(shm.cleanup(), 2);
        assert!(dir.path().join("unrelated").exists());
        assert_eq!(shm.cleanup(), 0);
    }

    #[test]
    fn terminal_ok_reply_is_accepted_and_cleaned_up() {
        let dir = tempfile::tempdir().unwrap();
        let shm = SharedMemory::with_dir(dir.path());
        let (tx, rx) = crossbeam_channel::unbounded();
        // 应答分两段到达
        tx.send(b"\x1b_Gi=999;".to_vec()).unwrap();
        tx.send(b"OK\x1b\\".to_vec()).unwrap();

        let mut out = Vec::new();
        assert!(shm.query_terminal(&mut out, &rx, Duration::from_secs(1)));

        let written = String::from_utf8(out).unwrap();
        let name = STANDARD.encode(format!("/{}query", shm.prefix));
        assert!(written.starts_with(&format!("\x1b_Ga=T,f=24,s=1,v=1,i=999,t=s;{}\x1b\\", name)));
        // 请求不带 q=，终端才会应答
        assert!(!written.split("\x1b\\").next().unwrap().contains("q="));
        assert!(written.ends_with("\x1b_Ga=d,d=i,i=999,q=2\x1b\\"));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn terminal_error_reply_or_silence_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let shm = SharedMemory::with_dir(dir.path());

        let (tx, rx) = crossbeam_channel::unbounded();
        tx.send(b"\x1b_Gi=999;EBADF:bad file\x1b\\".to_vec()).unwrap();
        assert!(!shm.query_terminal(&mut Vec::new(), &rx, Duration::from_secs(1)));

        let (_tx, silent) = crossbeam_channel::unbounded::<Vec<u8>>();
        let started = Instant::now();
        assert!(!shm.query_terminal(&mut Vec::new(), &silent, Duration::from_millis(30)));
        assert!(started.elapsed() >= Duration::from_millis(30));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn query_fails_without_shm_dir() {
        let shm = SharedMemory::with_dir("/nonexistent/reels-shm");
        let (_tx, rx) = crossbeam_channel::unbounded::<Vec<u8>>();
        let mut out = Vec::new();
        assert!(!shm.query_terminal(&mut out, &rx, Duration::from_millis(10)));
        assert!(out.is_empty());
    }

    #[test]
    fn write_fails_for_missing_dir() {
        let mut shm = SharedMemory::with_dir("/nonexistent/reels-shm");
        assert!(shm.write(&[0; 3], 1).is_err());
        assert_eq!(shm.cleanup(), 0);
    }
}
