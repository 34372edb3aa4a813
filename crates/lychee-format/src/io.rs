//! I/O 抽象层.
//!
//! 为解封装器提供带缓冲的统一读取接口, 支持文件与内存两种后端,
//! 并通过中断回调实现协作式取消.

use std::io::{self, Read, Seek};
use std::sync::Arc;

use lychee_core::{LycheeError, LycheeResult};

/// 中断回调, 返回 true 时当前阻塞的 I/O 操作以 `Aborted` 结束
pub type InterruptCallback = Arc<dyn Fn() -> bool + Send + Sync>;

/// I/O 后端 trait
pub trait IoBackend: Send {
    /// 读取数据到缓冲区, 返回 0 表示到达末尾
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    /// 定位
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64>;
    /// 获取当前位置
    fn position(&mut self) -> io::Result<u64>;
    /// 获取总大小 (如果可知)
    fn size(&self) -> Option<u64>;
    /// 是否支持 seek
    fn is_seekable(&self) -> bool;
}

/// 默认缓冲区大小 (32 KB)
const DEFAULT_BUFFER_SIZE: usize = 32 * 1024;

/// I/O 上下文
pub struct IoContext {
    inner: Box<dyn IoBackend>,
    /// 打开时使用的 URL 或路径
    url: String,
    buffer: Vec<u8>,
    /// 缓冲区中的有效数据长度
    buf_len: usize,
    /// 缓冲区当前读取位置
    buf_pos: usize,
    interrupt: Option<InterruptCallback>,
    /// 最近一次底层读取是否出错 (区别于正常 EOF)
    error: bool,
}

impl IoContext {
    /// 从 I/O 后端创建上下文
    pub fn new(backend: Box<dyn IoBackend>, url: impl Into<String>) -> Self {
        Self {
            inner: backend,
            url: url.into(),
            buffer: vec![0u8; DEFAULT_BUFFER_SIZE],
            buf_len: 0,
            buf_pos: 0,
            interrupt: None,
            error: false,
        }
    }

    /// 按 URL 打开输入
    ///
    /// `testsrc:` 等生成型输入没有字节源, 使用空内存后端;
    /// 其余按本地文件路径打开.
    pub fn open(url: &str) -> LycheeResult<Self> {
        if crate::demuxers::testsrc::is_testsrc_url(url) {
            return Ok(Self::new(Box::new(MemoryBackend::new()), url));
        }
        let file = std::fs::File::open(url)?;
        Ok(Self::new(Box::new(FileBackend::new(file)), url))
    }

    /// 从内存数据创建
    pub fn from_memory(data: Vec<u8>, url: impl Into<String>) -> Self {
        Self::new(Box::new(MemoryBackend::from_data(data)), url)
    }

    /// 输入的 URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// 设置中断回调
    pub fn set_interrupt_callback(&mut self, callback: InterruptCallback) {
        self.interrupt = Some(callback);
    }

    /// 检查是否被中断
    pub fn check_interrupt(&self) -> LycheeResult<()> {
        match &self.interrupt {
            Some(cb) if cb() => Err(LycheeError::Aborted),
            _ => Ok(()),
        }
    }

    /// 底层是否发生过读取错误
    pub fn has_error(&self) -> bool {
        self.error
    }

    // ========================
    // 读取方法
    // ========================

    /// 读取指定字节数, 数据不足时返回 `Eof`
    pub fn read_exact(&mut self, buf: &mut [u8]) -> LycheeResult<()> {
        let mut total_read = 0;
        while total_read < buf.len() {
            let buffered = self.buf_len - self.buf_pos;
            if buffered > 0 {
                let to_copy = buffered.min(buf.len() - total_read);
                buf[total_read..total_read + to_copy]
                    .copy_from_slice(&self.buffer[self.buf_pos..self.buf_pos + to_copy]);
                self.buf_pos += to_copy;
                total_read += to_copy;
            } else {
                self.fill_buffer()?;
                if self.buf_len == 0 {
                    return Err(LycheeError::Eof);
                }
            }
        }
        Ok(())
    }

    fn fill_buffer(&mut self) -> LycheeResult<()> {
        self.check_interrupt()?;
        self.buf_pos = 0;
        self.buf_len = 0;
        match self.inner.read(&mut self.buffer) {
            Ok(n) => {
                self.buf_len = n;
                Ok(())
            }
            Err(e) => {
                self.error = true;
                Err(e.into())
            }
        }
    }

    pub fn read_u16_le(&mut self) -> LycheeResult<u16> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    pub fn read_u32_le(&mut self) -> LycheeResult<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// 读取 4 字节标签 (FourCC)
    pub fn read_tag(&mut self) -> LycheeResult<[u8; 4]> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// 读取指定数量的字节
    pub fn read_bytes(&mut self, count: usize) -> LycheeResult<Vec<u8>> {
        let mut buf = vec![0u8; count];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// 跳过指定字节数
    pub fn skip(&mut self, count: usize) -> LycheeResult<()> {
        let buffered = self.buf_len - self.buf_pos;
        if count <= buffered {
            self.buf_pos += count;
            return Ok(());
        }
        let remaining = count - buffered;
        self.buf_pos = self.buf_len;
        if self.inner.is_seekable() {
            self.inner.seek(io::SeekFrom::Current(remaining as i64))?;
        } else {
            let mut left = remaining;
            while left > 0 {
                self.fill_buffer()?;
                if self.buf_len == 0 {
                    return Err(LycheeError::Eof);
                }
                let used = left.min(self.buf_len);
                self.buf_pos = used;
                left -= used;
            }
        }
        Ok(())
    }

    /// 定位, 会清空读缓冲区
    pub fn seek(&mut self, pos: io::SeekFrom) -> LycheeResult<u64> {
        self.check_interrupt()?;
        self.buf_pos = 0;
        self.buf_len = 0;
        Ok(self.inner.seek(pos)?)
    }

    /// 获取当前位置 (扣除缓冲区中尚未消耗的数据)
    pub fn position(&mut self) -> LycheeResult<u64> {
        let raw_pos = self.inner.position()?;
        let buffered = (self.buf_len - self.buf_pos) as u64;
        Ok(raw_pos - buffered)
    }

    pub fn is_seekable(&self) -> bool {
        self.inner.is_seekable()
    }

    pub fn size(&self) -> Option<u64> {
        self.inner.size()
    }
}

/// 文件 I/O 后端
struct FileBackend {
    file: std::fs::File,
    size: Option<u64>,
}

impl FileBackend {
    fn new(file: std::fs::File) -> Self {
        let size = file.metadata().ok().map(|m| m.len());
        Self { file, size }
    }
}

impl IoBackend for FileBackend {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }

    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }

    fn position(&mut self) -> io::Result<u64> {
        self.file.stream_position()
    }

    fn size(&self) -> Option<u64> {
        self.size
    }

    fn is_seekable(&self) -> bool {
        true
    }
}

/// 内存缓冲区 I/O 后端
pub struct MemoryBackend {
    data: Vec<u8>,
    pos: usize,
}

impl MemoryBackend {
    /// 从已有数据创建
    pub fn from_data(data: Vec<u8>) -> Self {
        Self { data, pos: 0 }
    }

    /// 创建空缓冲区
    pub fn new() -> Self {
        Self::from_data(Vec::new())
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl IoBackend for MemoryBackend {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = self.data.len().saturating_sub(self.pos);
        let to_read = buf.len().min(available);
        buf[..to_read].copy_from_slice(&self.data[self.pos..self.pos + to_read]);
        self.pos += to_read;
        Ok(to_read)
    }

    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        let new_pos = match pos {
            io::SeekFrom::Start(offset) => offset as i64,
            io::SeekFrom::End(offset) => self.data.len() as i64 + offset,
            io::SeekFrom::Current(offset) => self.pos as i64 + offset,
        };
        if new_pos < 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "seek 位置不能为负"));
        }
        self.pos = new_pos as usize;
        Ok(self.pos as u64)
    }

    fn position(&mut self) -> io::Result<u64> {
        Ok(self.pos as u64)
    }

    fn size(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }

    fn is_seekable(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_io_读取与定位() {
        let mut io = IoContext::from_memory(vec![1, 0, 2, 0, 0, 0, 9, 9], "mem");
        assert_eq!(io.read_u16_le().unwrap(), 1);
        assert_eq!(io.read_u32_le().unwrap(), 2);
        assert_eq!(io.position().unwrap(), 6);
        io.seek(io::SeekFrom::Start(1)).unwrap();
        io.skip(5).unwrap();
        assert_eq!(io.read_bytes(2).unwrap(), vec![9, 9]);
        assert!(matches!(io.read_bytes(1), Err(LycheeError::Eof)));
        assert!(!io.has_error());
    }

    #[test]
    fn test_io_中断回调() {
        let flag = Arc::new(AtomicBool::new(false));
        let mut io = IoContext::from_memory(vec![0u8; 16], "mem");
        let cb_flag = flag.clone();
        io.set_interrupt_callback(Arc::new(move || cb_flag.load(Ordering::SeqCst)));
        assert!(io.read_bytes(4).is_ok());
        flag.store(true, Ordering::SeqCst);
        assert!(matches!(io.seek(io::SeekFrom::Start(0)), Err(LycheeError::Aborted)));
    }
}
