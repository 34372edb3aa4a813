//! 容器格式注册表.
//!
//! 管理已注册的解封装器, 支持按格式标识查找和自动探测.

use std::collections::HashMap;

use log::debug;
use lychee_core::{LycheeError, LycheeResult};

use crate::demuxer::Demuxer;
use crate::format_id::FormatId;
use crate::io::IoContext;
use crate::probe::{FormatProbe, ProbeResult};

/// 解封装器工厂函数类型
pub type DemuxerFactory = fn() -> LycheeResult<Box<dyn Demuxer>>;

struct DemuxerEntry {
    name: String,
    factory: DemuxerFactory,
}

/// 容器格式注册表
pub struct FormatRegistry {
    demuxers: HashMap<FormatId, DemuxerEntry>,
    probes: Vec<Box<dyn FormatProbe + Send + Sync>>,
}

impl FormatRegistry {
    /// 创建空的注册表
    pub fn new() -> Self {
        Self {
            demuxers: HashMap::new(),
            probes: Vec::new(),
        }
    }

    /// 创建已注册全部内置格式的注册表
    pub fn with_builtin() -> Self {
        let mut reg = Self::new();
        crate::demuxers::register_all_demuxers(&mut reg);
        reg
    }

    /// 注册一个解封装器
    pub fn register_demuxer(
        &mut self,
        format_id: FormatId,
        name: impl Into<String>,
        factory: DemuxerFactory,
    ) {
        self.demuxers.insert(
            format_id,
            DemuxerEntry {
                name: name.into(),
                factory,
            },
        );
    }

    /// 注册一个格式探测器
    pub fn register_probe(&mut self, probe: Box<dyn FormatProbe + Send + Sync>) {
        self.probes.push(probe);
    }

    /// 创建指定格式的解封装器实例
    pub fn create_demuxer(&self, format_id: FormatId) -> LycheeResult<Box<dyn Demuxer>> {
        let entry = self.demuxers.get(&format_id).ok_or_else(|| {
            LycheeError::FormatNotFound(format!("未找到 {} 的解封装器", format_id))
        })?;
        (entry.factory)()
    }

    /// 探测数据的容器格式, 返回置信度最高的结果
    pub fn probe(&self, data: &[u8], filename: Option<&str>) -> Option<ProbeResult> {
        let mut best: Option<ProbeResult> = None;
        for probe in &self.probes {
            if let Some(score) = probe.probe(data, filename) {
                if best.as_ref().is_none_or(|b| score > b.score) {
                    best = Some(ProbeResult {
                        format_id: probe.format_id(),
                        score,
                    });
                }
            }
        }
        best
    }

    /// 获取所有已注册的解封装器名称
    pub fn list_demuxers(&self) -> Vec<(FormatId, &str)> {
        self.demuxers
            .iter()
            .map(|(id, entry)| (*id, entry.name.as_str()))
            .collect()
    }

    /// 探测输入格式, 之后回到起始位置
    pub fn probe_input(&self, io: &mut IoContext) -> LycheeResult<ProbeResult> {
        let url = io.url().to_string();
        let size = io.size().unwrap_or(8192).min(8192) as usize;
        let head = if size == 0 {
            Vec::new()
        } else {
            io.read_bytes(size)?
        };
        let result = self
            .probe(&head, Some(&url))
            .ok_or_else(|| LycheeError::FormatNotFound(format!("无法识别输入格式: {}", url)))?;
        io.seek(std::io::SeekFrom::Start(0))?;
        debug!("探测到格式 {} (score={})", result.format_id, result.score);
        Ok(result)
    }

    /// 自动探测格式, 创建对应的解封装器并解析头部
    pub fn open_input(&self, io: &mut IoContext) -> LycheeResult<Box<dyn Demuxer>> {
        let result = self.probe_input(io)?;
        let mut demuxer = self.create_demuxer(result.format_id)?;
        demuxer.open(io)?;
        Ok(demuxer)
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_按url探测() {
        let reg = FormatRegistry::with_builtin();
        let r = reg.probe(&[], Some("testsrc:duration=1")).unwrap();
        assert_eq!(r.format_id, FormatId::TestSrc);
        let r = reg.probe(b"RIFF\0\0\0\0WAVE", Some("a.bin")).unwrap();
        assert_eq!(r.format_id, FormatId::Wav);
        assert!(reg.probe(b"????", Some("a.bin")).is_none());
    }

    #[test]
    fn test_registry_打开测试源() {
        let reg = FormatRegistry::with_builtin();
        let mut io = IoContext::open("testsrc:duration=2").unwrap();
        let demuxer = reg.open_input(&mut io).unwrap();
        assert_eq!(demuxer.name(), "testsrc");
        assert_eq!(demuxer.streams().len(), 2);
    }
}
