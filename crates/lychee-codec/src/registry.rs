//! 解码器注册表.
//!
//! 按 `CodecId` 查找并实例化解码器, 外部编解码库通过注册工厂函数接入.

use std::collections::HashMap;

use lychee_core::{LycheeError, LycheeResult};

use crate::codec_id::CodecId;
use crate::decoder::Decoder;

/// 解码器工厂函数类型
pub type DecoderFactory = fn() -> LycheeResult<Box<dyn Decoder>>;

/// 解码器注册条目
struct DecoderEntry {
    name: String,
    factory: DecoderFactory,
}

/// 解码器注册表
pub struct CodecRegistry {
    decoders: HashMap<CodecId, Vec<DecoderEntry>>,
}

impl CodecRegistry {
    /// 创建空的注册表
    pub fn new() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// 创建已注册全部内置解码器的注册表
    pub fn with_builtin() -> Self {
        let mut reg = Self::new();
        crate::decoders::register_all_decoders(&mut reg);
        reg
    }

    /// 注册一个解码器, 同一 CodecId 先注册者优先
    pub fn register_decoder(
        &mut self,
        codec_id: CodecId,
        name: impl Into<String>,
        factory: DecoderFactory,
    ) {
        self.decoders
            .entry(codec_id)
            .or_default()
            .push(DecoderEntry {
                name: name.into(),
                factory,
            });
    }

    /// 创建指定编解码器 ID 的解码器实例
    pub fn create_decoder(&self, codec_id: CodecId) -> LycheeResult<Box<dyn Decoder>> {
        let entry = self
            .decoders
            .get(&codec_id)
            .and_then(|entries| entries.first())
            .ok_or_else(|| LycheeError::CodecNotFound(format!("未找到 {} 的解码器", codec_id)))?;
        (entry.factory)()
    }

    /// 获取所有已注册的解码器名称
    pub fn list_decoders(&self) -> Vec<(CodecId, &str)> {
        let mut result = Vec::new();
        for (id, entries) in &self.decoders {
            for entry in entries {
                result.push((*id, entry.name.as_str()));
            }
        }
        result
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_创建内置解码器() {
        let reg = CodecRegistry::with_builtin();
        assert_eq!(reg.create_decoder(CodecId::RawVideo).unwrap().name(), "rawvideo");
        assert_eq!(reg.create_decoder(CodecId::Text).unwrap().name(), "text");
        assert!(reg.list_decoders().len() >= 6);
    }

    #[test]
    fn test_registry_未注册() {
        let reg = CodecRegistry::new();
        let err = reg.create_decoder(CodecId::PcmU8).err().unwrap();
        assert!(matches!(err, LycheeError::CodecNotFound(_)));
    }
}
