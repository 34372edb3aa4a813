//! 解码器 trait 定义.

use lychee_core::LycheeResult;

use crate::codec_id::CodecId;
use crate::codec_parameters::CodecParameters;
use crate::frame::Frame;
use crate::packet::Packet;

/// 解码器 trait
///
/// 解码流程:
/// 1. 调用 `send_packet()` 送入压缩数据
/// 2. 循环调用 `receive_frame()` 取出解码后的帧, 直到 `NeedMoreData`
/// 3. 送入空包以排空解码器缓存, 之后 `receive_frame()` 最终返回 `Eof`
/// 4. seek 后调用 `flush()` 清空内部状态
///
/// 单步解码的四种结果:
/// - `Ok(frame)`: 产出一帧
/// - `Err(NeedMoreData)`: 需要更多输入
/// - `Err(Eof)`: 已排空
/// - 其他 `Err`: 解码错误
pub trait Decoder: Send {
    /// 获取解码器标识
    fn codec_id(&self) -> CodecId;

    /// 获取解码器名称
    fn name(&self) -> &str;

    /// 使用参数配置解码器
    fn open(&mut self, _params: &CodecParameters) -> LycheeResult<()> {
        Ok(())
    }

    /// 送入一个压缩数据包, 空包表示排空
    ///
    /// 内部已有未取出的帧时返回 `NeedMoreData`, 调用方应先取帧.
    fn send_packet(&mut self, packet: &Packet) -> LycheeResult<()>;

    /// 从解码器取出一帧
    fn receive_frame(&mut self) -> LycheeResult<Frame>;

    /// 刷新解码器, 清空内部状态
    fn flush(&mut self);
}
