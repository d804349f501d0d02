//! 流式回复投递：通道抽象与带防抖、心跳、限流重试的投递器

pub mod channel;
pub mod streamer;

pub use channel::{ChannelError, ConsoleChannel, StreamChannel, StreamHandle, StreamTarget};
pub use streamer::{ResponseStreamer, StreamMetrics, StreamerConfig};
