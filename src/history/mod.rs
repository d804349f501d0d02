//! 线程历史：分页来源抽象、双上限窗口、作者显示名缓存

pub mod message;
pub mod names;
pub mod source;
pub mod window;

pub use message::{ThreadMessage, ThreadRef};
pub use names::{resolve_names, NameCache, NameResolver};
pub use source::{HistoryPage, HistorySource, InMemoryHistory};
pub use window::{fetch_window, window_messages, MessageWindow, WindowOptions, CHARS_PER_TOKEN};
