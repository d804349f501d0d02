//! 把历史窗口转换为模型消息
//!
//! 机器人发出的消息作为 assistant 角色；人类消息作为 user 角色并带上作者显示名。

use std::collections::HashMap;

use crate::history::ThreadMessage;
use crate::llm::Message;

/// names 中没有的作者回退为原始 ID
pub fn build_prompt(
    system_prompt: &str,
    window: &[ThreadMessage],
    input: &str,
    names: &HashMap<String, String>,
) -> Vec<Message> {
    let mut messages = Vec::with_capacity(window.len() + 2);
    messages.push(Message::system(system_prompt));

    for msg in window {
        if msg.is_automated {
            messages.push(Message::assistant(msg.text.clone()));
            continue;
        }
        let author = names.get(&msg.author_id).unwrap_or(&msg.author_id);
        messages.push(Message::user(format!("{}: {}", author, msg.text)));
    }

    messages.push(Message::user(input));
    messages
}
