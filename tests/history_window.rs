//! 历史窗口集成测试：分页来源 + 双上限裁剪 + 触发消息剔除

use bee_relay::history::{fetch_window, window_messages, InMemoryHistory, ThreadMessage, ThreadRef, WindowOptions};

/// 40 字符的普通消息："message 007 " + 28 个 x
fn regular(i: usize) -> ThreadMessage {
    let text = format!("message {i:03} {}", "x".repeat(28));
    assert_eq!(text.chars().count(), 40);
    ThreadMessage::new(format!("U{}", i % 4), text, format!("1712000000.{i:06}"))
}

fn thread_with_outlier(outlier_at: usize) -> InMemoryHistory {
    let messages = (0..120)
        .map(|i| {
            if i == outlier_at {
                ThreadMessage::new("U9", "y".repeat(20_000), format!("1712000000.{i:06}"))
            } else {
                regular(i)
            }
        })
        .collect();
    // 小页强制多次翻页
    InMemoryHistory::new(messages).with_max_page_size(25)
}

fn options() -> WindowOptions {
    WindowOptions {
        page_size: 200,
        max_chars: 400,
        keep_last_n: 50,
        ..WindowOptions::default()
    }
}

fn texts(window: &[ThreadMessage]) -> Vec<String> {
    window.iter().map(|m| m.text.clone()).collect()
}

#[tokio::test]
async fn test_end_to_end_keeps_most_recent_fitting_messages() {
    let source = thread_with_outlier(100);
    let thread = ThreadRef::new("C1", "1712000000.000000");

    let window = fetch_window(&source, &thread, &options()).await;

    let expected: Vec<String> = (110..=118).map(|i| regular(i).text).collect();
    assert_eq!(texts(&window), expected);
    assert!(window.iter().map(|m| m.char_len()).sum::<usize>() <= 400);
    assert!(window.len() <= 49);
}

#[tokio::test]
async fn test_recent_outlier_flushes_everything_before_it() {
    let source = thread_with_outlier(115);
    let thread = ThreadRef::new("C1", "1712000000.000000");

    let window = fetch_window(&source, &thread, &options()).await;

    let expected: Vec<String> = (116..=118).map(|i| regular(i).text).collect();
    assert_eq!(texts(&window), expected);
}

#[tokio::test]
async fn test_count_bound_applies_before_budget() {
    let source = InMemoryHistory::new((0..120).map(regular).collect()).with_max_page_size(30);
    let thread = ThreadRef::new("C1", "1712000000.000000");
    let opts = WindowOptions {
        keep_last_n: 5,
        max_chars: 100_000,
        ..WindowOptions::default()
    };

    let window = fetch_window(&source, &thread, &opts).await;

    let expected: Vec<String> = (115..=118).map(|i| regular(i).text).collect();
    assert_eq!(texts(&window), expected);
}

#[tokio::test]
async fn test_windowing_a_window_is_stable() {
    let source = thread_with_outlier(100);
    let thread = ThreadRef::new("C1", "1712000000.000000");
    let window = fetch_window(&source, &thread, &options()).await;

    let again = window_messages(window.clone(), 400, 50);
    assert_eq!(again, window);
}
