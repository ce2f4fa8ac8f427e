/// 摘要最大长度（字符数）
pub const EXCERPT_MAX_CHARS: usize = 150;

/// 从 Markdown 内容生成纯文本摘要
///
/// 去掉 Markdown 控制符后截断到 150 字符，截断时附加 "..."。
/// 空内容返回空字符串。
pub fn extract_excerpt(content: &str) -> String {
    if content.is_empty() {
        return String::new();
    }

    let plain = strip_markdown(content);

    let chars: Vec<char> = plain.chars().collect();
    if chars.len() <= EXCERPT_MAX_CHARS {
        return plain;
    }

    let mut excerpt: String = chars[..EXCERPT_MAX_CHARS].iter().collect();
    excerpt.push_str("...");
    excerpt
}

/// 去除 Markdown 控制符（`#`、`*`、反引号、`>`），保留其余文本
fn strip_markdown(content: &str) -> String {
    content
        .chars()
        .filter(|c| !matches!(c, '#' | '*' | '`' | '>'))
        .collect()
}
