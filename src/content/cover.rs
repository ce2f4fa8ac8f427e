use regex::Regex;
use std::sync::OnceLock;

fn image_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"!\[.*?\]\((.*?)\)").expect("封面图正则非法"))
}

/// 提取文档中第一张 Markdown 图片的 URL 作为封面
pub fn extract_cover_image(content: &str) -> Option<String> {
    if content.is_empty() {
        return None;
    }
    image_pattern()
        .captures(content)
        .map(|caps| caps[1].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_first_image_url() {
        let content = "前言\n![封面](https://cdn.example.com/a.png)\n![次图](https://cdn.example.com/b.png)";
        assert_eq!(
            extract_cover_image(content).as_deref(),
            Some("https://cdn.example.com/a.png")
        );
    }

    #[test]
    fn returns_none_without_images() {
        assert_eq!(extract_cover_image("纯文本，没有图片"), None);
        assert_eq!(extract_cover_image(""), None);
    }

    #[test]
    fn empty_alt_text_is_accepted() {
        assert_eq!(
            extract_cover_image("![](/img/x.webp)").as_deref(),
            Some("/img/x.webp")
        );
    }
}
