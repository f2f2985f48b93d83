use crate::models::{ChapterRule, RawChapter, RuleSet};

/// Title of the single chapter returned when no rule structure was found.
pub const WHOLE_TEXT_TITLE: &str = "全文";
/// Title of the implicit chapter holding lines before the first title match.
pub const LEADING_CHAPTER_TITLE: &str = "开始";

const EMPTY_TEXT_CONTENT: &str = "<p>内容为空</p>";
const EMPTY_CONTENT: &str = "<p>空内容</p>";
const EMPTY_AFTER_FORMAT: &str = "<p>内容解析后为空</p>";

/// Split raw text into chapters using the enabled rules.
///
/// Always returns at least one chapter. Rules are compiled here; callers that
/// segment many texts with the same rules should hold a [`RuleSet`] and call
/// [`segment_with`].
pub fn segment(text: &str, rules: &[ChapterRule]) -> Vec<RawChapter> {
    segment_with(text, &RuleSet::new(rules))
}

pub fn segment_with(text: &str, rules: &RuleSet) -> Vec<RawChapter> {
    if text.trim().is_empty() {
        tracing::debug!("Empty text, returning placeholder chapter");
        return vec![RawChapter::new(WHOLE_TEXT_TITLE, EMPTY_TEXT_CONTENT)];
    }

    if rules.is_empty() {
        tracing::debug!("No enabled chapter rules, importing as one chapter");
        return whole_text(text);
    }

    tracing::debug!(
        text_len = text.len(),
        rules = rules.len(),
        "Segmenting text into chapters"
    );

    let chapters = identify_chapters(text, rules);

    if chapters.is_empty()
        || (chapters.len() == 1 && chapters[0].title == LEADING_CHAPTER_TITLE)
    {
        tracing::debug!("No chapter title matched, importing as one chapter");
        return whole_text(text);
    }

    tracing::debug!(chapters = chapters.len(), "Segmented text");
    chapters
}

fn whole_text(text: &str) -> Vec<RawChapter> {
    vec![RawChapter::new(
        WHOLE_TEXT_TITLE,
        format_chapter_content(text),
    )]
}

struct OpenChapter {
    title: String,
    lines: Vec<String>,
}

impl OpenChapter {
    fn close(self) -> RawChapter {
        RawChapter {
            title: self.title,
            content: format_chapter_content(&self.lines.join("\n")),
        }
    }
}

fn identify_chapters(text: &str, rules: &RuleSet) -> Vec<RawChapter> {
    let mut chapters = Vec::new();
    let mut current: Option<OpenChapter> = None;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(rule) = rules.find_match(line) {
            tracing::trace!(rule_id = rule.id, title = line, "Matched chapter title");
            if let Some(open) = current.take() {
                chapters.push(open.close());
            }
            current = Some(OpenChapter {
                title: line.to_string(),
                lines: Vec::new(),
            });
            continue;
        }

        current
            .get_or_insert_with(|| OpenChapter {
                title: LEADING_CHAPTER_TITLE.to_string(),
                lines: Vec::new(),
            })
            .lines
            .push(line.to_string());
    }

    if let Some(open) = current {
        chapters.push(open.close());
    }

    chapters
}

/// Turn chapter text into paragraph markup, one `<p>` per non-empty line.
pub fn format_chapter_content(content: &str) -> String {
    if content.is_empty() {
        return EMPTY_CONTENT.to_string();
    }

    let collapsed = collapse_blank_runs(content);
    let paragraphs: Vec<String> = collapsed
        .split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            if is_markup(line) {
                line.to_string()
            } else {
                format!("<p>{}</p>", line)
            }
        })
        .collect();

    if paragraphs.is_empty() {
        return EMPTY_AFTER_FORMAT.to_string();
    }

    paragraphs.join("\n")
}

fn is_markup(line: &str) -> bool {
    (line.starts_with('<') && line.ends_with('>')) || line.starts_with("<p>")
}

/// Collapse three or more consecutive newlines into one blank line.
fn collapse_blank_runs(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut run = 0usize;
    for c in content.chars() {
        if c == '\n' {
            run += 1;
            if run <= 2 {
                out.push(c);
            }
        } else {
            run = 0;
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(id: i64, pattern: &str) -> ChapterRule {
        ChapterRule {
            id,
            enabled: true,
            name: format!("rule {}", id),
            pattern: pattern.to_string(),
            example: String::new(),
            priority: id,
        }
    }

    #[test]
    fn test_titles_split_chapters() {
        let rules = vec![rule(1, "^第[一二三]章")];
        let chapters = segment("第一章 开篇\n内容A\n第二章 下\n内容B", &rules);
        assert_eq!(
            chapters,
            vec![
                RawChapter::new("第一章 开篇", "<p>内容A</p>"),
                RawChapter::new("第二章 下", "<p>内容B</p>"),
            ]
        );
    }

    #[test]
    fn test_builtin_rules_split_chapters() {
        let rules = RuleSet::builtin();
        let chapters = segment_with("第一章 开篇\n内容A\n第二章 下\n内容B", &rules);
        assert_eq!(
            chapters,
            vec![
                RawChapter::new("第一章 开篇", "<p>内容A</p>"),
                RawChapter::new("第二章 下", "<p>内容B</p>"),
            ]
        );
    }

    #[test]
    fn test_builtin_rules_honour_lookahead() {
        let text = "序章\n开头\n第一章 开篇\n内容A\n正文完\n第二章 下\n内容B";
        let chapters = segment_with(text, &RuleSet::builtin());
        let titles: Vec<_> = chapters.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["序章", "第一章 开篇", "第二章 下"]);
        assert!(chapters[1].content.contains("<p>正文完</p>"));
    }

    #[test]
    fn test_no_enabled_rules_gives_whole_text() {
        let mut off = rule(1, "^hello");
        off.enabled = false;
        let chapters = segment("hello\nworld", &[off]);
        assert_eq!(chapters.len(), 1);
        assert_eq!(chapters[0].title, WHOLE_TEXT_TITLE);
        assert_eq!(chapters[0].content, "<p>hello</p>\n<p>world</p>");
    }

    #[test]
    fn test_empty_inputs_still_yield_a_chapter() {
        for text in ["", "   \n\t\n"] {
            let chapters = segment(text, &[rule(1, "^第")]);
            assert_eq!(chapters, vec![RawChapter::new(WHOLE_TEXT_TITLE, EMPTY_TEXT_CONTENT)]);
        }
        assert_eq!(segment("abc", &[]).len(), 1);
    }

    #[test]
    fn test_preamble_becomes_leading_chapter() {
        let rules = vec![rule(1, "^第.章")];
        let chapters = segment("作者的话\n\n第一章 起\n正文", &rules);
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[0].title, LEADING_CHAPTER_TITLE);
        assert_eq!(chapters[0].content, "<p>作者的话</p>");
        assert_eq!(chapters[1].title, "第一章 起");
    }

    #[test]
    fn test_only_leading_chapter_falls_back_to_whole_text() {
        let chapters = segment("line one\nline two", &[rule(1, "^第.章")]);
        assert_eq!(chapters.len(), 1);
        assert_eq!(chapters[0].title, WHOLE_TEXT_TITLE);
    }

    #[test]
    fn test_consecutive_titles_keep_empty_chapter() {
        let chapters = segment("第一章\n第二章\n内容", &[rule(1, "^第.章")]);
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[0].content, EMPTY_CONTENT);
        assert_eq!(chapters[1].content, "<p>内容</p>");
    }

    #[test]
    fn test_crlf_lines_and_indentation_are_trimmed() {
        let text = "　第一章 甲\r\n　　正文一\r\n第二章 乙\r\n正文二";
        let chapters = segment(text, &[rule(1, "^第.章")]);
        assert_eq!(chapters[0].title, "第一章 甲");
        assert_eq!(chapters[0].content, "<p>正文一</p>");
    }

    #[test]
    fn test_bad_pattern_degrades_to_substring() {
        let chapters = segment("前言\n[[卷一\n甲\n[[卷二\n乙", &[rule(1, "[[")]);
        assert_eq!(chapters.len(), 3);
        assert_eq!(chapters[1].title, "[[卷一");
    }

    #[test]
    fn test_format_keeps_markup_lines() {
        let formatted = format_chapter_content("<h2>标题</h2>\n\n\n\n正文\n<p>已有段落");
        assert_eq!(formatted, "<h2>标题</h2>\n<p>正文</p>\n<p>已有段落");
    }

    #[test]
    fn test_format_placeholders() {
        assert_eq!(format_chapter_content(""), EMPTY_CONTENT);
        assert_eq!(format_chapter_content("\n \n"), EMPTY_AFTER_FORMAT);
    }

    #[test]
    fn test_collapse_blank_runs() {
        assert_eq!(collapse_blank_runs("a\n\n\n\nb\nc"), "a\n\nb\nc");
    }
}
