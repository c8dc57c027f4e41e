use annotate_snippets::snippet::{AnnotationType, Slice, SourceAnnotation};

/// 位置信息片段，`start`/`end` 以字符计。
#[derive(Debug, Clone, PartialEq)]
pub struct Span<'a> {
    pub origin: &'a str,
    pub source: &'a str,
    pub start: usize,
    pub end: usize,
}

impl<'a> Span<'a> {
    /// 创建一个新的 `Span`。
    pub fn new(origin: &'a str, source: &'a str, start: usize, end: usize) -> Self {
        Self {
            origin,
            source,
            start,
            end,
        }
    }

    /// 找出 `Span` 所在的行。源码为空时没有可以标注的行。
    pub fn lines(&self) -> Option<LinesInfo<'a>> {
        let total = self.source.chars().count();
        if total == 0 {
            return None;
        }
        // 落在末尾的位置（比如输入意外结束）标注最后一个字符
        let start = self.start.min(total - 1);
        let end = self.end.clamp(start + 1, total);

        let mut offset = 0;
        let mut byte_offset = 0;
        let mut first = None;
        let mut last_byte = self.source.len();
        for (i, line) in self.source.split_inclusive('\n').enumerate() {
            let len = line.chars().count();
            if first.is_none() && offset + len > start {
                first = Some((i + 1, offset, byte_offset));
            }
            offset += len;
            byte_offset += line.len();
            if first.is_some() && offset >= end {
                last_byte = byte_offset;
                break;
            }
        }
        let (line_start, line_offset, line_byte) = first?;
        let source = self.source[line_byte..last_byte].trim_end_matches('\n');
        let len = source.chars().count();
        let range_end = (end - line_offset).min(len);

        Some(LinesInfo {
            origin: self.origin,
            source,
            line_start,
            range: ((start - line_offset).min(range_end.saturating_sub(1)), range_end),
        })
    }
}

/// 所在行的信息
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LinesInfo<'a> {
    /// 来源
    pub origin: &'a str,
    /// 包含 Span 的某几行
    pub source: &'a str,
    /// 起始行号
    pub line_start: usize,
    /// Span 在 source 中的字符范围
    pub range: (usize, usize),
}

impl<'a> LinesInfo<'a> {
    pub fn as_annotation(&self, message: &'a str, annotation_type: AnnotationType) -> Slice<'a> {
        Slice {
            source: self.source,
            line_start: self.line_start,
            origin: Some(self.origin),
            annotations: vec![SourceAnnotation {
                range: self.range,
                label: message,
                annotation_type,
            }],
            fold: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_the_line_of_a_position() {
        let lines = Span::new("net.json", "x + 1\ny $ 2", 8, 9).lines().unwrap();
        assert_eq!(lines.line_start, 2);
        assert_eq!(lines.source, "y $ 2");
        assert_eq!(lines.range, (2, 3));
    }

    #[test]
    fn end_of_input_marks_the_last_char() {
        let lines = Span::new("guard", "1 +", 3, 4).lines().unwrap();
        assert_eq!(lines.range, (2, 3));
    }

    #[test]
    fn empty_source_has_no_lines() {
        assert_eq!(Span::new("guard", "", 0, 1).lines(), None);
    }
}
