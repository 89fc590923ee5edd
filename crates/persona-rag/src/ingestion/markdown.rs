//! Typed-block markdown tokenizer
//!
//! Documents are tokenized into a sequence of typed blocks via pulldown-cmark
//! rather than chained regular expressions, which keeps nested and edge-case
//! markdown from silently corrupting section boundaries.

use pulldown_cmark::{Event, HeadingLevel, Options, Parser, Tag, TagEnd};

use crate::types::Section;

/// A typed markdown block
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    /// Heading with its level (1..=6)
    Heading { level: u32, text: String },
    /// Paragraph, list, or code content flattened to text
    Paragraph(String),
}

/// Split a leading `---`-fenced YAML frontmatter block off a markdown document
///
/// Returns the raw YAML (without fences) and the remaining body. The fence
/// must start at the first line.
pub fn split_frontmatter(input: &str) -> (Option<&str>, &str) {
    let rest = match input.strip_prefix("---") {
        Some(rest) => rest,
        None => return (None, input),
    };
    // The opening fence must be its own line
    let rest = match rest.strip_prefix('\n').or_else(|| rest.strip_prefix("\r\n")) {
        Some(rest) => rest,
        None => return (None, input),
    };

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            let yaml = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return (Some(yaml), body);
        }
        offset += line.len();
    }

    // Unterminated fence: treat the whole input as body
    (None, input)
}

/// Tokenize a markdown body into typed blocks
pub fn parse_blocks(body: &str) -> Vec<Block> {
    let parser = Parser::new_ext(body, Options::empty());
    let mut blocks = Vec::new();
    let mut buffer = String::new();
    let mut heading_level: Option<u32> = None;

    let flush_paragraph = |buffer: &mut String, blocks: &mut Vec<Block>| {
        let text = buffer.trim().to_string();
        buffer.clear();
        if !text.is_empty() {
            blocks.push(Block::Paragraph(text));
        }
    };

    for event in parser {
        match event {
            Event::Start(Tag::Heading { level, .. }) => {
                flush_paragraph(&mut buffer, &mut blocks);
                heading_level = Some(heading_level_number(level));
            }
            Event::End(TagEnd::Heading(_)) => {
                if let Some(level) = heading_level.take() {
                    let text = buffer.trim().to_string();
                    buffer.clear();
                    blocks.push(Block::Heading { level, text });
                }
            }
            Event::End(TagEnd::Paragraph)
            | Event::End(TagEnd::CodeBlock)
            | Event::End(TagEnd::Item)
            | Event::End(TagEnd::BlockQuote(_)) => {
                flush_paragraph(&mut buffer, &mut blocks);
            }
            Event::Text(text) | Event::Code(text) => {
                buffer.push_str(&text);
            }
            Event::SoftBreak | Event::HardBreak => {
                buffer.push(' ');
            }
            _ => {}
        }
    }
    flush_paragraph(&mut buffer, &mut blocks);

    blocks
}

/// Group blocks into sections at `##`-level headings
///
/// The first `#` heading becomes the document title; everything before the
/// first `##` lands in an untitled leading section.
pub fn sections_from_markdown(body: &str) -> (Option<String>, Vec<Section>) {
    let blocks = parse_blocks(body);
    let mut title = None;
    let mut sections: Vec<Section> = Vec::new();
    let mut heading: Option<String> = None;
    let mut paragraphs: Vec<String> = Vec::new();

    let close_section =
        |heading: &mut Option<String>, paragraphs: &mut Vec<String>, sections: &mut Vec<Section>| {
            if heading.is_none() && paragraphs.is_empty() {
                return;
            }
            let text = paragraphs.join("\n\n");
            sections.push(Section::content(heading.take(), text));
            paragraphs.clear();
        };

    for block in blocks {
        match block {
            Block::Heading { level: 1, text } if title.is_none() => {
                title = Some(text);
            }
            Block::Heading { level, text } if level <= 2 => {
                close_section(&mut heading, &mut paragraphs, &mut sections);
                heading = Some(text);
            }
            Block::Heading { text, .. } => {
                // Deeper headings stay inside the current section
                paragraphs.push(text);
            }
            Block::Paragraph(text) => {
                paragraphs.push(text);
            }
        }
    }
    close_section(&mut heading, &mut paragraphs, &mut sections);

    (title, sections)
}

fn heading_level_number(level: HeadingLevel) -> u32 {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_frontmatter() {
        let input = "---\nid: doc-1\ntitle: Test\n---\n# Body\n\nText.";
        let (yaml, body) = split_frontmatter(input);
        assert_eq!(yaml, Some("id: doc-1\ntitle: Test\n"));
        assert!(body.starts_with("# Body"));
    }

    #[test]
    fn test_split_frontmatter_absent() {
        let input = "# Just markdown\n\nNo metadata here.";
        let (yaml, body) = split_frontmatter(input);
        assert!(yaml.is_none());
        assert_eq!(body, input);
    }

    #[test]
    fn test_split_frontmatter_unterminated_fence() {
        let input = "---\nid: doc-1\nno closing fence";
        let (yaml, body) = split_frontmatter(input);
        assert!(yaml.is_none());
        assert_eq!(body, input);
    }

    #[test]
    fn test_parse_blocks_headings_and_paragraphs() {
        let body = "# Title\n\nIntro paragraph.\n\n## Section A\n\nBody text\nwith a soft break.";
        let blocks = parse_blocks(body);
        assert_eq!(
            blocks[0],
            Block::Heading { level: 1, text: "Title".to_string() }
        );
        assert_eq!(blocks[1], Block::Paragraph("Intro paragraph.".to_string()));
        assert_eq!(
            blocks[2],
            Block::Heading { level: 2, text: "Section A".to_string() }
        );
        assert_eq!(
            blocks[3],
            Block::Paragraph("Body text with a soft break.".to_string())
        );
    }

    #[test]
    fn test_sections_group_at_h2() {
        let body = "# Doc Title\n\nLead-in.\n\n## First\n\nOne.\n\n### Nested\n\nStill first.\n\n## Second\n\nTwo.";
        let (title, sections) = sections_from_markdown(body);
        assert_eq!(title.as_deref(), Some("Doc Title"));
        assert_eq!(sections.len(), 3);
        assert_eq!(sections[0].heading, None);
        assert_eq!(sections[0].text, "Lead-in.");
        assert_eq!(sections[1].heading.as_deref(), Some("First"));
        assert!(sections[1].text.contains("Nested"));
        assert!(sections[1].text.contains("Still first."));
        assert_eq!(sections[2].heading.as_deref(), Some("Second"));
    }

    #[test]
    fn test_code_blocks_do_not_break_sections() {
        let body = "## Code\n\n```\nlet x = 1;\n```\n\nAfter code.";
        let (_, sections) = sections_from_markdown(body);
        assert_eq!(sections.len(), 1);
        assert!(sections[0].text.contains("let x = 1;"));
        assert!(sections[0].text.contains("After code."));
    }
}
