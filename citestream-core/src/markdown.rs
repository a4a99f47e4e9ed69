//! Markdown formatting into a typed node tree, marker resolution over that
//! tree, and HTML output.

use std::collections::HashMap;

use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag, TagEnd};

use crate::citation::{CitationRef, MARKER_PREFIX, MARKER_RE};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementKind {
    Paragraph,
    Heading(u8),
    BlockQuote,
    List { start: Option<u64> },
    Item,
    Emphasis,
    Strong,
    Strikethrough,
    Link { href: String, title: String },
    Image { src: String, title: String },
    Table,
    TableHead,
    TableRow,
    TableCell,
    /// Structure without markup of its own, e.g. raw HTML blocks.
    Group,
}

impl ElementKind {
    fn is_block(&self) -> bool {
        matches!(
            self,
            Self::Paragraph
                | Self::Heading(_)
                | Self::BlockQuote
                | Self::List { .. }
                | Self::Item
                | Self::Table
                | Self::TableHead
                | Self::TableRow
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Text(String),
    /// Inline code span; rendered verbatim.
    Code(String),
    /// Fenced or indented block; rendered verbatim.
    CodeBlock {
        lang: Option<String>,
        code: String,
    },
    Element {
        kind: ElementKind,
        children: Vec<Node>,
    },
    Citation(CitationRef),
    SoftBreak,
    HardBreak,
    Rule,
}

impl Node {
    /// Concatenated text of this subtree, code included.
    pub fn plain_text(&self) -> String {
        match self {
            Self::Text(text) | Self::Code(text) => text.clone(),
            Self::CodeBlock { code, .. } => code.clone(),
            Self::Element { children, .. } => children.iter().map(Self::plain_text).collect(),
            Self::Citation(citation) => format!("[{}]", citation.number),
            Self::SoftBreak | Self::HardBreak => "\n".to_string(),
            Self::Rule => String::new(),
        }
    }
}

struct Frame {
    kind: ElementKind,
    children: Vec<Node>,
}

struct TreeBuilder {
    stack: Vec<Frame>,
    code_block: Option<(Option<String>, String)>,
}

impl TreeBuilder {
    fn new() -> Self {
        Self {
            stack: vec![Frame {
                kind: ElementKind::Group,
                children: Vec::new(),
            }],
            code_block: None,
        }
    }

    fn children(&mut self) -> &mut Vec<Node> {
        let last = self.stack.len() - 1;
        &mut self.stack[last].children
    }

    fn push(&mut self, node: Node) {
        self.children().push(node);
    }

    /// Adjacent text merges into one node; the parser splits text at
    /// brackets, which would otherwise cut markers apart.
    fn push_text(&mut self, text: &str) {
        if let Some((_, code)) = self.code_block.as_mut() {
            code.push_str(text);
            return;
        }
        let children = self.children();
        if let Some(Node::Text(previous)) = children.last_mut() {
            previous.push_str(text);
        } else {
            children.push(Node::Text(text.to_string()));
        }
    }

    fn open(&mut self, tag: Tag<'_>) {
        let kind = match tag {
            Tag::CodeBlock(kind) => {
                let lang = match kind {
                    CodeBlockKind::Fenced(info) => info
                        .split_whitespace()
                        .next()
                        .map(ToString::to_string),
                    CodeBlockKind::Indented => None,
                };
                self.code_block = Some((lang, String::new()));
                return;
            }
            Tag::Paragraph => ElementKind::Paragraph,
            Tag::Heading { level, .. } => ElementKind::Heading(level as u8),
            Tag::BlockQuote(_) => ElementKind::BlockQuote,
            Tag::List(start) => ElementKind::List { start },
            Tag::Item => ElementKind::Item,
            Tag::Emphasis => ElementKind::Emphasis,
            Tag::Strong => ElementKind::Strong,
            Tag::Strikethrough => ElementKind::Strikethrough,
            Tag::Link {
                dest_url, title, ..
            } => ElementKind::Link {
                href: dest_url.into_string(),
                title: title.into_string(),
            },
            Tag::Image {
                dest_url, title, ..
            } => ElementKind::Image {
                src: dest_url.into_string(),
                title: title.into_string(),
            },
            Tag::Table(_) => ElementKind::Table,
            Tag::TableHead => ElementKind::TableHead,
            Tag::TableRow => ElementKind::TableRow,
            Tag::TableCell => ElementKind::TableCell,
            _ => ElementKind::Group,
        };
        self.stack.push(Frame {
            kind,
            children: Vec::new(),
        });
    }

    fn close(&mut self, end: TagEnd) {
        if end == TagEnd::CodeBlock {
            if let Some((lang, code)) = self.code_block.take() {
                self.push(Node::CodeBlock { lang, code });
            }
            return;
        }
        if self.stack.len() < 2 {
            return;
        }
        if let Some(frame) = self.stack.pop() {
            self.push(Node::Element {
                kind: frame.kind,
                children: frame.children,
            });
        }
    }

    fn finish(mut self) -> Vec<Node> {
        while self.stack.len() > 1 {
            self.close(TagEnd::Paragraph);
        }
        self.stack.pop().map(|root| root.children).unwrap_or_default()
    }
}

/// Parses markdown (GFM tables and strikethrough) into a node tree.
pub fn parse_markdown(text: &str) -> Vec<Node> {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);

    let mut builder = TreeBuilder::new();
    for event in Parser::new_ext(text, options) {
        match event {
            Event::Start(tag) => builder.open(tag),
            Event::End(end) => builder.close(end),
            Event::Text(text) | Event::Html(text) | Event::InlineHtml(text) => {
                builder.push_text(&text);
            }
            Event::Code(code) => builder.push(Node::Code(code.into_string())),
            Event::SoftBreak => builder.push(Node::SoftBreak),
            Event::HardBreak => builder.push(Node::HardBreak),
            Event::Rule => builder.push(Node::Rule),
            Event::TaskListMarker(checked) => {
                builder.push_text(if checked { "[x] " } else { "[ ] " });
            }
            Event::FootnoteReference(label) => builder.push_text(&format!("[^{}]", &*label)),
            _ => {}
        }
    }
    builder.finish()
}

/// Replaces `[CITATION_<n>]` in text leaves with citation nodes.
///
/// Unknown indices stay as literal text. Code spans and code blocks are
/// not entered.
pub fn resolve_markers(nodes: Vec<Node>, references: &HashMap<usize, CitationRef>) -> Vec<Node> {
    nodes
        .into_iter()
        .flat_map(|node| resolve_node(node, references))
        .collect()
}

fn resolve_node(node: Node, references: &HashMap<usize, CitationRef>) -> Vec<Node> {
    match node {
        Node::Text(text) => split_text(&text, references),
        Node::Element {
            kind: ElementKind::Link { href, title },
            children,
        } => match marker_link_reference(&children, references) {
            Some(reference) => vec![
                Node::Citation(reference.clone()),
                Node::Text(link_destination_text(&href, &title)),
            ],
            None => vec![Node::Element {
                kind: ElementKind::Link { href, title },
                children: resolve_markers(children, references),
            }],
        },
        Node::Element { kind, children } => vec![Node::Element {
            kind,
            children: resolve_markers(children, references),
        }],
        Node::Code(_)
        | Node::CodeBlock { .. }
        | Node::Citation(_)
        | Node::SoftBreak
        | Node::HardBreak
        | Node::Rule => vec![node],
    }
}

/// A marker directly followed by `(…)` is parsed as an inline link whose
/// label is the marker name. Returns the reference when that happened.
fn marker_link_reference<'a>(
    children: &[Node],
    references: &'a HashMap<usize, CitationRef>,
) -> Option<&'a CitationRef> {
    let [Node::Text(label)] = children else {
        return None;
    };
    let digits = label.strip_prefix(MARKER_PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    digits
        .parse::<usize>()
        .ok()
        .and_then(|index| references.get(&index))
}

/// The `(destination "title")` text the link consumed.
fn link_destination_text(href: &str, title: &str) -> String {
    if title.is_empty() {
        format!("({href})")
    } else {
        format!("({href} \"{title}\")")
    }
}

fn split_text(text: &str, references: &HashMap<usize, CitationRef>) -> Vec<Node> {
    let mut nodes = Vec::new();
    let mut last = 0;

    for captures in MARKER_RE.captures_iter(text) {
        let (Some(whole), Some(digits)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        let Some(reference) = digits
            .as_str()
            .parse::<usize>()
            .ok()
            .and_then(|index| references.get(&index))
        else {
            continue;
        };

        if whole.start() > last {
            nodes.push(Node::Text(text[last..whole.start()].to_string()));
        }
        nodes.push(Node::Citation(reference.clone()));
        last = whole.end();
    }

    if last < text.len() || nodes.is_empty() {
        nodes.push(Node::Text(text[last..].to_string()));
    }
    nodes
}

/// Writes a node tree as HTML. Raw HTML from the source is escaped.
pub fn write_html(nodes: &[Node]) -> String {
    let mut output = String::new();
    for node in nodes {
        write_node(&mut output, node, false);
    }
    output
}

fn write_node(output: &mut String, node: &Node, in_table_head: bool) {
    match node {
        Node::Text(text) => output.push_str(&escape_html(text)),
        Node::Code(code) => {
            output.push_str("<code>");
            output.push_str(&escape_html(code));
            output.push_str("</code>");
        }
        Node::CodeBlock { lang, code } => {
            match lang {
                Some(lang) => {
                    output.push_str(&format!(
                        "<pre><code class=\"language-{}\">",
                        escape_html(lang)
                    ));
                }
                None => output.push_str("<pre><code>"),
            }
            output.push_str(&escape_html(code));
            output.push_str("</code></pre>\n");
        }
        Node::Citation(citation) => write_citation(output, citation),
        Node::SoftBreak => output.push('\n'),
        Node::HardBreak => output.push_str("<br />\n"),
        Node::Rule => output.push_str("<hr />\n"),
        Node::Element { kind, children } => write_element(output, kind, children, in_table_head),
    }
}

fn write_element(output: &mut String, kind: &ElementKind, children: &[Node], in_table_head: bool) {
    let (open, close) = match kind {
        ElementKind::Paragraph => ("<p>".to_string(), "</p>"),
        ElementKind::Heading(level) => (format!("<h{level}>"), heading_close(*level)),
        ElementKind::BlockQuote => ("<blockquote>\n".to_string(), "</blockquote>"),
        ElementKind::List { start: Some(1) } => ("<ol>\n".to_string(), "</ol>"),
        ElementKind::List { start: Some(start) } => (format!("<ol start=\"{start}\">\n"), "</ol>"),
        ElementKind::List { start: None } => ("<ul>\n".to_string(), "</ul>"),
        ElementKind::Item => ("<li>".to_string(), "</li>"),
        ElementKind::Emphasis => ("<em>".to_string(), "</em>"),
        ElementKind::Strong => ("<strong>".to_string(), "</strong>"),
        ElementKind::Strikethrough => ("<del>".to_string(), "</del>"),
        ElementKind::Link { href, title } => {
            let mut open = format!("<a href=\"{}\"", escape_html(href));
            if !title.is_empty() {
                open.push_str(&format!(" title=\"{}\"", escape_html(title)));
            }
            open.push('>');
            (open, "</a>")
        }
        ElementKind::Image { src, title } => {
            let alt = children.iter().map(Node::plain_text).collect::<String>();
            output.push_str(&format!(
                "<img src=\"{}\" alt=\"{}\"",
                escape_html(src),
                escape_html(&alt)
            ));
            if !title.is_empty() {
                output.push_str(&format!(" title=\"{}\"", escape_html(title)));
            }
            output.push_str(" />");
            return;
        }
        ElementKind::Table => ("<table>\n".to_string(), "</table>"),
        ElementKind::TableHead => ("<thead>\n<tr>".to_string(), "</tr>\n</thead>"),
        ElementKind::TableRow => ("<tr>".to_string(), "</tr>"),
        ElementKind::TableCell if in_table_head => ("<th>".to_string(), "</th>"),
        ElementKind::TableCell => ("<td>".to_string(), "</td>"),
        ElementKind::Group => (String::new(), ""),
    };

    output.push_str(&open);
    let head = *kind == ElementKind::TableHead;
    for child in children {
        write_node(output, child, head);
    }
    output.push_str(close);
    if kind.is_block() {
        output.push('\n');
    }
}

fn heading_close(level: u8) -> &'static str {
    match level {
        1 => "</h1>",
        2 => "</h2>",
        3 => "</h3>",
        4 => "</h4>",
        5 => "</h5>",
        _ => "</h6>",
    }
}

fn write_citation(output: &mut String, citation: &CitationRef) {
    let title = escape_html(&citation.summary());
    match citation.target().href() {
        Some(href) => output.push_str(&format!(
            "<sup class=\"citation\"><a href=\"{}\" title=\"{title}\">[{}]</a></sup>",
            escape_html(&href),
            citation.number
        )),
        None => output.push_str(&format!(
            "<sup class=\"citation\" title=\"{title}\">[{}]</sup>",
            citation.number
        )),
    }
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Every citation node in document order.
pub fn collect_citations(nodes: &[Node]) -> Vec<&CitationRef> {
    let mut found = Vec::new();
    for node in nodes {
        match node {
            Node::Citation(citation) => found.push(citation),
            Node::Element { children, .. } => found.extend(collect_citations(children)),
            _ => {}
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use crate::citation::{CitationRef, reference_map};
    use crate::markdown::{
        ElementKind, Node, collect_citations, parse_markdown, resolve_markers, write_html,
    };
    use crate::model::Citation;

    fn refs(indices: &[usize]) -> HashMap<usize, CitationRef> {
        indices
            .iter()
            .map(|index| {
                (
                    *index,
                    CitationRef {
                        number: index + 1,
                        references: Vec::new(),
                    },
                )
            })
            .collect()
    }

    #[test]
    fn bracketed_markers_survive_parsing_as_one_text_node() {
        let tree = parse_markdown("Cats purr[CITATION_0] loudly.");
        assert_eq!(
            tree,
            vec![Node::Element {
                kind: ElementKind::Paragraph,
                children: vec![Node::Text("Cats purr[CITATION_0] loudly.".to_string())],
            }]
        );
    }

    #[test]
    fn resolver_splits_text_around_markers() {
        let tree = resolve_markers(parse_markdown("a[CITATION_0]b[CITATION_1]"), &refs(&[0, 1]));
        let Node::Element { children, .. } = &tree[0] else {
            panic!("expected paragraph");
        };
        assert_eq!(children.len(), 4);
        assert_eq!(children[0], Node::Text("a".to_string()));
        assert!(matches!(&children[1], Node::Citation(citation) if citation.number == 1));
        assert_eq!(children[2], Node::Text("b".to_string()));
        assert!(matches!(&children[3], Node::Citation(citation) if citation.number == 2));
    }

    #[test]
    fn stale_markers_stay_literal() {
        let tree = resolve_markers(parse_markdown("see [CITATION_99] here"), &refs(&[0]));
        assert!(collect_citations(&tree).is_empty());
        assert_eq!(write_html(&tree), "<p>see [CITATION_99] here</p>\n");
    }

    #[test]
    fn resolver_recurses_into_nested_structure() {
        let tree = resolve_markers(
            parse_markdown("- item with *emphasis[CITATION_0]*\n"),
            &refs(&[0]),
        );
        assert_eq!(collect_citations(&tree).len(), 1);
        assert_eq!(
            write_html(&tree),
            "<ul>\n<li>item with <em>emphasis<sup class=\"citation\" title=\"\">[1]</sup></em></li>\n</ul>\n"
        );
    }

    #[test]
    fn code_regions_are_never_rewritten() {
        let text = "Use `x[CITATION_0]` here.\n\n```rust\nlet y = \"[CITATION_0]\";\n```\n";
        let tree = resolve_markers(parse_markdown(text), &refs(&[0]));

        assert!(collect_citations(&tree).is_empty());
        let html = write_html(&tree);
        assert!(html.contains("<code>x[CITATION_0]</code>"));
        assert!(html.contains(
            "<pre><code class=\"language-rust\">let y = &quot;[CITATION_0]&quot;;\n</code></pre>"
        ));
    }

    #[test]
    fn raw_html_is_escaped() {
        let html = write_html(&parse_markdown("<script>alert(1)</script>\n"));
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn tables_render_header_cells() {
        let html = write_html(&parse_markdown("| a | b |\n|---|---|\n| 1 | 2 |\n"));
        assert!(html.contains("<th>a</th>"));
        assert!(html.contains("<td>2</td>"));
    }

    #[test]
    fn marker_before_parenthesis_keeps_the_parenthesized_text() {
        let content = "Call foo(bar) now.";
        let citations = vec![Citation {
            position: 8,
            references: Vec::new(),
        }];
        let annotated = crate::citation::annotate(content, &citations);
        assert_eq!(annotated, "Call foo[CITATION_0](bar) now.");

        let tree = resolve_markers(
            parse_markdown(&annotated),
            &reference_map(content, &citations),
        );
        assert_eq!(collect_citations(&tree).len(), 1);
        assert_eq!(tree[0].plain_text(), "Call foo[1](bar) now.");
        assert_eq!(
            write_html(&tree),
            "<p>Call foo<sup class=\"citation\" title=\"\">[1]</sup>(bar) now.</p>\n"
        );
    }

    #[test]
    fn marker_link_with_title_is_restored() {
        let tree = resolve_markers(
            parse_markdown("x[CITATION_0](y \"z\") done"),
            &refs(&[0]),
        );
        assert_eq!(tree[0].plain_text(), "x[1](y \"z\") done");
    }

    #[test]
    fn ordinary_and_stale_marker_links_stay_links() {
        let tree = resolve_markers(
            parse_markdown("[docs](https://a.example) and [CITATION_7](b)"),
            &refs(&[0]),
        );
        assert!(collect_citations(&tree).is_empty());
        let html = write_html(&tree);
        assert!(html.contains("<a href=\"https://a.example\">docs</a>"));
        assert!(html.contains("<a href=\"b\">CITATION_7</a>"));
    }

    #[test]
    fn round_trip_places_one_reference_per_citation() {
        let content = "Alpha beta. Gamma delta.";
        let citations = vec![
            Citation {
                position: 11,
                references: Vec::new(),
            },
            Citation {
                position: 24,
                references: Vec::new(),
            },
            Citation {
                position: 99,
                references: Vec::new(),
            },
        ];
        let annotated = crate::citation::annotate(content, &citations);
        let tree = resolve_markers(
            parse_markdown(&annotated),
            &reference_map(content, &citations),
        );

        assert_eq!(collect_citations(&tree).len(), 2);
        let Node::Element { children, .. } = &tree[0] else {
            panic!("expected paragraph");
        };
        assert_eq!(children[0], Node::Text("Alpha beta.".to_string()));
        assert!(matches!(&children[1], Node::Citation(citation) if citation.number == 1));
        assert_eq!(children[2], Node::Text(" Gamma delta.".to_string()));
        assert!(matches!(&children[3], Node::Citation(citation) if citation.number == 2));
        assert_eq!(tree[0].plain_text(), "Alpha beta.[1] Gamma delta.[2]");
    }
}
