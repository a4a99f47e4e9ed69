use crate::citation::{annotate, reference_map};
use crate::markdown::{escape_html, parse_markdown, resolve_markers, write_html};
use crate::model::{ChatMessage, MessageRole};

const ERROR_ICON: &str = "<span class=\"message-error-icon\" aria-hidden=\"true\">!</span>";

/// Renders one finished message as an HTML fragment.
///
/// Assistant content goes through marker insertion, markdown formatting and
/// marker resolution. User content is formatted without citations, and error
/// messages are shown as escaped plain text.
pub fn render_message_html(message: &ChatMessage) -> String {
    let mut output = format!("<div class=\"message message-{}\">\n", message.role);

    match message.role {
        MessageRole::Error => {
            output.push_str(ERROR_ICON);
            output.push_str(&format!(
                "<span class=\"message-error-text\">{}</span>\n",
                escape_html(&message.content)
            ));
        }
        MessageRole::User | MessageRole::Assistant => {
            output.push_str(&render_body_html(message));
        }
    }

    output.push_str("</div>\n");
    output
}

pub fn render_conversation_html(messages: &[ChatMessage]) -> String {
    messages.iter().map(render_message_html).collect()
}

/// The message content with `[CITATION_<n>]` markers spliced in.
pub fn render_annotated(message: &ChatMessage) -> String {
    annotate(&message.content, &message.citations)
}

fn render_body_html(message: &ChatMessage) -> String {
    let annotated = render_annotated(message);
    let nodes = parse_markdown(&annotated);
    if message.citations.is_empty() {
        return write_html(&nodes);
    }

    let references = reference_map(&message.content, &message.citations);
    write_html(&resolve_markers(nodes, &references))
}

#[cfg(test)]
mod tests {
    use crate::model::{ChatMessage, Citation, FileRef, MessageRole, Reference};
    use crate::render::{render_annotated, render_conversation_html, render_message_html};

    fn cited(content: &str, positions: &[usize]) -> ChatMessage {
        let mut message = ChatMessage::new(MessageRole::Assistant, content);
        message.citations = positions
            .iter()
            .map(|position| Citation {
                position: *position,
                references: vec![Reference {
                    file: FileRef {
                        id: Some("f-1".to_string()),
                        name: "cats.pdf".to_string(),
                        signed_url: None,
                    },
                    pages: vec![3],
                    highlight: Some("purring".to_string()),
                }],
            })
            .collect();
        message
    }

    #[test]
    fn citations_render_as_linked_superscripts() {
        let html = render_message_html(&cited("Cats **purr** often.", &[13]));

        assert!(html.starts_with("<div class=\"message message-assistant\">"));
        assert!(html.contains("<strong>purr</strong>"));
        assert!(html.contains(
            "<sup class=\"citation\"><a href=\"/files/f-1/download\" title=\"cats.pdf (p. 3): &quot;purring&quot;\">[1]</a></sup>"
        ));
        assert!(!html.contains("CITATION_"));
    }

    #[test]
    fn out_of_range_citations_are_dropped() {
        let message = cited("hi", &[0, 2, 3]);
        assert_eq!(render_annotated(&message), "[CITATION_0]hi[CITATION_1]");

        let html = render_message_html(&message);
        assert!(html.contains(">[1]<"));
        assert!(html.contains(">[2]<"));
        assert!(!html.contains("[3]"));
    }

    #[test]
    fn citation_before_parenthesis_keeps_surrounding_text() {
        let html = render_message_html(&cited("Call foo(bar) now.", &[8]));
        assert!(html.contains(
            "<p>Call foo<sup class=\"citation\"><a href=\"/files/f-1/download\""
        ));
        assert!(html.contains("[1]</a></sup>(bar) now.</p>"));
        assert!(!html.contains("<a href=\"bar\""));
    }

    #[test]
    fn literal_markers_in_source_stay_text() {
        let message = ChatMessage::new(MessageRole::Assistant, "see [CITATION_99] here");
        let html = render_message_html(&message);
        assert!(html.contains("see [CITATION_99] here"));
    }

    #[test]
    fn error_messages_are_escaped_in_error_container() {
        let message = ChatMessage::new(MessageRole::Error, "bad <input>");
        let html = render_message_html(&message);

        assert!(html.starts_with("<div class=\"message message-error\">"));
        assert!(html.contains("bad &lt;input&gt;"));
        assert!(html.contains("message-error-icon"));
    }

    #[test]
    fn raw_html_is_escaped() {
        let message = ChatMessage::new(MessageRole::User, "<script>alert(1)</script>");
        let html = render_conversation_html(&[message]);
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
    }
}
