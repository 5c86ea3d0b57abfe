const FENCE: &str = "```";

/// Contents of the first fenced block in `text`, without the fence lines.
///
/// The opening fence may carry a language tag. Line endings inside the block
/// are kept as written. A block left open by a truncated reply runs to the
/// end of the text. Returns `None` when `text` has no fence at all.
pub fn extract_code_block(text: &str) -> Option<String> {
    let mut lines = text.split_inclusive('\n');
    lines.by_ref().find(|line| is_fence(line))?;
    let body: String = lines.take_while(|line| !is_fence(line)).collect();
    // The terminator of the last body line belongs to the closing fence.
    let trimmed = match body.strip_suffix('\n') {
        Some(rest) => rest.strip_suffix('\r').unwrap_or(rest),
        None => body.as_str(),
    };
    Some(trimmed.to_string())
}

fn is_fence(line: &str) -> bool {
    line.trim_start().starts_with(FENCE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_first_block_and_drops_language_tag() {
        let reply = "Here is the loop:\n\n```python\nfor i in range(10): pass\n```\n\nIt iterates ten times.";
        assert_eq!(
            extract_code_block(reply).as_deref(),
            Some("for i in range(10): pass")
        );
    }

    #[test]
    fn keeps_block_contents_verbatim() {
        let reply = "```\n    indented = True\n\nx  =  1   \n```";
        assert_eq!(
            extract_code_block(reply).as_deref(),
            Some("    indented = True\n\nx  =  1   ")
        );
    }

    #[test]
    fn only_the_first_block_is_used() {
        let reply = "```python\na = 1\n```\nthen\n```python\nb = 2\n```";
        assert_eq!(extract_code_block(reply).as_deref(), Some("a = 1"));
    }

    #[test]
    fn no_fence_means_no_code() {
        assert_eq!(extract_code_block("Use a for loop."), None);
        assert_eq!(extract_code_block(""), None);
    }

    #[test]
    fn unterminated_block_runs_to_end() {
        assert_eq!(
            extract_code_block("```python\nx = 1\ny = 2").as_deref(),
            Some("x = 1\ny = 2")
        );
    }

    #[test]
    fn crlf_line_endings_survive_extraction() {
        assert_eq!(
            extract_code_block("```python\r\nx = 1\r\ny = 2\r\n```").as_deref(),
            Some("x = 1\r\ny = 2")
        );
        assert_eq!(
            extract_code_block("Fix:\r\n```\r\na\r\n\r\nb\r\n```\r\nDone.").as_deref(),
            Some("a\r\n\r\nb")
        );
    }

    #[test]
    fn trailing_newline_of_an_open_block_is_dropped() {
        assert_eq!(
            extract_code_block("```python\nx = 1\n").as_deref(),
            Some("x = 1")
        );
    }

    #[test]
    fn empty_block_is_empty_code() {
        assert_eq!(extract_code_block("```python\n```").as_deref(), Some(""));
    }
}
