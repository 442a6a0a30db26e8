use chrono::Local;

/// Render the current local time the way it is prepended to requests.
pub fn current_time_line() -> String {
    format!("Current time: {}", Local::now().format("%A, %B %e, %Y %H:%M"))
}

/// Prefix `text` with injected context in fixed order: current time, then
/// an optional search-snippet block, then the original text.
///
/// The result is only ever sent to the model; persisted history keeps the
/// original text untouched.
pub fn inject_context(text: &str, search_block: Option<&str>) -> String {
    let mut out = current_time_line();
    out.push('\n');
    if let Some(block) = search_block {
        out.push_str("Relevant web results:\n");
        out.push_str(block);
        out.push('\n');
    }
    out.push('\n');
    out.push_str(text);
    out
}

#[cfg(test)]
mod tests {
    use super::{current_time_line, inject_context};

    #[test]
    fn time_comes_first_then_search_then_text() {
        let injected = inject_context("what is new?", Some("- headline (https://a)"));

        let time_at = injected.find("Current time:").unwrap();
        let search_at = injected.find("Relevant web results:").unwrap();
        let text_at = injected.find("what is new?").unwrap();
        assert!(time_at < search_at);
        assert!(search_at < text_at);
    }

    #[test]
    fn no_search_block_when_absent() {
        let injected = inject_context("hello", None);
        assert!(!injected.contains("Relevant web results:"));
        assert!(injected.ends_with("hello"));
    }

    #[test]
    fn time_line_has_stable_prefix() {
        assert!(current_time_line().starts_with("Current time: "));
    }
}
