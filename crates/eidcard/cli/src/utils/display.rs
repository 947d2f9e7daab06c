//! Terminal formatting

use colored::Colorize;

pub(crate) fn success(message: &str) -> String {
    format!("✅ {}", message.green().bold())
}

pub(crate) fn warning(message: &str) -> String {
    format!("⚠️  {}", message.yellow().bold())
}

/// Aligned key and value lines under a title
pub(crate) fn key_value_box<K: AsRef<str>>(title: &str, items: &[(K, String)]) -> String {
    let width = items
        .iter()
        .map(|(key, _)| key.as_ref().chars().count())
        .max()
        .unwrap_or(0);
    let mut result = format!("{}", title.bold().underline());

    for (key, value) in items {
        result.push_str(&format!("\n  {}  {}", format!("{:width$}", key.as_ref()).bold(), value));
    }

    result
}

/// Render a retry counter, red once the code is blocked
pub(crate) fn retries(count: u8) -> String {
    match count {
        0 => "blocked".red().bold().to_string(),
        1 => count.to_string().yellow().to_string(),
        _ => count.to_string().green().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_value_box_aligns_keys() {
        colored::control::set_override(false);
        let text = key_value_box("Title", &[("a", "1".to_owned()), ("long", "2".to_owned())]);
        assert_eq!(text, "Title\n  a     1\n  long  2");
    }
}
