//! Context assembly: retrieved passages joined into one prompt block.

use crate::types::Passage;

/// Separator placed between passages: a blank line, 69 dashes, a blank line.
pub const CONTEXT_DELIMITER: &str =
    "\n\n---------------------------------------------------------------------\n\n";

/// Join passage texts with [`CONTEXT_DELIMITER`]. No passages give `""`.
pub fn assemble(passages: &[Passage]) -> String {
    passages
        .iter()
        .map(|p| p.text.as_str())
        .collect::<Vec<_>>()
        .join(CONTEXT_DELIMITER)
}

/// Split an assembled context back into passage texts.
///
/// Only exact for passages that do not themselves contain the delimiter.
pub fn split_context(context: &str) -> Vec<&str> {
    if context.is_empty() {
        return Vec::new();
    }
    context.split(CONTEXT_DELIMITER).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delimiter_shape() {
        assert_eq!(CONTEXT_DELIMITER.len(), 73);
        assert!(CONTEXT_DELIMITER.starts_with("\n\n-"));
        assert!(CONTEXT_DELIMITER.ends_with("-\n\n"));
        assert_eq!(CONTEXT_DELIMITER.matches('-').count(), 69);
    }

    #[test]
    fn test_assemble_empty() {
        assert_eq!(assemble(&[]), "");
        assert!(split_context("").is_empty());
    }

    #[test]
    fn test_assemble_single_has_no_delimiter() {
        assert_eq!(assemble(&[Passage::new("1", "jen jeden")]), "jen jeden");
    }

    #[test]
    fn test_assemble_joins_in_order() {
        let passages = vec![Passage::new("A", "X"), Passage::anonymous("Y")];
        let context = assemble(&passages);
        assert_eq!(context, format!("X{}Y", CONTEXT_DELIMITER));
        assert_eq!(split_context(&context), vec!["X", "Y"]);
    }

    #[test]
    fn test_assemble_does_not_truncate() {
        let long = "a".repeat(100_000);
        let context = assemble(&[Passage::anonymous(long.clone()), Passage::anonymous(long)]);
        assert_eq!(context.len(), 200_000 + CONTEXT_DELIMITER.len());
    }
}
