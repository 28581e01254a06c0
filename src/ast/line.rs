use super::span::Location;

/// One logical template line: the raw indentation prefix plus the text
/// after it, with trailing whitespace removed.
///
/// Physical lines joined by continuation share the first line's
/// indentation and location; their text is joined with `\n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLine {
    /// Leading whitespace exactly as written. Tabs and spaces are never
    /// normalised.
    pub indent: String,
    pub text: String,
    /// Location of the first non-whitespace character.
    pub location: Location,
}

impl SourceLine {
    /// Indentation depth in whitespace characters.
    pub fn depth(&self) -> usize {
        self.indent.chars().count()
    }
}
