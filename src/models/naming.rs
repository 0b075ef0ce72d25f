//! Syntax rules for user-chosen names.

/// Context prefixes and instance names: a letter or `_`, then letters, digits or `_`.
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_')
}

/// Concept terms: ASCII letters only, non-empty.
pub fn is_concept_name(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphabetic())
}

/// Property names follow the concept-term rule.
pub fn is_property_name(s: &str) -> bool {
    is_concept_name(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers() {
        assert!(is_identifier("lab"));
        assert!(is_identifier("_lab2"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("2lab"));
        assert!(!is_identifier("lab:x"));
        assert!(!is_identifier("la b"));
    }

    #[test]
    fn concept_names_are_letters_only() {
        assert!(is_concept_name("Sensor"));
        assert!(!is_concept_name(""));
        assert!(!is_concept_name("Sensor2"));
        assert!(!is_concept_name("my_sensor"));
        assert!(!is_property_name("unit name"));
    }
}
