//! Declared output schemas for instructions.
//!
//! An [`OutputSchema`] maps field names to [`FieldKind`]s. The instruction
//! compiler renders it into prompt guidance asking the model to wrap each
//! field in `<field>…</field>` tags, and the response parser coerces each
//! tagged section back to the declared kind.

/// Primitive kind of one schema field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Number,
    Boolean,
    StringArray,
    NumberArray,
    BooleanArray,
    /// A JSON object, parsed verbatim
    Object,
    /// Inner kind, tolerated absent
    Optional(Box<FieldKind>),
}

impl FieldKind {
    /// Wrap a kind as optional.
    pub fn optional(inner: FieldKind) -> Self {
        FieldKind::Optional(Box::new(inner))
    }

    /// True if a missing tag is tolerated for this kind.
    pub fn is_optional(&self) -> bool {
        matches!(self, FieldKind::Optional(_))
    }

    /// Short human description used in prompt guidance.
    pub fn describe(&self) -> String {
        match self {
            FieldKind::String => "text".to_string(),
            FieldKind::Number => "a number".to_string(),
            FieldKind::Boolean => "true or false".to_string(),
            FieldKind::StringArray => "a JSON array of strings".to_string(),
            FieldKind::NumberArray => "a JSON array of numbers".to_string(),
            FieldKind::BooleanArray => "a JSON array of booleans".to_string(),
            FieldKind::Object => "a JSON object".to_string(),
            FieldKind::Optional(inner) => format!("{}, optional", inner.describe()),
        }
    }
}

/// Ordered mapping from field name to declared kind.
///
/// Field order is preserved so the prompt guidance lists fields the way the
/// caller declared them.
#[derive(Debug, Clone, Default)]
pub struct OutputSchema {
    fields: Vec<(String, FieldKind)>,
}

impl OutputSchema {
    /// An empty schema; the node result is then the raw terminal text.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field. Replaces any earlier field with the same name.
    pub fn field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        let name = name.into();
        self.fields.retain(|(existing, _)| *existing != name);
        self.fields.push((name, kind));
        self
    }

    /// Iterate fields in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldKind)> {
        self.fields.iter().map(|(name, kind)| (name.as_str(), kind))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_preserves_declaration_order() {
        let schema = OutputSchema::new()
            .field("zeta", FieldKind::String)
            .field("alpha", FieldKind::Number);
        let names: Vec<&str> = schema.fields().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
    }

    #[test]
    fn test_schema_field_replaces_duplicate() {
        let schema = OutputSchema::new()
            .field("x", FieldKind::String)
            .field("x", FieldKind::Number);
        assert_eq!(schema.len(), 1);
        let (_, kind) = schema.fields().next().unwrap();
        assert_eq!(*kind, FieldKind::Number);
    }

    #[test]
    fn test_optional_detection() {
        assert!(FieldKind::optional(FieldKind::String).is_optional());
        assert!(!FieldKind::Boolean.is_optional());
    }
}
