//! ---
//! ps_section: "11-simulation"
//! ps_subsection: "module"
//! ps_type: "source"
//! ps_scope: "code"
//! ps_description: "Case identifier templates."
//! ps_version: "v0.1.0"
//! ps_owner: "tbd"
//! ---
use std::fmt;
use std::str::FromStr;

const PLACEHOLDERS: [&str; 2] = ["{}", "%d"];

/// Rejected case identifier templates.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatternError {
    #[error("case id pattern `{0}` has no `{{}}` or `%d` placeholder")]
    MissingPlaceholder(String),
    #[error("case id pattern `{0}` has more than one placeholder")]
    AmbiguousPlaceholder(String),
}

/// Template turning the generation counter into a case identifier,
/// e.g. `instance_{}` or `case-%d`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseIdPattern {
    raw: String,
    prefix: String,
    suffix: String,
}

impl CaseIdPattern {
    pub fn parse(raw: &str) -> Result<Self, PatternError> {
        let mut found: Option<(usize, &str)> = None;
        for placeholder in PLACEHOLDERS {
            let hits: Vec<_> = raw.match_indices(placeholder).collect();
            match (hits.as_slice(), found) {
                ([], _) => {}
                ([(index, _)], None) => found = Some((*index, placeholder)),
                _ => return Err(PatternError::AmbiguousPlaceholder(raw.to_owned())),
            }
        }
        let (index, placeholder) =
            found.ok_or_else(|| PatternError::MissingPlaceholder(raw.to_owned()))?;
        Ok(Self {
            raw: raw.to_owned(),
            prefix: raw[..index].to_owned(),
            suffix: raw[index + placeholder.len()..].to_owned(),
        })
    }

    pub fn render(&self, counter: u64) -> String {
        format!("{}{}{}", self.prefix, counter, self.suffix)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for CaseIdPattern {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CaseIdPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
