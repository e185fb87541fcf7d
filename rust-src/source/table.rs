//! Fully-qualified table identifiers.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;


/// `project.dataset.table`, validated because it is spliced into SQL text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableId {
    project: String,
    dataset: String,
    table: String,
}


#[derive(Debug, thiserror::Error)]
#[error("invalid table identifier {0:?}: expected project.dataset.table using letters, digits, '_' or '-'")]
pub struct TableIdError(pub String);


fn table_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^([A-Za-z0-9_-]+)\.([A-Za-z0-9_]+)\.([A-Za-z0-9_-]+)$")
            .expect("table id pattern is valid")
    })
}


impl TableId {
    /// Bare table name, the last segment.
    pub fn table(&self) -> &str {
        &self.table
    }
}


impl FromStr for TableId {
    type Err = TableIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = table_id_pattern()
            .captures(s.trim())
            .ok_or_else(|| TableIdError(s.to_string()))?;

        Ok(Self {
            project: caps[1].to_string(),
            dataset: caps[2].to_string(),
            table: caps[3].to_string(),
        })
    }
}


impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}
