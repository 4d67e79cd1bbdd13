//! Historical customer/company exchanges.

use serde::{Deserialize, Serialize};

/// One historical exchange from the dataset.
///
/// Identity is `row`, the position in the (possibly sampled) source table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Position in the source dataset.
    pub row: usize,

    /// The inbound customer message.
    pub customer_message: String,

    /// The company's reply to it.
    pub company_reply: String,

    /// Company that replied. Empty when the dataset has no such column.
    #[serde(default)]
    pub company: String,
}

impl Record {
    /// Create a new record.
    pub fn new(
        row: usize,
        customer_message: impl Into<String>,
        company_reply: impl Into<String>,
        company: impl Into<String>,
    ) -> Self {
        Self {
            row,
            customer_message: customer_message.into(),
            company_reply: company_reply.into(),
            company: company.into(),
        }
    }

    /// Short, single-line excerpt of the customer message for logs and errors.
    pub fn preview(&self) -> String {
        const MAX_CHARS: usize = 60;
        let flat = self.customer_message.replace('\n', " ");
        if flat.chars().count() <= MAX_CHARS {
            flat
        } else {
            let cut: String = flat.chars().take(MAX_CHARS).collect();
            format!("{cut}...")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_preview_truncates_long_messages() {
        let record = Record::new(0, "a".repeat(100), "reply", "Acme");
        let preview = record.preview();
        assert_eq!(preview.chars().count(), 63);
        assert!(preview.ends_with("..."));
    }

    #[test]
    fn test_preview_flattens_newlines() {
        let record = Record::new(3, "line one\nline two", "", "");
        assert_eq!(record.preview(), "line one line two");
    }
}
