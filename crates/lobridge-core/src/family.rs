use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse document category used to key option lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentFamily {
    Text,
    Web,
    Spreadsheet,
    Presentation,
    Drawing,
}

impl DocumentFamily {
    /// Families in detection priority order, each with the service a loaded
    /// document must support to belong to it. A document can support several
    /// of these; the first match wins.
    pub const DETECTION_ORDER: [(DocumentFamily, &'static str); 5] = [
        (DocumentFamily::Web, "com.sun.star.text.WebDocument"),
        (DocumentFamily::Text, "com.sun.star.text.GenericTextDocument"),
        (DocumentFamily::Spreadsheet, "com.sun.star.sheet.SpreadsheetDocument"),
        (
            DocumentFamily::Presentation,
            "com.sun.star.presentation.PresentationDocument",
        ),
        (DocumentFamily::Drawing, "com.sun.star.drawing.DrawingDocument"),
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentFamily::Text => "TEXT",
            DocumentFamily::Web => "WEB",
            DocumentFamily::Spreadsheet => "SPREADSHEET",
            DocumentFamily::Presentation => "PRESENTATION",
            DocumentFamily::Drawing => "DRAWING",
        }
    }

    /// Classify a document from its supported services
    pub fn detect(supports: impl Fn(&str) -> bool) -> Option<Self> {
        Self::DETECTION_ORDER
            .iter()
            .find(|(_, service)| supports(service))
            .map(|(family, _)| *family)
    }
}

impl fmt::Display for DocumentFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_web_wins_over_generic_text() {
        let services = [
            "com.sun.star.text.GenericTextDocument",
            "com.sun.star.text.WebDocument",
        ];
        let family = DocumentFamily::detect(|name| services.contains(&name));
        assert_eq!(family, Some(DocumentFamily::Web));
    }

    #[test]
    fn test_single_service_families() {
        for (family, service) in DocumentFamily::DETECTION_ORDER {
            assert_eq!(DocumentFamily::detect(|name| name == service), Some(family));
        }
    }

    #[test]
    fn test_unknown_document() {
        assert_eq!(DocumentFamily::detect(|_| false), None);
    }

    #[test]
    fn test_serde_names() {
        let family: DocumentFamily = serde_json::from_str("\"SPREADSHEET\"").unwrap();
        assert_eq!(family, DocumentFamily::Spreadsheet);
        assert_eq!(serde_json::to_string(&DocumentFamily::Web).unwrap(), "\"WEB\"");
    }
}
