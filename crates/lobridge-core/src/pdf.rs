use std::collections::HashMap;

use crate::{DocumentFamily, OptionMap};

/// Caller override selecting the PDF variant
pub const FORMAT_KEY: &str = "format";
/// Caller override setting a permission password
pub const PERMISSION_PASSWORD_KEY: &str = "permissionPassword";

const SELECT_PDF_VERSION: &str = "SelectPdfVersion";
const RESTRICT_PERMISSIONS: &str = "RestrictPermissions";
const PERMISSION_PASSWORD: &str = "PermissionPassword";
const CHANGES: &str = "Changes";
const CHANGES_DENIED: i64 = 0;

/// PDF variants the export filter knows, with their version codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PdfFormat {
    PdfX,
    PdfX1a2001,
    PdfX32002,
    PdfA1a,
    #[default]
    PdfA1b,
}

impl PdfFormat {
    pub const ALL: [PdfFormat; 5] = [
        PdfFormat::PdfX,
        PdfFormat::PdfX1a2001,
        PdfFormat::PdfX32002,
        PdfFormat::PdfA1a,
        PdfFormat::PdfA1b,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            PdfFormat::PdfX => "PDF/X",
            PdfFormat::PdfX1a2001 => "PDF/X-1a:2001",
            PdfFormat::PdfX32002 => "PDF/X-3:2002",
            PdfFormat::PdfA1a => "PDF/A-1a",
            PdfFormat::PdfA1b => "PDF/A-1b",
        }
    }

    pub fn version(&self) -> i64 {
        match self {
            PdfFormat::PdfX => 0,
            PdfFormat::PdfX1a2001 => 1,
            PdfFormat::PdfX32002 => 2,
            PdfFormat::PdfA1a => 3,
            PdfFormat::PdfA1b => 4,
        }
    }

    /// Case-insensitive lookup; unknown or missing names fall back to PDF/A-1b
    pub fn from_name(name: Option<&str>) -> Self {
        name.and_then(|name| {
            Self::ALL
                .into_iter()
                .find(|format| format.name().eq_ignore_ascii_case(name))
        })
        .unwrap_or_default()
    }
}

/// Export filter for the given source family
pub fn export_filter(family: Option<DocumentFamily>) -> &'static str {
    match family {
        Some(DocumentFamily::Spreadsheet) => "calc_pdf_Export",
        Some(DocumentFamily::Presentation) => "impress_pdf_Export",
        Some(DocumentFamily::Drawing) => "draw_pdf_Export",
        Some(DocumentFamily::Web) => "writer_web_pdf_Export",
        Some(DocumentFamily::Text) | None => "writer_pdf_Export",
    }
}

/// Build the option set from caller overrides.
///
/// For a PDF target the overrides are knobs (`format`, `permissionPassword`)
/// turned into export filter data; for any other target they are used as the
/// option set verbatim.
pub fn override_options(
    target_extension: &str,
    family: Option<DocumentFamily>,
    overrides: &HashMap<String, String>,
) -> OptionMap {
    if !target_extension.eq_ignore_ascii_case("pdf") {
        return overrides
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
    }

    let lookup = |wanted: &str| {
        overrides
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(wanted))
            .map(|(_, value)| value.as_str())
    };

    let format = PdfFormat::from_name(lookup(FORMAT_KEY));
    let mut filter_data = OptionMap::new().with(SELECT_PDF_VERSION, format.version());

    if let Some(password) = lookup(PERMISSION_PASSWORD_KEY).filter(|p| !p.is_empty()) {
        filter_data.insert(RESTRICT_PERMISSIONS, true);
        filter_data.insert(PERMISSION_PASSWORD, password);
        filter_data.insert(CHANGES, CHANGES_DENIED);
    }

    OptionMap::new()
        .with("FilterName", export_filter(family))
        .with("FilterData", filter_data)
}
