//! Declarative mapping from (source family, target extension) to store options.

use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use tracing::error;

use crate::{ConverterError, DocumentFamily, OptionMap};

const BUILTIN_FORMATS: &str = include_str!("../resources/documents-formats.json");

/// One record of the formats table
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatRecord {
    /// Family a document with one of `extensions` is loaded as
    pub input_family: DocumentFamily,
    pub extensions: Vec<String>,
    /// Options to store a document of the keyed family with one of
    /// `extensions`
    #[serde(default)]
    pub store_properties: HashMap<DocumentFamily, OptionMap>,
}

/// Lookup table of supported conversions
#[derive(Debug, Clone, Default)]
pub struct FormatRegistry {
    store_options: HashMap<(DocumentFamily, String), OptionMap>,
    supported_extensions: HashSet<String>,
    family_by_extension: HashMap<String, DocumentFamily>,
}

impl FormatRegistry {
    /// The table shipped with the crate
    pub fn builtin() -> Self {
        match Self::from_json_str(BUILTIN_FORMATS) {
            Ok(registry) => registry,
            Err(e) => {
                error!(error = %e, "Embedded formats table is invalid, no conversions available");
                Self::default()
            }
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConverterError> {
        let records: Vec<FormatRecord> = serde_json::from_str(json).map_err(|e| {
            ConverterError::configuration_error(format!("invalid formats table: {e}"))
        })?;
        Ok(Self::from_records(records))
    }

    pub fn from_records(records: impl IntoIterator<Item = FormatRecord>) -> Self {
        let mut registry = Self::default();

        for record in records {
            for extension in &record.extensions {
                let extension = extension.to_ascii_lowercase();
                registry.supported_extensions.insert(extension.clone());
                registry
                    .family_by_extension
                    .insert(extension.clone(), record.input_family);

                for (family, options) in &record.store_properties {
                    registry
                        .store_options
                        .insert((*family, extension.clone()), options.clone());
                }
            }
        }

        registry
    }

    pub fn is_supported_extension(&self, extension: &str) -> bool {
        self.supported_extensions
            .contains(&extension.to_ascii_lowercase())
    }

    /// Family a file with `extension` loads as
    pub fn family_for_extension(&self, extension: &str) -> Option<DocumentFamily> {
        self.family_by_extension
            .get(&extension.to_ascii_lowercase())
            .copied()
    }

    /// Store options for saving a `family` document as `target_extension`
    pub fn options_for(
        &self,
        family: Option<DocumentFamily>,
        target_extension: &str,
    ) -> Result<OptionMap, ConverterError> {
        let family = family.ok_or_else(|| {
            ConverterError::unsupported("cannot determine the family of the source document")
        })?;

        if !self.is_supported_extension(target_extension) {
            return Err(ConverterError::unsupported(format!(
                "unsupported file format: {target_extension}"
            )));
        }

        self.store_options
            .get(&(family, target_extension.to_ascii_lowercase()))
            .cloned()
            .ok_or_else(|| ConverterError::unsupported(format!("{family} --> {target_extension}")))
    }

    /// Every registered (family, target extension) pair
    pub fn pairs(&self) -> impl Iterator<Item = (DocumentFamily, &str)> {
        self.store_options
            .keys()
            .map(|(family, extension)| (*family, extension.as_str()))
    }
}
