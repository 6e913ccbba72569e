//! The closed set of field validation types.

use serde::{Deserialize, Serialize};

/// Closed set of value kinds the Architect can assign to a schema field
/// and the Extractor knows how to resolve/validate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationType {
    String,
    Number,
    Boolean,
    Email,
    Phone,
    Date,
    IsoDate,
    Url,
    StringArray,
    NumberArray,
    Currency,
    Percentage,
    Address,
    Name,
    Object,
    Custom,
}

impl ValidationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Email => "email",
            Self::Phone => "phone",
            Self::Date => "date",
            Self::IsoDate => "iso_date",
            Self::Url => "url",
            Self::StringArray => "string_array",
            Self::NumberArray => "number_array",
            Self::Currency => "currency",
            Self::Percentage => "percentage",
            Self::Address => "address",
            Self::Name => "name",
            Self::Object => "object",
            Self::Custom => "custom",
        }
    }
}

impl std::fmt::Display for ValidationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
