use std::fmt;

use serde::{Deserialize, Serialize};

/// Logical field of a contest-entry form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Field {
    Lastname,
    Firstname,
    Email,
    Terms,
    Submit,
}

impl Field {
    /// Every field, in the order they are checked and reported.
    pub const ALL: [Field; 5] = [
        Field::Lastname,
        Field::Firstname,
        Field::Email,
        Field::Terms,
        Field::Submit,
    ];

    /// Fields that must all be visible for the form to count as exposed.
    pub const REQUIRED: [Field; 4] = [
        Field::Lastname,
        Field::Firstname,
        Field::Email,
        Field::Submit,
    ];

    /// Fields the prefill step is allowed to write to.
    pub const FILLABLE: [Field; 3] = [Field::Lastname, Field::Firstname, Field::Email];

    pub fn as_str(self) -> &'static str {
        match self {
            Field::Lastname => "lastname",
            Field::Firstname => "firstname",
            Field::Email => "email",
            Field::Terms => "terms",
            Field::Submit => "submit",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CSS locators for each form field. Empty or missing locators mean the field
/// is not checked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorSpec {
    pub lastname: Option<String>,
    pub firstname: Option<String>,
    pub email: Option<String>,
    pub terms: Option<String>,
    pub submit: Option<String>,
}

impl SelectorSpec {
    /// Locator declared for `field`, ignoring blank entries.
    pub fn locator(&self, field: Field) -> Option<&str> {
        let raw = match field {
            Field::Lastname => self.lastname.as_deref(),
            Field::Firstname => self.firstname.as_deref(),
            Field::Email => self.email.as_deref(),
            Field::Terms => self.terms.as_deref(),
            Field::Submit => self.submit.as_deref(),
        };
        raw.map(str::trim).filter(|value| !value.is_empty())
    }

    pub fn declares(&self, field: Field) -> bool {
        self.locator(field).is_some()
    }

    /// True when none of the required fields has a locator.
    pub fn is_empty(&self) -> bool {
        Field::REQUIRED.iter().all(|field| !self.declares(*field))
    }
}

/// Identity used to prefill the form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub lastname: String,
    pub firstname: String,
    pub email: String,
    #[serde(alias = "acceptTerms")]
    pub accept_terms: bool,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            lastname: String::new(),
            firstname: String::new(),
            email: String::new(),
            accept_terms: true,
        }
    }
}

impl Profile {
    /// Value to write into `field`; only text fields carry one.
    pub fn value(&self, field: Field) -> Option<&str> {
        match field {
            Field::Lastname => Some(&self.lastname),
            Field::Firstname => Some(&self.firstname),
            Field::Email => Some(&self.email),
            Field::Terms | Field::Submit => None,
        }
    }
}
