//! Student registration records: the document schema, its validation rules,
//! and the authorized operations over the registration collection.

mod fields;
mod service;

pub use fields::{parse_date, Department, Gender, NumberOrText, RegistrationFields, RegistrationInput, SkillList, CGPA_MAX, CGPA_MIN};
pub use service::{ListedRegistration, OwnerSummary, RegistrationService};
