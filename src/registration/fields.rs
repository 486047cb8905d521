//! Registration document schema and its validation rules.
//!
//! `RegistrationInput` is what clients send: every field optional and loosely
//! typed so that one pass can report every problem at once. A successful
//! `into_fields` yields `RegistrationFields`, the checked form the store accepts.

use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult, FieldViolation};

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\S+@\S+\.\S+$").expect("email pattern"));
static MOBILE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]{10}$").expect("mobile pattern"));

pub const CGPA_MIN: f64 = 0.0;
pub const CGPA_MAX: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Department {
    Cse,
    Ece,
    Mech,
    Civil,
    Eee,
    It,
}

impl Department {
    pub const ALL: [Department; 6] =
        [Department::Cse, Department::Ece, Department::Mech, Department::Civil, Department::Eee, Department::It];

    pub fn as_str(&self) -> &'static str {
        match self {
            Department::Cse => "CSE",
            Department::Ece => "ECE",
            Department::Mech => "MECH",
            Department::Civil => "CIVIL",
            Department::Eee => "EEE",
            Department::It => "IT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.as_str() == s.trim())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Gender {
    Male,
    Female,
    Other,
    #[serde(rename = "Prefer not to say")]
    PreferNotToSay,
}

impl Gender {
    pub const ALL: [Gender; 4] = [Gender::Male, Gender::Female, Gender::Other, Gender::PreferNotToSay];

    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "Male",
            Gender::Female => "Female",
            Gender::Other => "Other",
            Gender::PreferNotToSay => "Prefer not to say",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|g| g.as_str() == s.trim())
    }
}

/// Checked registration content, excluding server-owned fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationFields {
    pub name: String,
    #[serde(rename = "dept")]
    pub department: Department,
    #[serde(rename = "regNumber")]
    pub registration_number: String,
    pub email: String,
    pub cgpa: f64,
    #[serde(rename = "dob")]
    pub date_of_birth: NaiveDate,
    pub mobile: String,
    pub gender: Gender,
    pub skills: Vec<String>,
    pub institute: String,
}

impl RegistrationFields {
    /// Re-check value constraints (the enums are enforced by the type).
    pub fn validate(&self, now: DateTime<Utc>) -> AppResult<()> {
        let mut v = Vec::new();
        require_text(&mut v, "name", &self.name);
        require_text(&mut v, "regNumber", &self.registration_number);
        check_email(&mut v, &self.email);
        check_cgpa(&mut v, self.cgpa);
        check_dob(&mut v, self.date_of_birth, now);
        check_mobile(&mut v, &self.mobile);
        if self.skills.is_empty() { v.push(FieldViolation::new("skills", "at least one skill is required")); }
        require_text(&mut v, "institute", &self.institute);
        if v.is_empty() { Ok(()) } else { Err(AppError::Validation(v)) }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum NumberOrText {
    Number(f64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum SkillList {
    List(Vec<String>),
    Csv(String),
}

impl SkillList {
    pub fn into_vec(self) -> Vec<String> {
        let raw: Vec<String> = match self {
            SkillList::List(v) => v,
            SkillList::Csv(s) => s.split(',').map(|p| p.to_string()).collect(),
        };
        raw.into_iter().map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()
    }
}

/// Client-submitted registration body.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RegistrationInput {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "dept", alias = "department")]
    pub department: Option<String>,
    #[serde(default, rename = "regNumber", alias = "registrationNumber")]
    pub registration_number: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub cgpa: Option<NumberOrText>,
    #[serde(default, rename = "dob", alias = "dateOfBirth")]
    pub date_of_birth: Option<String>,
    #[serde(default)]
    pub mobile: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub skills: Option<SkillList>,
    #[serde(default)]
    pub institute: Option<String>,
    /// Only present when a client tries to reassign ownership.
    #[serde(default, alias = "user")]
    pub owner: Option<String>,
}

impl RegistrationInput {
    /// Trimmed registration number, if one was submitted.
    pub fn submitted_number(&self) -> Option<&str> {
        self.registration_number.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    /// Check every field and build the stored form. When `registration_number`
    /// is omitted, `keep_number` is used instead (updates keep the stored value).
    pub fn into_fields(self, keep_number: Option<&str>, now: DateTime<Utc>) -> AppResult<RegistrationFields> {
        let mut v: Vec<FieldViolation> = Vec::new();

        let name = text(&mut v, "name", self.name);
        let department = match self.department.as_deref().map(str::trim) {
            None | Some("") => { v.push(FieldViolation::new("dept", "is required")); None }
            Some(d) => {
                let parsed = Department::parse(d);
                if parsed.is_none() {
                    v.push(FieldViolation::new("dept", "must be one of: CSE, ECE, MECH, CIVIL, EEE, IT"));
                }
                parsed
            }
        };
        let registration_number = match self.registration_number.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()) {
            Some(n) => Some(n),
            None => match keep_number {
                Some(k) => Some(k.to_string()),
                None => { v.push(FieldViolation::new("regNumber", "is required")); None }
            },
        };
        let email = text(&mut v, "email", self.email);
        if let Some(e) = &email { check_email(&mut v, e); }
        let cgpa = match self.cgpa {
            None => { v.push(FieldViolation::new("cgpa", "is required")); None }
            Some(NumberOrText::Number(n)) => Some(n),
            Some(NumberOrText::Text(s)) => match s.trim().parse::<f64>() {
                Ok(n) => Some(n),
                Err(_) => { v.push(FieldViolation::new("cgpa", "must be a number")); None }
            },
        };
        if let Some(c) = cgpa { check_cgpa(&mut v, c); }
        let date_of_birth = match self.date_of_birth.as_deref().map(str::trim) {
            None | Some("") => { v.push(FieldViolation::new("dob", "is required")); None }
            Some(s) => match parse_date(s) {
                Some(d) => { check_dob(&mut v, d, now); Some(d) }
                None => { v.push(FieldViolation::new("dob", "must be a date (YYYY-MM-DD)")); None }
            },
        };
        let mobile = text(&mut v, "mobile", self.mobile);
        if let Some(m) = &mobile { check_mobile(&mut v, m); }
        let gender = match self.gender.as_deref().map(str::trim) {
            None | Some("") => { v.push(FieldViolation::new("gender", "is required")); None }
            Some(g) => {
                let parsed = Gender::parse(g);
                if parsed.is_none() {
                    v.push(FieldViolation::new("gender", "must be one of: Male, Female, Other, Prefer not to say"));
                }
                parsed
            }
        };
        let skills = self.skills.map(SkillList::into_vec).unwrap_or_default();
        if skills.is_empty() { v.push(FieldViolation::new("skills", "at least one skill is required")); }
        let institute = text(&mut v, "institute", self.institute);

        match (name, department, registration_number, email, cgpa, date_of_birth, mobile, gender, institute) {
            (Some(name), Some(department), Some(registration_number), Some(email), Some(cgpa), Some(date_of_birth), Some(mobile), Some(gender), Some(institute))
                if v.is_empty() =>
            {
                Ok(RegistrationFields {
                    name, department, registration_number, email, cgpa, date_of_birth, mobile, gender, skills, institute,
                })
            }
            _ => Err(AppError::Validation(v)),
        }
    }
}

/// `YYYY-MM-DD`, or an RFC 3339 timestamp reduced to its UTC calendar date.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.with_timezone(&Utc).date_naive()))
}

fn text(v: &mut Vec<FieldViolation>, field: &str, value: Option<String>) -> Option<String> {
    match value.map(|s| s.trim().to_string()) {
        Some(s) if !s.is_empty() => Some(s),
        _ => { v.push(FieldViolation::new(field, "is required")); None }
    }
}

fn require_text(v: &mut Vec<FieldViolation>, field: &str, value: &str) {
    if value.trim().is_empty() { v.push(FieldViolation::new(field, "is required")); }
}

fn check_email(v: &mut Vec<FieldViolation>, email: &str) {
    if !EMAIL_RE.is_match(email) { v.push(FieldViolation::new("email", "must be a valid email address")); }
}

fn check_cgpa(v: &mut Vec<FieldViolation>, cgpa: f64) {
    if !cgpa.is_finite() || !(CGPA_MIN..=CGPA_MAX).contains(&cgpa) {
        v.push(FieldViolation::new("cgpa", "must be between 0 and 10"));
    }
}

// The date is taken as midnight UTC, which must precede `now`.
fn check_dob(v: &mut Vec<FieldViolation>, dob: NaiveDate, now: DateTime<Utc>) {
    let midnight = dob.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
    if !midnight.is_some_and(|m| m < now) {
        v.push(FieldViolation::new("dob", "must be in the past"));
    }
}

fn check_mobile(v: &mut Vec<FieldViolation>, mobile: &str) {
    if !MOBILE_RE.is_match(mobile) { v.push(FieldViolation::new("mobile", "must be a 10-digit number")); }
}
