//! Registration form carried across turns of a session.
//!
//! The form is only ever changed by the registration handler, and only
//! through [`RegistrationForm::merge`], which is pure: the caller decides
//! whether the merged copy is committed.

use serde::{Deserialize, Serialize};

/// Where the caller is in the registration conversation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStage {
    /// No registration talk yet.
    #[default]
    NotStarted,
    /// Some required fields are still missing.
    Collecting,
    /// All fields present; waiting for the caller to confirm.
    Confirming,
    /// Confirmed and persisted.
    Done,
}

/// One required registration field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormField {
    FullName,
    Email,
    Nickname,
    Event,
}

impl FormField {
    /// Spoken label used when asking for the field.
    pub fn label(self) -> &'static str {
        match self {
            Self::FullName => "full name",
            Self::Email => "email",
            Self::Nickname => "nickname",
            Self::Event => "event details",
        }
    }
}

/// Fields extracted from one utterance. Absent or blank values mean
/// "not mentioned" and never erase what the form already holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractedFields {
    #[serde(alias = "full_name", alias = "name")]
    pub fullname: Option<String>,
    pub email: Option<String>,
    pub nickname: Option<String>,
    #[serde(alias = "event_details")]
    pub event: Option<String>,
}

/// The accumulated registration form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationForm {
    pub fullname: String,
    pub email: String,
    pub nickname: String,
    /// The event the caller wants to join, as they described it.
    pub event: String,
    pub stage: RegistrationStage,
}

fn overlay(current: &str, incoming: Option<&String>) -> String {
    match incoming.map(|v| v.trim()) {
        Some(v) if !v.is_empty() => v.to_owned(),
        _ => current.to_owned(),
    }
}

impl RegistrationForm {
    /// Form pre-filled from identity claims on the access token.
    pub fn seeded(name: Option<&str>, email: Option<&str>) -> Self {
        Self {
            fullname: name.unwrap_or_default().trim().to_owned(),
            email: email.unwrap_or_default().trim().to_owned(),
            ..Self::default()
        }
    }

    /// Copy of `self` with every non-blank extracted value applied. The
    /// stage is left unchanged. Applying the same fields twice yields the
    /// same form.
    pub fn merge(&self, fields: &ExtractedFields) -> Self {
        Self {
            fullname: overlay(&self.fullname, fields.fullname.as_ref()),
            email: overlay(&self.email, fields.email.as_ref()),
            nickname: overlay(&self.nickname, fields.nickname.as_ref()),
            event: overlay(&self.event, fields.event.as_ref()),
            stage: self.stage,
        }
    }

    /// Copy of `self` at `stage`.
    pub fn with_stage(&self, stage: RegistrationStage) -> Self {
        Self {
            stage,
            ..self.clone()
        }
    }

    /// Required fields that are still blank, in asking order.
    pub fn missing_fields(&self) -> Vec<FormField> {
        [
            (FormField::FullName, &self.fullname),
            (FormField::Email, &self.email),
            (FormField::Nickname, &self.nickname),
            (FormField::Event, &self.event),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(field, _)| field)
        .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.missing_fields().is_empty()
    }

    /// True when both forms hold the same field values, ignoring stage.
    pub fn same_details(&self, other: &Self) -> bool {
        self.fullname == other.fullname
            && self.email == other.email
            && self.nickname == other.nickname
            && self.event == other.event
    }
}
