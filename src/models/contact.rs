use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyContact {
    pub id: String,
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
}

impl EmergencyContact {
    pub fn new(id: impl Into<String>, name: impl Into<String>, phone: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            phone: phone.into(),
            email: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChannelKind {
    Image,
    Sms,
    Email,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Image => "image",
            ChannelKind::Sms => "sms",
            ChannelKind::Email => "email",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One record per (contact × attempted channel).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchOutcome {
    pub contact_id: String,
    pub channel: ChannelKind,
    pub success: bool,
    pub error: Option<String>,
}

/// Aggregate for one contact: succeeded if any of its channels did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactOutcome {
    pub contact_id: String,
    pub contact_name: String,
    pub success: bool,
    pub channels: Vec<DispatchOutcome>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchReport {
    pub contacts: Vec<ContactOutcome>,
    /// Contacts with no applicable channel (nothing was attempted for them).
    pub skipped: Vec<String>,
}

impl DispatchReport {
    pub fn success(&self) -> bool {
        self.contacts.iter().any(|contact| contact.success)
    }

    pub fn succeeded_contacts(&self) -> usize {
        self.contacts.iter().filter(|contact| contact.success).count()
    }

    pub fn outcomes(&self) -> impl Iterator<Item = &DispatchOutcome> {
        self.contacts.iter().flat_map(|contact| contact.channels.iter())
    }
}
