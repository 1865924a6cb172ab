//! Operational users (booths, readers) and super-admins.
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Operator {
    pub id: String,
    pub name: String,
    pub username: String,
    pub role: OperatorRole,
    #[serde(default)]
    pub event_id: Option<String>,
}

crate::entity!(Operator, "ops");

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperatorRole {
    Booth,
    Reader,
}

impl FromStr for OperatorRole {
    type Err = crate::Error;

    fn from_str(input: &str) -> crate::Result<Self> {
        match input.to_ascii_uppercase().as_str() {
            "BOOTH" => Ok(OperatorRole::Booth),
            "READER" => Ok(OperatorRole::Reader),
            _ => Err(crate::Error::InvalidRole(input.into())),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SuperUser {
    pub id: String,
    pub name: String,
    pub email: String,
}

crate::entity!(SuperUser, "super-users");
