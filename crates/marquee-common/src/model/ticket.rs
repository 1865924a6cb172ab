//! Ticket types and ticket purchase requests.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TicketType {
    pub id: String,
    pub event_id: String,
    pub name: String,
    pub price: i64,
    pub quantity: u32,
}

crate::entity!(TicketType, "ticket-types");

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TicketRequest {
    pub id: String,
    pub event_id: String,
    pub user_id: String,
    pub ticket_type_id: String,
    pub quantity: u32,
    pub status: TicketStatus,
}

crate::entity!(TicketRequest, "tickets");

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    Pending,
    Approved,
    Declined,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Pending => "PENDING",
            TicketStatus::Approved => "APPROVED",
            TicketStatus::Declined => "DECLINED",
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = crate::Error;

    fn from_str(input: &str) -> crate::Result<Self> {
        match input.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(TicketStatus::Pending),
            "APPROVED" => Ok(TicketStatus::Approved),
            "DECLINED" => Ok(TicketStatus::Declined),
            _ => Err(crate::Error::InvalidStatus(input.into())),
        }
    }
}
