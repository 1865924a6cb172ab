//! Console data model.
//!
//! # Purpose
//! Re-exports the entities the admin console reads and edits. Field names are
//! serialized in camelCase to match the REST API.
mod content;
mod event;
mod staff;
mod ticket;
mod user;

pub use content::{Newspaper, NotificationGroup, PushNotification};
pub use event::{Event, EventRevenue};
pub use staff::{Operator, OperatorRole, SuperUser};
pub use ticket::{TicketRequest, TicketStatus, TicketType};
pub use user::{Transaction, TransactionKind, User, WalletTopUp};
