// Sample data for running the console without a backend.
use marquee_common::{
    Event, Newspaper, NotificationGroup, Operator, OperatorRole, SuperUser, TicketRequest,
    TicketStatus, TicketType, User,
};

use super::{InMemoryRemote, RemoteError};

/// Fill `remote` with one event, its ticket requests, a few users and staff.
pub async fn seed_demo(remote: &InMemoryRemote) -> Result<(), RemoteError> {
    remote
        .insert(&Event {
            id: "E1".into(),
            name: "Summer Open Air".into(),
            description: "Three stages, one night.".into(),
            venue: "Riverside Park".into(),
            starts_at: "2026-07-18T18:00:00Z".into(),
            capacity: 5000,
            published: true,
        })
        .await?;
    for (id, name, price) in [("GA", "General admission", 40), ("VIP", "VIP", 120)] {
        remote
            .insert(&TicketType {
                id: id.into(),
                event_id: "E1".into(),
                name: name.into(),
                price,
                quantity: 500,
            })
            .await?;
    }

    let users = [("U1", "Ana Souza", 100), ("U2", "Ben Carter", 0), ("U3", "Chen Li", 35)];
    for (id, name, balance) in users {
        remote
            .insert(&User {
                id: id.into(),
                name: name.into(),
                email: format!("{}@example.com", id.to_lowercase()),
                phone: None,
                wallet_balance: balance,
            })
            .await?;
    }

    let tickets = [
        ("T1", "U1", "GA", 2, TicketStatus::Pending),
        ("T2", "U2", "VIP", 1, TicketStatus::Approved),
        ("T3", "U3", "GA", 4, TicketStatus::Declined),
    ];
    for (id, user_id, type_id, quantity, status) in tickets {
        remote
            .insert(&TicketRequest {
                id: id.into(),
                event_id: "E1".into(),
                user_id: user_id.into(),
                ticket_type_id: type_id.into(),
                quantity,
                status,
            })
            .await?;
    }

    for (id, name, role) in [("O1", "Alice", OperatorRole::Booth), ("O2", "Bruno", OperatorRole::Reader)] {
        remote
            .insert(&Operator {
                id: id.into(),
                name: name.into(),
                username: name.to_lowercase(),
                role,
                event_id: Some("E1".into()),
            })
            .await?;
    }
    remote
        .insert(&SuperUser {
            id: "S1".into(),
            name: "Root".into(),
            email: "root@example.com".into(),
        })
        .await?;
    remote
        .insert(&NotificationGroup {
            id: "G1".into(),
            name: "Ticket holders".into(),
            member_count: 2,
        })
        .await?;
    remote
        .insert(&Newspaper {
            id: "N1".into(),
            title: "Line-up announced".into(),
            body: "The full line-up is out.".into(),
            image_url: None,
            published_at: Some("2026-05-01T09:00:00Z".into()),
        })
        .await?;
    Ok(())
}
