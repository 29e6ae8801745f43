pub mod category;
pub mod event;
pub mod ticket;
pub mod user;

pub use category::Category;
pub use event::Event;
pub use ticket::{Ticket, TicketId, TicketStatus};
pub use user::{AuthIdentity, Profile, Subscriber, UserSummary};
