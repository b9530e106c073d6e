//! Types containing the main body of an [`EventContext`].
//!
//! [`EventContext`]: super::EventContext
mod client;
mod connect;
mod disconnect;
mod socket;
mod speaking;
mod voice;

pub use self::{client::*, connect::*, disconnect::*, socket::*, speaking::*, voice::*};
