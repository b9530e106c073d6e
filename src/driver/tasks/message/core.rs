#![allow(missing_docs)]

use crate::{driver::connection::error::Error, events::EventData, ConnectionInfo};
use flume::Sender;

#[derive(Debug)]
pub enum CoreMessage {
    ConnectWithResult(ConnectionInfo, Sender<Result<(), Error>>),
    Disconnect,
    ServerUpdate(String, String),
    AddEvent(EventData),
    RemoveGlobalEvents,
    /// Signalling failed on connection `idx`, but the session may be resumed.
    Reconnect(usize),
    /// Connection `idx` must be torn down and identified afresh.
    FullReconnect(usize),
    Poison,
}
