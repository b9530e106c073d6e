#![allow(missing_docs)]

use crate::ws::Signalling;

pub enum WsMessage {
    Ws(Box<dyn Signalling>),
    SetKeepalive(f64),
    Speaking(bool),
    Heartbeat,
}
