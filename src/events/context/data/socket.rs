use crate::ws::Error as WsError;

/// The signalling channel failed or was closed by the server.
#[derive(Debug)]
#[non_exhaustive]
pub struct SocketErrorData<'a> {
    /// Cause of the failure.
    pub error: &'a WsError,
    /// Whether the driver will try to resume the session, rather than
    /// identify afresh.
    pub will_resume: bool,
}
