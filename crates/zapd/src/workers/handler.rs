//! The hook workers call for every received request.

use super::HandlerError;

/// Handles the bytes read from one connection.
///
/// Returning `Ok(Some(bytes))` writes `bytes` back before the connection is
/// closed; `Ok(None)` closes it without a reply. Implementations are shared by
/// every thread unit and copied into every process unit.
#[cfg_attr(test, mockall::automock)]
pub trait RequestHandler: Send + Sync + 'static {
    /// Handles one request.
    fn handle(&self, request: &[u8]) -> Result<Option<Vec<u8>>, HandlerError>;
}
