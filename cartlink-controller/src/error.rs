use thiserror::Error;

/// Controller-level errors.
///
/// The public API only returns these synchronously, for configuration and
/// registration mistakes. Runtime failures (transport flaps, malformed
/// packets, exhausted retries) are absorbed and logged so a long-running
/// controller never halts the fleet over one bad packet.
#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("channel {0} out of range (0..{1})")]
    ChannelOutOfRange(u8, usize),

    #[error("device address space exhausted")]
    AddressSpaceExhausted,

    #[error("controller is not running")]
    Shutdown,
}
