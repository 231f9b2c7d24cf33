//! Session and emitter errors.

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("a descriptor is already bound, use rebind to swap it")]
    AlreadyBound,

    #[error("rebind requires a descriptor to have been bound first")]
    NoPriorBind,

    #[error("no descriptor is bound to this session")]
    NotBound,

    #[error("grab request refused: {0}")]
    GrabDenied(#[source] io::Error),

    /// No event is available right now. Routine under polling.
    #[error("no event available")]
    WouldBlock,

    #[error("event channel closed")]
    ChannelClosed,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl SessionError {
    /// Whether this is the routine "try again later" outcome.
    pub fn is_would_block(&self) -> bool {
        matches!(self, Self::WouldBlock)
    }

    /// Whether the session must be torn down and rebuilt.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ChannelClosed | Self::Io(_))
    }

    /// Map a channel failure onto the session taxonomy.
    pub(crate) fn from_channel(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock => Self::WouldBlock,
            io::ErrorKind::UnexpectedEof => Self::ChannelClosed,
            _ => Self::Io(err),
        }
    }
}

#[derive(Debug, Error)]
pub enum EmitterError {
    #[error("virtual device creation refused: {0}")]
    CreationDenied(#[source] io::Error),

    #[error("invalid device template: {0}")]
    InvalidTemplate(String),

    #[error("failed to emit event: {0}")]
    EmitFailed(#[source] io::Error),

    /// A trailing synchronization marker was lost earlier; consumers may hold
    /// an uncommitted event, so the emitter refuses further writes.
    #[error("emitter is in an inconsistent state after a failed report marker")]
    Poisoned,
}
