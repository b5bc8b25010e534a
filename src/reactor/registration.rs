// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Interest sets, registration handles, and the attachment kinds a
//! registration can carry (spec.md §3 "Registration", §4.5.1; SPEC_FULL.md
//! §11 "`Attachment::ReadinessTask` closures").

use crate::error::RegisterError;
use crate::reactor::EventLoop;
use std::fmt;
use std::sync::Arc;

/// Opaque handle identifying a registration on its owning loop's notifier.
pub type Token = mio::Token;

/// The bitmask of operations a registration currently cares about (spec.md
/// §3 "Interest set").
///
/// `CONNECT` and `ACCEPT` are this crate's own bits — `mio` only exposes
/// readable/writable at the OS level, so both map onto one of those two when
/// talking to [`mio::Registry`] (non-blocking connect completion is reported
/// as writable; accept readiness is reported as readable, same as Java NIO's
/// `OP_ACCEPT == OP_READ` sharing).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Interest(u8);

impl Interest {
    pub const READABLE: Self = Self(0b0001);
    pub const WRITABLE: Self = Self(0b0010);
    pub const CONNECT: Self = Self(0b0100);
    pub const ACCEPT: Self = Self(0b1000);

    #[must_use]
    pub const fn empty() -> Self { Self(0) }

    #[must_use]
    pub const fn is_empty(self) -> bool { self.0 == 0 }

    #[must_use]
    pub const fn contains(self, other: Self) -> bool { self.0 & other.0 == other.0 }

    #[must_use]
    pub const fn union(self, other: Self) -> Self { Self(self.0 | other.0) }

    #[must_use]
    pub const fn intersection(self, other: Self) -> Self { Self(self.0 & other.0) }

    #[must_use]
    pub const fn remove(self, other: Self) -> Self { Self(self.0 & !other.0) }

    /// `true` iff `self` is a subset of `valid` (spec.md §6 "Registration").
    #[must_use]
    pub const fn is_subset_of(self, valid: Self) -> bool { self.0 & !valid.0 == 0 }

    /// Maps onto the OS-level readable/writable bits `mio` understands.
    ///
    /// # Panics
    ///
    /// Panics if `self` is empty — callers must reject empty interest sets
    /// before reaching the notifier (spec.md §7 "Invalid-argument").
    #[must_use]
    pub fn to_mio(self) -> mio::Interest {
        let mut out: Option<mio::Interest> = None;
        if self.contains(Self::READABLE) || self.contains(Self::ACCEPT) {
            out = Some(mio::Interest::READABLE);
        }
        if self.contains(Self::WRITABLE) || self.contains(Self::CONNECT) {
            out = Some(out.map_or(mio::Interest::WRITABLE, |i| i.add(mio::Interest::WRITABLE)));
        }
        out.expect("empty Interest must be rejected before reaching to_mio")
    }

    /// Back-translates a fired [`mio::event::Event`] into our bits. Both
    /// readable and writable are reported conservatively as the union of the
    /// bits that could have produced them (the dispatch order in §4.5.1
    /// disambiguates using the registration's own interest mask).
    #[must_use]
    pub fn from_event(event: &mio::event::Event) -> Self {
        let mut ops = Self::empty();
        if event.is_readable() {
            ops = ops.union(Self::READABLE).union(Self::ACCEPT);
        }
        if event.is_writable() {
            ops = ops.union(Self::WRITABLE).union(Self::CONNECT);
        }
        ops
    }
}

impl std::ops::BitOr for Interest {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self { self.union(rhs) }
}

/// A selectable resource that can be handed to [`EventLoop::register`].
///
/// Blanket-implemented for anything `mio` can already register, so a plain
/// `mio::net::TcpStream` works without the caller writing an impl.
pub trait Resource: Send + 'static {
    fn source(&mut self) -> &mut dyn mio::event::Source;

    /// The interest bits this resource can ever be registered for (spec.md
    /// §6 "Registration": the requested interest must be a subset of this).
    /// Types that stand in for a narrower kind of channel (e.g. a listening
    /// socket that will never be writable) should override this; the
    /// blanket impl has no operation-kind metadata to narrow from, so it
    /// permits all four bits.
    #[must_use]
    fn valid_ops(&self) -> Interest {
        Interest::READABLE.union(Interest::WRITABLE).union(Interest::CONNECT).union(Interest::ACCEPT)
    }
}

impl<T> Resource for T
where
    T: mio::event::Source + Send + 'static,
{
    fn source(&mut self) -> &mut dyn mio::event::Source { self }
}

/// Dispatch hooks for the "internal channel" attachment kind (spec.md
/// §4.5.1). The concrete channel/pipeline implementation is out of scope for
/// this crate (spec.md §1 "Out of scope") — this trait is the seam external
/// collaborators implement against.
pub trait ChannelOps: Send {
    /// Called when the connect bit is ready. Implementations should clear
    /// their own interest in the connect bit before returning to avoid a
    /// spin (spec.md §4.5.1).
    ///
    /// # Errors
    ///
    /// Any I/O failure completing the connection.
    fn finish_connect(&mut self) -> std::io::Result<()>;

    /// Called when the write bit is ready.
    ///
    /// # Errors
    ///
    /// Any I/O failure flushing pending writes.
    fn flush(&mut self) -> std::io::Result<()>;

    /// Called when the read/accept bit is ready, or when the fired event
    /// carried no recognizable readiness bits at all (spec.md §4.5.1: "as a
    /// defense against a notifier bug that yields zero-ready entries").
    ///
    /// # Errors
    ///
    /// Any I/O failure reading or accepting.
    fn read_or_accept(&mut self) -> std::io::Result<()>;

    /// Called once the registration is torn down, with the cause if any.
    fn unregistered(&mut self, cause: Option<miette::Report>);
}

/// What a registration is for (spec.md §3 "Registration": "an attachment
/// (either an internal channel object or a user-supplied readiness task)").
pub enum Attachment {
    Channel(Box<dyn ChannelOps>),
    /// SPEC_FULL.md §11: invoked with the fired readiness bits.
    ReadinessTask(Box<dyn FnMut(Interest) + Send>),
}

impl fmt::Debug for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Channel(_) => f.write_str("Attachment::Channel(..)"),
            Self::ReadinessTask(_) => f.write_str("Attachment::ReadinessTask(..)"),
        }
    }
}

/// A live binding between one resource and one loop (spec.md §3
/// "Registration"). Cheap to clone — every clone refers to the same
/// underlying entry.
#[derive(Clone)]
pub struct Registration {
    pub(crate) token: Token,
    pub(crate) loop_ref: Arc<EventLoop>,
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration").field("token", &self.token.0).finish()
    }
}

impl Registration {
    #[must_use]
    pub fn token(&self) -> Token { self.token }

    /// Mutates the interest mask. Takes effect on or before the owning
    /// loop's next notifier iteration (spec.md §6 "Interest-set mutation").
    ///
    /// # Errors
    ///
    /// [`RegisterError::Shutdown`] if the registration has already been
    /// cancelled or the loop has shut down.
    pub fn set_interest(&self, interest: Interest) -> Result<(), RegisterError> {
        self.loop_ref.set_interest(self.token, interest)
    }

    /// Cancels the registration, closing out its attachment.
    ///
    /// # Errors
    ///
    /// [`RegisterError::Shutdown`] if already cancelled.
    pub fn cancel(&self) -> Result<(), RegisterError> { self.loop_ref.cancel(self.token) }
}
