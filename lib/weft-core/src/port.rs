//! Port channel primitives.
//!
//! Ports are the only way a process exchanges data with the rest of a
//! network. An [`OutputPort`] is the unique sending end of an edge and an
//! [`InputPort`] is the unique receiving end. Channels are FIFO and bounded;
//! closure is signalled by dropping the sending half, which receivers
//! observe as a final `None` once the channel drains.

use std::any::{type_name, Any, TypeId};

use snafu::Snafu;
use tokio::sync::mpsc;

/// A port-level error.
#[derive(Debug, Snafu, Eq, PartialEq)]
#[snafu(context(suffix(false)))]
pub enum PortError {
    /// The port has no channel attached.
    #[snafu(display("port is not bound to a channel"))]
    Unbound,

    /// The port already has a channel attached.
    #[snafu(display("port is already bound to a channel"))]
    AlreadyBound,

    /// The receiving half of the channel is gone.
    #[snafu(display("receiving half of the channel is closed"))]
    Closed,

    /// The supplied channel or value does not carry the port's element type.
    #[snafu(display("payload type mismatch: port carries '{}'", expected))]
    PayloadMismatch {
        /// Element type the port carries.
        expected: &'static str,
    },
}

/// The receiving endpoint of a port channel.
#[derive(Debug)]
pub struct InputPort<T> {
    rx: Option<mpsc::Receiver<T>>,
}

impl<T> InputPort<T> {
    /// Creates an input port with no channel attached.
    ///
    /// An unbound input behaves as permanently closed: [`recv`][Self::recv]
    /// returns `None` immediately. This is how a process handles an input
    /// the graph never wired.
    pub fn unbound() -> Self {
        Self { rx: None }
    }

    /// Creates an input port reading from the given channel.
    pub fn bound(rx: mpsc::Receiver<T>) -> Self {
        Self { rx: Some(rx) }
    }

    /// Returns whether a channel is attached.
    pub fn is_bound(&self) -> bool {
        self.rx.is_some()
    }

    /// Receives the next value.
    ///
    /// Returns `None` once the channel is closed and drained, or right away
    /// if the port was never bound.
    pub async fn recv(&mut self) -> Option<T> {
        match self.rx.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }
}

impl<T> Default for InputPort<T> {
    fn default() -> Self {
        Self::unbound()
    }
}

/// The sending endpoint of a port channel.
///
/// The output port owns the only sender for its edge, so dropping the port
/// (or calling [`close`][Self::close]) is the one-shot closure signal the
/// downstream process observes.
#[derive(Debug)]
pub struct OutputPort<T> {
    tx: Option<mpsc::Sender<T>>,
}

impl<T> OutputPort<T> {
    /// Creates an output port with no channel attached.
    pub fn unbound() -> Self {
        Self { tx: None }
    }

    /// Creates an output port writing to the given channel.
    pub fn bound(tx: mpsc::Sender<T>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Returns whether a channel is attached.
    pub fn is_bound(&self) -> bool {
        self.tx.is_some()
    }

    /// Sends a value, waiting for channel capacity if necessary.
    ///
    /// # Errors
    ///
    /// Returns `PortError::Unbound` if no channel is attached, and
    /// `PortError::Closed` if the receiving half has been dropped.
    pub async fn send(&self, value: T) -> Result<(), PortError> {
        match self.tx.as_ref() {
            Some(tx) => tx.send(value).await.map_err(|_| PortError::Closed),
            None => Err(PortError::Unbound),
        }
    }

    /// Closes the port, signalling downstream that no more values follow.
    ///
    /// Dropping the port has the same effect; `close` exists for processes
    /// that want to signal completion before they return.
    pub fn close(&mut self) {
        self.tx = None;
    }
}

impl<T> Default for OutputPort<T> {
    fn default() -> Self {
        Self::unbound()
    }
}

/// Type-erased handle to an input port.
///
/// The graph wires edges, external channels, and initial packets through
/// this trait without knowing the port's element type; downcasting at the
/// binding seam replaces the runtime reflection a dynamically typed
/// implementation would use.
pub trait InputBind: Send {
    /// Returns whether a channel is attached.
    fn is_bound(&self) -> bool;

    /// Returns the `TypeId` of the element type.
    fn element_type(&self) -> TypeId;

    /// Returns the element type's name, for error reporting.
    fn element_type_name(&self) -> &'static str;

    /// Attaches a boxed `mpsc::Receiver<T>` to the port.
    ///
    /// # Errors
    ///
    /// Fails with `AlreadyBound` if a channel is attached, or
    /// `PayloadMismatch` if the receiver does not carry the element type.
    fn bind(&mut self, receiver: Box<dyn Any + Send>) -> Result<(), PortError>;

    /// Detaches the current channel, if any.
    fn unbind(&mut self);

    /// Returns whether the given value is of the port's element type.
    fn accepts(&self, value: &dyn Any) -> bool;

    /// Delivers an initial packet.
    ///
    /// Binds a fresh single-capacity channel, sends the value, and drops the
    /// sender, so the receiver observes exactly one value followed by
    /// closure.
    ///
    /// # Errors
    ///
    /// Fails with `AlreadyBound` if a channel is attached, or
    /// `PayloadMismatch` if the value is not of the element type.
    fn deliver(&mut self, value: Box<dyn Any + Send>) -> Result<(), PortError>;
}

impl<T> InputBind for InputPort<T>
where
    T: Send + 'static,
{
    fn is_bound(&self) -> bool {
        self.rx.is_some()
    }

    fn element_type(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn element_type_name(&self) -> &'static str {
        type_name::<T>()
    }

    fn bind(&mut self, receiver: Box<dyn Any + Send>) -> Result<(), PortError> {
        if self.rx.is_some() {
            return Err(PortError::AlreadyBound);
        }

        let receiver = receiver
            .downcast::<mpsc::Receiver<T>>()
            .map_err(|_| PortError::PayloadMismatch {
                expected: type_name::<T>(),
            })?;
        self.rx = Some(*receiver);
        Ok(())
    }

    fn unbind(&mut self) {
        self.rx = None;
    }

    fn accepts(&self, value: &dyn Any) -> bool {
        value.is::<T>()
    }

    fn deliver(&mut self, value: Box<dyn Any + Send>) -> Result<(), PortError> {
        if self.rx.is_some() {
            return Err(PortError::AlreadyBound);
        }

        let value = value.downcast::<T>().map_err(|_| PortError::PayloadMismatch {
            expected: type_name::<T>(),
        })?;

        let (tx, rx) = mpsc::channel(1);
        tx.try_send(*value)
            .unwrap_or_else(|_| unreachable!("fresh single-capacity channel"));
        self.rx = Some(rx);

        // The sender drops here, closing the channel behind the one value.
        Ok(())
    }
}

/// Type-erased handle to an output port.
pub trait OutputBind: Send {
    /// Returns whether a channel is attached.
    fn is_bound(&self) -> bool;

    /// Returns the `TypeId` of the element type.
    fn element_type(&self) -> TypeId;

    /// Returns the element type's name, for error reporting.
    fn element_type_name(&self) -> &'static str;

    /// Creates a channel of the given capacity, attaches the sending half to
    /// the port, and returns the boxed `mpsc::Receiver<T>` for the other
    /// endpoint.
    ///
    /// # Errors
    ///
    /// Fails with `AlreadyBound` if a channel is attached.
    fn open(&mut self, capacity: usize) -> Result<Box<dyn Any + Send>, PortError>;

    /// Attaches a boxed `mpsc::Sender<T>` supplied by an embedder.
    ///
    /// # Errors
    ///
    /// Fails with `AlreadyBound` if a channel is attached, or
    /// `PayloadMismatch` if the sender does not carry the element type.
    fn bind(&mut self, sender: Box<dyn Any + Send>) -> Result<(), PortError>;

    /// Detaches the current channel, if any.
    fn unbind(&mut self);
}

impl<T> OutputBind for OutputPort<T>
where
    T: Send + 'static,
{
    fn is_bound(&self) -> bool {
        self.tx.is_some()
    }

    fn element_type(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn element_type_name(&self) -> &'static str {
        type_name::<T>()
    }

    fn open(&mut self, capacity: usize) -> Result<Box<dyn Any + Send>, PortError> {
        if self.tx.is_some() {
            return Err(PortError::AlreadyBound);
        }

        let (tx, rx) = mpsc::channel(capacity);
        self.tx = Some(tx);
        Ok(Box::new(rx))
    }

    fn bind(&mut self, sender: Box<dyn Any + Send>) -> Result<(), PortError> {
        if self.tx.is_some() {
            return Err(PortError::AlreadyBound);
        }

        let sender = sender
            .downcast::<mpsc::Sender<T>>()
            .map_err(|_| PortError::PayloadMismatch {
                expected: type_name::<T>(),
            })?;
        self.tx = Some(*sender);
        Ok(())
    }

    fn unbind(&mut self) {
        self.tx = None;
    }
}
