//! Encapsulates a network interface card.
//!
//! The stack only ever talks to the hardware through the [`Driver`] trait. A driver transmits
//! complete Ethernet frames handed to it as a [`Buf`] and reports its address, MTU and link
//! state. Received frames and link changes flow the other way: the event loop owning the driver
//! calls [`Stack::recv_frame`], [`Stack::link_changed`] and [`Stack::tx_ready`].
//!
//! Also permits software emulation of one, see [`Loopback`].
//!
//! [`Driver`]: trait.Driver.html
//! [`Buf`]: ../buf/struct.Buf.html
//! [`Loopback`]: loopback/struct.Loopback.html
//! [`Stack::recv_frame`]: ../stack/struct.Stack.html#method.recv_frame
//! [`Stack::link_changed`]: ../stack/struct.Stack.html#method.link_changed
//! [`Stack::tx_ready`]: ../stack/struct.Stack.html#method.tx_ready
pub mod loopback;

use crate::buf::Buf;
use crate::layer::IpErr;
use crate::wire::EthernetAddress;

pub use self::loopback::Loopback;

/// The state of the physical link.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LinkState {
    /// Frames can be sent.
    Up,
    /// Every send fails with `IpErr::LinkDown`.
    Down,
}

/// A layer 2 device.
pub trait Driver {
    /// Transmit one complete Ethernet frame, starting with its header.
    ///
    /// The frame borrows memory of the caller and is only valid during the call, the driver must
    /// copy it out or finish the transmission before returning. Expected failures are
    /// `BufferFull` when no transmit capacity is left, `LinkDown` and `HwError`. A driver that
    /// returned `BufferFull` should arrange for `Stack::tx_ready` to be called once capacity is
    /// available again.
    fn send_frame(&mut self, frame: Buf<'_>) -> Result<(), IpErr>;

    /// The hardware address of the interface.
    fn mac_addr(&self) -> EthernetAddress;

    /// The largest Ethernet payload the link can carry, i.e. the IP MTU.
    fn link_mtu(&self) -> usize;

    /// The current state of the link.
    fn link_state(&self) -> LinkState;
}

impl<D: Driver + ?Sized> Driver for &'_ mut D {
    fn send_frame(&mut self, frame: Buf<'_>) -> Result<(), IpErr> {
        (**self).send_frame(frame)
    }

    fn mac_addr(&self) -> EthernetAddress {
        (**self).mac_addr()
    }

    fn link_mtu(&self) -> usize {
        (**self).link_mtu()
    }

    fn link_state(&self) -> LinkState {
        (**self).link_state()
    }
}

impl Default for LinkState {
    fn default() -> Self {
        LinkState::Up
    }
}
