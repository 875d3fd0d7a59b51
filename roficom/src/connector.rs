//! Connector lifecycle
//!
//! The connector tracks a mating attempt from the first sensed contact to an established
//! link and back:
//!
//! ```text
//!          ContactMade                PartnerPresent
//!   Idle -------------> Detecting ------------------> Negotiating
//!    ^                     | Timeout x retries            | OrientationDetected
//!    |<--------------------+                              | + PartnerAcknowledged
//!    |                                                    v
//!    |<---- Timeout / PartnerAcknowledged --- Disconnecting <---- Connected
//!    |                                                    Disconnect / LinkFault
//!    +---- ContactLost (from any state)
//! ```
//!
//! [`StateMachine`] is pure: it maps an input and the current time to a [`Step`].
//! [`Connector`] serializes inputs from interrupt handlers and tasks, opens and closes the
//! link through a [`LinkGate`] (usually the framer) and publishes [`ConnectorEvent`]s into a
//! ring buffer. The timeouts are driven by [`Runner`], which must be run for the connector to
//! leave the waiting states on its own.
//!
//! Link faults reach the connector through [`Connector::observe`]. The application passes
//! framer events through it while draining the event queue, and receive failures turn into
//! [`Input::LinkFault`].

use core::cell::RefCell;
use core::task::{Context, Poll};
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::waitqueue::WakerRegistration;

use crate::core::{Orientation, StatusFlags};
use crate::framer::Event;
use crate::ring_buffer::Producer;
use crate::time::Instant;

mod runner;
mod state_machine;

pub use runner::Runner;
pub use state_machine::{Config, GateAction, Input, State, StateMachine, Step, TimerAction};

/// Switch between the connector and the link it guards
pub trait LinkGate {
    fn enable(&self);
    fn disable(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DisconnectReason {
    ContactLost,
    /// Requested through `Input::Disconnect`
    Command,
    LinkFault,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectorEvent {
    Connected(Orientation),
    Disconnected(DisconnectReason),
    /// No partner showed up within the presence retries
    DetectionFailed,
    NegotiationTimeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnectorStatus {
    pub state: State,
    pub contact: bool,
    pub orientation: Option<Orientation>,
}

impl ConnectorStatus {
    pub fn is_connected(&self) -> bool {
        self.state == State::Connected
    }

    /// Mating side bit and orientation field of the status word
    pub fn flags(&self) -> StatusFlags {
        let mut flags = StatusFlags::NONE;
        if self.is_connected() {
            flags.set_orientation(self.orientation);
        }
        flags
    }
}

pub(crate) trait DynamicTimer {
    /// Returns the timer generation and deadline once the generation differs from `seen`
    fn poll_timer(&self, cx: &mut Context<'_>, seen: Option<u32>) -> Poll<(u32, Option<Instant>)>;
    /// Feeds `Timeout` unless the timer was re-armed since `generation`
    fn expire(&self, generation: u32);
}

struct Inner<'a, const E: usize> {
    machine: StateMachine,
    events: Producer<'a, ConnectorEvent, E>,
    timer_generation: u32,
    timer_waker: WakerRegistration,
    dropped_events: u32,
}

/// Connector state machine shared between execution contexts
pub struct Connector<'a, M: RawMutex, const E: usize> {
    gate: &'a (dyn LinkGate + Sync),
    inner: Mutex<M, RefCell<Inner<'a, E>>>,
}

impl<'a, M: RawMutex, const E: usize> Connector<'a, M, E> {
    pub fn new(
        gate: &'a (dyn LinkGate + Sync),
        config: Config,
        events: Producer<'a, ConnectorEvent, E>,
    ) -> Self {
        Self {
            gate,
            inner: Mutex::new(RefCell::new(Inner {
                machine: StateMachine::new(config),
                events,
                timer_generation: 0,
                timer_waker: WakerRegistration::new(),
                dropped_events: 0,
            })),
        }
    }

    /// Feeds an input stamped with the current time.
    pub fn handle(&self, input: Input) -> Step {
        self.handle_at(input, Instant::now())
    }

    /// Feeds an input observed at `now`.
    ///
    /// The transition, the gate action and the event are applied atomically.
    pub fn handle_at(&self, input: Input, now: Instant) -> Step {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            self.apply(&mut inner, input, now)
        })
    }

    /// Feeds a framer event stamped with the current time.
    pub fn observe(&self, event: &Event<'_>) -> Option<Step> {
        self.observe_at(event, Instant::now())
    }

    /// Feeds a framer event observed at `now`.
    ///
    /// Receive failures become `Input::LinkFault`. Other events do not affect the connection.
    pub fn observe_at(&self, event: &Event<'_>, now: Instant) -> Option<Step> {
        match *event {
            Event::ReceiveFailed { consecutive, .. } => {
                Some(self.handle_at(Input::LinkFault { consecutive }, now))
            }
            _ => None,
        }
    }

    pub fn state(&self) -> State {
        self.inner.lock(|inner| inner.borrow().machine.state())
    }

    pub fn status(&self) -> ConnectorStatus {
        self.inner.lock(|inner| {
            let inner = inner.borrow();
            ConnectorStatus {
                state: inner.machine.state(),
                contact: inner.machine.contact(),
                orientation: inner.machine.orientation(),
            }
        })
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.lock(|inner| inner.borrow().machine.deadline())
    }

    /// Number of events lost to a full event queue
    pub fn dropped_events(&self) -> u32 {
        self.inner.lock(|inner| inner.borrow().dropped_events)
    }

    pub fn runner(&self) -> Runner<'_>
    where
        Self: Sync,
    {
        Runner::new(self)
    }

    fn apply(&self, inner: &mut Inner<'a, E>, input: Input, now: Instant) -> Step {
        let step = inner.machine.handle(input, now);
        match step.gate {
            Some(GateAction::Enable) => self.gate.enable(),
            Some(GateAction::Disable) => self.gate.disable(),
            None => {}
        }
        if step.timer != TimerAction::Keep {
            inner.timer_generation = inner.timer_generation.wrapping_add(1);
            inner.timer_waker.wake();
        }
        if let Some(event) = step.event {
            if inner.events.push_back(event).is_err() {
                inner.dropped_events = inner.dropped_events.wrapping_add(1);
                warn!("connector event queue full, {:?} dropped", event);
            }
        }
        step
    }
}

impl<M: RawMutex, const E: usize> DynamicTimer for Connector<'_, M, E> {
    fn poll_timer(&self, cx: &mut Context<'_>, seen: Option<u32>) -> Poll<(u32, Option<Instant>)> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            if seen == Some(inner.timer_generation) {
                inner.timer_waker.register(cx.waker());
                Poll::Pending
            } else {
                Poll::Ready((inner.timer_generation, inner.machine.deadline()))
            }
        })
    }

    fn expire(&self, generation: u32) {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            if inner.timer_generation == generation {
                self.apply(&mut inner, Input::Timeout, Instant::now());
            }
        })
    }
}
