use crate::core::Orientation;
use crate::time::{Duration, Instant};

use super::{ConnectorEvent, DisconnectReason};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    Idle,
    /// Contact is sensed, waiting for the partner to show up
    Detecting,
    /// Partner is present, waiting for orientation and acknowledgement
    Negotiating,
    Connected,
    /// Link is closed, waiting for the partner to acknowledge
    Disconnecting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Input {
    ContactMade,
    ContactLost,
    PartnerPresent,
    OrientationDetected(Orientation),
    PartnerAcknowledged,
    Timeout,
    /// Request to (re)start detection while contact is sensed
    Connect,
    Disconnect,
    LinkFault { consecutive: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    pub presence_timeout: Duration,
    pub negotiation_timeout: Duration,
    pub teardown_timeout: Duration,
    /// Extra presence windows before detection gives up
    pub detect_retries: u8,
    /// Consecutive link faults that tear the connection down
    pub fault_threshold: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            presence_timeout: Duration::from_millis(100),
            negotiation_timeout: Duration::from_millis(500),
            teardown_timeout: Duration::from_millis(50),
            detect_retries: 3,
            fault_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GateAction {
    Enable,
    Disable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerAction {
    Keep,
    Arm(Instant),
    Cancel,
}

/// Result of a single input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Step {
    pub from: State,
    pub to: State,
    pub gate: Option<GateAction>,
    pub timer: TimerAction,
    pub event: Option<ConnectorEvent>,
}

impl Step {
    fn stay(state: State) -> Self {
        Self {
            from: state,
            to: state,
            gate: None,
            timer: TimerAction::Keep,
            event: None,
        }
    }
}

/// Connector lifecycle without side effects
///
/// The machine only computes transitions. The caller applies the returned gate and timer
/// actions and forwards the event.
#[derive(Debug, Clone)]
pub struct StateMachine {
    config: Config,
    state: State,
    contact: bool,
    link_enabled: bool,
    retries: u8,
    detected: Option<Orientation>,
    acknowledged: bool,
    orientation: Option<Orientation>,
    deadline: Option<Instant>,
}

impl StateMachine {
    pub const fn new(config: Config) -> Self {
        Self {
            config,
            state: State::Idle,
            contact: false,
            link_enabled: false,
            retries: 0,
            detected: None,
            acknowledged: false,
            orientation: None,
            deadline: None,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn contact(&self) -> bool {
        self.contact
    }

    /// Orientation of the established connection
    pub fn orientation(&self) -> Option<Orientation> {
        self.orientation
    }

    pub fn is_connected(&self) -> bool {
        self.state == State::Connected
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn handle(&mut self, input: Input, now: Instant) -> Step {
        let mut step = Step::stay(self.state);
        match (self.state, input) {
            (_, Input::ContactLost) => {
                self.contact = false;
                if self.state == State::Connected {
                    step.event = Some(ConnectorEvent::Disconnected(
                        DisconnectReason::ContactLost,
                    ));
                }
                if self.state != State::Idle {
                    self.enter_idle(&mut step);
                }
            }
            (State::Idle, Input::ContactMade) => {
                self.contact = true;
                self.start_detection(&mut step, now);
            }
            (_, Input::ContactMade) => self.contact = true,
            (State::Idle, Input::Connect) if self.contact => self.start_detection(&mut step, now),
            (State::Detecting, Input::PartnerPresent) => {
                self.state = State::Negotiating;
                self.detected = None;
                self.acknowledged = false;
                self.arm(&mut step, now, self.config.negotiation_timeout);
            }
            (State::Detecting, Input::Timeout) if self.deadline.is_some() => {
                if self.retries < self.config.detect_retries {
                    self.retries += 1;
                    self.arm(&mut step, now, self.config.presence_timeout);
                } else {
                    self.enter_idle(&mut step);
                    step.event = Some(ConnectorEvent::DetectionFailed);
                }
            }
            (State::Negotiating, Input::OrientationDetected(orientation)) => {
                self.detected = Some(orientation);
                self.try_connect(&mut step);
            }
            (State::Negotiating, Input::PartnerAcknowledged) => {
                self.acknowledged = true;
                self.try_connect(&mut step);
            }
            (State::Negotiating, Input::Timeout) if self.deadline.is_some() => {
                self.enter_idle(&mut step);
                step.event = Some(ConnectorEvent::NegotiationTimeout);
            }
            (State::Detecting | State::Negotiating, Input::Disconnect) => {
                self.enter_idle(&mut step)
            }
            (State::Connected, Input::Disconnect) => {
                self.start_teardown(&mut step, now, DisconnectReason::Command)
            }
            (State::Connected, Input::LinkFault { consecutive })
                if consecutive >= self.config.fault_threshold =>
            {
                self.start_teardown(&mut step, now, DisconnectReason::LinkFault)
            }
            (State::Disconnecting, Input::PartnerAcknowledged) => self.enter_idle(&mut step),
            (State::Disconnecting, Input::Timeout) if self.deadline.is_some() => {
                self.enter_idle(&mut step)
            }
            (state, input) => trace!("{:?} ignored in {:?}", input, state),
        }
        step.to = self.state;
        if step.from != step.to {
            debug!("connector {:?} -> {:?}", step.from, step.to);
        }
        step
    }

    fn start_detection(&mut self, step: &mut Step, now: Instant) {
        self.state = State::Detecting;
        self.retries = 0;
        self.arm(step, now, self.config.presence_timeout);
    }

    fn try_connect(&mut self, step: &mut Step) {
        if let (Some(orientation), true) = (self.detected, self.acknowledged) {
            self.state = State::Connected;
            self.orientation = Some(orientation);
            self.link_enabled = true;
            self.cancel(step);
            step.gate = Some(GateAction::Enable);
            step.event = Some(ConnectorEvent::Connected(orientation));
        }
    }

    fn start_teardown(&mut self, step: &mut Step, now: Instant, reason: DisconnectReason) {
        self.state = State::Disconnecting;
        self.orientation = None;
        self.close_link(step);
        self.arm(step, now, self.config.teardown_timeout);
        step.event = Some(ConnectorEvent::Disconnected(reason));
    }

    fn enter_idle(&mut self, step: &mut Step) {
        self.state = State::Idle;
        self.retries = 0;
        self.detected = None;
        self.acknowledged = false;
        self.orientation = None;
        self.close_link(step);
        if self.deadline.is_some() {
            self.cancel(step);
        }
    }

    fn close_link(&mut self, step: &mut Step) {
        if self.link_enabled {
            self.link_enabled = false;
            step.gate = Some(GateAction::Disable);
        }
    }

    fn arm(&mut self, step: &mut Step, now: Instant, timeout: Duration) {
        let deadline = now.saturating_add(timeout);
        self.deadline = Some(deadline);
        step.timer = TimerAction::Arm(deadline);
    }

    fn cancel(&mut self, step: &mut Step) {
        self.deadline = None;
        step.timer = TimerAction::Cancel;
    }
}
