//! Per-session inbox events.
//!
//! Three independent sources feed one call: the switch's call-control
//! events, the RTP receiver, and the speech provider callbacks. All of
//! them are funneled into a single mpsc inbox so the session task is the
//! sole writer of session state and processes one event at a time.

use voxgate_rtp_core::RtpEvent;
use voxgate_speech_core::{RecognizerEvent, SynthesisEvent};

use crate::switch::SwitchEvent;

/// Timers a session arms against itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Hard per-call ceiling; expiry hangs the channel up.
    Session,

    /// Nothing heard after VAD was armed.
    NoInput,

    /// Inter-digit silence that completes keypad input.
    KeypadComplete,

    /// Delay between prompt start and VAD arming.
    VadDelay,
}

/// One message in a session's inbox.
#[derive(Debug)]
pub enum SessionEvent {
    /// Call-control event routed to this channel
    Switch(SwitchEvent),

    /// Media event from the session's RTP receiver
    Rtp(RtpEvent),

    /// Recognition progress from the speech provider
    Recognizer(RecognizerEvent),

    /// Prompt synthesis progress
    Synthesis(SynthesisEvent),

    /// One of the session's own timers fired
    Timer(TimerKind),
}
