//! Typed event sets exchanged with speech providers.

/// Raw events a provider session reports to the adapter layer.
///
/// Backends translate whatever their wire protocol says into these; the
/// recognizer adapter aggregates them into [`RecognizerEvent`]s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    /// The session accepts audio from now on.
    SessionStarted,

    /// Intermediate hypothesis, may be revised.
    Hypothesis(String),

    /// Finalized hypothesis segment, will not be revised.
    Recognized(String),

    /// The provider finished the session gracefully.
    SessionStopped,

    /// The provider aborted the session.
    Canceled(String),
}

/// Events a recognizer session surfaces to its consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognizerEvent {
    /// The push stream accepts audio.
    Ready,

    /// Intermediate transcript for barge-in UX or logging.
    Partial(String),

    /// Terminal event: the accumulated final transcript, emitted exactly
    /// once. Provider callbacks after this are ignored.
    Ended(String),

    /// The provider reported an error. The consumer decides whether the
    /// recognition outcome degrades to an empty transcript.
    Error(String),
}

/// Items of a synthesis chunk stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisEvent {
    /// One PCM chunk in the negotiated output format.
    Chunk(Vec<u8>),

    /// The stream completed; no more chunks follow.
    End,

    /// Synthesis failed; no more chunks follow.
    Error(String),
}
