/// RTCAnswerOptions controls how the media engine builds an answer.
#[derive(Default, Debug, PartialEq, Eq, Copy, Clone)]
pub struct RTCAnswerOptions {
    /// voice_activity_detection asks the engine to negotiate VAD for audio lines.
    pub voice_activity_detection: bool,
}

/// RTCOfferOptions controls how the media engine builds an offer.
#[derive(Default, Debug, PartialEq, Eq, Copy, Clone)]
pub struct RTCOfferOptions {
    /// voice_activity_detection asks the engine to negotiate VAD for audio lines.
    pub voice_activity_detection: bool,

    /// ice_restart asks for fresh ICE credentials in the generated offer.
    pub ice_restart: bool,
}
