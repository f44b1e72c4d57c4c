//! Message envelopes
//!
//! One envelope carries one unit of work from a producer to the worker,
//! regardless of whether it originated at the microphone, the keyboard, or a
//! chat room. Envelopes are immutable and consumed exactly once.

/// Origin channel of an envelope
///
/// Determines output routing and whether transcript filtering applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Wake-word triggered microphone capture
    Voice,
    /// Typed terminal input
    Keyboard,
    /// Remote chat message (Matrix)
    Chat,
}

impl Source {
    /// Lowercase name for log fields
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Voice => "voice",
            Self::Keyboard => "keyboard",
            Self::Chat => "chat",
        }
    }
}

/// Encoding of an audio payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClipEncoding {
    /// Raw PCM, int16 little-endian, mono
    Pcm16 {
        /// Sample rate in Hz
        sample_rate: u32,
    },
    /// A complete audio file (OGG, MP3, M4A, ...) as downloaded
    Container {
        /// Filename hint for MIME detection at the STT API
        filename: String,
    },
}

/// An audio payload awaiting transcription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    /// Audio bytes in the given encoding
    pub data: Vec<u8>,
    /// How `data` is encoded
    pub encoding: ClipEncoding,
}

impl AudioClip {
    /// Create a raw PCM clip (int16 mono)
    #[must_use]
    pub fn pcm(data: Vec<u8>, sample_rate: u32) -> Self {
        Self {
            data,
            encoding: ClipEncoding::Pcm16 { sample_rate },
        }
    }

    /// Create a container-format clip (chat voice note)
    #[must_use]
    pub fn file(data: Vec<u8>, filename: String) -> Self {
        Self {
            data,
            encoding: ClipEncoding::Container { filename },
        }
    }

    /// Decoded duration in seconds, where computable
    ///
    /// Only raw PCM carries enough information to compute a duration without
    /// decoding; container clips return `None`.
    #[must_use]
    pub fn duration_secs(&self) -> Option<f32> {
        match &self.encoding {
            ClipEncoding::Pcm16 { sample_rate } => {
                #[allow(clippy::cast_precision_loss)]
                Some(self.data.len() as f32 / 2.0 / *sample_rate as f32)
            }
            ClipEncoding::Container { .. } => None,
        }
    }
}

/// Payload of an envelope: text or not-yet-transcribed audio
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Ready-to-process UTF-8 text
    Text(String),
    /// Audio the worker must transcribe first
    Audio(AudioClip),
}

/// One unit of work flowing through the queue
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Origin channel
    pub source: Source,
    /// Text or audio content
    pub payload: Payload,
    /// Chat-room identifier, present only for `Source::Chat`
    pub channel_ref: Option<String>,
    /// Originating user identifier, present only for `Source::Chat`
    pub sender_ref: Option<String>,
}

impl Envelope {
    /// A voice capture ready for transcription
    #[must_use]
    pub fn voice_audio(data: Vec<u8>, sample_rate: u32) -> Self {
        Self {
            source: Source::Voice,
            payload: Payload::Audio(AudioClip::pcm(data, sample_rate)),
            channel_ref: None,
            sender_ref: None,
        }
    }

    /// A submitted line of typed input
    #[must_use]
    pub fn keyboard_text(text: String) -> Self {
        Self {
            source: Source::Keyboard,
            payload: Payload::Text(text),
            channel_ref: None,
            sender_ref: None,
        }
    }

    /// A chat text message with reply-routing metadata
    #[must_use]
    pub fn chat_text(text: String, room_id: String, sender: String) -> Self {
        Self {
            source: Source::Chat,
            payload: Payload::Text(text),
            channel_ref: Some(room_id),
            sender_ref: Some(sender),
        }
    }

    /// A chat voice note awaiting transcription
    #[must_use]
    pub fn chat_audio(clip: AudioClip, room_id: String, sender: String) -> Self {
        Self {
            source: Source::Chat,
            payload: Payload::Audio(clip),
            channel_ref: Some(room_id),
            sender_ref: Some(sender),
        }
    }

    /// Whether the payload is audio
    #[must_use]
    pub const fn is_audio(&self) -> bool {
        matches!(self.payload, Payload::Audio(_))
    }
}
