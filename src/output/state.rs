//! Recording state machine
//!
//! [`State::apply`] is the only way a recording changes state. It consumes
//! the current state and one [`Message`], performs the message's side
//! effects through a [`Muxer`], and returns the next state. It reads no
//! clocks and holds no locks, so the same inputs against equally-behaving
//! muxers always yield the same state.
//!
//! Pause and resume marks come from a wall clock while media timestamps come
//! from the producer. The accumulated `offset` (sum of resume minus pause
//! marks) is subtracted from every later timestamp so the file has no gap.

use serde::{Deserialize, Serialize};

use crate::buffer::PixelBuffer;
use crate::errors::WriterError;
use crate::session::AudioSamples;

/// Side effects of the state machine, backed by a container writer
pub trait Muxer {
    fn start_session(&mut self, time: f64);

    fn end_session(&mut self, time: f64);

    /// `Ok(false)` means the writer was not ready and the buffer was skipped
    fn append_video(&mut self, buffer: &PixelBuffer, time: f64) -> Result<bool, WriterError>;

    fn append_audio(&mut self, samples: &AudioSamples, time: f64) -> Result<bool, WriterError>;

    fn finish(&mut self) -> Result<(), WriterError>;

    fn cancel(&mut self);
}

#[derive(Debug, Clone)]
pub enum Message {
    /// The writer finished opening
    Opened(Result<(), WriterError>),
    Resume { mark: f64 },
    Pause { mark: f64 },
    Finish,
    Cancel,
    Video { buffer: PixelBuffer, time: f64 },
    Audio { samples: AudioSamples },
}

#[derive(Debug, Clone, PartialEq)]
pub enum State {
    /// Writer is being opened
    Starting { cancel_pending: bool },
    /// Writer open, waiting for the first resume
    Ready,
    /// Resumed, waiting for the first video buffer to open the session
    Preparing,
    Recording {
        /// Corrected time of the last appended video buffer
        last_time: f64,
        offset: f64,
        pause_mark: Option<f64>,
        resume_mark: Option<f64>,
        session_open: bool,
    },
    Paused {
        last_time: f64,
        offset: f64,
        pause_mark: f64,
    },
    Canceled,
    Finished,
    Failed(WriterError),
}

/// State as exposed on a recording handle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordingState {
    Starting,
    Ready,
    Preparing,
    Recording,
    Paused,
    Canceled,
    Finished,
    Failed(WriterError),
}

impl RecordingState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RecordingState::Canceled | RecordingState::Finished | RecordingState::Failed(_)
        )
    }

    pub fn error(&self) -> Option<&WriterError> {
        match self {
            RecordingState::Failed(error) => Some(error),
            _ => None,
        }
    }
}

impl State {
    pub fn new() -> Self {
        State::Starting {
            cancel_pending: false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Canceled | State::Finished | State::Failed(_))
    }

    pub fn public(&self) -> RecordingState {
        match self {
            State::Starting { .. } => RecordingState::Starting,
            State::Ready => RecordingState::Ready,
            State::Preparing => RecordingState::Preparing,
            State::Recording { .. } => RecordingState::Recording,
            State::Paused { .. } => RecordingState::Paused,
            State::Canceled => RecordingState::Canceled,
            State::Finished => RecordingState::Finished,
            State::Failed(error) => RecordingState::Failed(error.clone()),
        }
    }

    /// Accumulated pause time subtracted from incoming timestamps
    pub fn offset(&self) -> f64 {
        match self {
            State::Recording { offset, .. } | State::Paused { offset, .. } => *offset,
            _ => 0.0,
        }
    }

    pub fn apply(self, message: Message, muxer: &mut dyn Muxer) -> State {
        if self.is_terminal() {
            return self;
        }

        match (self, message) {
            (State::Starting { cancel_pending }, Message::Opened(result)) => match result {
                Err(error) => State::Failed(error),
                Ok(()) if cancel_pending => State::Canceled,
                Ok(()) => State::Ready,
            },
            (State::Starting { .. }, Message::Cancel) => State::Starting {
                cancel_pending: true,
            },
            (State::Starting { .. }, Message::Finish) => State::Canceled,
            (state @ State::Starting { .. }, _) => state,

            (State::Ready, Message::Resume { .. }) => State::Preparing,
            (State::Ready | State::Preparing, Message::Pause { .. }) => State::Ready,
            (State::Ready | State::Preparing, Message::Finish | Message::Cancel) => State::Canceled,
            (State::Preparing, Message::Video { buffer, time }) => {
                muxer.start_session(time);
                match muxer.append_video(&buffer, time) {
                    Err(error) => State::Failed(error),
                    Ok(_) => State::Recording {
                        last_time: time,
                        offset: 0.0,
                        pause_mark: None,
                        resume_mark: None,
                        session_open: true,
                    },
                }
            }
            (state @ (State::Ready | State::Preparing), _) => state,

            (
                State::Recording {
                    last_time,
                    offset,
                    pause_mark,
                    resume_mark,
                    session_open,
                },
                message,
            ) => match message {
                Message::Video { buffer, time } => {
                    let corrected = time - offset;
                    if corrected < last_time {
                        log::warn!(
                            "Dropping video buffer at {:.3}s, behind last append at {:.3}s",
                            corrected,
                            last_time
                        );
                        return State::Recording {
                            last_time,
                            offset,
                            pause_mark,
                            resume_mark,
                            session_open,
                        };
                    }
                    if !session_open {
                        muxer.start_session(corrected);
                    }
                    match muxer.append_video(&buffer, corrected) {
                        Err(error) => State::Failed(error),
                        Ok(appended) => State::Recording {
                            last_time: if appended { corrected } else { last_time },
                            offset,
                            pause_mark,
                            resume_mark,
                            session_open: true,
                        },
                    }
                }
                Message::Audio { samples } if session_open => {
                    match muxer.append_audio(&samples, samples.timestamp - offset) {
                        Err(error) => State::Failed(error),
                        Ok(_) => State::Recording {
                            last_time,
                            offset,
                            pause_mark,
                            resume_mark,
                            session_open,
                        },
                    }
                }
                Message::Pause { mark } => {
                    if session_open {
                        muxer.end_session(last_time);
                    }
                    State::Paused {
                        last_time,
                        offset,
                        pause_mark: mark,
                    }
                }
                Message::Finish => {
                    if session_open {
                        muxer.end_session(last_time);
                    }
                    match muxer.finish() {
                        Ok(()) => State::Finished,
                        Err(error) => State::Failed(error),
                    }
                }
                Message::Cancel => {
                    muxer.cancel();
                    State::Canceled
                }
                Message::Audio { .. }
                | Message::Resume { .. }
                | Message::Opened(_) => State::Recording {
                    last_time,
                    offset,
                    pause_mark,
                    resume_mark,
                    session_open,
                },
            },

            (
                State::Paused {
                    last_time,
                    offset,
                    pause_mark,
                },
                message,
            ) => match message {
                Message::Resume { mark } => State::Recording {
                    last_time,
                    offset: offset + (mark - pause_mark),
                    pause_mark: Some(pause_mark),
                    resume_mark: Some(mark),
                    session_open: false,
                },
                Message::Finish => match muxer.finish() {
                    Ok(()) => State::Finished,
                    Err(error) => State::Failed(error),
                },
                Message::Cancel => {
                    muxer.cancel();
                    State::Canceled
                }
                _ => State::Paused {
                    last_time,
                    offset,
                    pause_mark,
                },
            },

            (state, _) => state,
        }
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}
