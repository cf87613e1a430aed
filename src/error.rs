use thiserror::Error;

/// Fatal, per-document failures. Anything else downgrades to "try the next
/// strategy" inside the stage that hit it.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("too little text ({chars} non-space chars, need {min})")]
    TooLittleText { chars: usize, min: usize },

    #[error("no `---- PAGE n ----` markers in input")]
    NoPageMarkers,

    #[error("unreadable input: {0}")]
    Unreadable(String),
}
