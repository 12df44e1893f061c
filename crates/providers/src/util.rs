use vg_domain::error::Error;

/// Map a reqwest error onto the agent error kind, classifying transport
/// failures as retriable.
pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Agent {
            message: e.to_string(),
            retriable: e.is_connect() || e.is_request(),
        }
    }
}
