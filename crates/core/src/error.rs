#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Job input was missing, empty, or not decodable. The payload is the
    /// message reported back to the caller verbatim.
    #[error("{0}")]
    Validation(String),
}
